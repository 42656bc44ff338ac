use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::Value;

#[derive(Debug, Clone)]
pub struct OpenAiStubConfig {
    pub coherence_score: f64,
    pub subtitle: String,
    pub section_heading: String,
}

impl Default for OpenAiStubConfig {
    fn default() -> Self {
        Self {
            coherence_score: 0.95,
            subtitle: "Stub subtitle".to_owned(),
            section_heading: "Stub Section".to_owned(),
        }
    }
}

pub struct OpenAiStub {
    pub base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl OpenAiStub {
    pub fn spawn(config: OpenAiStubConfig) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start openai stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}/v1");

        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let path = request.url().to_string();
                if request.method() != &tiny_http::Method::Post {
                    let _ = request.respond(
                        tiny_http::Response::from_string("not found").with_status_code(404),
                    );
                    continue;
                }

                let mut body = String::new();
                if request.as_reader().read_to_string(&mut body).is_err() {
                    let _ = request.respond(
                        tiny_http::Response::from_string("invalid request body")
                            .with_status_code(400),
                    );
                    continue;
                }

                let parsed: Value = match serde_json::from_str(&body) {
                    Ok(value) => value,
                    Err(_) => {
                        let _ = request.respond(
                            tiny_http::Response::from_string("invalid json").with_status_code(400),
                        );
                        continue;
                    }
                };

                let response_body = match path.as_str() {
                    "/v1/responses" => {
                        let Some(prompt) = parsed.get("input").and_then(|v| v.as_str()) else {
                            let _ = request.respond(
                                tiny_http::Response::from_string("missing input")
                                    .with_status_code(400),
                            );
                            continue;
                        };
                        let Some(output_text) = respond_to_prompt(prompt, &config) else {
                            let _ = request.respond(
                                tiny_http::Response::from_string("unknown prompt mode")
                                    .with_status_code(400),
                            );
                            continue;
                        };
                        seen.lock().expect("lock requests").push(mode_of(prompt).to_owned());
                        serde_json::json!({
                            "id": "resp_stub",
                            "object": "response",
                            "model": parsed.get("model").cloned().unwrap_or(Value::String("stub-model".to_owned())),
                            "output": [
                                {
                                    "type": "message",
                                    "role": "assistant",
                                    "content": [
                                        { "type": "output_text", "text": output_text }
                                    ]
                                }
                            ],
                            "output_text": output_text
                        })
                    }
                    "/v1/embeddings" => {
                        let inputs = parsed
                            .get("input")
                            .and_then(|v| v.as_array())
                            .cloned()
                            .unwrap_or_default();
                        seen.lock().expect("lock requests").push("embeddings".to_owned());
                        let data = inputs
                            .iter()
                            .enumerate()
                            .rev()
                            .map(|(index, _)| {
                                serde_json::json!({
                                    "object": "embedding",
                                    "index": index,
                                    "embedding": [1.0, 0.0, 0.0],
                                })
                            })
                            .collect::<Vec<_>>();
                        serde_json::json!({ "object": "list", "data": data })
                    }
                    _ => {
                        let _ = request.respond(
                            tiny_http::Response::from_string("not found").with_status_code(404),
                        );
                        continue;
                    }
                };

                let mut response = tiny_http::Response::from_string(response_body.to_string())
                    .with_status_code(200);
                let header =
                    tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                        .expect("build header");
                response = response.with_header(header);
                let _ = request.respond(response);
            }
        });

        Self {
            base_url,
            requests,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Prompt modes (or `embeddings`) in the order the stub served them.
    #[allow(dead_code)]
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("lock requests").clone()
    }
}

impl Drop for OpenAiStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn extract_between<'a>(text: &'a str, begin: &str, end: &str) -> Option<&'a str> {
    let start = text.find(begin)? + begin.len();
    let rest = &text[start..];
    let end_rel = rest.find(end)?;
    Some(&rest[..end_rel])
}

const MODES: &[&str] = &[
    "BEGIN_COHERENCE_INPUT_JSON",
    "BEGIN_CODE_SNIPPET",
    "BEGIN_SECTION_DOCUMENT",
    "BEGIN_QA_PAIR",
    "BEGIN_SUBTITLE_CLUSTER",
    "BEGIN_CANDIDATE_SECTIONS",
    "BEGIN_SECTION_TO_EDIT",
    "BEGIN_ANSWER",
    "BEGIN_QUESTION",
];

fn mode_of(prompt: &str) -> &'static str {
    MODES
        .iter()
        .find(|marker| prompt.contains(**marker))
        .copied()
        .unwrap_or("unknown")
}

fn respond_to_prompt(prompt: &str, config: &OpenAiStubConfig) -> Option<String> {
    match mode_of(prompt) {
        "BEGIN_COHERENCE_INPUT_JSON" => Some(
            serde_json::json!({ "score": config.coherence_score, "reason": "stub" }).to_string(),
        ),
        "BEGIN_CODE_SNIPPET" => Some("Stub description".to_owned()),
        "BEGIN_SECTION_DOCUMENT" => {
            let current = extract_between(prompt, "BEGIN_SECTION_DOCUMENT\n", "\nEND_SECTION_DOCUMENT")?;
            let answer = extract_between(prompt, "BEGIN_ANSWER\n", "\nEND_ANSWER")?;
            Some(format!("{current}\n\n{answer}"))
        }
        "BEGIN_QA_PAIR" => Some(config.subtitle.clone()),
        "BEGIN_SUBTITLE_CLUSTER" => Some(config.section_heading.clone()),
        "BEGIN_CANDIDATE_SECTIONS" => {
            let candidates =
                extract_between(prompt, "BEGIN_CANDIDATE_SECTIONS\n", "\nEND_CANDIDATE_SECTIONS")?;
            let first = candidates.lines().next()?;
            Some(first.split(':').next()?.trim().to_owned())
        }
        "BEGIN_SECTION_TO_EDIT" => {
            let marker = extract_between(prompt, "BEGIN_PLACEHOLDER\n", "\nEND_PLACEHOLDER")?;
            let text = extract_between(prompt, "BEGIN_SECTION_TO_EDIT\n", "\nEND_SECTION_TO_EDIT")?;
            Some(text.replace(marker, ""))
        }
        "BEGIN_ANSWER" => extract_between(prompt, "BEGIN_ANSWER\n", "\nEND_ANSWER").map(str::to_owned),
        "BEGIN_QUESTION" => {
            extract_between(prompt, "BEGIN_QUESTION\n", "\nEND_QUESTION").map(str::to_owned)
        }
        _ => None,
    }
}
