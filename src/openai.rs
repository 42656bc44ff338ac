use std::time::Duration;

use anyhow::Context as _;

use crate::llm::LanguageModel;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

const INSTRUCTIONS: &str = "You are an assistant that helps developers turn chat conversations \
into technical blog posts. Follow the task in the input exactly and output only what it asks for.";

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
    pub temperature: f32,
    pub retries: u32,
    pub timeout: Duration,
}

impl OpenAiConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY is not set"))?;
        let base_url = std::env::var("TECHNOTE_OPENAI_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_BASE_URL.to_owned());
        url::Url::parse(&base_url)
            .with_context(|| format!("parse TECHNOTE_OPENAI_BASE_URL: {base_url}"))?;
        let model =
            std::env::var("TECHNOTE_OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_owned());
        let embedding_model = std::env::var("TECHNOTE_OPENAI_EMBEDDING_MODEL")
            .unwrap_or_else(|_| DEFAULT_EMBEDDING_MODEL.to_owned());
        let temperature = match std::env::var("TECHNOTE_OPENAI_TEMPERATURE") {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("parse TECHNOTE_OPENAI_TEMPERATURE: {raw}"))?,
            Err(_) => 0.0,
        };
        let retries = match std::env::var("TECHNOTE_OPENAI_RETRIES") {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("parse TECHNOTE_OPENAI_RETRIES: {raw}"))?,
            Err(_) => 2,
        };

        Ok(Self {
            api_key,
            base_url,
            model,
            embedding_model,
            temperature,
            retries,
            timeout: Duration::from_secs(300),
        })
    }

    pub fn endpoint(&self, path: &str) -> String {
        let base_url = self.base_url.trim_end_matches('/');
        format!("{base_url}/{path}")
    }

    pub(crate) fn http_client(&self) -> anyhow::Result<reqwest::blocking::Client> {
        reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .context("build http client")
    }
}

pub struct OpenAiModel {
    client: reqwest::blocking::Client,
    config: OpenAiConfig,
}

impl OpenAiModel {
    pub fn new(config: OpenAiConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: config.http_client()?,
            config,
        })
    }
}

impl LanguageModel for OpenAiModel {
    fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        let mut body = serde_json::json!({
            "model": self.config.model,
            "instructions": INSTRUCTIONS,
            "input": prompt,
            "text": { "format": { "type": "text" } },
            "store": false,
        });

        // NOTE: Some GPT-5 models reject sampling params like `temperature`.
        if !self.config.model.starts_with("gpt-5")
            && let Some(obj) = body.as_object_mut()
        {
            obj.insert(
                "temperature".to_owned(),
                serde_json::json!(self.config.temperature),
            );
        }

        let endpoint = self.config.endpoint("responses");
        let value = post_json_with_retries(&self.client, &self.config, &endpoint, &body)?;
        extract_output_text(&value).context("extract output text")
    }
}

/// POSTs `body` and returns the parsed JSON response.
///
/// HTTP 429, 5xx and transport errors are retried with exponential backoff;
/// any other non-success status fails immediately.
pub(crate) fn post_json_with_retries(
    client: &reqwest::blocking::Client,
    config: &OpenAiConfig,
    endpoint: &str,
    body: &serde_json::Value,
) -> anyhow::Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=config.retries {
        if attempt > 0 {
            let delay = Duration::from_millis(500 << (attempt - 1).min(5));
            tracing::warn!(
                endpoint,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retrying OpenAI request"
            );
            std::thread::sleep(delay);
        }

        let response = match client
            .post(endpoint)
            .bearer_auth(&config.api_key)
            .json(body)
            .send()
        {
            Ok(response) => response,
            Err(err) => {
                last_err = Some(anyhow::Error::new(err).context(format!("POST {endpoint}")));
                continue;
            }
        };

        let status = response.status();
        let raw = match response.text() {
            Ok(raw) => raw,
            Err(err) => {
                last_err = Some(
                    anyhow::Error::new(err).context(format!("read response body from {endpoint}")),
                );
                continue;
            }
        };
        if status.is_success() {
            return serde_json::from_str(&raw).context("parse OpenAI response");
        }

        let message = parse_error_message(&raw).unwrap_or(raw);
        let err = anyhow::anyhow!("OpenAI API error ({status}): {message}");
        if status.as_u16() == 429 || status.is_server_error() {
            last_err = Some(err);
            continue;
        }
        return Err(err);
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("OpenAI request failed after retries")))
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    let message = value.get("error")?.get("message")?.as_str()?.to_owned();
    Some(message)
}

fn extract_output_text(value: &serde_json::Value) -> anyhow::Result<String> {
    let output = value
        .get("output")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow::anyhow!("missing `output` array in response"))?;

    let mut text = String::new();
    for item in output {
        if item.get("type").and_then(|v| v.as_str()) != Some("message") {
            continue;
        }
        let Some(content) = item.get("content").and_then(|v| v.as_array()) else {
            continue;
        };
        for part in content {
            if part.get("type").and_then(|v| v.as_str()) != Some("output_text") {
                continue;
            }
            if let Some(part_text) = part.get("text").and_then(|v| v.as_str()) {
                text.push_str(part_text);
            }
        }
    }

    if text.trim().is_empty() {
        anyhow::bail!("OpenAI output text is empty");
    }
    Ok(text)
}
