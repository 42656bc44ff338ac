//! Code snippet extraction and placeholder bookkeeping.
//!
//! Fenced code is lifted out of Q&A text into a [`CodeRegistry`] and replaced
//! with `<-- {code_id}: {description} -->` so later stages only ever see a
//! one-line marker. Rendering swaps the markers back for fenced code.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::formats::CodeSnippet;
use crate::llm::LanguageModel;

pub const FENCE: &str = "```";
pub const DEFAULT_CODE_PREFIX: &str = "Code_Snippet";

const PLACEHOLDER_OPEN: &str = "<-- ";
const PLACEHOLDER_CLOSE: &str = "-->";

/// Append-only store of extracted snippets for one pipeline run.
///
/// The id counter starts at the number of snippets the registry was created
/// with and only moves forward, so ids are never reused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeRegistry {
    prefix: String,
    counter: usize,
    snippets: Vec<CodeSnippet>,
}

impl Default for CodeRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CODE_PREFIX)
    }
}

impl CodeRegistry {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: 0,
            snippets: Vec::new(),
        }
    }

    pub fn from_snippets(prefix: impl Into<String>, snippets: Vec<CodeSnippet>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: snippets.len(),
            snippets,
        }
    }

    pub fn len(&self) -> usize {
        self.snippets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }

    pub fn snippets(&self) -> &[CodeSnippet] {
        &self.snippets
    }

    pub fn into_snippets(self) -> Vec<CodeSnippet> {
        self.snippets
    }

    pub fn get(&self, code_id: &str) -> Option<&CodeSnippet> {
        self.snippets.iter().find(|s| s.code_id == code_id)
    }

    fn register(
        &mut self,
        snippet_text: String,
        language: Option<String>,
        description: String,
    ) -> &CodeSnippet {
        self.counter += 1;
        let code_id = format!("{}_{}", self.prefix, self.counter);
        self.snippets.push(CodeSnippet {
            code_id,
            snippet_text,
            description,
            language,
        });
        &self.snippets[self.snippets.len() - 1]
    }
}

/// Replaces every closed fenced region in `text` with a placeholder,
/// registering the trimmed snippet and a model-written description.
///
/// An opening fence with no closing fence is left untouched.
pub fn extract(
    text: &str,
    registry: &mut CodeRegistry,
    model: &dyn LanguageModel,
    max_description_attempts: usize,
) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;

    while let Some(rel_open) = text[cursor..].find(FENCE) {
        let open = cursor + rel_open;
        let body_start = open + FENCE.len();
        let Some(rel_close) = text[body_start..].find(FENCE) else {
            break;
        };
        let body_end = body_start + rel_close;

        out.push_str(&text[cursor..open]);

        let raw = &text[body_start..body_end];
        let snippet_text = raw.trim().to_owned();
        let language = fence_language(raw);
        let description = describe_code(model, &snippet_text, max_description_attempts);
        let snippet = registry.register(snippet_text, language, description);
        tracing::debug!(code_id = %snippet.code_id, "extracted code snippet");
        out.push_str(&placeholder(&snippet.code_id, &snippet.description));

        cursor = body_end + FENCE.len();
    }

    out.push_str(&text[cursor..]);
    out
}

pub fn placeholder(code_id: &str, description: &str) -> String {
    format!("{PLACEHOLDER_OPEN}{code_id}: {description} {PLACEHOLDER_CLOSE}")
}

pub fn contains_fence(text: &str) -> bool {
    text.contains(FENCE)
}

/// A placeholder occurrence: the full marker span and the id it names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderSpan<'a> {
    pub span: Range<usize>,
    pub code_id: &'a str,
    pub text: &'a str,
}

/// Finds every well-formed placeholder in `text`, left to right.
///
/// A placeholder must close on the same line it opens on.
pub fn placeholders(text: &str) -> Vec<PlaceholderSpan<'_>> {
    let mut spans = Vec::new();
    let mut cursor = 0usize;

    while let Some(rel) = text[cursor..].find(PLACEHOLDER_OPEN) {
        let start = cursor + rel;
        let id_start = start + PLACEHOLDER_OPEN.len();
        let line_end = text[id_start..]
            .find('\n')
            .map_or(text.len(), |rel_nl| id_start + rel_nl);
        let line = &text[id_start..line_end];

        let parsed = line.find(':').and_then(|colon| {
            let code_id = &line[..colon];
            if code_id.is_empty() || code_id.chars().any(char::is_whitespace) {
                return None;
            }
            let close = line[colon..].find(PLACEHOLDER_CLOSE)? + colon;
            Some((code_id, close))
        });

        match parsed {
            Some((code_id, close)) => {
                let end = id_start + close + PLACEHOLDER_CLOSE.len();
                spans.push(PlaceholderSpan {
                    span: start..end,
                    code_id,
                    text: &text[start..end],
                });
                cursor = end;
            }
            None => cursor = id_start,
        }
    }

    spans
}

pub fn find_placeholder<'a>(text: &'a str, code_id: &str) -> Option<PlaceholderSpan<'a>> {
    placeholders(text)
        .into_iter()
        .find(|p| p.code_id == code_id)
}

pub fn contains_placeholder(text: &str, code_id: &str) -> bool {
    find_placeholder(text, code_id).is_some()
}

/// Removes every placeholder for `code_id`, tidying the whitespace it leaves.
pub fn strip_placeholder(text: &str, code_id: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;
    for p in placeholders(text) {
        if p.code_id != code_id {
            continue;
        }
        out.push_str(text[cursor..p.span.start].trim_end_matches([' ', '\t']));
        cursor = p.span.end;
    }
    out.push_str(&text[cursor..]);
    out
}

/// Substitutes every placeholder whose id is registered with its fenced code.
/// Unknown ids are left as they are.
pub fn resolve_placeholders(text: &str, registry: &CodeRegistry) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;
    for p in placeholders(text) {
        let Some(snippet) = registry.get(p.code_id) else {
            tracing::warn!(code_id = p.code_id, "placeholder names an unknown code id");
            continue;
        };
        out.push_str(&text[cursor..p.span.start]);
        out.push_str(&render_fence(snippet));
        cursor = p.span.end;
    }
    out.push_str(&text[cursor..]);
    out
}

pub fn render_fence(snippet: &CodeSnippet) -> String {
    if snippet.language.is_some() {
        format!("{FENCE}{}\n{FENCE}\n", snippet.snippet_text)
    } else {
        format!("{FENCE}\n{}\n{FENCE}\n", snippet.snippet_text)
    }
}

fn fence_language(raw: &str) -> Option<String> {
    let (first_line, rest) = raw.split_once('\n')?;
    let info = first_line.trim();
    if info.is_empty() || rest.trim().is_empty() {
        return None;
    }
    let is_info_string = info
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '#' | '.' | '_'));
    is_info_string.then(|| info.to_owned())
}

fn describe_code(model: &dyn LanguageModel, snippet_text: &str, max_attempts: usize) -> String {
    let prompt = build_describe_prompt(snippet_text);

    for attempt in 1..=max_attempts {
        match model.generate(&prompt) {
            Ok(raw) => {
                if let Some(description) = normalize_description(&raw) {
                    return description;
                }
                tracing::warn!(attempt, "code description is empty; retrying");
            }
            Err(err) => {
                tracing::warn!(attempt, error = %format!("{err:#}"), "describe code failed");
            }
        }
    }

    tracing::warn!(
        attempts = max_attempts,
        "could not describe code snippet; using fallback description"
    );
    "Code snippet".to_owned()
}

fn build_describe_prompt(snippet_text: &str) -> String {
    format!(
        "You are a senior software engineer.\n\
\n\
Task: Describe what the code below does in ONE short line (at most 15 words).\n\
\n\
BEGIN_CODE_SNIPPET\n\
{snippet_text}\n\
END_CODE_SNIPPET\n\
\n\
Output:\n\
- Output ONLY the one-line description. No markdown, no code, no quotes.\n"
    )
}

fn normalize_description(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = line
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`')
        .replace(PLACEHOLDER_CLOSE, "->")
        .replace(PLACEHOLDER_OPEN.trim_end(), "<-");
    let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
    (!line.is_empty()).then_some(line)
}
