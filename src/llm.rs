use std::io::Write as _;
use std::process::{Command, Stdio};

use anyhow::Context as _;

use crate::openai::{OpenAiConfig, OpenAiModel};

/// Text generation capability consumed by every pipeline stage.
///
/// Calls block the current thread. Retries and timeouts belong to the
/// implementation; an `Err` is treated by callers as one failed attempt.
pub trait LanguageModel: Send + Sync {
    fn generate(&self, prompt: &str) -> anyhow::Result<String>;
}

impl<F> LanguageModel for F
where
    F: Fn(&str) -> anyhow::Result<String> + Send + Sync,
{
    fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        self(prompt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmEngine {
    Openai,
    Command,
}

#[derive(Debug, Clone)]
pub struct CommandModel {
    program: String,
    args: Vec<String>,
}

impl CommandModel {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl LanguageModel for CommandModel {
    fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        tracing::debug!(engine = "command", command = %self.program, "llm generate");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("spawn model command: {}", self.program))?;

        {
            let mut stdin = child.stdin.take().context("open model stdin")?;
            stdin
                .write_all(prompt.as_bytes())
                .context("write model stdin")?;
        }

        let output = child.wait_with_output().context("wait model process")?;
        if !output.status.success() {
            anyhow::bail!("model command failed: {} ({})", self.program, output.status);
        }

        let stdout = String::from_utf8(output.stdout).context("model stdout is not valid UTF-8")?;
        if stdout.trim().is_empty() {
            anyhow::bail!("model command output is empty");
        }
        Ok(stdout)
    }
}

/// Builds the gateway selected on the command line.
pub fn create_model(
    engine: LlmEngine,
    command: Option<&str>,
    command_args: &[String],
) -> anyhow::Result<Box<dyn LanguageModel>> {
    match engine {
        LlmEngine::Openai => {
            let config = OpenAiConfig::from_env().context("load openai config")?;
            Ok(Box::new(OpenAiModel::new(config)?))
        }
        LlmEngine::Command => {
            let Some(program) = command else {
                anyhow::bail!("missing --command (required when --engine=command)");
            };
            Ok(Box::new(CommandModel::new(program, command_args.to_vec())))
        }
    }
}

pub(crate) fn extract_json_object(text: &str) -> anyhow::Result<&str> {
    let start = text
        .find('{')
        .ok_or_else(|| anyhow::anyhow!("missing `{{`"))?;
    let end = text
        .rfind('}')
        .ok_or_else(|| anyhow::anyhow!("missing `}}`"))?;
    if end <= start {
        anyhow::bail!("invalid json object span");
    }
    Ok(&text[start..=end])
}

/// Truncates to at most `max_chars` characters without splitting a code point.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
