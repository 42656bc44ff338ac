//! End-to-end run: fetch, pair, process, toc, write, refine, render, publish.

use std::fmt;
use std::path::PathBuf;

use anyhow::Context as _;

use crate::cli::BuildArgs;
use crate::code::CodeRegistry;
use crate::config::PipelineConfig;
use crate::conversation::{ConversationStore as _, FsConversationStore, pair_messages};
use crate::embedding::{Embedder, create_embedder};
use crate::formats::{Message, PostDraft, ProcessedQa, Toc};
use crate::llm::{LanguageModel, create_model};
use crate::publish::{create_publisher, resolve_title};
use crate::qna::QnaProcessor;
use crate::score::{CoherenceScorer, LlmCoherenceScorer};
use crate::toc::build_toc;
use crate::workspace::{
    CODE_FILE, POST_FILE, PROCESSED_FILE, SECTIONS_FILE, TOC_FILE, write_artifact, write_json,
    write_yaml,
};
use crate::writer::{RenderedPost, compose};

/// Pipeline stage named in fatal errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Pair,
    Process,
    Toc,
    Write,
    Refine,
    Render,
    Publish,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Pair => "pair",
            Self::Process => "process",
            Self::Toc => "toc",
            Self::Write => "write",
            Self::Refine => "refine",
            Self::Render => "render",
            Self::Publish => "publish",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stage", self.as_str())
    }
}

/// Everything a run produces before publishing.
#[derive(Debug, Clone)]
pub struct Assembled {
    pub processed: Vec<ProcessedQa>,
    pub registry: CodeRegistry,
    pub toc: Toc,
    pub post: RenderedPost,
}

/// Runs every synchronous stage over one conversation's messages.
pub fn assemble(
    messages: &[Message],
    config: &PipelineConfig,
    model: &dyn LanguageModel,
    scorer: &dyn CoherenceScorer,
    embedder: &dyn Embedder,
) -> anyhow::Result<Assembled> {
    config.validate().context("validate pipeline config")?;

    let pairs = pair_messages(messages);
    if pairs.is_empty() {
        return Err(anyhow::anyhow!("conversation has no complete q&a pairs")).context(Stage::Pair);
    }
    tracing::info!(pairs = pairs.len(), "paired messages");

    let mut registry = CodeRegistry::new(config.qna.code_prefix.clone());
    let processed =
        QnaProcessor::new(model, scorer, &config.qna).process_all(&pairs, &mut registry);
    tracing::info!(snippets = registry.len(), "processed q&a pairs");

    let toc = build_toc(&processed, model, embedder, &config.toc).context(Stage::Toc)?;
    tracing::info!(sections = toc.sections.len(), "built table of contents");

    let post = compose(&processed, &registry, &toc, model, &config.writer)?;

    Ok(Assembled {
        processed,
        registry,
        toc,
        post,
    })
}

pub async fn run(args: BuildArgs) -> anyhow::Result<()> {
    let run_id = uuid::Uuid::new_v4();
    let workspace_dir = PathBuf::from(&args.out);
    tracing::info!(
        %run_id,
        conversation_id = args.conversation_id,
        out = %workspace_dir.display(),
        "build: start"
    );

    let config = args.pipeline_config();
    config.validate().context("validate pipeline config")?;

    let processed_path = workspace_dir.join(PROCESSED_FILE);
    let code_path = workspace_dir.join(CODE_FILE);
    let toc_path = workspace_dir.join(TOC_FILE);
    let post_path = workspace_dir.join(POST_FILE);
    let sections_path = workspace_dir.join(SECTIONS_FILE);
    if !args.force {
        for path in [&processed_path, &code_path, &toc_path, &post_path, &sections_path] {
            if path.exists() {
                anyhow::bail!("output already exists: {}", path.display());
            }
        }
    }

    let store = FsConversationStore::new(&args.store);
    let messages = store
        .fetch_messages(args.conversation_id)
        .await
        .context(Stage::Fetch)?;
    tracing::info!(%run_id, messages = messages.len(), "build: fetched conversation");

    let llm = args.llm.clone();
    let embedding_engine = args.embedding.embedding_engine;
    let assembled = tokio::task::spawn_blocking(move || -> anyhow::Result<Assembled> {
        let model = create_model(llm.engine, llm.command.as_deref(), &llm.command_args)?;
        let embedder = create_embedder(embedding_engine)?;
        let scorer = LlmCoherenceScorer::new(model.as_ref());
        assemble(&messages, &config, model.as_ref(), &scorer, embedder.as_ref())
    })
    .await
    .context("join pipeline task")??;

    write_json(&processed_path, &assembled.processed, args.force).context(Stage::Process)?;
    write_json(&code_path, &assembled.registry, args.force).context(Stage::Process)?;
    write_yaml(&toc_path, &assembled.toc, args.force).context(Stage::Toc)?;
    write_artifact(&post_path, assembled.post.content.as_bytes(), args.force)
        .context(Stage::Render)?;
    write_json(&sections_path, &assembled.post.sections, args.force).context(Stage::Render)?;
    tracing::info!(%run_id, post = %post_path.display(), "build: post written");

    let title = resolve_title(args.publish.title.as_deref(), Some(&assembled.toc))
        .context(Stage::Publish)?;
    let publisher = create_publisher(&args.publish, &workspace_dir.join("published"))
        .context(Stage::Publish)?;
    let draft = PostDraft {
        title,
        content: assembled.post.content,
        tags: args.publish.tags(),
    };
    let page = publisher.publish(&draft).await.context(Stage::Publish)?;

    tracing::info!(
        %run_id,
        page_id = %page.page_id,
        url = %page.url,
        "build: published"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::formats::MessageType;
    use crate::score::Coherence;

    struct AlwaysCoherent;

    impl CoherenceScorer for AlwaysCoherent {
        fn coherence(&self, _original: &str, _derived: &str) -> anyhow::Result<Coherence> {
            Ok(Coherence {
                score: 1.0,
                reason: "ok".to_owned(),
            })
        }
    }

    fn between<'a>(text: &'a str, begin: &str, end: &str) -> &'a str {
        let start = text.find(begin).map_or(0, |i| i + begin.len());
        let rest = &text[start..];
        &rest[..rest.find(end).unwrap_or(rest.len())]
    }

    fn message(seq: i64, message_type: MessageType, content: &str) -> Message {
        Message {
            id: seq,
            conversation_id: 1,
            sequence_number: seq,
            message_type,
            content: content.to_owned(),
        }
    }

    /// Echoes inputs back so each stage's output is predictable.
    fn echo_model(prompt: &str) -> anyhow::Result<String> {
        if prompt.contains("BEGIN_CODE_SNIPPET") {
            return Ok("Lists files".to_owned());
        }
        if prompt.contains("BEGIN_SECTION_DOCUMENT") {
            let current = between(prompt, "BEGIN_SECTION_DOCUMENT\n", "\nEND_SECTION_DOCUMENT");
            let answer = between(prompt, "BEGIN_ANSWER\n", "\nEND_ANSWER");
            return Ok(format!("{current}\n{answer}"));
        }
        if prompt.contains("BEGIN_QA_PAIR") {
            return Ok("Shell basics".to_owned());
        }
        if prompt.contains("BEGIN_SUBTITLE_CLUSTER") {
            return Ok("Working in the shell".to_owned());
        }
        if prompt.contains("BEGIN_ANSWER") {
            return Ok(between(prompt, "BEGIN_ANSWER\n", "\nEND_ANSWER").to_owned());
        }
        if prompt.contains("BEGIN_QUESTION") {
            return Ok(between(prompt, "BEGIN_QUESTION\n", "\nEND_QUESTION").to_owned());
        }
        anyhow::bail!("unexpected prompt")
    }

    #[test]
    fn assemble_restores_code_in_rendered_post() -> anyhow::Result<()> {
        let messages = vec![
            message(1, MessageType::Question, "How do I list files?"),
            message(2, MessageType::Answer, "Use:\n```bash\nls -la\n```"),
            message(3, MessageType::Question, "And hidden ones?"),
            message(4, MessageType::Answer, "The `-a` flag shows them."),
        ];

        let assembled = assemble(
            &messages,
            &PipelineConfig::default(),
            &echo_model,
            &AlwaysCoherent,
            &HashEmbedder::default(),
        )?;

        assert_eq!(assembled.registry.len(), 1);
        assert_eq!(assembled.toc.sections.len(), 1);
        assert_eq!(assembled.toc.sections[0].heading, "Working in the shell");
        assert!(assembled.post.content.starts_with("Working in the shell\n"));
        assert!(assembled.post.content.contains("```bash\nls -la\n```"));
        assert!(!assembled.post.content.contains("<-- Code_Snippet_1"));
        Ok(())
    }

    #[test]
    fn conversation_without_pairs_fails_in_pair_stage() {
        let messages = vec![message(1, MessageType::Question, "anyone?")];
        let err = assemble(
            &messages,
            &PipelineConfig::default(),
            &echo_model,
            &AlwaysCoherent,
            &HashEmbedder::default(),
        )
        .unwrap_err();
        assert!(format!("{err:#}").starts_with("pair stage: "));
    }

    #[test]
    fn stage_names_appear_in_error_chain() {
        let err = anyhow::anyhow!("boom").context(Stage::Refine);
        assert_eq!(format!("{err:#}"), "refine stage: boom");
    }
}
