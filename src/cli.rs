use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::{PipelineConfig, QnaConfig, TocConfig, WriterConfig};
use crate::embedding::EmbeddingEngine;
use crate::formats::PostTags;
use crate::llm::LlmEngine;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run every stage for one conversation and publish the post.
    Build(BuildArgs),
    Qna {
        #[command(subcommand)]
        command: QnaCommand,
    },
    Toc {
        #[command(subcommand)]
        command: TocCommand,
    },
    /// Write, refine and render the post from workspace artifacts.
    Write(WriteArgs),
    /// Publish an existing `post.md`.
    Publish(PublishArgs),
}

#[derive(Debug, Subcommand)]
pub enum QnaCommand {
    /// Compress Q&A pairs and extract code snippets.
    Process(QnaProcessArgs),
}

#[derive(Debug, Subcommand)]
pub enum TocCommand {
    /// Generate, cluster and renumber section subtitles.
    Create(TocCreateArgs),
}

#[derive(Debug, Clone, Args)]
pub struct LlmArgs {
    /// Language model engine.
    #[arg(long, value_enum, default_value_t = LlmEngine::Openai)]
    pub engine: LlmEngine,

    /// Program to run when `--engine=command` (prompt on stdin, text on stdout).
    #[arg(long)]
    pub command: Option<String>,

    /// Argument passed to `--command` (repeatable).
    #[arg(long = "command-arg", allow_hyphen_values = true)]
    pub command_args: Vec<String>,
}

#[derive(Debug, Clone, Args)]
pub struct EmbeddingArgs {
    /// Embedding engine used to cluster subtitles.
    #[arg(long, value_enum, default_value_t = EmbeddingEngine::Openai)]
    pub embedding_engine: EmbeddingEngine,
}

#[derive(Debug, Clone, Args)]
pub struct QnaOptions {
    /// Minimum coherence score for a question summary.
    #[arg(long)]
    pub coherence_threshold: Option<f64>,

    /// Minimum lexical recall for a fence-normalized answer.
    #[arg(long)]
    pub recall_threshold: Option<f64>,

    /// Maximum candidates generated per quality loop.
    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// Prefix for code snippet ids.
    #[arg(long)]
    pub code_prefix: Option<String>,
}

impl QnaOptions {
    pub fn to_config(&self) -> QnaConfig {
        let mut config = QnaConfig::default();
        if let Some(value) = self.coherence_threshold {
            config.coherence_threshold = value;
        }
        if let Some(value) = self.recall_threshold {
            config.recall_threshold = value;
        }
        if let Some(value) = self.max_iterations {
            config.max_iterations = value;
        }
        if let Some(value) = &self.code_prefix {
            config.code_prefix = value.clone();
        }
        config
    }
}

#[derive(Debug, Clone, Args)]
pub struct TocOptions {
    /// Maximum number of sections.
    #[arg(long)]
    pub cluster_count: Option<usize>,

    /// Characters kept per question and per answer when generating subtitles.
    #[arg(long)]
    pub length_limit: Option<usize>,

    /// How a cluster of subtitles becomes one heading (`llm` or `medoid`).
    #[arg(long)]
    pub merge_strategy: Option<String>,

    /// Seed for k-means initialization.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Maximum concurrent subtitle requests.
    #[arg(long)]
    pub concurrency: Option<usize>,
}

impl TocOptions {
    pub fn to_config(&self) -> TocConfig {
        let mut config = TocConfig::default();
        if let Some(value) = self.cluster_count {
            config.cluster_count = value;
        }
        if let Some(value) = self.length_limit {
            config.length_limit = value;
        }
        if let Some(value) = &self.merge_strategy {
            config.merge_strategy = value.clone();
        }
        if let Some(value) = self.seed {
            config.seed = value;
        }
        if let Some(value) = self.concurrency {
            config.concurrency = value;
        }
        config
    }
}

#[derive(Debug, Clone, Args)]
pub struct WriterOptions {
    /// Attempts per section write before accepting the last candidate.
    #[arg(long)]
    pub max_write_attempts: Option<usize>,

    /// Attempts to pick the section that keeps a shared code snippet.
    #[arg(long)]
    pub max_select_attempts: Option<usize>,
}

impl WriterOptions {
    pub fn to_config(&self) -> WriterConfig {
        let mut config = WriterConfig::default();
        if let Some(value) = self.max_write_attempts {
            config.max_write_attempts = value;
        }
        if let Some(value) = self.max_select_attempts {
            config.max_select_attempts = value;
        }
        config
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PublisherKind {
    /// Write a Markdown file with front matter.
    Fs,
    /// Create a page in a Notion database (`NOTION_TOKEN`, `NOTION_DATABASE_ID`).
    Notion,
}

#[derive(Debug, Clone, Args)]
pub struct PublishOptions {
    #[arg(long, value_enum, default_value_t = PublisherKind::Fs)]
    pub publisher: PublisherKind,

    /// Output directory for `--publisher=fs` (default: `published/` next to the post).
    #[arg(long)]
    pub publish_dir: Option<String>,

    /// Post title (default: heading of section "0").
    #[arg(long)]
    pub title: Option<String>,

    #[arg(long = "question-type")]
    pub question_type: Vec<String>,

    #[arg(long = "os")]
    pub os: Vec<String>,

    #[arg(long = "framework")]
    pub framework: Vec<String>,

    #[arg(long = "language")]
    pub language: Vec<String>,

    #[arg(long = "tech-stack")]
    pub tech_stack: Vec<String>,
}

impl PublishOptions {
    pub fn tags(&self) -> PostTags {
        PostTags {
            question_type: self.question_type.clone(),
            os: self.os.clone(),
            framework: self.framework.clone(),
            language: self.language.clone(),
            tech_stack: self.tech_stack.clone(),
        }
    }
}

#[derive(Debug, Args)]
pub struct BuildArgs {
    /// Conversation store directory (`<id>.json` files).
    #[arg(long)]
    pub store: String,

    #[arg(long)]
    pub conversation_id: i64,

    /// Output directory for workspace artifacts.
    #[arg(long)]
    pub out: String,

    /// Overwrite existing artifacts.
    #[arg(long, default_value_t = false)]
    pub force: bool,

    #[command(flatten)]
    pub llm: LlmArgs,

    #[command(flatten)]
    pub embedding: EmbeddingArgs,

    #[command(flatten)]
    pub qna: QnaOptions,

    #[command(flatten)]
    pub toc: TocOptions,

    #[command(flatten)]
    pub writer: WriterOptions,

    #[command(flatten)]
    pub publish: PublishOptions,
}

impl BuildArgs {
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            qna: self.qna.to_config(),
            toc: self.toc.to_config(),
            writer: self.writer.to_config(),
        }
    }
}

#[derive(Debug, Args)]
pub struct QnaProcessArgs {
    /// Conversation store directory (`<id>.json` files).
    #[arg(long)]
    pub store: String,

    #[arg(long)]
    pub conversation_id: i64,

    /// Output directory for `processed.json` and `code.json`.
    #[arg(long)]
    pub out: String,

    #[arg(long, default_value_t = false)]
    pub force: bool,

    #[command(flatten)]
    pub llm: LlmArgs,

    #[command(flatten)]
    pub qna: QnaOptions,
}

#[derive(Debug, Args)]
pub struct TocCreateArgs {
    /// Input path to `processed.json`.
    #[arg(long)]
    pub processed: String,

    /// Output file path for `toc.yaml`.
    #[arg(long)]
    pub out: String,

    #[arg(long, default_value_t = false)]
    pub force: bool,

    #[command(flatten)]
    pub llm: LlmArgs,

    #[command(flatten)]
    pub embedding: EmbeddingArgs,

    #[command(flatten)]
    pub toc: TocOptions,
}

#[derive(Debug, Args)]
pub struct WriteArgs {
    /// Input path to `processed.json`.
    #[arg(long)]
    pub processed: String,

    /// Input path to `code.json`.
    #[arg(long)]
    pub code: String,

    /// Input path to `toc.yaml`.
    #[arg(long)]
    pub toc: String,

    /// Output file path for `post.md` (`sections.json` is written next to it).
    #[arg(long)]
    pub out: String,

    #[arg(long, default_value_t = false)]
    pub force: bool,

    #[command(flatten)]
    pub llm: LlmArgs,

    #[command(flatten)]
    pub writer: WriterOptions,
}

#[derive(Debug, Args)]
pub struct PublishArgs {
    /// Input path to `post.md`.
    #[arg(long)]
    pub post: String,

    /// Input path to `toc.yaml`, used for the default title.
    #[arg(long)]
    pub toc: Option<String>,

    #[command(flatten)]
    pub publish: PublishOptions,
}
