use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::code::DEFAULT_CODE_PREFIX;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub qna: QnaConfig,
    #[serde(default)]
    pub toc: TocConfig,
    #[serde(default)]
    pub writer: WriterConfig,
}

impl PipelineConfig {
    /// Checks every bound before any model is called.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.qna.validate()?;
        self.toc.validate()?;
        self.writer.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QnaConfig {
    pub coherence_threshold: f64,
    pub recall_threshold: f64,
    pub max_iterations: usize,
    pub code_prefix: String,
    pub max_description_attempts: usize,
}

impl Default for QnaConfig {
    fn default() -> Self {
        Self {
            coherence_threshold: 0.8,
            recall_threshold: 0.90,
            max_iterations: 3,
            code_prefix: DEFAULT_CODE_PREFIX.to_owned(),
            max_description_attempts: 3,
        }
    }
}

impl QnaConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure_threshold("coherence_threshold", self.coherence_threshold)?;
        ensure_threshold("recall_threshold", self.recall_threshold)?;
        ensure_positive("max_iterations", self.max_iterations)?;
        ensure_positive("max_description_attempts", self.max_description_attempts)?;
        let prefix_ok = !self.code_prefix.is_empty()
            && self
                .code_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !prefix_ok {
            anyhow::bail!(
                "code_prefix must be non-empty and contain only ASCII letters, digits or '_': {:?}",
                self.code_prefix
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Ask the language model for one heading per cluster.
    Llm,
    /// Use the member subtitle closest to the cluster centroid.
    Medoid,
}

impl FromStr for MergeStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "llm" => Ok(Self::Llm),
            "medoid" => Ok(Self::Medoid),
            other => anyhow::bail!("unknown merge strategy: {other} (expected `llm` or `medoid`)"),
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Llm => f.write_str("llm"),
            Self::Medoid => f.write_str("medoid"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TocConfig {
    pub cluster_count: usize,
    /// Characters kept per question and per answer when generating subtitles.
    pub length_limit: usize,
    pub merge_strategy: String,
    pub seed: u64,
    pub max_kmeans_iterations: usize,
    pub concurrency: usize,
    pub max_subtitle_attempts: usize,
}

impl Default for TocConfig {
    fn default() -> Self {
        Self {
            cluster_count: 5,
            length_limit: 5000,
            merge_strategy: MergeStrategy::Llm.to_string(),
            seed: 42,
            max_kmeans_iterations: 100,
            concurrency: 4,
            max_subtitle_attempts: 3,
        }
    }
}

impl TocConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure_positive("cluster_count", self.cluster_count)?;
        ensure_positive("length_limit", self.length_limit)?;
        ensure_positive("max_kmeans_iterations", self.max_kmeans_iterations)?;
        ensure_positive("concurrency", self.concurrency)?;
        ensure_positive("max_subtitle_attempts", self.max_subtitle_attempts)?;
        self.merge_strategy()?;
        Ok(())
    }

    pub fn merge_strategy(&self) -> anyhow::Result<MergeStrategy> {
        self.merge_strategy.parse()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    pub max_write_attempts: usize,
    pub max_select_attempts: usize,
    pub max_rewrite_attempts: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_write_attempts: 10,
            max_select_attempts: 10,
            max_rewrite_attempts: 3,
        }
    }
}

impl WriterConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure_positive("max_write_attempts", self.max_write_attempts)?;
        ensure_positive("max_select_attempts", self.max_select_attempts)?;
        ensure_positive("max_rewrite_attempts", self.max_rewrite_attempts)?;
        Ok(())
    }
}

fn ensure_threshold(name: &str, value: f64) -> anyhow::Result<()> {
    if !(0.0..=1.0).contains(&value) {
        anyhow::bail!("{name} must be within [0, 1]: {value}");
    }
    Ok(())
}

fn ensure_positive(name: &str, value: usize) -> anyhow::Result<()> {
    if value == 0 {
        anyhow::bail!("{name} must be > 0");
    }
    Ok(())
}
