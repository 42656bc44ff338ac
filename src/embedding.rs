//! Embedding gateway used by subtitle clustering.
//!
//! Two engines are provided: the OpenAI embeddings endpoint and an offline
//! feature-hashing embedder that needs no network access.

use anyhow::Context as _;
use sha2::{Digest as _, Sha256};

use crate::openai::{OpenAiConfig, post_json_with_retries};

pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;

    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingEngine {
    Openai,
    Hash,
}

pub fn create_embedder(engine: EmbeddingEngine) -> anyhow::Result<Box<dyn Embedder>> {
    match engine {
        EmbeddingEngine::Openai => {
            let config = OpenAiConfig::from_env().context("load openai config")?;
            Ok(Box::new(OpenAiEmbedder::new(config)?))
        }
        EmbeddingEngine::Hash => Ok(Box::new(HashEmbedder::default())),
    }
}

/// Bag-of-words embedder: each lowercased word is hashed into one of `dims`
/// buckets and the resulting count vector is L2-normalized.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let mut vector = vec![0.0_f32; self.dims];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let digest = Sha256::digest(word.to_lowercase().as_bytes());
            let mut bucket_bytes = [0_u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dims as u64) as usize;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

pub struct OpenAiEmbedder {
    client: reqwest::blocking::Client,
    config: OpenAiConfig,
}

impl OpenAiEmbedder {
    pub fn new(config: OpenAiConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: config.http_client()?,
            config,
        })
    }
}

impl Embedder for OpenAiEmbedder {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_owned()])?;
        vectors
            .pop()
            .ok_or_else(|| anyhow::anyhow!("embedding response is empty"))
    }

    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        tracing::debug!(
            engine = "openai",
            model = %self.config.embedding_model,
            texts = texts.len(),
            "embed batch"
        );

        let body = serde_json::json!({
            "model": self.config.embedding_model,
            "input": texts,
        });
        let endpoint = self.config.endpoint("embeddings");
        let value = post_json_with_retries(&self.client, &self.config, &endpoint, &body)?;
        let vectors = parse_embeddings_response(&value)?;
        if vectors.len() != texts.len() {
            anyhow::bail!(
                "embedding count mismatch: sent {} texts, got {} vectors",
                texts.len(),
                vectors.len()
            );
        }
        Ok(vectors)
    }
}

fn parse_embeddings_response(value: &serde_json::Value) -> anyhow::Result<Vec<Vec<f32>>> {
    let data = value
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("invalid embeddings response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("invalid embeddings response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map_or(position, |i| i as usize);
        let vector = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect::<Vec<_>>();
        indexed.push((index, vector));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, vector)| vector).collect())
}
