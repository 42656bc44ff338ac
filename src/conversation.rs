use std::path::PathBuf;

use anyhow::Context as _;
use async_trait::async_trait;

use crate::formats::{Message, MessageType, QaPair};

/// Read-only source of stored conversations.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Returns the messages ordered by `sequence_number`.
    ///
    /// Fails when the conversation has no messages.
    async fn fetch_messages(&self, conversation_id: i64) -> anyhow::Result<Vec<Message>>;
}

/// Conversations stored as `<dir>/<conversation_id>.json`, each a JSON array
/// of messages.
#[derive(Debug, Clone)]
pub struct FsConversationStore {
    base_dir: PathBuf,
}

impl FsConversationStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn conversation_path(&self, conversation_id: i64) -> PathBuf {
        self.base_dir.join(format!("{conversation_id}.json"))
    }
}

#[async_trait]
impl ConversationStore for FsConversationStore {
    async fn fetch_messages(&self, conversation_id: i64) -> anyhow::Result<Vec<Message>> {
        let path = self.conversation_path(conversation_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                anyhow::bail!("no messages related to conversation {conversation_id}");
            }
            Err(err) => {
                return Err(err).with_context(|| format!("read: {}", path.display()));
            }
        };

        let mut messages: Vec<Message> = serde_json::from_slice(&bytes)
            .with_context(|| format!("parse conversation json: {}", path.display()))?;
        messages.retain(|m| m.conversation_id == conversation_id);
        if messages.is_empty() {
            anyhow::bail!("no messages related to conversation {conversation_id}");
        }

        messages.sort_by_key(|m| m.sequence_number);
        Ok(messages)
    }
}

/// Pairs each question with the answer that directly follows it.
///
/// Answers without a pending question, questions superseded by a later
/// question, and a trailing unanswered question are dropped.
pub fn pair_messages(messages: &[Message]) -> Vec<QaPair> {
    let mut ordered = messages.iter().collect::<Vec<_>>();
    ordered.sort_by_key(|m| m.sequence_number);

    let mut pairs = Vec::new();
    let mut pending: Option<&Message> = None;

    for message in ordered {
        match message.message_type {
            MessageType::Question => {
                if let Some(dropped) = pending.replace(message) {
                    tracing::warn!(
                        sequence_number = dropped.sequence_number,
                        "question has no answer; dropping"
                    );
                }
            }
            MessageType::Answer => {
                let Some(question) = pending.take() else {
                    tracing::warn!(
                        sequence_number = message.sequence_number,
                        "answer has no question; dropping"
                    );
                    continue;
                };
                pairs.push(QaPair {
                    pair_number: pairs.len(),
                    question: question.clone(),
                    answer: message.clone(),
                });
            }
        }
    }

    if let Some(dropped) = pending {
        tracing::warn!(
            sequence_number = dropped.sequence_number,
            "trailing question has no answer; dropping"
        );
    }

    pairs
}
