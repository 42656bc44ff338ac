use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Question,
    Answer,
}

/// One stored turn of a conversation, as returned by the conversation store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub sequence_number: i64,
    #[serde(rename = "type", alias = "message_type")]
    pub message_type: MessageType,
    #[serde(alias = "message_content")]
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaPair {
    pub pair_number: usize,
    pub question: Message,
    pub answer: Message,
}

/// A Q&A pair after summarization, fence normalization and code extraction.
///
/// Both sides carry `<-- Code_Snippet_N: ... -->` placeholders instead of
/// fenced code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessedQa {
    pub pair_number: usize,
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CodeSnippet {
    pub code_id: String,
    pub snippet_text: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Section {
    pub section_index: String,
    pub heading: String,
    pub document_text: String,
}

/// Section skeleton and pair-to-section assignment produced by subtitle
/// clustering. Serialized as `toc.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Toc {
    pub sections: Vec<TocSection>,
    pub assignments: Vec<TocAssignment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TocSection {
    pub index: String,
    pub heading: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TocAssignment {
    pub pair: String,
    pub sections: Vec<String>,
}

impl Toc {
    pub fn sections_for_pair(&self, pair_number: usize) -> Option<&[String]> {
        let key = pair_number.to_string();
        self.assignments
            .iter()
            .find(|a| a.pair == key)
            .map(|a| a.sections.as_slice())
    }
}

/// Tag lists forwarded to the publishing collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostTags {
    #[serde(default)]
    pub question_type: Vec<String>,
    #[serde(default)]
    pub os: Vec<String>,
    #[serde(default)]
    pub framework: Vec<String>,
    #[serde(default)]
    pub language: Vec<String>,
    #[serde(default)]
    pub tech_stack: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostDraft {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: PostTags,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishedPage {
    pub page_id: String,
    pub url: String,
    pub public_url: Option<String>,
}
