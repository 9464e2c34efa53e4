use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionType {
    SingleChoice,
    MultiChoice,
    TrueFalse,
    FillBlank,
    Essay,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionOption {
    pub label: String,
    pub text: String,
}

/// The oracle's opinion about one item, before deduplication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateRecord {
    pub category: String,
    pub kind: QuestionType,
    pub content: String,
    pub options: Vec<QuestionOption>,
    /// Empty means "not determined".
    pub answer: String,
    pub analysis: String,
    pub chapter: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionRecord {
    pub id: String,
    pub number: usize,
    pub chapter: String,
    pub category: String,
    #[serde(rename = "type")]
    pub kind: QuestionType,
    pub content: String,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub analysis: String,
}

/// The persisted extraction result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionBank {
    pub version: String,
    pub source: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<String>,
    pub total_count: usize,
    pub data: Vec<QuestionRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailedChunk {
    pub index: usize,
    pub attempts: usize,
    pub error: String,
}
