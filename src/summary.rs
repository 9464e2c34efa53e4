use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::formats::FailedChunk;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub checked: usize,
    pub disputed: usize,
    /// Oracle failures; the record is left as it was.
    pub no_opinion: usize,
    /// Records that already carried a dispute annotation.
    pub skipped: usize,
}

/// What happened during one `extract` run, for humans and notifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub source: String,
    pub output: String,
    pub subject: String,
    pub started_at: String,
    pub finished_at: String,
    pub duration_ms: u64,
    pub chunks_total: usize,
    pub chunks_failed: usize,
    pub failed_chunks: Vec<FailedChunk>,
    pub rescued: usize,
    pub candidates: usize,
    pub accepted: usize,
    pub duplicates: usize,
    pub answer_key_chars: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationSummary>,
}

/// Out-of-band delivery of run summaries.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, summary: &RunSummary) -> anyhow::Result<()>;
}

/// Writes the summary to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify(&self, summary: &RunSummary) -> anyhow::Result<()> {
        let failed_indices = summary
            .failed_chunks
            .iter()
            .map(|failed| failed.index)
            .collect::<Vec<_>>();
        tracing::info!(
            source = %summary.source,
            output = %summary.output,
            subject = %summary.subject,
            duration_ms = summary.duration_ms,
            chunks = summary.chunks_total,
            failed = summary.chunks_failed,
            rescued = summary.rescued,
            accepted = summary.accepted,
            duplicates = summary.duplicates,
            "run finished"
        );
        if !failed_indices.is_empty() {
            tracing::warn!(failed_chunk_indices = ?failed_indices, "some chunks produced no items");
        }
        if let Some(validation) = summary.validation {
            tracing::info!(
                checked = validation.checked,
                disputed = validation.disputed,
                no_opinion = validation.no_opinion,
                skipped = validation.skipped,
                "validation finished"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> RunSummary {
        RunSummary {
            source: "quiz.docx".to_owned(),
            output: "output/quiz_1.json".to_owned(),
            subject: "通用".to_owned(),
            started_at: "2026-01-01T00:00:00Z".to_owned(),
            finished_at: "2026-01-01T00:00:05Z".to_owned(),
            duration_ms: 5000,
            chunks_total: 3,
            chunks_failed: 1,
            failed_chunks: vec![FailedChunk {
                index: 2,
                attempts: 4,
                error: "oracle call timed out after 1s".to_owned(),
            }],
            rescued: 0,
            candidates: 7,
            accepted: 6,
            duplicates: 1,
            answer_key_chars: 0,
            validation: None,
        }
    }

    #[test]
    fn validation_is_omitted_until_it_runs() -> anyhow::Result<()> {
        let mut value = serde_json::to_value(summary())?;
        assert!(value.get("validation").is_none());
        assert_eq!(value["failed_chunks"][0]["attempts"], 4);

        let mut with_validation = summary();
        with_validation.validation = Some(ValidationSummary {
            checked: 6,
            disputed: 1,
            no_opinion: 0,
            skipped: 0,
        });
        value = serde_json::to_value(&with_validation)?;
        assert_eq!(value["validation"]["disputed"], 1);
        Ok(())
    }

    #[tokio::test]
    async fn log_sink_accepts_any_summary() {
        LogSink.notify(&summary()).await.unwrap();
    }
}
