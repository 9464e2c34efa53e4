use std::time::Duration;

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;

use crate::formats::QuestionRecord;
use crate::oracle::{CallSettings, OracleHandle};
use crate::retry::{self, RetryPolicy};
use crate::summary::ValidationSummary;

pub const DISPUTE_MARKER: &str = "【答案存疑】";

#[derive(Debug, Clone)]
pub struct ValidationSettings {
    pub workers: usize,
    pub retry: RetryPolicy,
    pub call: CallSettings,
    pub subject: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Affirmed,
    Doubt(String),
}

/// `DOUBT: <reason>` (or any reply mentioning 存疑) is a doubt; everything else
/// affirms the stored answer.
pub fn parse_verdict(reply: &str) -> Verdict {
    let reply = reply.trim();
    if !reply.starts_with("DOUBT") && !reply.contains("存疑") {
        return Verdict::Affirmed;
    }

    let reason = reply
        .strip_prefix("DOUBT")
        .unwrap_or(reply)
        .trim_start_matches([':', '：'])
        .trim();
    Verdict::Doubt(reason.to_owned())
}

pub fn annotate(analysis: &str, subject: &str, reason: &str) -> String {
    format!("{DISPUTE_MARKER}AI({subject}专家)提示：{reason}\n\n{analysis}")
}

pub fn is_annotated(record: &QuestionRecord) -> bool {
    record.analysis.starts_with(DISPUTE_MARKER)
}

/// Asks the oracle to audit each record's answer and prepends a dispute note to
/// `analysis` where it doubts it. Failed calls leave the record untouched.
pub async fn validate_all(
    oracle: &OracleHandle,
    settings: &ValidationSettings,
    records: &mut [QuestionRecord],
    cancel: &CancellationToken,
) -> anyhow::Result<ValidationSummary> {
    let mut summary = ValidationSummary::default();
    let pending = records
        .iter()
        .enumerate()
        .filter(|(_, record)| !is_annotated(record))
        .map(|(idx, _)| idx)
        .collect::<Vec<_>>();
    summary.skipped = records.len() - pending.len();

    let total = pending.len();
    if total == 0 {
        return Ok(summary);
    }
    let concurrency = settings.workers.max(1).min(total);
    let system_prompt = validation_system_prompt(&settings.subject);
    tracing::info!(
        records = total,
        skipped = summary.skipped,
        concurrency = concurrency,
        "validation: dispatching records"
    );

    let mut join_set = tokio::task::JoinSet::new();
    let mut next = 0usize;
    let mut cancelled = false;
    let mut done = 0usize;
    let started_at = std::time::Instant::now();
    let mut last_progress_log_at = started_at;

    while (!cancelled && next < total) || !join_set.is_empty() {
        while !cancelled && next < total && join_set.len() < concurrency {
            let record_idx = pending[next];
            let request = settings
                .call
                .request(system_prompt.clone(), question_prompt(&records[record_idx]));
            let oracle = oracle.clone();
            let policy = settings.retry;

            join_set.spawn(async move {
                let request = &request;
                let oracle = &oracle;
                let result = retry::run(&policy, move |attempt| async move {
                    oracle.call(request, record_idx, attempt).await
                })
                .await;
                let verdict = match result {
                    Ok(reply) => Some(parse_verdict(&reply.value)),
                    Err(exhausted) => {
                        tracing::warn!(
                            record = record_idx,
                            attempts = exhausted.attempts,
                            error = %exhausted.last_error,
                            "validation call failed; no opinion"
                        );
                        None
                    }
                };
                (record_idx, verdict)
            });
            next += 1;
        }

        let event = tokio::select! {
            biased;
            _ = cancel.cancelled(), if !cancelled => None,
            joined = join_set.join_next() => Some(joined),
        };
        let Some(joined) = event else {
            cancelled = true;
            join_set.abort_all();
            tracing::warn!(undispatched = total - next, "validation cancelled");
            continue;
        };
        let Some(joined) = joined else {
            break;
        };
        let (record_idx, verdict) = match joined {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => continue,
            Err(err) => return Err(err).context("join validation task"),
        };

        summary.checked += 1;
        match verdict {
            Some(Verdict::Affirmed) => {}
            Some(Verdict::Doubt(reason)) => {
                let record = &mut records[record_idx];
                record.analysis = annotate(&record.analysis, &settings.subject, &reason);
                summary.disputed += 1;
                tracing::debug!(number = record.number, reason = %reason, "answer disputed");
            }
            None => summary.no_opinion += 1,
        }

        done += 1;
        if done == total || last_progress_log_at.elapsed() >= Duration::from_secs(2) {
            tracing::info!(
                done = done,
                total = total,
                disputed = summary.disputed,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "validation: progress"
            );
            last_progress_log_at = std::time::Instant::now();
        }
    }

    // Records never answered because of cancellation count as no opinion.
    summary.no_opinion += total - summary.checked;
    summary.checked = total;
    Ok(summary)
}

fn validation_system_prompt(subject: &str) -> String {
    format!(
        "You are an expert examiner in {subject}.\n\
\n\
Task: Check whether the reference answer of the question between BEGIN_QUESTION and \
END_QUESTION is correct.\n\
\n\
Output:\n\
- Reply exactly CORRECT if it is.\n\
- Otherwise reply `DOUBT: <short reason>`.\n"
    )
}

fn question_prompt(record: &QuestionRecord) -> String {
    let options = record
        .options
        .iter()
        .map(|option| format!("{}. {}", option.label, option.text))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "BEGIN_QUESTION\n\
Category: {}\n\
Content: {}\n\
Options:\n{}\n\
Reference answer: {}\n\
END_QUESTION",
        record.category, record.content, options, record.answer
    )
}
