use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;

use crate::aggregate::Aggregator;
use crate::answer_key;
use crate::candidate::candidates_from_items;
use crate::chunker::Chunk;
use crate::error::AttemptError;
use crate::formats::{CandidateRecord, FailedChunk};
use crate::oracle::{CallSettings, OracleHandle};
use crate::repair;
use crate::retry::{self, RetryPolicy};

pub const CANCELLED: &str = "cancelled";

const EXTRACTION_SYSTEM_PROMPT: &str = "You convert exam material into structured quiz items.\n\
\n\
Input: one excerpt between BEGIN_CHUNK and END_CHUNK, and an answer key between \
BEGIN_ANSWER_KEY and END_ANSWER_KEY (may be NONE).\n\
\n\
Rules:\n\
- Output ONLY a JSON array. No Markdown, no commentary.\n\
- One object per complete item: {\"category\", \"type\", \"content\", \"options\", \"answer\", \"analysis\"}.\n\
- `type` is one of SINGLE_CHOICE, MULTI_CHOICE, TRUE_FALSE, FILL_BLANK, ESSAY.\n\
- `options` is a list of {\"label\", \"text\"}; empty for non-choice items.\n\
- `answer`: use the answer written next to the item; otherwise look the item number up in the \
answer key; otherwise leave it empty. Never invent answers.\n\
- Skip fragments that are cut off at the start or end of the excerpt.\n\
- If the excerpt holds no items, output [].\n";

#[derive(Debug, Clone, Copy)]
pub struct ExtractionSettings {
    pub workers: usize,
    pub retry: RetryPolicy,
    pub call: CallSettings,
    /// Max chars of the answer key sent along with each chunk.
    pub answer_key_cap: usize,
    pub rescue: bool,
    /// Feed the aggregator in chunk order instead of completion order.
    pub ordered_numbering: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionReport {
    pub chunks_total: usize,
    pub failed: Vec<FailedChunk>,
    /// Chunks that failed the main pass but succeeded in the rescue pass.
    pub rescued: usize,
    pub candidates: usize,
    pub cancelled: bool,
}

enum ChunkOutcome {
    Extracted {
        candidates: Vec<CandidateRecord>,
        attempts: usize,
    },
    Failed {
        attempts: usize,
        error: String,
    },
}

/// Receives chunk results in completion order. Sole writer to the aggregator.
struct Collector<'a> {
    aggregator: &'a mut Aggregator,
    ordered: bool,
    buffered: BTreeMap<usize, Vec<CandidateRecord>>,
    candidates: usize,
    failed: Vec<FailedChunk>,
}

impl Collector<'_> {
    fn record(&mut self, index: usize, outcome: ChunkOutcome) {
        match outcome {
            ChunkOutcome::Extracted {
                candidates,
                attempts,
            } => {
                let produced = candidates.len();
                self.candidates += produced;
                let accepted = if self.ordered {
                    self.buffered.insert(index, candidates);
                    0
                } else {
                    self.aggregator.add_all(candidates)
                };
                tracing::debug!(
                    chunk_index = index,
                    attempts = attempts,
                    candidates = produced,
                    accepted = accepted,
                    "chunk extracted"
                );
            }
            ChunkOutcome::Failed { attempts, error } => {
                tracing::warn!(
                    chunk_index = index,
                    attempts = attempts,
                    error = %error,
                    "chunk failed"
                );
                self.failed.push(FailedChunk {
                    index,
                    attempts,
                    error,
                });
            }
        }
    }

    fn flush(&mut self) {
        for (_, candidates) in std::mem::take(&mut self.buffered) {
            self.aggregator.add_all(candidates);
        }
    }
}

/// Extracts every chunk under bounded concurrency, then optionally re-runs the
/// failed ones serially. Candidates go straight into `aggregator`.
pub async fn run_all(
    oracle: &OracleHandle,
    settings: &ExtractionSettings,
    chunks: &[Chunk],
    answer_key: &str,
    aggregator: &mut Aggregator,
    cancel: &CancellationToken,
) -> anyhow::Result<ExtractionReport> {
    let answer_key: Arc<str> = Arc::from(answer_key::capped(answer_key, settings.answer_key_cap));
    let mut collector = Collector {
        aggregator,
        ordered: settings.ordered_numbering,
        buffered: BTreeMap::new(),
        candidates: 0,
        failed: Vec::new(),
    };

    let jobs = chunks.iter().map(|chunk| (chunk.clone(), 0)).collect::<Vec<_>>();
    let mut cancelled = run_pass(
        "main",
        oracle,
        settings,
        jobs,
        settings.workers,
        &answer_key,
        &mut collector,
        cancel,
    )
    .await
    .context("extraction main pass")?;

    let mut rescued = 0usize;
    if settings.rescue && !cancelled && !collector.failed.is_empty() {
        let failed = std::mem::take(&mut collector.failed);
        let prior_attempts = failed
            .iter()
            .map(|item| (item.index, item.attempts))
            .collect::<HashMap<_, _>>();
        let jobs = chunks
            .iter()
            .filter_map(|chunk| {
                prior_attempts
                    .get(&chunk.index)
                    .map(|attempts| (chunk.clone(), *attempts))
            })
            .collect::<Vec<_>>();

        tracing::info!(chunks = jobs.len(), "extraction: rescue pass");
        cancelled = run_pass(
            "rescue",
            oracle,
            settings,
            jobs,
            1,
            &answer_key,
            &mut collector,
            cancel,
        )
        .await
        .context("extraction rescue pass")?;
        rescued = failed.len().saturating_sub(collector.failed.len());
    }

    collector.flush();
    collector.failed.sort_by_key(|item| item.index);

    Ok(ExtractionReport {
        chunks_total: chunks.len(),
        failed: collector.failed,
        rescued,
        candidates: collector.candidates,
        cancelled,
    })
}

/// Returns whether the pass was cut short by `cancel`.
#[allow(clippy::too_many_arguments)]
async fn run_pass(
    pass: &'static str,
    oracle: &OracleHandle,
    settings: &ExtractionSettings,
    jobs: Vec<(Chunk, usize)>,
    workers: usize,
    answer_key: &Arc<str>,
    collector: &mut Collector<'_>,
    cancel: &CancellationToken,
) -> anyhow::Result<bool> {
    let total_chunks = jobs.len();
    if total_chunks == 0 {
        return Ok(false);
    }
    let concurrency = workers.max(1).min(total_chunks);
    tracing::info!(
        pass = pass,
        chunks = total_chunks,
        concurrency = concurrency,
        retries = settings.retry.retries,
        "extraction: dispatching chunks"
    );

    let mut join_set = tokio::task::JoinSet::new();
    let mut next_idx = 0usize;
    let mut in_flight = BTreeSet::new();
    let mut cancelled = false;
    let mut done_chunks = 0usize;
    let mut failed_chunks = 0usize;
    let started_at = std::time::Instant::now();
    let mut last_progress_log_at = started_at;

    while (!cancelled && next_idx < total_chunks) || !join_set.is_empty() {
        while !cancelled && next_idx < total_chunks && join_set.len() < concurrency {
            let (chunk, prior_attempts) = jobs[next_idx].clone();
            in_flight.insert(chunk.index);

            let oracle = oracle.clone();
            let call = settings.call;
            let retry = settings.retry;
            let answer_key = Arc::clone(answer_key);

            join_set.spawn(async move {
                let index = chunk.index;
                let outcome =
                    extract_chunk(&oracle, &call, &retry, &chunk, &answer_key, prior_attempts)
                        .await;
                (index, outcome)
            });
            next_idx += 1;
        }

        let event = tokio::select! {
            biased;
            _ = cancel.cancelled(), if !cancelled => None,
            joined = join_set.join_next() => Some(joined),
        };
        let Some(joined) = event else {
            cancelled = true;
            join_set.abort_all();
            tracing::warn!(
                pass = pass,
                in_flight = in_flight.len(),
                undispatched = total_chunks - next_idx,
                "extraction cancelled"
            );
            continue;
        };
        let Some(joined) = joined else {
            break;
        };
        let (index, outcome) = match joined {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => continue,
            Err(err) => return Err(err).context("join extraction task"),
        };

        in_flight.remove(&index);
        if matches!(outcome, ChunkOutcome::Failed { .. }) {
            failed_chunks += 1;
        }
        collector.record(index, outcome);

        done_chunks += 1;
        if done_chunks == total_chunks || last_progress_log_at.elapsed() >= Duration::from_secs(2) {
            tracing::info!(
                pass = pass,
                done = done_chunks,
                total = total_chunks,
                failed = failed_chunks,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "extraction: progress"
            );
            last_progress_log_at = std::time::Instant::now();
        }
    }

    if cancelled {
        let undispatched = jobs[next_idx..].iter().map(|(chunk, _)| chunk.index);
        for index in in_flight.into_iter().chain(undispatched) {
            collector.record(
                index,
                ChunkOutcome::Failed {
                    attempts: 0,
                    error: CANCELLED.to_owned(),
                },
            );
        }
    }

    Ok(cancelled)
}

async fn extract_chunk(
    oracle: &OracleHandle,
    call: &CallSettings,
    retry: &RetryPolicy,
    chunk: &Chunk,
    answer_key: &str,
    prior_attempts: usize,
) -> ChunkOutcome {
    tracing::debug!(chunk_index = chunk.index, chars = chunk.end - chunk.start, "extract chunk");
    let request = call.request(
        EXTRACTION_SYSTEM_PROMPT,
        extraction_prompt(&chunk.text, answer_key),
    );
    let request = &request;
    let slot = chunk.index;

    let result = retry::run(retry, move |attempt| async move {
        let raw = oracle.call(request, slot, prior_attempts + attempt).await?;
        let items = repair::repair(&raw)?.into_items()?;
        Ok::<_, AttemptError>(candidates_from_items(items))
    })
    .await;

    match result {
        Ok(succeeded) => ChunkOutcome::Extracted {
            candidates: succeeded.value,
            attempts: prior_attempts + succeeded.attempts,
        },
        Err(exhausted) => ChunkOutcome::Failed {
            attempts: prior_attempts + exhausted.attempts,
            error: exhausted.last_error.to_string(),
        },
    }
}

fn extraction_prompt(chunk_text: &str, answer_key: &str) -> String {
    let answer_key = if answer_key.trim().is_empty() {
        "NONE"
    } else {
        answer_key
    };
    format!(
        "BEGIN_ANSWER_KEY\n{answer_key}\nEND_ANSWER_KEY\n\nBEGIN_CHUNK\n{chunk_text}\nEND_CHUNK"
    )
}
