use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;

use crate::aggregate::Aggregator;
use crate::answer_key;
use crate::chunker;
use crate::cli::{ChunksArgs, ExtractArgs, ValidateArgs};
use crate::config::{ConfigOverrides, PipelineConfig};
use crate::document;
use crate::extraction;
use crate::formats::QuestionBank;
use crate::openai::ChatCompletionsOracle;
use crate::oracle::OracleHandle;
use crate::output;
use crate::summary::{LogSink, NotificationSink, RunSummary, ValidationSummary};
use crate::validation::{self, ValidationSettings};

/// `quizify extract`.
pub async fn extract(args: ExtractArgs, cancel: &CancellationToken) -> anyhow::Result<()> {
    let config = PipelineConfig::resolve(args.config.as_deref(), &args.overrides())
        .context("load configuration")?;
    let oracle = build_oracle(&config)?;

    let summary = run_extract(
        &config,
        &oracle,
        &args.input,
        &args.out_dir,
        args.validate,
        &LogSink,
        cancel,
    )
    .await?;

    println!("{}", summary.output);
    Ok(())
}

/// `quizify validate`.
pub async fn validate(args: ValidateArgs, cancel: &CancellationToken) -> anyhow::Result<()> {
    let config = PipelineConfig::resolve(args.config.as_deref(), &args.overrides())
        .context("load configuration")?;
    let oracle = build_oracle(&config)?;

    let (path, summary) = run_validate(
        &config,
        &oracle,
        args.file.as_deref(),
        &args.out_dir,
        args.subject.as_deref(),
        cancel,
    )
    .await?;

    tracing::info!(
        file = %path.display(),
        disputed = summary.disputed,
        "validation written"
    );
    println!("{}", path.display());
    Ok(())
}

/// `quizify chunks`: prints chunk boundaries, one JSON object per line.
pub fn chunks(args: ChunksArgs) -> anyhow::Result<()> {
    let overrides = ConfigOverrides {
        chunk_size: args.chunk_size,
        overlap: args.overlap,
        ..ConfigOverrides::default()
    };
    let config =
        PipelineConfig::resolve(args.config.as_deref(), &overrides).context("load configuration")?;

    let document = document::read_document(&document::resolve_input(&args.input));
    let chunks = chunker::split(&document.text(), config.chunk_size, config.overlap)
        .context("split document")?;
    for chunk in &chunks {
        let bounds = ChunkBounds {
            index: chunk.index,
            start: chunk.start,
            end: chunk.end,
            chars: chunk.end - chunk.start,
        };
        println!(
            "{}",
            serde_json::to_string(&bounds).context("serialize chunk bounds")?
        );
    }
    Ok(())
}

#[derive(serde::Serialize)]
struct ChunkBounds {
    index: usize,
    start: usize,
    end: usize,
    chars: usize,
}

/// Fails with `MissingCredentials` before anything else happens.
pub fn build_oracle(config: &PipelineConfig) -> anyhow::Result<OracleHandle> {
    let credentials = config.credential_pool()?;
    let oracle = ChatCompletionsOracle::new(&config.base_url, &config.model, config.timeout())
        .context("build oracle client")?;
    tracing::info!(
        base_url = %config.base_url,
        model = %config.model,
        credentials = credentials.len(),
        "oracle ready"
    );
    Ok(OracleHandle::new(Arc::new(oracle), credentials))
}

/// Document in, question bank file out. Chunk failures only show up in the
/// summary; output I/O failures abort.
pub async fn run_extract(
    config: &PipelineConfig,
    oracle: &OracleHandle,
    input: &Path,
    out_dir: &Path,
    validate: bool,
    sink: &dyn NotificationSink,
    cancel: &CancellationToken,
) -> anyhow::Result<RunSummary> {
    let started_at = chrono::Utc::now();
    let timer = std::time::Instant::now();

    let input = document::resolve_input(input);
    let source = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| input.display().to_string());
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    tracing::info!(input = %input.display(), subject = %config.subject, "extract");

    let document = document::read_document(&input);
    let text = document.text();
    let chunks =
        chunker::split(&text, config.chunk_size, config.overlap).context("split document")?;

    let key = answer_key::extract_answer_key(
        oracle,
        &config.extraction_call(),
        &text,
        config.answer_key_budget,
        cancel,
    )
    .await;

    let mut aggregator = Aggregator::new(config.chapter.clone());
    let report = extraction::run_all(
        oracle,
        &config.extraction_settings(),
        &chunks,
        &key,
        &mut aggregator,
        cancel,
    )
    .await?;
    let duplicates = aggregator.duplicates();
    let records = aggregator.finish();
    let accepted = records.len();

    let output_path = output::next_output_path(out_dir, &stem);
    let mut bank = output::new_bank(&source, &config.subject, records);
    output::write_bank(&output_path, &bank).await?;
    output::record_pointer(out_dir, &output_path).await?;
    tracing::info!(
        output = %output_path.display(),
        records = accepted,
        failed_chunks = report.failed.len(),
        "question bank written"
    );

    let mut validation = None;
    if validate && !report.cancelled && !cancel.is_cancelled() {
        let summary = validate_bank(config, oracle, &mut bank, &config.subject, cancel).await?;
        output::write_bank(&output_path, &bank).await?;
        validation = Some(summary);
    }

    let summary = RunSummary {
        source,
        output: output_path.display().to_string(),
        subject: config.subject.clone(),
        started_at: started_at.to_rfc3339(),
        finished_at: chrono::Utc::now().to_rfc3339(),
        duration_ms: timer.elapsed().as_millis() as u64,
        chunks_total: report.chunks_total,
        chunks_failed: report.failed.len(),
        failed_chunks: report.failed,
        rescued: report.rescued,
        candidates: report.candidates,
        accepted,
        duplicates,
        answer_key_chars: key.chars().count(),
        validation,
    };
    output::write_json_atomic(&output::summary_path(&output_path), &summary)
        .await
        .context("write run summary")?;

    if let Err(err) = sink.notify(&summary).await {
        tracing::warn!(error = %format!("{err:#}"), "notification failed");
    }
    Ok(summary)
}

/// Re-audits an existing question bank in place. Without `file`, the pointer
/// file in `out_dir` names the target.
pub async fn run_validate(
    config: &PipelineConfig,
    oracle: &OracleHandle,
    file: Option<&Path>,
    out_dir: &Path,
    subject: Option<&str>,
    cancel: &CancellationToken,
) -> anyhow::Result<(PathBuf, ValidationSummary)> {
    let path = match file {
        Some(file) => file.to_path_buf(),
        None => output::read_pointer(out_dir).await?,
    };
    let mut bank = output::read_bank(&path).await?;
    let subject = subject
        .map(str::to_owned)
        .or_else(|| Some(bank.subject.clone()).filter(|subject| !subject.trim().is_empty()))
        .unwrap_or_else(|| config.subject.clone());
    tracing::info!(
        file = %path.display(),
        subject = %subject,
        records = bank.data.len(),
        "validate"
    );

    let summary = validate_bank(config, oracle, &mut bank, &subject, cancel).await?;
    output::write_bank(&path, &bank).await?;
    Ok((path, summary))
}

async fn validate_bank(
    config: &PipelineConfig,
    oracle: &OracleHandle,
    bank: &mut QuestionBank,
    subject: &str,
    cancel: &CancellationToken,
) -> anyhow::Result<ValidationSummary> {
    let settings = ValidationSettings {
        workers: config.validate_workers,
        retry: config.validation_retry(),
        call: config.validation_call(),
        subject: subject.to_owned(),
    };
    let summary = validation::validate_all(oracle, &settings, &mut bank.data, cancel)
        .await
        .context("validation pass")?;

    if !bank.source.ends_with(output::VALIDATED_SUFFIX) {
        bank.source.push_str(output::VALIDATED_SUFFIX);
    }
    Ok(summary)
}
