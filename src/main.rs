use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    let cli = quizify::cli::Cli::parse();
    quizify::logging::init(cli.verbose).context("init logging")?;
    tracing::debug!(?cli, "parsed cli");

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received; writing partial results");
                cancel.cancel();
            }
        }
    });

    match cli.command {
        quizify::cli::Command::Extract(args) => {
            quizify::pipeline::extract(args, &cancel)
                .await
                .context("extract")?;
        }
        quizify::cli::Command::Validate(args) => {
            quizify::pipeline::validate(args, &cancel)
                .await
                .context("validate")?;
        }
        quizify::cli::Command::Chunks(args) => {
            quizify::pipeline::chunks(args).context("chunks")?;
        }
    }

    Ok(())
}
