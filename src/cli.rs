use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::config::ConfigOverrides;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). Ignored when RUST_LOG is set.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Extract quiz items from a document into a new question bank file.
    Extract(ExtractArgs),
    /// Audit the answers of an existing question bank in place.
    Validate(ValidateArgs),
    /// Print chunk boundaries for a document (no API calls).
    Chunks(ChunksArgs),
}

#[derive(Debug, Args)]
pub struct ExtractArgs {
    /// Input document (.docx, .txt, .md) or a directory containing one.
    #[arg(long)]
    pub input: PathBuf,

    /// Directory for question bank files.
    #[arg(long, default_value = "output")]
    pub out_dir: PathBuf,

    /// Subject label written to the output and used by the validator.
    #[arg(long)]
    pub subject: Option<String>,

    /// Chapter label for items without one.
    #[arg(long)]
    pub chapter: Option<String>,

    /// Maximum concurrent oracle calls.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Chunk size in characters.
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Characters shared by consecutive chunks.
    #[arg(long)]
    pub overlap: Option<usize>,

    /// Retries per chunk after the first attempt.
    #[arg(long)]
    pub retries: Option<usize>,

    /// Wall-clock limit for a single oracle call.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Skip the serial rescue pass over failed chunks.
    #[arg(long, default_value_t = false)]
    pub no_rescue: bool,

    /// Number items in document order instead of completion order.
    #[arg(long, default_value_t = false)]
    pub ordered_numbering: bool,

    /// Run the validation pass on the new file.
    #[arg(long, default_value_t = false)]
    pub validate: bool,

    /// Config file (YAML or JSON). Defaults to ./config.json when present.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl ExtractArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            subject: self.subject.clone(),
            chapter: self.chapter.clone(),
            max_workers: self.workers,
            chunk_size: self.chunk_size,
            overlap: self.overlap,
            retries: self.retries,
            timeout_secs: self.timeout_secs,
            no_rescue: self.no_rescue,
            ordered_numbering: self.ordered_numbering,
            ..ConfigOverrides::default()
        }
    }
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Question bank to audit. Defaults to the file named in
    /// `<out-dir>/last_generated_file.txt`.
    #[arg(long)]
    pub file: Option<PathBuf>,

    #[arg(long, default_value = "output")]
    pub out_dir: PathBuf,

    /// Subject the examiner specializes in. Defaults to the file's subject.
    #[arg(long)]
    pub subject: Option<String>,

    /// Maximum concurrent oracle calls.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Retries per record after the first attempt.
    #[arg(long)]
    pub retries: Option<usize>,

    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl ValidateArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            subject: self.subject.clone(),
            validate_workers: self.workers,
            validate_retries: self.retries,
            ..ConfigOverrides::default()
        }
    }
}

#[derive(Debug, Args)]
pub struct ChunksArgs {
    #[arg(long)]
    pub input: PathBuf,

    #[arg(long)]
    pub chunk_size: Option<usize>,

    #[arg(long)]
    pub overlap: Option<usize>,

    #[arg(long)]
    pub config: Option<PathBuf>,
}
