#![forbid(unsafe_code)]

pub mod aggregate;
pub mod answer_key;
pub mod candidate;
pub mod chunker;
pub mod cli;
pub mod config;
pub mod document;
pub mod error;
pub mod extraction;
pub mod formats;
pub mod logging;
pub mod openai;
pub mod oracle;
pub mod output;
pub mod pipeline;
pub mod repair;
pub mod retry;
pub mod summary;
pub mod taxonomy;
pub mod validation;
