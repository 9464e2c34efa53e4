use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::extraction::ExtractionSettings;
use crate::oracle::{CallSettings, CredentialPool};
use crate::retry::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "config.json";

pub const ENV_API_KEYS: &str = "QUIZIFY_API_KEYS";
pub const ENV_API_KEY: &str = "QUIZIFY_API_KEY";
pub const ENV_BASE_URL: &str = "QUIZIFY_BASE_URL";
pub const ENV_MODEL: &str = "QUIZIFY_MODEL";

/// Every knob of a run. Built once in `main` and passed down explicitly.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub subject: String,
    /// Chapter label for items the oracle does not assign one to.
    pub chapter: String,
    pub api_keys: Vec<String>,
    pub base_url: String,
    pub model: String,

    pub max_workers: usize,
    pub chunk_size: usize,
    pub overlap: usize,
    pub retries: usize,
    pub timeout_secs: u64,
    pub rescue: bool,
    pub ordered_numbering: bool,

    pub validate_workers: usize,
    pub validate_retries: usize,

    pub answer_key_budget: usize,
    pub answer_key_cap: usize,

    pub temperature: f32,
    pub max_tokens: u32,
    pub validate_max_tokens: u32,

    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            subject: "通用".to_owned(),
            chapter: "导入题目".to_owned(),
            api_keys: Vec::new(),
            base_url: "https://open.bigmodel.cn/api/paas/v4".to_owned(),
            model: "glm-4-flash".to_owned(),
            max_workers: 10,
            chunk_size: 3000,
            overlap: 500,
            retries: 3,
            timeout_secs: 120,
            rescue: true,
            ordered_numbering: false,
            validate_workers: 20,
            validate_retries: 2,
            answer_key_budget: 8000,
            answer_key_cap: 3000,
            temperature: 0.1,
            max_tokens: 4096,
            validate_max_tokens: 200,
            backoff_base_ms: 1000,
            backoff_max_ms: 30_000,
        }
    }
}

/// Command-line values; `None` keeps the lower layer.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub subject: Option<String>,
    pub chapter: Option<String>,
    pub max_workers: Option<usize>,
    pub chunk_size: Option<usize>,
    pub overlap: Option<usize>,
    pub retries: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub no_rescue: bool,
    pub ordered_numbering: bool,
    pub validate_workers: Option<usize>,
    pub validate_retries: Option<usize>,
}

impl PipelineConfig {
    /// Defaults, then the config file, then the process environment, then `overrides`.
    pub fn resolve(
        config_path: Option<&Path>,
        overrides: &ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::load(config_path)?;
        config.apply_env(|name| std::env::var(name).ok());
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    /// An explicit path must exist; the implicit `./config.json` is optional.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match config_path {
            Some(path) => path.to_path_buf(),
            None => {
                let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !fallback.is_file() {
                    return Ok(Self::default());
                }
                fallback
            }
        };

        let raw = std::fs::read_to_string(&path).map_err(|err| ConfigError::Load {
            path: path.clone(),
            reason: err.to_string(),
        })?;
        let config = Self::from_text(&raw).map_err(|err| ConfigError::Load {
            path: path.clone(),
            reason: err.to_string(),
        })?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Parses YAML or JSON.
    pub fn from_text(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(keys) = var(ENV_API_KEYS) {
            let keys = keys
                .split(',')
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_owned)
                .collect::<Vec<_>>();
            if !keys.is_empty() {
                self.api_keys = keys;
            }
        }
        if let Some(key) = var(ENV_API_KEY)
            && !key.trim().is_empty()
        {
            self.api_keys.push(key.trim().to_owned());
        }
        if let Some(base_url) = var(ENV_BASE_URL).filter(|value| !value.trim().is_empty()) {
            self.base_url = base_url.trim().to_owned();
        }
        if let Some(model) = var(ENV_MODEL).filter(|value| !value.trim().is_empty()) {
            self.model = model.trim().to_owned();
        }
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(subject) = &overrides.subject {
            self.subject = subject.clone();
        }
        if let Some(chapter) = &overrides.chapter {
            self.chapter = chapter.clone();
        }
        if let Some(workers) = overrides.max_workers {
            self.max_workers = workers;
        }
        if let Some(chunk_size) = overrides.chunk_size {
            self.chunk_size = chunk_size;
        }
        if let Some(overlap) = overrides.overlap {
            self.overlap = overlap;
        }
        if let Some(retries) = overrides.retries {
            self.retries = retries;
        }
        if let Some(timeout_secs) = overrides.timeout_secs {
            self.timeout_secs = timeout_secs;
        }
        if overrides.no_rescue {
            self.rescue = false;
        }
        if overrides.ordered_numbering {
            self.ordered_numbering = true;
        }
        if let Some(workers) = overrides.validate_workers {
            self.validate_workers = workers;
        }
        if let Some(retries) = overrides.validate_retries {
            self.validate_retries = retries;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size <= self.overlap {
            return Err(invalid(
                "chunk_size",
                format!(
                    "must be greater than overlap ({} <= {})",
                    self.chunk_size, self.overlap
                ),
            ));
        }
        if self.max_workers == 0 {
            return Err(invalid("max_workers", "must be >= 1"));
        }
        if self.validate_workers == 0 {
            return Err(invalid("validate_workers", "must be >= 1"));
        }
        if self.timeout_secs == 0 {
            return Err(invalid("timeout_secs", "must be >= 1"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(invalid(
                "temperature",
                format!("must be within [0, 2], got {}", self.temperature),
            ));
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(invalid("backoff_max_ms", "must be >= backoff_base_ms"));
        }
        if self.base_url.trim().is_empty() {
            return Err(invalid("base_url", "must not be empty"));
        }
        Ok(())
    }

    pub fn credential_pool(&self) -> Result<CredentialPool, ConfigError> {
        CredentialPool::new(&self.api_keys)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn backoff(&self, retries: usize) -> RetryPolicy {
        RetryPolicy::new(
            retries,
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_max_ms),
        )
    }

    pub fn extraction_call(&self) -> CallSettings {
        CallSettings {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            timeout: self.timeout(),
        }
    }

    pub fn validation_call(&self) -> CallSettings {
        CallSettings {
            max_tokens: self.validate_max_tokens,
            ..self.extraction_call()
        }
    }

    pub fn extraction_settings(&self) -> ExtractionSettings {
        ExtractionSettings {
            workers: self.max_workers,
            retry: self.backoff(self.retries),
            call: self.extraction_call(),
            answer_key_cap: self.answer_key_cap,
            rescue: self.rescue,
            ordered_numbering: self.ordered_numbering,
        }
    }

    pub fn validation_retry(&self) -> RetryPolicy {
        self.backoff(self.validate_retries)
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidSetting {
        field,
        reason: reason.into(),
    }
}
