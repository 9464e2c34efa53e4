use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ConfigError, OracleError};

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// The external text-in/text-out completion service.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn complete(
        &self,
        request: &CompletionRequest,
        credential: &Credential,
    ) -> Result<String, OracleError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallSettings {
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl CallSettings {
    pub fn request(&self, system: impl Into<String>, user: impl Into<String>) -> CompletionRequest {
        CompletionRequest {
            system: system.into(),
            user: user.into(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            timeout: self.timeout,
        }
    }
}

/// An oracle plus the credentials it is called with. Cheap to clone into tasks.
#[derive(Clone)]
pub struct OracleHandle {
    oracle: Arc<dyn Oracle>,
    credentials: CredentialPool,
}

impl OracleHandle {
    pub fn new(oracle: Arc<dyn Oracle>, credentials: CredentialPool) -> Self {
        Self {
            oracle,
            credentials,
        }
    }

    /// `slot` identifies the work item, `attempt` its retry number; together they
    /// pick the credential.
    pub async fn call(
        &self,
        request: &CompletionRequest,
        slot: usize,
        attempt: usize,
    ) -> Result<String, OracleError> {
        let credential = self.credentials.select(slot, attempt);
        complete_with_timeout(self.oracle.as_ref(), request, credential).await
    }
}

/// Runs one oracle call under the request's wall-clock timeout.
pub async fn complete_with_timeout(
    oracle: &dyn Oracle,
    request: &CompletionRequest,
    credential: &Credential,
) -> Result<String, OracleError> {
    match tokio::time::timeout(request.timeout, oracle.complete(request, credential)).await {
        Ok(result) => result,
        Err(_) => Err(OracleError::Timeout(request.timeout)),
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tail = self
            .0
            .char_indices()
            .rev()
            .nth(3)
            .map(|(idx, _)| &self.0[idx..])
            .unwrap_or("");
        write!(f, "Credential(…{tail})")
    }
}

/// Read-only pool of API keys, shared by every worker without locking.
#[derive(Debug, Clone)]
pub struct CredentialPool {
    keys: Arc<[Credential]>,
}

impl CredentialPool {
    pub fn new<I, S>(keys: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut unique = Vec::<Credential>::new();
        for key in keys {
            let key = key.as_ref().trim();
            if key.is_empty() || unique.iter().any(|known| known.expose() == key) {
                continue;
            }
            unique.push(Credential::new(key));
        }
        if unique.is_empty() {
            return Err(ConfigError::MissingCredentials);
        }
        Ok(Self {
            keys: unique.into(),
        })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn select(&self, slot: usize, attempt: usize) -> &Credential {
        &self.keys[select_index(self.keys.len(), slot, attempt)]
    }
}

/// Spreads work items over the pool and moves to the next key on every retry.
pub fn select_index(pool_len: usize, slot: usize, attempt: usize) -> usize {
    if pool_len == 0 {
        return 0;
    }
    slot.wrapping_add(attempt) % pool_len
}
