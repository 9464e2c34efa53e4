use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub retries: usize,
    pub base: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn new(retries: usize, base: Duration, max: Duration) -> Self {
        Self { retries, base, max }
    }

    pub fn attempts(&self) -> usize {
        self.retries.saturating_add(1)
    }

    /// Exponential part of the delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: usize) -> Duration {
        let exponent = retry.saturating_sub(1).min(16) as u32;
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }

    /// Backoff plus uniform jitter in `[0, base / 2]`.
    pub fn delay(&self, retry: usize) -> Duration {
        let half_ms = (self.base.as_millis() / 2) as u64;
        let jitter = if half_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=half_ms)
        };
        self.backoff(retry) + Duration::from_millis(jitter)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Succeeded<T> {
    pub value: T,
    pub attempts: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhausted<E> {
    pub attempts: usize,
    pub last_error: E,
}

/// Runs `attempt` (called with the 0-based attempt number) until it succeeds or
/// the policy's attempt budget is spent. Calls are strictly sequential and there
/// is no sleep after the final attempt.
pub async fn run<T, E, F, Fut>(
    policy: &RetryPolicy,
    mut attempt: F,
) -> Result<Succeeded<T>, Exhausted<E>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let attempts = policy.attempts();
    let mut current = 0usize;

    loop {
        match attempt(current).await {
            Ok(value) => {
                return Ok(Succeeded {
                    value,
                    attempts: current + 1,
                });
            }
            Err(err) => {
                if current + 1 >= attempts {
                    return Err(Exhausted {
                        attempts: current + 1,
                        last_error: err,
                    });
                }

                let delay = policy.delay(current + 1);
                tracing::warn!(
                    attempt = current + 1,
                    attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "attempt failed; retrying"
                );
                tokio::time::sleep(delay).await;
                current += 1;
            }
        }
    }
}
