//! One retry loop for every call to an external service.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed(Duration),
    Linear(Duration),
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay after the `attempt`-th failure (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Linear(step) => step.saturating_mul(attempt),
            Backoff::Exponential { base, max } => {
                let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                base.saturating_mul(factor).min(max)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Fixed(delay),
        }
    }

    pub fn linear(max_attempts: u32, step: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Linear(step),
        }
    }

    pub fn none() -> Self {
        Self::fixed(1, Duration::ZERO)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{label} failed after {attempts} attempt(s): {last}")]
pub struct RetryError<E: Display> {
    pub label: String,
    pub attempts: u32,
    pub last: E,
}

/// Runs `op` until it succeeds or `policy.max_attempts` is reached.
pub async fn retry<T, E, F, Fut>(
    policy: RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= max_attempts => {
                tracing::error!(label, attempt, error = %err, "Giving up");
                return Err(RetryError {
                    label: label.to_string(),
                    attempts: attempt,
                    last: err,
                });
            }
            Err(err) => {
                let delay = policy.backoff.delay(attempt);
                tracing::warn!(
                    label,
                    attempt,
                    max_attempts,
                    error = %err,
                    "Attempt failed, retrying in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_delays() {
        let ms = Duration::from_millis;
        assert_eq!(Backoff::Fixed(ms(50)).delay(3), ms(50));
        assert_eq!(Backoff::Linear(ms(10)).delay(3), ms(30));
        let exp = Backoff::Exponential {
            base: ms(100),
            max: ms(500),
        };
        assert_eq!(exp.delay(1), ms(100));
        assert_eq!(exp.delay(3), ms(400));
        assert_eq!(exp.delay(10), ms(500));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<&str, RetryError<String>> =
            retry(RetryPolicy::fixed(3, Duration::ZERO), "flaky", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(format!("boom {}", attempt))
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn reports_last_error_when_exhausted() {
        let err = retry(RetryPolicy::fixed(2, Duration::ZERO), "down", |attempt| async move {
            Err::<(), _>(format!("fail {}", attempt))
        })
        .await
        .unwrap_err();
        assert_eq!(err.attempts, 2);
        assert_eq!(err.last, "fail 2");
        assert!(err.to_string().contains("down failed after 2"));
    }
}
