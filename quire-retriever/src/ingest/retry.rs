//! Retry policy for store operations.

use crate::error::{Result, RetrieverError, StoreError};
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Whether an error is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Fatal,
}

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// `base * 2^(attempt - 1)`, capped at `cap`
    Exponential { base: Duration, cap: Duration },
}

impl Backoff {
    /// Delay before retrying after failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, cap } => {
                let exponent = attempt.saturating_sub(1).min(16);
                base.saturating_mul(2_u32.pow(exponent)).min(cap)
            }
        }
    }
}

const SQLITE_BUSY: i64 = 5;
const SQLITE_LOCKED: i64 = 6;
/// Postgres `admin_shutdown`, `crash_shutdown` and `cannot_connect_now`.
const PG_RESTART_CODES: &[&str] = &["57P01", "57P02", "57P03"];

/// Classifies a store error.
///
/// Lost or closed connections, pool timeouts, I/O failures, busy or locked
/// databases and server restarts are transient. Everything else is fatal.
pub fn classify_store_error(error: &StoreError) -> ErrorClass {
    match error {
        StoreError::ConnectionClosed => ErrorClass::Transient,
        StoreError::DimensionMismatch { .. } => ErrorClass::Fatal,
        StoreError::Database(e) => match e {
            sqlx::Error::PoolClosed
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::Io(_)
            | sqlx::Error::WorkerCrashed => ErrorClass::Transient,
            sqlx::Error::Database(db) => match db.code() {
                Some(code) if PG_RESTART_CODES.iter().any(|c| *c == code) => ErrorClass::Transient,
                // SQLite reports extended result codes; the low byte is the primary code.
                Some(code) => match code.parse::<i64>() {
                    Ok(n) if matches!(n & 0xff, SQLITE_BUSY | SQLITE_LOCKED) => {
                        ErrorClass::Transient
                    }
                    _ => ErrorClass::Fatal,
                },
                None => ErrorClass::Fatal,
            },
            _ => ErrorClass::Fatal,
        },
    }
}

/// Default classifier: only store errors can be transient.
pub fn classify(error: &RetrieverError) -> ErrorClass {
    match error {
        RetrieverError::TransientStore(_) => ErrorClass::Transient,
        RetrieverError::Store(e) => classify_store_error(e),
        _ => ErrorClass::Fatal,
    }
}

/// Max attempts, a backoff schedule and an error classifier.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub classifier: fn(&RetrieverError) -> ErrorClass,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Fixed(Duration::from_secs(2)),
            classifier: classify,
        }
    }
}

/// Tags a store error with its class so callers can tell the two apart.
fn tagged(error: RetrieverError, class: ErrorClass) -> RetrieverError {
    match (error, class) {
        (RetrieverError::Store(e), ErrorClass::Transient) => RetrieverError::TransientStore(e),
        (RetrieverError::Store(e), ErrorClass::Fatal) => RetrieverError::FatalStore(e),
        (other, _) => other,
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            backoff,
            ..Default::default()
        }
    }

    pub fn with_classifier(mut self, classifier: fn(&RetrieverError) -> ErrorClass) -> Self {
        self.classifier = classifier;
        self
    }

    /// Runs `operation` until it succeeds, fails fatally or runs out of attempts.
    ///
    /// `operation` receives the 1-based attempt number. Fatal errors are
    /// returned as they are (store errors as [`RetrieverError::FatalStore`]).
    /// After the last transient failure the result is
    /// [`RetrieverError::RetriesExhausted`].
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let error = match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!("Succeeded on attempt {}/{}", attempt, max_attempts);
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            let class = (self.classifier)(&error);
            let error = tagged(error, class);
            if class == ErrorClass::Fatal {
                return Err(error);
            }
            if attempt >= max_attempts {
                warn!("Giving up after {} attempts: {}", attempt, error);
                return Err(RetrieverError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let delay = self.backoff.delay(attempt);
            warn!(
                "Attempt {}/{} failed with a transient error ({}); retrying in {:?}",
                attempt, max_attempts, error, delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Backoff::Fixed(Duration::from_millis(1)))
    }

    #[test]
    fn test_backoff_schedules() {
        assert_eq!(
            Backoff::Fixed(Duration::from_secs(2)).delay(3),
            Duration::from_secs(2)
        );
        let exp = Backoff::Exponential {
            base: Duration::from_millis(100),
            cap: Duration::from_millis(500),
        };
        assert_eq!(exp.delay(1), Duration::from_millis(100));
        assert_eq!(exp.delay(2), Duration::from_millis(200));
        assert_eq!(exp.delay(3), Duration::from_millis(400));
        assert_eq!(exp.delay(4), Duration::from_millis(500));
        assert_eq!(exp.delay(40), Duration::from_millis(500));
    }

    #[test]
    fn test_store_error_classes() {
        assert_eq!(
            classify_store_error(&StoreError::ConnectionClosed),
            ErrorClass::Transient
        );
        assert_eq!(
            classify_store_error(&StoreError::Database(sqlx::Error::PoolClosed)),
            ErrorClass::Transient
        );
        assert_eq!(
            classify_store_error(&StoreError::Database(sqlx::Error::PoolTimedOut)),
            ErrorClass::Transient
        );
        assert_eq!(
            classify_store_error(&StoreError::Database(sqlx::Error::RowNotFound)),
            ErrorClass::Fatal
        );
        assert_eq!(
            classify_store_error(&StoreError::DimensionMismatch {
                expected: 2,
                actual: 3
            }),
            ErrorClass::Fatal
        );
        assert_eq!(
            classify(&RetrieverError::invalid_config("nope")),
            ErrorClass::Fatal
        );
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() -> anyhow::Result<()> {
        let calls = AtomicU32::new(0);
        let value = quick(3)
            .run(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(RetrieverError::Store(StoreError::ConnectionClosed))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await?;
        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_exhaustion_is_terminal() {
        let result: Result<()> = quick(3)
            .run(|_| async { Err(RetrieverError::Store(StoreError::ConnectionClosed)) })
            .await;
        match result {
            Err(RetrieverError::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, RetrieverError::TransientStore(_)));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fatal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = quick(3)
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(RetrieverError::Store(StoreError::Database(
                        sqlx::Error::RowNotFound,
                    )))
                }
            })
            .await;
        assert!(matches!(result, Err(RetrieverError::FatalStore(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_custom_classifier() {
        fn everything_transient(_: &RetrieverError) -> ErrorClass {
            ErrorClass::Transient
        }
        let calls = AtomicU32::new(0);
        let result: Result<()> = quick(2)
            .with_classifier(everything_transient)
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RetrieverError::invalid_config("x")) }
            })
            .await;
        assert!(matches!(
            result,
            Err(RetrieverError::RetriesExhausted { attempts: 2, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
