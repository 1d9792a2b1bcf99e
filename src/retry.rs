//! Re-executes idempotent operations across transient storage faults with
//! bounded back-off. Never wrap a bare `INSERT` in this: compose it around
//! the entire insert-plus-reconciliation-read closure instead, so a retried
//! attempt can never produce two rows for the same admission.

use errors::*;

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use slog::Logger;
use std::thread;
use std::time::{Duration, Instant};

pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> RetryPolicy {
        RetryPolicy {
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_secs(2),
            deadline: Duration::from_secs(30),
        }
    }
}

/// Re-runs `f` until it succeeds, returns a permanent error, or `policy`'s
/// deadline elapses. `f` must be idempotent: it may be invoked more than
/// once for a single logical call.
pub fn retry_idempotent<T, F>(log: &Logger, policy: &RetryPolicy, mut f: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let start = Instant::now();
    let mut backoff = policy.initial_backoff;

    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) => {
                if !is_transient(&e) || start.elapsed() >= policy.deadline {
                    return Err(e);
                }
                warn!(log, "Transient storage fault, retrying"; "error" => %e, "backoff_ms" => backoff.as_millis() as u64);
                thread::sleep(backoff);
                backoff = std::cmp::min(backoff * 2, policy.max_backoff);
            }
        }
    }
}

/// True if `error` represents a fault from which a fresh attempt has a
/// reasonable chance of succeeding: connection loss, pool exhaustion,
/// deadlock, or a serialization failure under contention. False for
/// anything that indicates a programming error or a permanent rejection
/// (constraint violations, bad input).
pub fn is_transient(error: &Error) -> bool {
    match error.kind() {
        ErrorKind::DatabaseConnectionPool(_) => true,
        ErrorKind::Database(DieselError::DatabaseError(kind, _)) => match kind {
            DatabaseErrorKind::SerializationFailure => true,
            DatabaseErrorKind::UnableToSendCommand => true,
            _ => false,
        },
        ErrorKind::Database(DieselError::BrokenTransactionManager) => true,
        ErrorKind::Database(DieselError::AlreadyInTransaction) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn test_log() -> Logger {
        use slog::Drain;
        slog::Logger::root(slog::Discard, o!())
    }

    #[test]
    fn test_retry_idempotent_succeeds_first_try() {
        let log = test_log();
        let policy = RetryPolicy::default();
        let result = retry_idempotent(&log, &policy, || Ok::<_, Error>(42));
        assert_eq!(42, result.unwrap());
    }

    #[test]
    fn test_retry_idempotent_recovers_after_transient_faults() {
        let log = test_log();
        let policy = RetryPolicy::default();
        let attempts = Cell::new(0);
        let result = retry_idempotent(&log, &policy, || {
            attempts.set(attempts.get() + 1);
            if attempts.get() < 3 {
                Err(Error::from(DieselError::BrokenTransactionManager))
            } else {
                Ok(42)
            }
        });
        assert_eq!(42, result.unwrap());
        assert_eq!(3, attempts.get());
    }

    #[test]
    fn test_retry_idempotent_does_not_retry_permanent_errors() {
        let log = test_log();
        let policy = RetryPolicy::default();
        let attempts = Cell::new(0);
        let result: Result<()> = retry_idempotent(&log, &policy, || {
            attempts.set(attempts.get() + 1);
            Err(ErrorKind::InvalidClient("toolongname".to_owned()).into())
        });
        assert!(result.is_err());
        assert_eq!(1, attempts.get());
    }
}
