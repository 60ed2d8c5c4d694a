//! Bounded retry executor.
//!
//! # Responsibilities
//! - Run a probe until it reports success or the attempt budget runs out
//! - Wait between attempts according to a [`Backoff`]
//! - Abort pending waits on cancellation
//!
//! # Behavior
//! ```text
//! attempt 0 ──(no wait)──▶ op(0) ── success? ──▶ Ok
//!                              │ no / error
//!                              ▼
//!        wait backoff(0) ──▶ op(1) ── ... ──▶ MaxRetriesExceeded { last }
//! ```
//! An error from the probe counts as a failed attempt, not a terminal
//! failure, unless the caller classifies it as fatal.

use std::fmt;
use std::future::Future;

use crate::lifecycle::CancelToken;
use crate::resilience::backoff::Backoff;

/// Why [`RetryPolicy::execute`] gave up.
#[derive(Debug)]
pub enum RetryError<T, E> {
    /// Every attempt ran without success. `last` is the final observation.
    MaxRetriesExceeded {
        attempts: u32,
        last: Option<Result<T, E>>,
    },
    /// Cancelled before the budget ran out.
    Cancelled {
        attempts: u32,
        last: Option<Result<T, E>>,
    },
    /// The probe returned an error the caller marked fatal.
    Aborted { attempts: u32, error: E },
}

impl<T, E> RetryError<T, E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::MaxRetriesExceeded { attempts, .. }
            | RetryError::Cancelled { attempts, .. }
            | RetryError::Aborted { attempts, .. } => *attempts,
        }
    }

    /// The last error observed, if the last attempt failed with one.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            RetryError::MaxRetriesExceeded { last, .. } | RetryError::Cancelled { last, .. } => {
                last.as_ref().and_then(|r| r.as_ref().err())
            }
            RetryError::Aborted { error, .. } => Some(error),
        }
    }

    /// The last non-successful value observed, if the last attempt returned one.
    pub fn last_value(&self) -> Option<&T> {
        match self {
            RetryError::MaxRetriesExceeded { last, .. } | RetryError::Cancelled { last, .. } => {
                last.as_ref().and_then(|r| r.as_ref().ok())
            }
            RetryError::Aborted { .. } => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }
}

fn write_last<T: fmt::Debug, E: fmt::Display>(
    f: &mut fmt::Formatter<'_>,
    last: &Option<Result<T, E>>,
) -> fmt::Result {
    match last {
        Some(Ok(value)) => write!(f, " (last result: {:?})", value),
        Some(Err(e)) => write!(f, " (last error: {})", e),
        None => Ok(()),
    }
}

impl<T: fmt::Debug, E: fmt::Display> fmt::Display for RetryError<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::MaxRetriesExceeded { attempts, last } => {
                write!(f, "max retries exceeded after {} attempts", attempts)?;
                write_last(f, last)
            }
            RetryError::Cancelled { attempts, last } => {
                write!(f, "cancelled after {} attempts", attempts)?;
                write_last(f, last)
            }
            RetryError::Aborted { attempts, error } => {
                write!(f, "aborted on attempt {}: {}", attempts, error)
            }
        }
    }
}

impl<T: fmt::Debug, E: fmt::Debug + fmt::Display> std::error::Error for RetryError<T, E> {}

/// Attempt budget plus backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Backoff) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Finality polling default: 6 attempts, exponential backoff.
    pub fn finality_default() -> Self {
        Self::new(6, Backoff::exponential())
    }

    /// Run `operation` until `is_success` accepts its value.
    ///
    /// # Arguments
    /// * `operation` - Probe, called with the attempt index
    /// * `is_success` - Whether a returned value ends the loop
    /// * `cancel` - Aborts pending waits and further attempts
    pub async fn execute<T, E, F, Fut, S>(
        &self,
        operation: F,
        is_success: S,
        cancel: &CancelToken,
    ) -> Result<T, RetryError<T, E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        S: Fn(&T) -> bool,
    {
        self.execute_with(operation, is_success, |_| false, cancel).await
    }

    /// Like [`RetryPolicy::execute`], but stops at the first error
    /// `is_fatal` accepts.
    pub async fn execute_with<T, E, F, Fut, S, X>(
        &self,
        mut operation: F,
        is_success: S,
        is_fatal: X,
        cancel: &CancelToken,
    ) -> Result<T, RetryError<T, E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        S: Fn(&T) -> bool,
        X: Fn(&E) -> bool,
    {
        let mut last: Option<Result<T, E>> = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                let delay = self.backoff.delay(attempt - 1);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        return Err(RetryError::Cancelled { attempts: attempt, last });
                    }
                }
            } else if cancel.is_cancelled() {
                return Err(RetryError::Cancelled { attempts: 0, last });
            }

            match operation(attempt).await {
                Ok(value) if is_success(&value) => return Ok(value),
                Ok(value) => {
                    tracing::debug!(attempt = attempt, "Attempt did not succeed");
                    last = Some(Ok(value));
                }
                Err(error) if is_fatal(&error) => {
                    return Err(RetryError::Aborted {
                        attempts: attempt + 1,
                        error,
                    });
                }
                Err(error) => {
                    last = Some(Err(error));
                }
            }
        }

        Err(RetryError::MaxRetriesExceeded {
            attempts: self.max_retries,
            last,
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::finality_default()
    }
}
