//! Bounded retry with jittered backoff
//!
//! Every protocol step of a replication (listing a directory, reading an entry, uploading an
//! object) runs under a [`RetryPolicy`]. Failed attempts are followed by a random sleep so that
//! competing workers hitting the same server desynchronize.
//!
//! One class of errors is never retried: an error that says the entry is a *container* (a
//! directory read as if it was a file). Retrying cannot change the kind of an entry, so the policy
//! reports [`RetryError::Container`] right away and the caller reroutes the entry to directory
//! replication.

use rand::Rng;

/// Lets the retry policy tell structural errors apart from transient ones.
pub trait Classify {
    /// True when the entry is a directory rather than a readable leaf.
    fn is_container(&self) -> bool {
        false
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("{0}")]
    Container(E),
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    /// The error returned by the last attempt.
    pub fn last(&self) -> &E {
        match self {
            RetryError::Container(error) => error,
            RetryError::Exhausted { last, .. } => last,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Lower bound of the random sleep between attempts
    pub backoff_min: std::time::Duration,
    /// Upper bound of the random sleep between attempts
    pub backoff_max: std::time::Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            backoff_min: std::time::Duration::from_millis(100),
            backoff_max: std::time::Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, min: std::time::Duration, max: std::time::Duration) -> Self {
        self.backoff_min = min;
        self.backoff_max = max;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry attempts must be at least 1".to_string());
        }
        if self.backoff_min > self.backoff_max {
            return Err(format!(
                "retry backoff range is inverted: {:?} > {:?}",
                self.backoff_min, self.backoff_max
            ));
        }
        Ok(())
    }

    /// Random sleep duration in `[backoff_min, backoff_max]`.
    pub fn backoff(&self) -> std::time::Duration {
        if self.backoff_min >= self.backoff_max {
            return self.backoff_min;
        }
        rand::rng().random_range(self.backoff_min..=self.backoff_max)
    }

    /// Runs `op` until it succeeds, reports a container, or runs out of attempts.
    ///
    /// `what` identifies the operation in log messages.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: Classify + std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_container() => {
                    tracing::debug!("{} -- not retrying: {}", what, &error);
                    return Err(RetryError::Container(error));
                }
                Err(error) => {
                    if attempt >= self.max_attempts {
                        tracing::error!(
                            "{} -- giving up after {} attempts: {}",
                            what,
                            attempt,
                            &error
                        );
                        return Err(RetryError::Exhausted {
                            attempts: attempt,
                            last: error,
                        });
                    }
                    tracing::info!("{} -- retry {}: {}", what, attempt, &error);
                    tokio::time::sleep(self.backoff()).await;
                }
            }
        }
    }
}
