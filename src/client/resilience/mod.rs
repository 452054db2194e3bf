//! Retry policy shared by the auth handler and the sink server.

mod backoff;

pub use backoff::ExponentialBackoff;

use std::time::Duration;

/// How many times to retry a failed operation and how long to wait in between.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// `None` retries forever.
    pub max_retries: Option<u32>,
    pub backoff: ExponentialBackoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: None,
            backoff: ExponentialBackoff::default(),
        }
    }
}

impl RetryConfig {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn bounded(max_retries: u32) -> Self {
        Self {
            max_retries: Some(max_retries),
            ..Default::default()
        }
    }

    pub fn with_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Backoff bounded by `min` and `max` with the default growth factor.
    pub fn with_bounds(mut self, min: Duration, max: Duration) -> Self {
        self.backoff = ExponentialBackoff::new(min, max, 2.0);
        self
    }

    /// Whether `attempts` failures have used up the retry budget.
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_retries.is_some_and(|max| attempts > max)
    }
}
