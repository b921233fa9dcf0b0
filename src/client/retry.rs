//! Bounded fixed-delay retry policy

use std::sync::Mutex;
use std::time::Duration;

/// Default number of generic retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default pause between generic retries, in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 100;

/// How many times, and how far apart, failed calls are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, Duration::from_millis(DEFAULT_RETRY_DELAY_MS))
    }
}

/// Blocks the calling thread between retries.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps on the current thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Records requested sleeps without waiting.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every duration requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
    }
}
