//! Retry with backoff
//!
//! Three flavours are used by the shrink pipeline:
//! - [`retry`]: fixed interval, bounded number of attempts, every error retried
//! - [`retry_until`]: any [`Backoff`] policy bounded by an overall deadline
//! - [`retry_transient`]: like [`retry_until`], but only retryable errors are retried
//!
//! All waiting is done with `tokio::time`, so paused-clock tests run instantly.

use crate::error::{Result, ShrinkError};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout_at, Instant};

/// Backoff policy: yields the delay before the next attempt, or `None` to stop
pub trait Backoff: Send {
    fn next_backoff(&mut self) -> Option<Duration>;
}

/// Constant delay between attempts, never gives up on its own
#[derive(Debug, Clone)]
pub struct ConstantBackoff {
    interval: Duration,
}

impl ConstantBackoff {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Backoff for ConstantBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        Some(self.interval)
    }
}

/// Exponentially growing delay, capped at `max_interval`
///
/// Stops once `max_elapsed` has passed since the first call to
/// [`Backoff::next_backoff`].
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub max_interval: Duration,
    pub max_elapsed: Duration,
    current: Duration,
    started: Option<Instant>,
}

impl ExponentialBackoff {
    /// Create a backoff that gives up after `max_elapsed`
    pub fn new(max_elapsed: Duration) -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            multiplier: 1.5,
            max_interval: Duration::from_secs(60),
            max_elapsed,
            current: Duration::from_millis(500),
            started: None,
        }
    }

    /// Cap the delay between attempts
    pub fn with_max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = max_interval;
        self
    }

    pub fn with_initial_interval(mut self, initial: Duration) -> Self {
        self.initial_interval = initial;
        self.current = initial;
        self
    }
}

impl Backoff for ExponentialBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        let started = *self.started.get_or_insert_with(Instant::now);
        let delay = self.current.min(self.max_interval);
        if started.elapsed() + delay > self.max_elapsed {
            return None;
        }
        let next = self.current.as_secs_f64() * self.multiplier;
        self.current = Duration::from_secs_f64(next.min(self.max_interval.as_secs_f64()));
        Some(delay)
    }
}

/// Run `operation` up to `attempts` times, sleeping `interval` between failures
///
/// Returns the last error once attempts are exhausted.
pub async fn retry<F, Fut, T>(interval: Duration, attempts: u32, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts => return Err(e),
            Err(_) => {
                attempt += 1;
                sleep(interval).await;
            }
        }
    }
}

/// Retry `operation` according to `backoff` until `deadline` from now
///
/// Each attempt is itself bounded by the deadline. On expiry the last
/// attempt's error is returned, or a timeout if no attempt finished.
pub async fn retry_until<B, F, Fut, T>(deadline: Duration, mut backoff: B, mut operation: F) -> Result<T>
where
    B: Backoff,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let deadline = Instant::now() + deadline;
    let mut last_error: Option<ShrinkError> = None;
    loop {
        match timeout_at(deadline, operation()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => last_error = Some(e),
            Err(_) => {
                return Err(last_error.unwrap_or_else(|| ShrinkError::timeout("operation deadline")));
            }
        }

        let delay = match backoff.next_backoff() {
            Some(delay) => delay,
            None => break,
        };
        if Instant::now() + delay >= deadline {
            break;
        }
        sleep(delay).await;
    }
    Err(last_error.unwrap_or_else(|| ShrinkError::timeout("operation deadline")))
}

/// Retry `operation` while it fails with a retryable error, until `deadline` from now
///
/// Non-retryable errors are returned immediately. Each attempt is bounded by
/// the deadline, so a hung call surfaces the last error or a timeout.
pub async fn retry_transient<B, F, Fut, T>(deadline: Duration, mut backoff: B, mut operation: F) -> Result<T>
where
    B: Backoff,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let deadline = Instant::now() + deadline;
    let mut last_error: Option<ShrinkError> = None;
    loop {
        let e = match timeout_at(deadline, operation()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) if !e.is_retryable() => return Err(e),
            Ok(Err(e)) => e,
            Err(_) => {
                return Err(last_error.unwrap_or_else(|| ShrinkError::timeout("operation deadline")));
            }
        };
        match backoff.next_backoff() {
            Some(delay) if Instant::now() + delay < deadline => {
                last_error = Some(e);
                sleep(delay).await;
            }
            _ => return Err(e),
        }
    }
}
