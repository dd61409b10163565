//! Global send-rate limiter
//!
//! One limiter is shared by the router's primary path and its delayed noise
//! tasks. The interval check, the port write and the timestamp update happen
//! under a single lock, so writes to the destination are also serialized.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Result of a rate-limited send
#[derive(Debug)]
pub enum SendOutcome {
    Sent,
    RateLimited,
    Failed(anyhow::Error),
}

#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last_send: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// A zero interval disables limiting
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_send: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_send(&self) -> Option<Instant> {
        *self.last_send.lock()
    }

    fn allows(&self, last: Option<Instant>, now: Instant) -> bool {
        if self.interval.is_zero() {
            return true;
        }
        match last {
            Some(last) => now.saturating_duration_since(last) > self.interval,
            None => true,
        }
    }

    /// Run `send` if the interval allows it
    ///
    /// The send time is only recorded when `send` succeeds.
    pub fn send_with<F>(&self, send: F) -> SendOutcome
    where
        F: FnOnce() -> anyhow::Result<()>,
    {
        self.send_at(Instant::now(), send)
    }

    fn send_at<F>(&self, now: Instant, send: F) -> SendOutcome
    where
        F: FnOnce() -> anyhow::Result<()>,
    {
        let mut last = self.last_send.lock();
        if !self.allows(*last, now) {
            return SendOutcome::RateLimited;
        }
        match send() {
            Ok(()) => {
                *last = Some(now);
                SendOutcome::Sent
            }
            Err(e) => SendOutcome::Failed(e),
        }
    }

    /// Run `f` under the limiter lock without checking or moving the interval
    pub fn bypass<T>(&self, f: impl FnOnce() -> T) -> T {
        let _guard = self.last_send.lock();
        f()
    }
}
