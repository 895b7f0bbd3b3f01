// src/cloud/waiter.rs

//! Constant-interval polling without an attempt cap
//!
//! Cloud imports can legitimately take an hour, so a waiter never gives up on
//! its own. It stops when the probe reports a terminal state or when the
//! ambient cancellation token fires.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Poll interval used for EC2 import and image-copy waits
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Outcome of one probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState<T> {
    /// Terminal success
    Ready(T),
    /// Keep polling; the string is the observed status
    Pending(String),
    /// Terminal failure
    Failed(String),
}

/// A named poll loop bound to a cancellation token
#[derive(Debug, Clone)]
pub struct Waiter {
    name: String,
    interval: Duration,
    token: CancellationToken,
}

impl Waiter {
    pub fn new(name: impl Into<String>, token: CancellationToken) -> Self {
        Self {
            name: name.into(),
            interval: DEFAULT_POLL_INTERVAL,
            token,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Call `probe` until it reports a terminal state
    ///
    /// Probe errors end the wait immediately. The first probe runs without
    /// delay.
    pub async fn wait<T, F, Fut>(&self, mut probe: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<PollState<T>>>,
    {
        let mut attempt: u64 = 0;
        loop {
            if self.token.is_cancelled() {
                return Err(Error::Cancelled(format!("{} was cancelled", self.name)));
            }

            attempt += 1;
            match probe().await? {
                PollState::Ready(value) => {
                    debug!("{} finished after {} attempt(s)", self.name, attempt);
                    return Ok(value);
                }
                PollState::Failed(status) => {
                    return Err(Error::CloudError(format!(
                        "{}: reached terminal state {:?}",
                        self.name, status
                    )));
                }
                PollState::Pending(status) => {
                    debug!("{}: status {:?}, attempt {}", self.name, status, attempt);
                }
            }

            tokio::select! {
                _ = self.token.cancelled() => {
                    return Err(Error::Cancelled(format!(
                        "{} was cancelled after {} attempt(s)",
                        self.name, attempt
                    )));
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}
