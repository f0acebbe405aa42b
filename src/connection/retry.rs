//! Retry with cool-down
//!
//! Wraps an operation that may fail (opening a connection). A failure is
//! remembered for the cool-down window; calls inside the window get the
//! same error back without running the operation again. The first call
//! after the window runs it again.
//!
//! There is no single-flight guarantee: callers that arrive together after
//! the window has elapsed may each run the operation.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::error::{ConnectionError, ConnectionResult};

#[derive(Debug)]
pub struct RetryWithCooldown {
    cooldown: Duration,
    last_failure: Mutex<Option<(Instant, ConnectionError)>>,
}

impl RetryWithCooldown {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_failure: Mutex::new(None),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// The cached failure, if still inside the cool-down window
    pub fn cached_failure(&self) -> Option<ConnectionError> {
        let guard = self.last_failure.lock();
        match guard.as_ref() {
            Some((at, err)) if at.elapsed() < self.cooldown => Some(err.clone()),
            _ => None,
        }
    }

    /// Forget any cached failure
    pub fn reset(&self) {
        *self.last_failure.lock() = None;
    }

    /// Run `op` unless a recent failure is cached
    pub async fn run<T, F, Fut>(&self, op: F) -> ConnectionResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ConnectionResult<T>>,
    {
        if let Some(err) = self.cached_failure() {
            return Err(err);
        }

        match op().await {
            Ok(value) => {
                self.reset();
                Ok(value)
            }
            Err(err) => {
                *self.last_failure.lock() = Some((Instant::now(), err.clone()));
                Err(err)
            }
        }
    }
}
