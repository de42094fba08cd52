//! Waiting for the backend to finish analysing a pull request

use crate::client::{ClientError, ReviewBackend, ReviewId, ReviewState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// How often and how long to ask whether a review is ready
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            max_attempts: 600,
        }
    }
}

/// Shared flag that stops a running load
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> Result<(), ClientError> {
        if self.is_cancelled() {
            Err(ClientError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking early on cancellation
    fn sleep(&self, duration: Duration) -> Result<(), ClientError> {
        let deadline = Instant::now() + duration;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

/// Start the review and poll until it is ready.
///
/// `on_attempt` is called with the 1-based attempt number before each
/// request. Transport and backend errors end the wait immediately.
pub fn wait_until_ready(
    backend: &dyn ReviewBackend,
    pr_url: &str,
    policy: RetryPolicy,
    token: &CancelToken,
    mut on_attempt: impl FnMut(u32),
) -> Result<ReviewId, ClientError> {
    for attempt in 1..=policy.max_attempts {
        token.check()?;
        on_attempt(attempt);

        let status = backend.start_review(pr_url)?;
        match status.review_status {
            ReviewState::Ready => {
                info!(review = %status.id, attempt, "review ready");
                return Ok(status.id);
            }
            ReviewState::Processing => {
                debug!(review = %status.id, attempt, "review still processing");
                if attempt < policy.max_attempts {
                    token.sleep(policy.interval)?;
                }
            }
        }
    }

    Err(ClientError::PollExhausted {
        attempts: policy.max_attempts,
    })
}
