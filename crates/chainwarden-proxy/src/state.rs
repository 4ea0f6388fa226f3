//! Restart bookkeeping for an unhealthy proxy.
//!
//! [`ProxyState`] is owned by the heartbeat loop and never shared, so it has
//! no interior locking.

use std::time::Duration;

use tokio::time::Instant;

/// Bounds on proxy restart attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed before the proxy is considered permanently failed.
    pub max_retries: u32,
    /// Minimum spacing between two attempts.
    pub min_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 20,
            min_interval: Duration::from_secs(180),
        }
    }
}

/// What the heartbeat should do about an unhealthy proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// The attempt budget is spent.
    Exhausted { attempts: u32 },
    /// Too soon after the previous attempt.
    Wait { remaining: Duration },
    /// Restart now; `attempt` is 1-based.
    Attempt { attempt: u32 },
}

#[derive(Debug, Clone, Default)]
pub struct ProxyState {
    pub running: bool,
    pub retry_count: u32,
    pub last_retry: Option<Instant>,
}

impl ProxyState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decides whether to restart, consuming one attempt when it does.
    pub fn next_attempt(&mut self, now: Instant, policy: &RetryPolicy) -> RetryDecision {
        if self.retry_count >= policy.max_retries {
            return RetryDecision::Exhausted {
                attempts: self.retry_count,
            };
        }

        if let Some(last) = self.last_retry {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < policy.min_interval {
                return RetryDecision::Wait {
                    remaining: policy.min_interval - elapsed,
                };
            }
        }

        self.retry_count += 1;
        self.last_retry = Some(now);
        RetryDecision::Attempt {
            attempt: self.retry_count,
        }
    }

    /// Clears the retry budget after a confirmed healthy restart.
    pub fn record_success(&mut self) {
        self.retry_count = 0;
        self.last_retry = None;
    }

    /// Updates the running flag, returning whether it changed.
    pub fn mark_running(&mut self, running: bool) -> bool {
        let changed = self.running != running;
        self.running = running;
        changed
    }
}
