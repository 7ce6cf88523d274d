//! Re-login backoff policy
//!
//! Workers that lose their session mid-task re-authenticate on a fixed delay
//! rather than an exponential one: session losses are routine on a long run,
//! and the remote login endpoint handles a steady retry cadence better than
//! a burst followed by long silence. Optional jitter spreads attempts out
//! when several workers lose their sessions at the same time.

use crate::config::WorkerConfig;
use rand::Rng;
use std::time::Duration;

/// Backoff policy for re-login attempts after a session loss
///
/// Tracks consecutive failed attempts. With no cap configured the policy
/// never exhausts; the worker keeps retrying until it succeeds or observes
/// cancellation during the backoff sleep.
#[derive(Debug, Clone)]
pub struct ReloginPolicy {
    delay: Duration,
    jitter: bool,
    max_attempts: Option<u32>,
    attempts: u32,
}

impl ReloginPolicy {
    /// Create a policy from the worker configuration
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            delay: config.relogin_backoff,
            jitter: config.relogin_jitter,
            max_attempts: config.max_relogin_attempts,
            attempts: 0,
        }
    }

    /// Record a failed attempt and return the delay to sleep before the
    /// next one
    ///
    /// Returns `None` once the configured attempt cap is exhausted; the
    /// caller stops retrying and gives the worker up.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempts += 1;
        if let Some(max) = self.max_attempts {
            if self.attempts >= max {
                return None;
            }
        }

        if self.jitter {
            Some(add_jitter(self.delay))
        } else {
            Some(self.delay)
        }
    }

    /// Reset the attempt counter after a successful login
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Number of consecutive failed attempts recorded so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay,
/// so the actual delay is between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}
