//! Exponential-backoff reconnection policy for the runner socket.
//!
//! After every session ends, the connection supervisor asks [`decide`]
//! whether to stop, retry after a delay, or give up for good.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// WebSocket close code for a normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// WebSocket close code for an endpoint going away.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Retries allowed between two successful opens.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the retry that follows `attempts` earlier retries.
    ///
    /// `initial_delay * multiplier^attempts`, clamped to `max_delay`.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let factor = self.multiplier.powi(attempts.min(i32::MAX as u32) as i32);
        let ms = self.initial_delay.as_millis() as f64 * factor;
        let max_ms = self.max_delay.as_millis() as f64;
        Duration::from_millis(ms.min(max_ms) as u64)
    }
}

/// What the supervisor should do after a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// The peer closed normally; stay disconnected.
    Stop,
    /// Sleep for `delay`, then make retry number `attempt`.
    Retry { attempt: u32, delay: Duration },
    /// The retry budget is exhausted.
    GiveUp { attempts: u32 },
}

/// Normal and going-away closures never trigger a reconnect.
pub fn is_normal_closure(code: Option<u16>) -> bool {
    matches!(code, Some(CLOSE_NORMAL | CLOSE_GOING_AWAY))
}

/// Decide how to react to a closure with `code` after `attempts`
/// retries since the last successful open.
///
/// Failed or timed-out opens carry no close code and count as abnormal.
pub fn decide(code: Option<u16>, attempts: u32, policy: &ReconnectPolicy) -> ReconnectDecision {
    if is_normal_closure(code) {
        ReconnectDecision::Stop
    } else if attempts < policy.max_attempts {
        ReconnectDecision::Retry {
            attempt: attempts + 1,
            delay: policy.delay_for(attempts),
        }
    } else {
        ReconnectDecision::GiveUp { attempts }
    }
}

/// Sleep for `delay` unless `cancel` fires first.
///
/// Returns `false` when cancelled.
pub async fn wait_before_retry(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
