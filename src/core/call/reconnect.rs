//! Reconnection policy and the user hang-up signal.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for automatic reconnection behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectionConfig {
    /// Enable automatic reconnection on transport loss.
    /// Default: true
    pub enabled: bool,

    /// Maximum number of reconnection attempts before giving up.
    /// Default: 3
    pub max_attempts: u32,

    /// Delay before the first reconnection attempt (milliseconds).
    /// Default: 3000ms, enough for the previous peer connection to release
    pub initial_delay_ms: u64,

    /// Maximum delay between reconnection attempts (milliseconds).
    /// Default: 30000ms
    pub max_delay_ms: u64,

    /// Multiplier applied per attempt.
    /// Default: 1.0 (fixed delay)
    pub backoff_multiplier: f32,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            initial_delay_ms: 3000,
            max_delay_ms: 30000,
            backoff_multiplier: 1.0,
        }
    }
}

impl ReconnectionConfig {
    /// Create a config with reconnection disabled.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Delay before the given attempt (1-based).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay = self.initial_delay_ms as f64;
        let multiplier = self.backoff_multiplier.max(1.0) as f64;

        let delay = base_delay * multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay = delay.min(self.max_delay_ms as f64);

        Duration::from_millis(delay as u64)
    }

    /// Check if another attempt is allowed after `attempt` attempts.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.enabled && attempt < self.max_attempts
    }
}

// =============================================================================
// Policy
// =============================================================================

/// Outcome of asking the policy to schedule a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Reconnection is turned off
    Disabled,
    /// A retry is already scheduled
    AlreadyPending,
    /// The cap was reached; no further automatic attempts
    Exhausted { attempts: u32 },
    /// Run attempt number `attempt` after `delay`
    Retry { attempt: u32, delay: Duration },
}

/// Attempt counter plus re-entrancy guard.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectionConfig,
    attempts: u32,
    pending: bool,
    exhausted: bool,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectionConfig) -> Self {
        Self {
            config,
            attempts: 0,
            pending: false,
            exhausted: false,
        }
    }

    pub fn config(&self) -> &ReconnectionConfig {
        &self.config
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Reserve the next attempt, if the policy allows one.
    pub fn schedule(&mut self) -> RetryDecision {
        if !self.config.enabled {
            return RetryDecision::Disabled;
        }
        if self.pending {
            return RetryDecision::AlreadyPending;
        }
        if self.exhausted || !self.config.should_retry(self.attempts) {
            self.exhausted = true;
            return RetryDecision::Exhausted {
                attempts: self.attempts,
            };
        }

        self.attempts += 1;
        self.pending = true;
        RetryDecision::Retry {
            attempt: self.attempts,
            delay: self.config.calculate_delay(self.attempts),
        }
    }

    /// The scheduled timer fired; the attempt is about to run.
    pub fn fire(&mut self) {
        self.pending = false;
    }

    /// Drop a scheduled retry without touching the counter.
    pub fn cancel(&mut self) {
        self.pending = false;
    }

    /// Back to a fresh budget. Used after a successful reconnection and on
    /// every user-initiated connect.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.pending = false;
        self.exhausted = false;
    }
}

// =============================================================================
// Hang-up Signal
// =============================================================================

/// The "user hung up" flag.
///
/// Cloned into the session handle so a hang-up can be raised while the call
/// task is suspended inside a connect attempt. Raising it cancels the token
/// that attempt is waiting on; it stays raised until the next user-initiated
/// connect re-arms it.
#[derive(Debug, Clone, Default)]
pub struct HangupSignal {
    token: Arc<Mutex<CancellationToken>>,
}

impl HangupSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hang_up(&self) {
        self.token.lock().cancel();
    }

    pub fn is_hung_up(&self) -> bool {
        self.token.lock().is_cancelled()
    }

    /// Clear the flag for an explicit restart.
    pub fn rearm(&self) {
        let mut token = self.token.lock();
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
    }

    /// Token cancelled by the next `hang_up`.
    pub fn token(&self) -> CancellationToken {
        self.token.lock().clone()
    }
}
