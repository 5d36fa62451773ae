//! # Backoff Scheduling
//!
//! Decides how long the consumer pauses after a cycle that made no progress,
//! either because every queue was empty or because a transport call failed.
//!
//! The default is a fixed pause. Growth and jitter can be enabled for soak
//! runs against shared emulators:
//!
//! ```rust
//! use pull_consumer_core::backoff::BackoffScheduler;
//! use std::time::Duration;
//!
//! // Default: 2s after every unproductive cycle
//! let fixed = BackoffScheduler::default();
//! assert_eq!(fixed.next_pause(5), Duration::from_secs(2));
//!
//! // 500ms doubling up to 4s
//! let growing = BackoffScheduler::fixed(Duration::from_millis(500))
//!     .with_growth(2.0, Duration::from_secs(4));
//! assert_eq!(growing.next_pause(3), Duration::from_secs(2));
//! ```

use rand::Rng;
use std::fmt;
use std::time::Duration;

#[cfg(test)]
#[path = "backoff_tests.rs"]
mod tests;

/// Pause applied after an unproductive cycle when nothing else is configured
pub const DEFAULT_PAUSE: Duration = Duration::from_secs(2);

/// Why the consumer is pausing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    /// Every queue returned an empty batch
    Idle,
    /// The cycle ended in a transport error
    TransportError,
}

/// Milliseconds in `pause`, saturating at `u64::MAX`
pub fn pause_millis(pause: Duration) -> u64 {
    u64::try_from(pause.as_millis()).unwrap_or(u64::MAX)
}

impl fmt::Display for PauseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::TransportError => f.write_str("transport_error"),
        }
    }
}

/// Pause policy between unproductive poll cycles
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffScheduler {
    /// Pause after the first unproductive cycle
    pub pause: Duration,

    /// Growth factor per further consecutive unproductive cycle (1.0 = fixed)
    pub multiplier: f64,

    /// Upper bound for grown pauses
    pub max_pause: Duration,

    /// Whether to add jitter to pauses
    pub use_jitter: bool,

    /// Jitter range as a fraction of the pause (0.25 = ±25%)
    pub jitter_percent: f64,
}

impl Default for BackoffScheduler {
    fn default() -> Self {
        Self::fixed(DEFAULT_PAUSE)
    }
}

impl BackoffScheduler {
    /// Create a scheduler that always pauses for `pause`
    pub fn fixed(pause: Duration) -> Self {
        Self {
            pause,
            multiplier: 1.0,
            max_pause: pause,
            use_jitter: false,
            jitter_percent: 0.0,
        }
    }

    /// Grow the pause by `multiplier` per consecutive unproductive cycle, capped at `max_pause`
    pub fn with_growth(mut self, multiplier: f64, max_pause: Duration) -> Self {
        self.multiplier = multiplier.max(1.0);
        self.max_pause = max_pause.max(self.pause);
        self
    }

    /// Add ±`percent` random variation (0.0 to 1.0) to every pause
    pub fn with_jitter_percent(mut self, percent: f64) -> Self {
        self.jitter_percent = percent.clamp(0.0, 1.0);
        self.use_jitter = self.jitter_percent > 0.0;
        self
    }

    /// Calculate the pause after `consecutive` unproductive cycles in a row.
    ///
    /// `consecutive` is 1 for the first unproductive cycle; 0 is treated as 1.
    /// With the default multiplier of 1.0 the result is always `pause`.
    pub fn next_pause(&self, consecutive: u32) -> Duration {
        let exponent = consecutive.saturating_sub(1).min(i32::MAX as u32) as i32;
        let grown_secs = self.pause.as_secs_f64() * self.multiplier.powi(exponent);
        let capped_secs = grown_secs.min(self.max_pause.max(self.pause).as_secs_f64());

        let final_secs = if self.use_jitter {
            Self::add_jitter(capped_secs, self.jitter_percent)
        } else {
            capped_secs
        };

        Duration::from_secs_f64(final_secs)
    }

    /// Same as [`next_pause`](Self::next_pause), but never shorter than `retry_hint`
    pub fn pause_with_hint(&self, consecutive: u32, retry_hint: Option<Duration>) -> Duration {
        let pause = self.next_pause(consecutive);
        retry_hint.map_or(pause, |hint| pause.max(hint))
    }

    fn add_jitter(pause_secs: f64, jitter_percent: f64) -> f64 {
        let jitter_range = pause_secs * jitter_percent;
        if jitter_range <= 0.0 {
            return pause_secs;
        }

        let jitter = rand::rng().random_range(-jitter_range..=jitter_range);
        (pause_secs + jitter).max(0.0)
    }
}
