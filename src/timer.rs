//! Quiet-period timing
//!
//! One abstraction serves both debounce directions:
//! - leading edge: [`QuietPeriod::accept`] lets an event through only when the
//!   window since the last accepted event has passed (wake word debounce)
//! - trailing edge: [`SilenceTimer`] fires once nothing has restarted it for a
//!   full period (end-of-utterance detection)
//!
//! All instants come from `tokio::time` so paused-clock tests drive them.

use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Instant, Sleep};

/// Tracks the most recent accepted activity and the quiet window after it
#[derive(Debug, Clone)]
pub struct QuietPeriod {
    period: Duration,
    last: Option<Instant>,
}

impl QuietPeriod {
    /// Create a quiet period with no recorded activity
    #[must_use]
    pub const fn new(period: Duration) -> Self {
        Self { period, last: None }
    }

    /// Window length
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Change the window length; the last activity is kept
    pub const fn set_period(&mut self, period: Duration) {
        self.period = period;
    }

    /// Record activity at `now`, restarting the window
    pub const fn touch(&mut self, now: Instant) {
        self.last = Some(now);
    }

    /// Forget recorded activity
    pub const fn clear(&mut self) {
        self.last = None;
    }

    /// True when no activity was recorded within the window before `now`
    #[must_use]
    pub fn is_quiet(&self, now: Instant) -> bool {
        self.last
            .is_none_or(|last| now.saturating_duration_since(last) >= self.period)
    }

    /// Leading-edge debounce: accept and restart the window if quiet
    pub fn accept(&mut self, now: Instant) -> bool {
        if self.is_quiet(now) {
            self.touch(now);
            true
        } else {
            false
        }
    }
}

/// Cancel-on-restart timer that fires after a full quiet period
///
/// Restarting moves the single underlying deadline, so only the most
/// recently scheduled expiry can ever fire.
#[derive(Debug)]
pub struct SilenceTimer {
    quiet: QuietPeriod,
    sleep: Pin<Box<Sleep>>,
}

impl SilenceTimer {
    /// Start the timer now
    #[must_use]
    pub fn start(period: Duration) -> Self {
        let now = Instant::now();
        let mut quiet = QuietPeriod::new(period);
        quiet.touch(now);
        Self {
            quiet,
            sleep: Box::pin(tokio::time::sleep_until(now + period)),
        }
    }

    /// Cancel the pending expiry and schedule a new one a full period from now
    pub fn restart(&mut self) {
        let now = Instant::now();
        self.quiet.touch(now);
        self.sleep.as_mut().reset(now + self.quiet.period());
    }

    /// Instant the timer will fire unless restarted
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.sleep.deadline()
    }

    /// Future resolving when the quiet period elapses; use inside `select!`
    pub fn expired(&mut self) -> Pin<&mut Sleep> {
        self.sleep.as_mut()
    }
}
