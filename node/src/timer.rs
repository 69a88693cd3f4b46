use std::time::Duration;
use tokio::time::Instant;

/// Minimum spacing for one periodic activity.
///
/// A timer that has never fired is due immediately. Callers `mark` it once
/// the activity is over, whatever the outcome, so a failing activity is still
/// held to the interval.
#[derive(Debug, Clone, Copy)]
pub struct IntervalTimer {
    interval: Duration,
    last_fired: Option<Instant>,
}

impl IntervalTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_fired: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_fired(&self) -> Option<Instant> {
        self.last_fired
    }

    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_fired {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    pub fn mark(&mut self, now: Instant) {
        self.last_fired = Some(now);
    }
}
