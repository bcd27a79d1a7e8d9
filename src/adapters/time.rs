//! System clock adapter.
//!
//! Wall-clock seconds for log record timestamps.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::app::ports::ClockPort;

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl ClockPort for SystemClock {
    /// Seconds since the Unix epoch; 0 if the clock is set before it.
    fn now_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wall_clock_is_past_2020() {
        assert!(SystemClock::new().now_secs() > 1_577_836_800);
    }
}
