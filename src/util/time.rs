//! Time utilities for the simulation loops

use std::time::Instant;

/// Process start time for uptime tracking
static PROCESS_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize process start time (call once at startup)
pub fn init_process_time() {
    PROCESS_START.get_or_init(Instant::now);
}

/// Get process uptime in seconds
pub fn uptime_secs() -> u64 {
    PROCESS_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Default simulation rate (ticks per second)
pub const DEFAULT_TICK_RATE: u32 = 30;
/// Default world state send rate (messages per second)
pub const DEFAULT_SEND_RATE: u32 = 20;

/// Interval in seconds for a given rate
pub fn interval_secs(rate: u32) -> f32 {
    1.0 / rate.max(1) as f32
}

/// Number of whole ticks covering `millis` at `tick_rate`, rounded up
pub fn ticks_for_millis(millis: u32, tick_rate: u32) -> u32 {
    (millis as u64 * tick_rate as u64).div_ceil(1000) as u32
}

/// A simple timer for measuring frame durations
#[derive(Debug, Clone)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Seconds since the last lap, restarting the timer
    pub fn lap_secs(&mut self) -> f32 {
        let now = Instant::now();
        let dt = now.duration_since(self.start).as_secs_f32();
        self.start = now;
        dt
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_window_rounds_up() {
        assert_eq!(ticks_for_millis(500, 30), 15);
        assert_eq!(ticks_for_millis(510, 30), 16);
        assert_eq!(ticks_for_millis(0, 30), 0);
    }

    #[test]
    fn zero_rate_does_not_divide_by_zero() {
        assert_eq!(interval_secs(0), 1.0);
    }
}
