//! Fixed-step accumulator clock

/// Outcome of one [`SimulationClock::advance`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClockStep {
    /// Ticks the caller must run now
    pub ticks: u32,
    /// Whole ticks discarded because the catch-up cap was hit
    pub skipped: u32,
}

impl ClockStep {
    pub fn stalled(&self) -> bool {
        self.skipped > 0
    }
}

/// Converts elapsed real time into a number of fixed ticks.
///
/// The rate multiplier stretches or shrinks how much real time a tick
/// consumes. The `dt` a tick simulates is always the unscaled
/// [`SimulationClock::interval`].
#[derive(Debug, Clone)]
pub struct SimulationClock {
    interval: f32,
    rate_multiplier: f32,
    accumulator: f32,
    max_catchup_ticks: u32,
}

impl SimulationClock {
    pub fn new(interval: f32, max_catchup_ticks: u32) -> Self {
        Self {
            interval,
            rate_multiplier: 1.0,
            accumulator: 0.0,
            max_catchup_ticks: max_catchup_ticks.max(1),
        }
    }

    /// Fixed step duration in seconds
    pub fn interval(&self) -> f32 {
        self.interval
    }

    pub fn rate_multiplier(&self) -> f32 {
        self.rate_multiplier
    }

    pub fn set_rate_multiplier(&mut self, multiplier: f32) {
        if multiplier.is_finite() && multiplier > 0.0 {
            self.rate_multiplier = multiplier;
        }
    }

    /// Real time one tick consumes at the current multiplier
    pub fn scaled_interval(&self) -> f32 {
        self.interval * self.rate_multiplier
    }

    /// Accumulate `real_dt` seconds and report how many ticks are due
    pub fn advance(&mut self, real_dt: f32) -> ClockStep {
        if real_dt.is_finite() && real_dt > 0.0 {
            self.accumulator += real_dt;
        }

        let step = self.scaled_interval();
        let mut out = ClockStep::default();
        while self.accumulator >= step {
            if out.ticks == self.max_catchup_ticks {
                let overflow = (self.accumulator / step).floor();
                out.skipped = overflow as u32;
                self.accumulator -= overflow * step;
                break;
            }
            self.accumulator -= step;
            out.ticks += 1;
        }
        out
    }

    /// Fraction of the next tick already accumulated, for render blending
    pub fn lerp_alpha(&self) -> f32 {
        (self.accumulator / self.scaled_interval()).clamp(0.0, 1.0)
    }

    pub fn reset(&mut self) {
        self.accumulator = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f32 = 1.0 / 30.0;

    #[test]
    fn one_interval_runs_one_tick() {
        let mut clock = SimulationClock::new(DT, 8);
        for _ in 0..10 {
            assert_eq!(clock.advance(DT).ticks, 1);
        }
        assert_eq!(clock.advance(DT * 0.5).ticks, 0);
        assert!((clock.lerp_alpha() - 0.5).abs() < 1e-4);
    }

    #[test]
    fn multiplier_slows_ticks_without_scaling_dt() {
        let mut clock = SimulationClock::new(0.25, 8);
        clock.set_rate_multiplier(1.25);
        let ticks: u32 = (0..10).map(|_| clock.advance(0.25).ticks).sum();
        assert_eq!(ticks, 8);
        assert_eq!(clock.interval(), 0.25);
    }

    #[test]
    fn stall_is_capped_and_reported() {
        let mut clock = SimulationClock::new(0.25, 8);
        let step = clock.advance(3.1);
        assert_eq!(step.ticks, 8);
        assert!(step.stalled());
        assert_eq!(step.skipped, 4);
        assert!(clock.lerp_alpha() < 1.0);
    }

    #[test]
    fn invalid_multiplier_is_ignored() {
        let mut clock = SimulationClock::new(DT, 8);
        clock.set_rate_multiplier(0.0);
        clock.set_rate_multiplier(f32::NAN);
        assert_eq!(clock.rate_multiplier(), 1.0);
    }
}
