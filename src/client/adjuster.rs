//! Client tick-rate pacing from observed input lead

use crate::util::MovingAverage;

/// Scales the client's tick interval so its input arrives at the server a
/// small, steady number of ticks early.
///
/// A lead reading is `ack_tick - server_tick + 1`: how far ahead of the
/// server's simulation the newest received input was. Large leads slow the
/// client down, negative leads (input arriving too late) speed it up.
#[derive(Debug, Clone)]
pub struct SimulationRateAdjuster {
    average: MovingAverage,
    aggressive_lag_reduction: bool,
    missed_inputs: u64,
    multiplier: f32,
}

impl SimulationRateAdjuster {
    /// Averages over two seconds worth of world states
    pub fn new(send_rate: u32, aggressive_lag_reduction: bool) -> Self {
        Self {
            average: MovingAverage::new(2 * send_rate.max(1) as usize),
            aggressive_lag_reduction,
            missed_inputs: 0,
            multiplier: 1.0,
        }
    }

    /// Feed one lead reading and return the resulting multiplier
    pub fn observe_lead(&mut self, lead: i64) -> f32 {
        let lead = lead as f32;
        if lead < 0.0 {
            // Late input overrides the whole window
            self.average.force_set(lead);
            self.missed_inputs += 1;
        } else {
            self.average.push(lead);
        }
        self.multiplier = Self::multiplier_for(self.average.average(), self.aggressive_lag_reduction);
        self.multiplier
    }

    /// Bucket an average lead into a tick interval multiplier
    pub fn multiplier_for(average: f32, aggressive_lag_reduction: bool) -> f32 {
        match average {
            a if a <= -16.0 => 0.875,
            a if a <= -8.0 => 0.9375,
            a if a < 0.0 => 0.96875,
            a if a >= 16.0 => 1.125,
            a if a >= 8.0 => 1.0625,
            a if a >= 4.0 => 1.03125,
            a if a >= 2.0 && aggressive_lag_reduction => 1.015625,
            _ => 1.0,
        }
    }

    pub fn multiplier(&self) -> f32 {
        self.multiplier
    }

    pub fn average_lead(&self) -> f32 {
        self.average.average()
    }

    /// Readings that showed input arriving after its tick
    pub fn missed_inputs(&self) -> u64 {
        self.missed_inputs
    }
}
