//! Client role: prediction, rewind-and-replay and tick-rate pacing

pub mod adjuster;
pub mod predictor;
pub mod reconcile;

pub use adjuster::SimulationRateAdjuster;
pub use predictor::{ClientPredictor, ClientStats};
pub use reconcile::{reconcile, ClientTickRecord, ReconcileOutcome};
