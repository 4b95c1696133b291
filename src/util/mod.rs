//! Shared utilities

pub mod moving_average;
pub mod rate_limit;
pub mod time;

pub use moving_average::MovingAverage;
