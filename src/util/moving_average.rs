//! Fixed-window moving average

use std::collections::VecDeque;

/// Mean of the most recent `window` samples.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    samples: VecDeque<f32>,
    window: usize,
    sum: f32,
}

impl MovingAverage {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            samples: VecDeque::with_capacity(window),
            window,
            sum: 0.0,
        }
    }

    pub fn push(&mut self, value: f32) {
        if self.samples.len() == self.window {
            if let Some(old) = self.samples.pop_front() {
                self.sum -= old;
            }
        }
        self.samples.push_back(value);
        self.sum += value;
    }

    /// Replace the whole window with `value` so the average reacts immediately.
    pub fn force_set(&mut self, value: f32) {
        self.samples.clear();
        self.samples.extend(std::iter::repeat(value).take(self.window));
        self.sum = value * self.window as f32;
    }

    /// Zero while no samples have been pushed.
    pub fn average(&self) -> f32 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.sum / self.samples.len() as f32
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_over_window_only() {
        let mut avg = MovingAverage::new(3);
        for v in [1.0, 2.0, 3.0, 10.0] {
            avg.push(v);
        }
        assert_eq!(avg.len(), 3);
        assert!((avg.average() - 5.0).abs() < 1e-6);
    }

    #[test]
    fn force_set_overrides_history() {
        let mut avg = MovingAverage::new(4);
        avg.push(8.0);
        avg.push(8.0);
        avg.force_set(-2.0);
        assert_eq!(avg.average(), -2.0);
        avg.push(6.0);
        assert!((avg.average() - 0.0).abs() < 1e-6);
    }

    #[test]
    fn empty_average_is_zero() {
        assert_eq!(MovingAverage::new(5).average(), 0.0);
    }
}
