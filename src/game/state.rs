//! Entity state snapshots

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Simulation-relevant state of one entity, captured before a tick's input
/// is applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub position: Vec3,
    pub orientation: Quat,
    pub velocity: Vec3,
    pub grounded: bool,
}

impl StateSnapshot {
    /// Resting on the ground at `position`, facing +X
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            orientation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            grounded: true,
        }
    }

    /// Squared positional distance to `other`
    pub fn position_error_sq(&self, other: &StateSnapshot) -> f32 {
        (other.position - self.position).length_squared()
    }
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self::at(Vec3::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_is_squared_distance() {
        let a = StateSnapshot::at(Vec3::new(1.0, 0.0, 0.0));
        let b = StateSnapshot::at(Vec3::new(1.0, 0.0, 2.0));
        assert_eq!(a.position_error_sq(&b), 4.0);
        assert_eq!(a.position_error_sq(&a), 0.0);
    }
}
