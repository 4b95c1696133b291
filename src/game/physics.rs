//! Kinematic movement model
//!
//! The step function is pure in `(state, input, dt)`: the client's replay and
//! the server's authoritative step must produce bit-identical results.

use glam::{Quat, Vec3};

use super::{InputFrame, StateSnapshot};

/// Movement constants for an entity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementStats {
    /// Ground speed in units per second
    pub ground_speed: f32,
    /// Target horizontal speed while airborne
    pub air_speed: f32,
    /// Air steering acceleration factor
    pub air_accel: f32,
    /// Air drag coefficient
    pub air_drag: f32,
    /// Vertical launch speed of a jump
    pub jump_speed: f32,
    /// Downward acceleration
    pub gravity: f32,
    /// Hitbox sphere radius
    pub hitbox_radius: f32,
}

impl Default for MovementStats {
    fn default() -> Self {
        Self {
            ground_speed: 15.0,
            air_speed: 15.0,
            air_accel: 4.0,
            air_drag: 0.1,
            jump_speed: 8.0,
            gravity: 20.0,
            hitbox_radius: 0.5,
        }
    }
}

/// Physics system for stepping entities on a flat ground plane at y = 0
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Advance `state` by one step of `dt` under `input`
    pub fn step(
        state: &StateSnapshot,
        input: &InputFrame,
        dt: f32,
        stats: &MovementStats,
    ) -> StateSnapshot {
        let forward = Self::planar_forward(input.view);
        let move_dir = Self::move_direction(input, forward);

        let mut grounded = state.grounded;
        let mut velocity = state.velocity;

        if grounded {
            velocity = move_dir * stats.ground_speed;
            if input.jump {
                velocity.y = stats.jump_speed;
                grounded = false;
            }
        } else {
            if move_dir != Vec3::ZERO {
                let target = move_dir * stats.air_speed;
                let mut diff = target - velocity;
                diff.y = 0.0;
                velocity += diff * stats.air_accel * dt;
            }
            velocity *= 1.0 / (1.0 + stats.air_drag * dt);
            velocity.y -= stats.gravity * dt;
        }

        let mut position = state.position + velocity * dt;

        // Land
        if !grounded && position.y <= 0.0 && velocity.y <= 0.0 {
            position.y = 0.0;
            velocity.y = 0.0;
            grounded = true;
        }

        let orientation = if forward == Vec3::ZERO {
            state.orientation
        } else {
            Quat::from_rotation_arc(Vec3::X, forward)
        };

        StateSnapshot {
            position,
            orientation,
            velocity,
            grounded,
        }
    }

    /// View direction flattened onto the ground plane
    pub fn planar_forward(view: Quat) -> Vec3 {
        let flatten = |v: Vec3| {
            let flat = Vec3::new(v.x, 0.0, v.z);
            if flat.length_squared() < 1e-6 {
                Vec3::ZERO
            } else {
                flat.normalize()
            }
        };
        let forward = flatten(view * Vec3::X);
        if forward != Vec3::ZERO {
            return forward;
        }
        // Looking straight up or down
        flatten(view * Vec3::Y)
    }

    /// Movement intent in world space, clamped to unit length so diagonals
    /// are not faster
    pub fn move_direction(input: &InputFrame, forward: Vec3) -> Vec3 {
        if forward == Vec3::ZERO {
            return Vec3::ZERO;
        }
        let right = forward.cross(Vec3::Y);
        (forward * input.forward_axis() + right * input.right_axis()).clamp_length_max(1.0)
    }
}
