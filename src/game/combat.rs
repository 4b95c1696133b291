//! Combat system - weapons, damage, hit detection

use glam::Vec3;
use serde::Serialize;

use super::{EntityId, Tick};

/// Starting and respawn health
pub const MAX_HEALTH: f32 = 100.0;

/// Hitscan weapon stats
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeaponStats {
    /// Damage per hit
    pub damage: f32,
    /// Maximum hit distance
    pub range: f32,
    /// Cooldown between shots (seconds)
    pub cooldown: f32,
}

impl Default for WeaponStats {
    fn default() -> Self {
        Self {
            damage: 25.0,
            range: 100.0,
            cooldown: 0.5,
        }
    }
}

/// A single hitscan shot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attack {
    pub origin: Vec3,
    /// Unit direction
    pub direction: Vec3,
    pub range: f32,
    pub damage: f32,
}

impl Attack {
    pub fn new(origin: Vec3, direction: Vec3, stats: &WeaponStats) -> Self {
        Self {
            origin,
            direction: direction.normalize_or_zero(),
            range: stats.range,
            damage: stats.damage,
        }
    }
}

/// Combat system for managing weapons and damage
pub struct CombatSystem;

impl CombatSystem {
    /// Check if a weapon can fire (cooldown check)
    pub fn can_fire(weapon_cooldown: f32) -> bool {
        weapon_cooldown <= 0.0
    }

    /// Update weapon cooldown
    pub fn update_cooldown(cooldown: f32, dt: f32) -> f32 {
        (cooldown - dt).max(0.0)
    }

    /// Get cooldown to set after firing
    pub fn fire_cooldown(stats: &WeaponStats) -> f32 {
        stats.cooldown
    }

    /// Apply damage to health, returns (new_health, is_dead)
    pub fn apply_damage(current_health: f32, damage: f32) -> (f32, bool) {
        let new_health = (current_health - damage).max(0.0);
        (new_health, new_health <= 0.0)
    }

    /// Distance along the ray to the first intersection with a sphere, if
    /// the sphere is hit within `range`
    pub fn ray_sphere(attack: &Attack, center: Vec3, radius: f32) -> Option<f32> {
        if attack.direction == Vec3::ZERO {
            return None;
        }
        let to_center = center - attack.origin;
        let along = to_center.dot(attack.direction);
        let closest_sq = to_center.length_squared() - along * along;
        let radius_sq = radius * radius;
        if closest_sq > radius_sq {
            return None;
        }

        let half_chord = (radius_sq - closest_sq).sqrt();
        let mut distance = along - half_chord;
        if distance < 0.0 {
            // Origin inside the sphere
            distance = along + half_chord;
        }
        (distance >= 0.0 && distance <= attack.range).then_some(distance)
    }
}

/// Hit result from combat resolution
#[derive(Debug, Clone, Serialize)]
pub struct HitResult {
    pub attacker: EntityId,
    pub target: EntityId,
    pub damage: f32,
    pub distance: f32,
    /// Tick the world was rewound to for the hit test
    pub rewind_tick: Tick,
    pub target_killed: bool,
}
