//! Server-side lag compensation
//!
//! A shot is resolved against the world the attacker was looking at. Every
//! other entity is moved back to its recorded state at that tick, the hit
//! test runs, and the live states are put back before anything else sees
//! the world. Restoration happens in [`RollbackGuard`]'s `Drop`, so it also
//! runs when the hit test unwinds.

use std::collections::BTreeMap;

use tracing::trace;

use crate::game::combat::{Attack, CombatSystem, HitResult};
use crate::game::{EntityController, EntityId, RingHistory, StateSnapshot, Tick, World};

/// Per-entity state history the server records every tick
pub type EntityHistories = BTreeMap<EntityId, RingHistory<StateSnapshot>>;

/// Head states captured before a rewind, written back on drop
pub(crate) struct RollbackGuard<'w> {
    world: &'w mut World,
    saved: Vec<(EntityId, StateSnapshot)>,
}

impl<'w> RollbackGuard<'w> {
    pub(crate) fn new(world: &'w mut World) -> Self {
        Self {
            world,
            saved: Vec::new(),
        }
    }

    /// Move `entity` to `state`, remembering where it was
    pub(crate) fn rewind(&mut self, entity: EntityId, state: &StateSnapshot) {
        if let Some(controller) = self.world.get_mut(entity) {
            self.saved.push((entity, controller.sample_state()));
            controller.apply_state(state);
        }
    }

    pub(crate) fn world(&self) -> &World {
        self.world
    }
}

impl Drop for RollbackGuard<'_> {
    fn drop(&mut self) {
        for (entity, state) in self.saved.drain(..).rev() {
            if let Some(controller) = self.world.get_mut(entity) {
                controller.apply_state(&state);
            }
        }
    }
}

/// Rewinds other entities to the attacker's view for hit tests
#[derive(Debug, Clone, Copy)]
pub struct LagCompensator {
    client_interp: bool,
}

impl LagCompensator {
    pub fn new(client_interp: bool) -> Self {
        Self { client_interp }
    }

    /// Tick the world is rewound to for an attacker viewing `view_tick`.
    /// Interpolating clients render one tick further back.
    pub fn rewind_tick(&self, view_tick: Tick) -> Tick {
        if self.client_interp {
            view_tick.saturating_sub(1)
        } else {
            view_tick
        }
    }

    /// Resolve `attack` from `attacker` against the world as of `view_tick`.
    ///
    /// Entities without an exact history entry for the rewind tick are tested
    /// at their head state. The returned hit has not been applied; damage is
    /// the caller's job once the world is restored.
    pub fn process_attack(
        &self,
        world: &mut World,
        histories: &EntityHistories,
        attacker: EntityId,
        attack: &Attack,
        view_tick: Tick,
    ) -> Option<HitResult> {
        let rewind_tick = self.rewind_tick(view_tick);

        let mut guard = RollbackGuard::new(world);
        for id in guard.world().ids() {
            if id == attacker {
                continue;
            }
            if let Some(past) = histories.get(&id).and_then(|h| h.get(rewind_tick)) {
                guard.rewind(id, past);
            }
        }

        let mut nearest: Option<(EntityId, f32)> = None;
        for (id, controller) in guard.world().iter() {
            if id == attacker {
                continue;
            }
            let radius = controller
                .as_authoritative()
                .map_or(0.5, |body| body.hitbox_radius());
            let center = controller.sample_state().position;
            if let Some(distance) = CombatSystem::ray_sphere(attack, center, radius) {
                if nearest.map_or(true, |(_, best)| distance < best) {
                    nearest = Some((id, distance));
                }
            }
        }
        drop(guard);

        let (target, distance) = nearest?;
        trace!(attacker, target, rewind_tick, distance, "Lag-compensated hit");
        Some(HitResult {
            attacker,
            target,
            damage: attack.damage,
            distance,
            rewind_tick,
            target_killed: false,
        })
    }
}
