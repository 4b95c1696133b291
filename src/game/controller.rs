//! Entity controllers
//!
//! Each simulated entity is driven through [`EntityController`]. The role a
//! process plays decides which implementation an entity gets: the locally
//! controlled entity on a client is a [`PredictedBody`], every entity on the
//! server is an [`AuthoritativeBody`], and other players on a client are
//! [`RemoteInterpolator`]s that only smooth between received states.

use std::collections::VecDeque;

use super::combat::{CombatSystem, WeaponStats, MAX_HEALTH};
use super::physics::{MovementStats, PhysicsSystem};
use super::{InputFrame, StateSnapshot};

/// Capability set the prediction, reconciliation and rollback paths rely on
pub trait EntityController {
    /// Current simulation state
    fn sample_state(&self) -> StateSnapshot;
    /// Overwrite the simulation state
    fn apply_state(&mut self, state: &StateSnapshot);
    /// Input consumed by the next [`EntityController::advance`]
    fn set_input(&mut self, input: &InputFrame);
    /// Step the entity forward by `dt` seconds
    fn advance(&mut self, dt: f32);
}

/// Locally controlled entity on a client
#[derive(Debug, Clone)]
pub struct PredictedBody {
    state: StateSnapshot,
    input: InputFrame,
    stats: MovementStats,
}

impl PredictedBody {
    pub fn new(state: StateSnapshot, stats: MovementStats) -> Self {
        Self {
            state,
            input: InputFrame::neutral(),
            stats,
        }
    }
}

impl EntityController for PredictedBody {
    fn sample_state(&self) -> StateSnapshot {
        self.state
    }

    fn apply_state(&mut self, state: &StateSnapshot) {
        self.state = *state;
    }

    fn set_input(&mut self, input: &InputFrame) {
        self.input = *input;
    }

    fn advance(&mut self, dt: f32) {
        self.state = PhysicsSystem::step(&self.state, &self.input, dt, &self.stats);
    }
}

/// Server-side entity: movement plus health and weapon state
#[derive(Debug, Clone)]
pub struct AuthoritativeBody {
    state: StateSnapshot,
    input: InputFrame,
    stats: MovementStats,
    weapon: WeaponStats,
    pub health: f32,
    pub weapon_cooldown: f32,
}

impl AuthoritativeBody {
    pub fn new(state: StateSnapshot, stats: MovementStats) -> Self {
        Self {
            state,
            input: InputFrame::neutral(),
            stats,
            weapon: WeaponStats::default(),
            health: MAX_HEALTH,
            weapon_cooldown: 0.0,
        }
    }

    pub fn input(&self) -> &InputFrame {
        &self.input
    }

    pub fn weapon(&self) -> &WeaponStats {
        &self.weapon
    }

    pub fn hitbox_radius(&self) -> f32 {
        self.stats.hitbox_radius
    }

    /// True when the current input fires and the weapon is off cooldown
    pub fn wants_to_fire(&self) -> bool {
        self.input.fire && CombatSystem::can_fire(self.weapon_cooldown)
    }

    /// Start the weapon cooldown
    pub fn fire(&mut self) {
        self.weapon_cooldown = CombatSystem::fire_cooldown(&self.weapon);
    }

    /// Apply damage, respawning at full health on death. Returns true on death.
    pub fn take_damage(&mut self, damage: f32) -> bool {
        let (health, dead) = CombatSystem::apply_damage(self.health, damage);
        self.health = if dead { MAX_HEALTH } else { health };
        dead
    }
}

impl EntityController for AuthoritativeBody {
    fn sample_state(&self) -> StateSnapshot {
        self.state
    }

    fn apply_state(&mut self, state: &StateSnapshot) {
        self.state = *state;
    }

    fn set_input(&mut self, input: &InputFrame) {
        self.input = *input;
    }

    fn advance(&mut self, dt: f32) {
        self.state = PhysicsSystem::step(&self.state, &self.input, dt, &self.stats);
        self.weapon_cooldown = CombatSystem::update_cooldown(self.weapon_cooldown, dt);
    }
}

/// Another player's entity as seen by a client.
///
/// Received states are queued and played back one send interval apart,
/// blending position linearly and orientation spherically. Input is ignored.
#[derive(Debug, Clone)]
pub struct RemoteInterpolator {
    from: StateSnapshot,
    to: StateSnapshot,
    pending: VecDeque<StateSnapshot>,
    elapsed: f32,
    interval: f32,
}

/// States buffered beyond this are dropped oldest first
const MAX_PENDING_STATES: usize = 8;

impl RemoteInterpolator {
    pub fn new(state: StateSnapshot, interval: f32) -> Self {
        Self {
            from: state,
            to: state,
            pending: VecDeque::new(),
            elapsed: 0.0,
            interval: interval.max(f32::EPSILON),
        }
    }

    /// Queue a freshly received state
    pub fn push_state(&mut self, state: StateSnapshot) {
        if self.pending.len() == MAX_PENDING_STATES {
            self.pending.pop_front();
        }
        self.pending.push_back(state);
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn blend(&self) -> StateSnapshot {
        let t = (self.elapsed / self.interval).clamp(0.0, 1.0);
        StateSnapshot {
            position: self.from.position.lerp(self.to.position, t),
            orientation: self.from.orientation.slerp(self.to.orientation, t),
            velocity: self.from.velocity.lerp(self.to.velocity, t),
            grounded: if t < 1.0 { self.from.grounded } else { self.to.grounded },
        }
    }
}

impl EntityController for RemoteInterpolator {
    fn sample_state(&self) -> StateSnapshot {
        self.blend()
    }

    fn apply_state(&mut self, state: &StateSnapshot) {
        self.from = *state;
        self.to = *state;
        self.pending.clear();
        self.elapsed = 0.0;
    }

    fn set_input(&mut self, _input: &InputFrame) {}

    fn advance(&mut self, dt: f32) {
        self.elapsed += dt;
        while self.elapsed >= self.interval {
            let Some(next) = self.pending.pop_front() else {
                self.elapsed = self.interval;
                return;
            };
            self.from = self.to;
            self.to = next;
            self.elapsed -= self.interval;
        }
    }
}

/// Role-tagged controller stored in a [`super::World`]
#[derive(Debug, Clone)]
pub enum Controller {
    Predicted(PredictedBody),
    Authoritative(AuthoritativeBody),
    Remote(RemoteInterpolator),
}

impl Controller {
    pub fn as_authoritative(&self) -> Option<&AuthoritativeBody> {
        match self {
            Self::Authoritative(body) => Some(body),
            _ => None,
        }
    }

    pub fn as_authoritative_mut(&mut self) -> Option<&mut AuthoritativeBody> {
        match self {
            Self::Authoritative(body) => Some(body),
            _ => None,
        }
    }

    pub fn as_remote_mut(&mut self) -> Option<&mut RemoteInterpolator> {
        match self {
            Self::Remote(remote) => Some(remote),
            _ => None,
        }
    }

    fn inner(&self) -> &dyn EntityController {
        match self {
            Self::Predicted(body) => body,
            Self::Authoritative(body) => body,
            Self::Remote(remote) => remote,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn EntityController {
        match self {
            Self::Predicted(body) => body,
            Self::Authoritative(body) => body,
            Self::Remote(remote) => remote,
        }
    }
}

impl EntityController for Controller {
    fn sample_state(&self) -> StateSnapshot {
        self.inner().sample_state()
    }

    fn apply_state(&mut self, state: &StateSnapshot) {
        self.inner_mut().apply_state(state)
    }

    fn set_input(&mut self, input: &InputFrame) {
        self.inner_mut().set_input(input)
    }

    fn advance(&mut self, dt: f32) {
        self.inner_mut().advance(dt)
    }
}

#[cfg(test)]
mod tests {
    use glam::{Quat, Vec3};

    use super::*;

    const DT: f32 = 1.0 / 30.0;

    #[test]
    fn predicted_and_authoritative_step_identically() {
        let stats = MovementStats::default();
        let input = InputFrame::forward(Quat::from_rotation_y(0.3));
        let mut client = Controller::Predicted(PredictedBody::new(StateSnapshot::default(), stats));
        let mut server = Controller::Authoritative(AuthoritativeBody::new(StateSnapshot::default(), stats));
        for _ in 0..20 {
            client.set_input(&input);
            server.set_input(&input);
            client.advance(DT);
            server.advance(DT);
        }
        assert_eq!(client.sample_state(), server.sample_state());
    }

    #[test]
    fn remote_ignores_input_and_blends_towards_queued_state() {
        let mut remote = RemoteInterpolator::new(StateSnapshot::default(), 0.05);
        remote.set_input(&InputFrame::forward(Quat::IDENTITY));
        remote.advance(0.05);
        assert_eq!(remote.sample_state().position, Vec3::ZERO);

        remote.push_state(StateSnapshot::at(Vec3::new(2.0, 0.0, 0.0)));
        remote.advance(0.025);
        let halfway = remote.sample_state().position;
        assert!((halfway.x - 1.0).abs() < 1e-4);
    }

    #[test]
    fn remote_apply_state_snaps() {
        let mut remote = RemoteInterpolator::new(StateSnapshot::default(), 0.05);
        remote.push_state(StateSnapshot::at(Vec3::X));
        let target = StateSnapshot::at(Vec3::new(0.0, 0.0, 4.0));
        remote.apply_state(&target);
        assert_eq!(remote.sample_state(), target);
        assert_eq!(remote.pending(), 0);
    }

    #[test]
    fn lethal_damage_respawns_at_full_health() {
        let mut body = AuthoritativeBody::new(StateSnapshot::default(), MovementStats::default());
        assert!(!body.take_damage(60.0));
        assert_eq!(body.health, 40.0);
        assert!(body.take_damage(60.0));
        assert_eq!(body.health, MAX_HEALTH);
    }
}
