//! Authoritative server tick loop

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use glam::Vec3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::SimSettings;
use crate::game::combat::Attack;
use crate::game::{
    AuthoritativeBody, Controller, EntityController, EntityId, RingHistory, SimulationClock,
    StateSnapshot, Tick, World,
};
use crate::metrics::MetricsSink;
use crate::net::{ConnectionId, EntityState, JoinAccepted, ServerLink, TickInputBatch};

use super::connection::{ConnectionState, ConnectionSummary};
use super::input_queue::InputQueue;
use super::lag_comp::{EntityHistories, LagCompensator};
use super::snapshot::{SnapshotStats, WorldStateBuilder};

/// Reasons an inbound input batch is refused
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IngestError {
    #[error("batch ending at tick {end_tick} is behind server tick {server_tick}")]
    StaleInput { end_tick: Tick, server_tick: Tick },

    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    #[error("connection {0} exceeded its input rate")]
    RateLimited(ConnectionId),
}

/// Running counters for the authoritative simulation
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServerStats {
    pub ticks: u64,
    /// Batches discarded because every frame was behind the server tick
    pub stale_inputs: u64,
    /// Queued inputs that surfaced after their tick had passed
    pub late_inputs: u64,
    /// Ticks on which a synchronized connection had no input and the last
    /// one was repeated
    pub missing_inputs: u64,
    pub rate_limited: u64,
    pub attacks: u64,
    pub hits: u64,
    pub kills: u64,
    pub world_states_sent: u64,
    pub skipped_ticks: u64,
    pub injected_errors: u64,
}

/// Applies every connection's input in tick order to the authoritative world
/// and sends each connection the resulting state.
pub struct ServerReconciler {
    settings: SimSettings,
    world: World,
    histories: EntityHistories,
    connections: BTreeMap<ConnectionId, ConnectionState>,
    queue: InputQueue,
    lag: LagCompensator,
    clock: SimulationClock,
    snapshots: WorldStateBuilder,
    link: Box<dyn ServerLink>,
    metrics: Arc<dyn MetricsSink>,
    rng: ChaCha8Rng,
    tick: Tick,
    next_entity: EntityId,
    stats: ServerStats,
}

impl ServerReconciler {
    pub fn new(settings: SimSettings, link: Box<dyn ServerLink>, metrics: Arc<dyn MetricsSink>, seed: u64) -> Self {
        Self {
            world: World::new(),
            histories: EntityHistories::new(),
            connections: BTreeMap::new(),
            queue: InputQueue::new(),
            lag: LagCompensator::new(settings.client_interp),
            clock: SimulationClock::new(settings.tick_interval(), settings.max_catchup_ticks),
            snapshots: WorldStateBuilder::new(settings.send_interval(), settings.max_catchup_ticks),
            link,
            metrics,
            rng: ChaCha8Rng::seed_from_u64(seed),
            tick: 0,
            next_entity: 1,
            stats: ServerStats::default(),
            settings,
        }
    }

    pub fn current_tick(&self) -> Tick {
        self.tick
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn snapshot_stats(&self) -> &SnapshotStats {
        self.snapshots.stats()
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&ConnectionState> {
        self.connections.get(&id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn connection_summaries(&self) -> Vec<ConnectionSummary> {
        self.connections.values().map(ConnectionState::summary).collect()
    }

    /// Recorded state of `entity` at `tick`, if still retained
    pub fn history_state(&self, entity: EntityId, tick: Tick) -> Option<&StateSnapshot> {
        self.histories.get(&entity).and_then(|h| h.get(tick))
    }

    /// Health of an entity's authoritative body
    pub fn health(&self, entity: EntityId) -> Option<f32> {
        self.world
            .get(entity)
            .and_then(Controller::as_authoritative)
            .map(|body| body.health)
    }

    /// Spawn position spread on a ring around the origin
    fn spawn_point(&mut self) -> StateSnapshot {
        let angle = self.rng.gen_range(0.0..std::f32::consts::TAU);
        let distance = self.rng.gen_range(5.0..20.0);
        StateSnapshot::at(Vec3::new(angle.cos() * distance, 0.0, angle.sin() * distance))
    }

    /// Admit a connection at a generated spawn point
    pub fn join(&mut self, connection: ConnectionId) -> JoinAccepted {
        let spawn = self.spawn_point();
        self.join_at(connection, spawn)
    }

    /// Admit a connection with its entity at `state`.
    /// Joining again with the same id replaces the previous entity.
    pub fn join_at(&mut self, connection: ConnectionId, state: StateSnapshot) -> JoinAccepted {
        if self.connections.contains_key(&connection) {
            warn!(connection, "Connection already joined, replacing");
            self.leave(connection);
        }

        let entity = self.allocate_entity();
        self.world.spawn(
            entity,
            Controller::Authoritative(AuthoritativeBody::new(state, self.settings.movement)),
        );
        self.histories.insert(entity, RingHistory::new());

        let window = 2 * self.settings.send_rate.max(1) as usize;
        self.connections
            .insert(connection, ConnectionState::new(connection, entity, window));
        self.snapshots.force_next();

        info!(
            connection,
            entity,
            tick = self.tick,
            players = self.connections.len(),
            "Player joined"
        );

        JoinAccepted {
            entity,
            server_tick: self.tick,
            entities: self
                .world
                .snapshot_all()
                .into_iter()
                .map(|(entity, state)| EntityState { entity, state })
                .collect(),
        }
    }

    /// Enforce an ingress rate limit on an already joined connection
    pub fn limit_input_rate(&mut self, connection: ConnectionId, per_second: u32) {
        if let Some(conn) = self.connections.remove(&connection) {
            self.connections
                .insert(connection, conn.with_rate_limit(per_second));
        }
    }

    fn allocate_entity(&mut self) -> EntityId {
        while self.world.contains(self.next_entity) || self.next_entity == 0 {
            self.next_entity = self.next_entity.wrapping_add(1);
        }
        let entity = self.next_entity;
        self.next_entity = self.next_entity.wrapping_add(1);
        entity
    }

    /// Drop a connection together with its queued input, entity and history.
    /// Returns the entity that was removed.
    pub fn leave(&mut self, connection: ConnectionId) -> Option<EntityId> {
        let conn = self.connections.remove(&connection)?;
        self.queue.remove_connection(connection);
        self.histories.remove(&conn.entity);
        self.world.remove(conn.entity);
        info!(
            connection,
            entity = conn.entity,
            missed_inputs = conn.missed_inputs,
            "Player left"
        );
        Some(conn.entity)
    }

    /// Queue a batch received from `connection`. Returns the number of
    /// frames accepted.
    pub fn enqueue_input(&mut self, connection: ConnectionId, batch: &TickInputBatch) -> Result<usize, IngestError> {
        let server_tick = self.tick;
        let conn = self
            .connections
            .get_mut(&connection)
            .ok_or(IngestError::UnknownConnection(connection))?;

        if !conn.admit_batch() {
            self.stats.rate_limited += 1;
            return Err(IngestError::RateLimited(connection));
        }

        let Some(end_tick) = batch.end_tick() else {
            return Ok(0);
        };
        if end_tick < server_tick {
            conn.stale_batches += 1;
            self.stats.stale_inputs += 1;
            debug!(connection, end_tick, server_tick, "Discarding stale input batch");
            return Err(IngestError::StaleInput { end_tick, server_tick });
        }

        // A batch ending below the high-water mark means the client resynced
        // onto an earlier timeline. Its frames supersede what is queued.
        if conn.latest_acked_input_tick.is_some_and(|acked| end_tick < acked) {
            debug!(
                connection,
                end_tick,
                acked = conn.latest_acked_input_tick,
                "Input timeline rewound"
            );
            conn.latest_acked_input_tick = None;
        }

        let mut accepted = 0;
        for (tick, frame) in batch.ticks() {
            if tick < server_tick {
                continue;
            }
            if conn.latest_acked_input_tick.is_some_and(|acked| tick <= acked) {
                continue;
            }
            let view_tick = (i64::from(tick) - i64::from(frame.view_delta)).max(0) as Tick;
            self.queue.push(tick, connection, frame.input, view_tick);
            conn.latest_acked_input_tick = Some(tick);
            accepted += 1;
        }

        if accepted > 0 && !conn.synchronized {
            conn.synchronized = true;
            debug!(connection, tick = server_tick, "Connection synchronized");
        }
        Ok(accepted)
    }

    /// Advance real time by `real_dt` seconds: run due ticks, then send
    /// world states if the send clock says so
    pub fn update(&mut self, real_dt: f32) -> u32 {
        let step = self.clock.advance(real_dt);
        for _ in 0..step.ticks {
            self.tick();
        }
        if step.stalled() {
            self.stats.skipped_ticks += u64::from(step.skipped);
            warn!(skipped = step.skipped, tick = self.tick, "Server stalled, dropping ticks");
        }

        if self.snapshots.should_send(real_dt) {
            self.emit_world_state();
        }
        step.ticks
    }

    /// Run exactly one authoritative tick
    pub fn tick(&mut self) {
        let tick = self.tick;

        // Head states become the rewind source for lag compensation
        for (entity, controller) in self.world.iter() {
            self.histories
                .entry(entity)
                .or_default()
                .insert(tick, controller.sample_state());
        }

        let (due, late) = self.queue.drain_tick(tick);
        self.stats.late_inputs += late as u64;

        let mut fed = BTreeSet::new();
        for entry in due {
            let Some(conn) = self.connections.get_mut(&entry.connection) else {
                continue;
            };
            if let Some(controller) = self.world.get_mut(conn.entity) {
                controller.set_input(&entry.input);
            }
            conn.last_input = entry.input;
            conn.remote_view_tick = entry.view_tick;
            fed.insert(entry.connection);
        }

        for conn in self.connections.values_mut() {
            if !conn.synchronized || fed.contains(&conn.id) {
                continue;
            }
            if let Some(controller) = self.world.get_mut(conn.entity) {
                controller.set_input(&conn.last_input);
            }
            conn.missed_inputs += 1;
            self.stats.missing_inputs += 1;
        }

        self.process_attacks();

        let dt = self.settings.tick_interval();
        self.world.advance_all(dt);
        self.inject_physics_error();

        self.tick += 1;
        self.stats.ticks += 1;
    }

    fn process_attacks(&mut self) {
        let shooters: Vec<(EntityId, Tick)> = self
            .connections
            .values()
            .filter(|conn| {
                self.world
                    .get(conn.entity)
                    .and_then(Controller::as_authoritative)
                    .is_some_and(AuthoritativeBody::wants_to_fire)
            })
            .map(|conn| (conn.entity, conn.remote_view_tick))
            .collect();

        for (attacker, view_tick) in shooters {
            let Some(body) = self.world.get_mut(attacker).and_then(Controller::as_authoritative_mut) else {
                continue;
            };
            body.fire();
            let state = body.sample_state();
            let attack = Attack::new(state.position, body.input().aim_direction(), body.weapon());
            self.stats.attacks += 1;

            let Some(mut hit) = self.lag.process_attack(&mut self.world, &self.histories, attacker, &attack, view_tick)
            else {
                continue;
            };

            self.stats.hits += 1;
            if let Some(target) = self.world.get_mut(hit.target).and_then(Controller::as_authoritative_mut) {
                hit.target_killed = target.take_damage(hit.damage);
            }
            if hit.target_killed {
                self.stats.kills += 1;
                info!(
                    attacker = hit.attacker,
                    target = hit.target,
                    tick = self.tick,
                    rewind_tick = hit.rewind_tick,
                    "Player eliminated"
                );
            } else {
                debug!(
                    attacker = hit.attacker,
                    target = hit.target,
                    distance = hit.distance,
                    "Hit"
                );
            }
        }
    }

    /// Debug aid: occasionally nudge every entity so clients must correct
    fn inject_physics_error(&mut self) {
        let chance = self.settings.debug_physics_error_chance;
        if chance <= 0.0 || !self.rng.gen_bool(f64::from(chance.min(1.0))) {
            return;
        }
        for (_, controller) in self.world.iter_mut() {
            let mut state = controller.sample_state();
            state.position.x += self.rng.gen_range(-0.5..0.5);
            state.position.z += self.rng.gen_range(-0.5..0.5);
            controller.apply_state(&state);
        }
        self.stats.injected_errors += 1;
    }

    /// Send every connection the current world state
    pub fn emit_world_state(&mut self) {
        let states = self.snapshots.collect(&self.world);
        for conn in self.connections.values_mut() {
            let msg = self
                .snapshots
                .build(self.tick, conn.latest_acked_input_tick, &states);
            self.link.send_world_state(conn.id, &msg);
            conn.queue_depth.push(self.queue.depth(conn.id) as f32);
            self.stats.world_states_sent += 1;
        }
        self.publish();
    }

    /// Push the counters to the metrics sink
    pub fn publish(&self) {
        let s = &self.stats;
        self.metrics.record("server", "tick", u64::from(self.tick).into());
        self.metrics.record("server", "stale_inputs", s.stale_inputs.into());
        self.metrics.record("server", "missing_inputs", s.missing_inputs.into());
        self.metrics.record("server", "late_inputs", s.late_inputs.into());
        self.metrics.record("server", "hits", s.hits.into());
        self.metrics.record("server", "world_states_sent", s.world_states_sent.into());
        for conn in self.connections.values() {
            let category = format!("server.connection.{}", conn.id);
            self.metrics
                .record(&category, "queue_depth", conn.queue_depth.average().into());
            self.metrics
                .record(&category, "missed_inputs", conn.missed_inputs.into());
        }
    }
}
