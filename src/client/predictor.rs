//! Client-side prediction loop

use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::SimSettings;
use crate::game::{
    Controller, EntityController, EntityId, InputFrame, PredictedBody, RemoteInterpolator,
    RingHistory, SimulationClock, StateSnapshot, Tick, World, HISTORY_CAPACITY,
};
use crate::metrics::MetricsSink;
use crate::net::codec::quantize_input;
use crate::net::{
    ClientLink, InputSampler, JoinAccepted, ServerMsg, TickInputBatch, TickInputFrame, WorldStateMessage,
};

use super::adjuster::SimulationRateAdjuster;
use super::reconcile::{reconcile, ClientTickRecord, ReconcileOutcome};

/// Running counters for one predicting client
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClientStats {
    pub ticks: u64,
    /// World states accepted for processing
    pub world_states: u64,
    /// World states discarded as older than one already processed
    pub outdated_states: u64,
    pub confirmed: u64,
    pub replays: u64,
    pub replayed_ticks: u64,
    pub snaps: u64,
    pub history_overruns: u64,
    /// World states whose anchor tick was never predicted locally
    pub unrecorded_anchors: u64,
    /// Ticks run with neutral input because the server went quiet
    pub frozen_ticks: u64,
    /// Ticks discarded by the clock's catch-up cap
    pub skipped_ticks: u64,
    pub last_error_sq: f32,
    pub missed_inputs: u64,
    pub rate_multiplier: f32,
}

/// Predicts the locally controlled entity ahead of the server and corrects
/// it when authoritative state disagrees.
///
/// Every tick the sampled input is recorded with the state it was applied
/// to, sent redundantly until acknowledged and applied immediately. World
/// states from the server arrive through
/// [`ClientPredictor::enqueue_world_state`] and are processed at the end of
/// the next tick.
pub struct ClientPredictor {
    settings: SimSettings,
    entity: EntityId,
    world: World,
    history: RingHistory<ClientTickRecord>,
    clock: SimulationClock,
    adjuster: SimulationRateAdjuster,
    sampler: Box<dyn InputSampler>,
    link: Box<dyn ClientLink>,
    metrics: Arc<dyn MetricsSink>,
    metrics_category: String,
    tick: Tick,
    /// Oldest tick with a record since the last snap
    first_recorded_tick: Tick,
    last_server_tick: Tick,
    last_acked_input_tick: Option<Tick>,
    latest_state_tick: Option<Tick>,
    inbound: VecDeque<WorldStateMessage>,
    latency_ms: u32,
    stats: ClientStats,
}

impl ClientPredictor {
    pub fn new(
        settings: SimSettings,
        accepted: &JoinAccepted,
        latency_ms: u32,
        sampler: Box<dyn InputSampler>,
        link: Box<dyn ClientLink>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let mut world = World::new();
        for entity in &accepted.entities {
            let controller = if entity.entity == accepted.entity {
                Controller::Predicted(PredictedBody::new(entity.state, settings.movement))
            } else {
                Controller::Remote(RemoteInterpolator::new(entity.state, settings.send_interval()))
            };
            world.spawn(entity.entity, controller);
        }
        if !world.contains(accepted.entity) {
            world.spawn(
                accepted.entity,
                Controller::Predicted(PredictedBody::new(StateSnapshot::default(), settings.movement)),
            );
        }

        let mut predictor = Self {
            clock: SimulationClock::new(settings.tick_interval(), settings.max_catchup_ticks),
            adjuster: SimulationRateAdjuster::new(settings.send_rate, settings.aggressive_lag_reduction),
            entity: accepted.entity,
            world,
            history: RingHistory::new(),
            sampler,
            link,
            metrics,
            metrics_category: format!("client.{}", accepted.entity),
            tick: 0,
            first_recorded_tick: 0,
            last_server_tick: accepted.server_tick,
            last_acked_input_tick: None,
            latest_state_tick: None,
            inbound: VecDeque::new(),
            latency_ms,
            stats: ClientStats {
                rate_multiplier: 1.0,
                ..ClientStats::default()
            },
            settings,
        };
        predictor.tick = accepted.server_tick + predictor.estimated_lead_ticks();
        predictor.first_recorded_tick = predictor.tick;

        info!(
            entity = accepted.entity,
            server_tick = accepted.server_tick,
            start_tick = predictor.tick,
            "Client prediction started"
        );
        predictor
    }

    /// Ticks the client runs ahead of the newest server state:
    /// one and a half round trips of latency plus a fixed margin
    pub fn estimated_lead_ticks(&self) -> Tick {
        let latency_s = self.latency_ms as f32 / 1000.0;
        (latency_s * 1.5 / self.settings.tick_interval()).floor() as Tick + 4
    }

    pub fn set_latency_estimate(&mut self, latency_ms: u32) {
        self.latency_ms = latency_ms;
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }

    /// Next tick to be simulated
    pub fn current_tick(&self) -> Tick {
        self.tick
    }

    pub fn last_server_tick(&self) -> Tick {
        self.last_server_tick
    }

    pub fn last_acked_input_tick(&self) -> Option<Tick> {
        self.last_acked_input_tick
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn local_state(&self) -> Option<StateSnapshot> {
        self.world.sample(self.entity)
    }

    pub fn history(&self) -> &RingHistory<ClientTickRecord> {
        &self.history
    }

    pub fn stats(&self) -> &ClientStats {
        &self.stats
    }

    pub fn lerp_alpha(&self) -> f32 {
        self.clock.lerp_alpha()
    }

    /// Another player appeared
    pub fn add_remote(&mut self, entity: EntityId, state: StateSnapshot) {
        if entity == self.entity {
            return;
        }
        self.world.spawn(
            entity,
            Controller::Remote(RemoteInterpolator::new(state, self.settings.send_interval())),
        );
    }

    /// Another player left
    pub fn remove_remote(&mut self, entity: EntityId) {
        if entity != self.entity {
            self.world.remove(entity);
        }
    }

    /// Network receive point for world states
    pub fn enqueue_world_state(&mut self, msg: WorldStateMessage) {
        self.inbound.push_back(msg);
    }

    /// Route one server message to the matching hook
    pub fn handle_server_msg(&mut self, msg: ServerMsg) {
        match msg {
            ServerMsg::PlayerJoined { entity, state } => self.add_remote(entity, state),
            ServerMsg::PlayerLeft { entity } => self.remove_remote(entity),
            ServerMsg::WorldState(state) => self.enqueue_world_state(state),
            ServerMsg::JoinAccepted(accepted) => {
                warn!(
                    entity = self.entity,
                    accepted_entity = accepted.entity,
                    "Join accepted after prediction started, ignoring"
                );
            }
        }
    }

    /// Advance real time by `real_dt` seconds, running every tick that is due.
    /// A snap discards whatever ticks were still due. Returns the ticks run.
    pub fn update(&mut self, real_dt: f32) -> u32 {
        let step = self.clock.advance(real_dt);
        let mut ran = 0;
        while ran < step.ticks {
            let snaps = self.stats.snaps;
            self.tick();
            ran += 1;
            if self.stats.snaps != snaps {
                break;
            }
        }
        if step.stalled() {
            self.stats.skipped_ticks += u64::from(step.skipped);
            warn!(
                entity = self.entity,
                skipped = step.skipped,
                "Client stalled, dropping ticks"
            );
        }
        ran
    }

    /// Run exactly one prediction tick
    pub fn tick(&mut self) {
        let tick = self.tick;

        let sampled = self.sampler.sample(tick).unwrap_or_default();
        let mut input = quantize_input(&sampled, self.settings.quat_compression);
        if self.settings.freeze_on_stale && self.server_is_stale() {
            input = InputFrame::neutral();
            self.stats.frozen_ticks += 1;
        }

        let Some(before) = self.world.sample(self.entity) else {
            warn!(entity = self.entity, "Local entity missing, skipping tick");
            return;
        };
        self.history.insert(
            tick,
            ClientTickRecord {
                input,
                state: before,
                server_tick: self.last_server_tick,
            },
        );

        self.send_inputs();

        if let Some(controller) = self.world.get_mut(self.entity) {
            controller.set_input(&input);
        }
        self.world.advance_all(self.settings.tick_interval());

        self.tick += 1;
        self.stats.ticks += 1;

        self.process_world_states();
    }

    fn server_is_stale(&self) -> bool {
        self.tick.saturating_sub(self.last_server_tick) >= self.settings.max_stale_ticks()
    }

    /// Send every unacknowledged recorded tick, newest last
    fn send_inputs(&mut self) {
        let newest = self.tick;
        let window = self
            .settings
            .max_batch_frames
            .clamp(1, HISTORY_CAPACITY as u32);

        let mut start = self.first_recorded_tick;
        if let Some(acked) = self.last_acked_input_tick {
            start = start.max(acked + 1);
        }
        start = start.max((newest + 1).saturating_sub(window)).min(newest);

        let mut frames = Vec::with_capacity((newest + 1 - start) as usize);
        for tick in start..=newest {
            let Some(record) = self.history.get(tick) else {
                // Gap: only send the contiguous run ending at `newest`
                frames.clear();
                continue;
            };
            let view_delta = i64::from(tick) - i64::from(record.server_tick);
            frames.push(TickInputFrame {
                input: record.input,
                view_delta: view_delta.clamp(i64::from(i16::MIN), i64::from(i16::MAX)) as i16,
            });
        }

        let start_tick = newest + 1 - frames.len() as Tick;
        self.link.send_input(&TickInputBatch { start_tick, frames });
    }

    /// Handle queued world states. Only the newest is reconciled against.
    fn process_world_states(&mut self) {
        let mut newest: Option<WorldStateMessage> = None;
        while let Some(msg) = self.inbound.pop_front() {
            let latest = newest
                .as_ref()
                .map(|m| m.tick)
                .or(self.latest_state_tick);
            if latest.is_some_and(|t| msg.tick <= t) {
                self.stats.outdated_states += 1;
                continue;
            }
            self.observe_world_state(&msg);
            newest = Some(msg);
        }

        if let Some(msg) = newest {
            self.apply_world_state(&msg);
        }
    }

    /// Remote entities, acknowledgement and pacing for one accepted state.
    /// Entities only appear through join events, so states for unknown
    /// entities are dropped.
    fn observe_world_state(&mut self, msg: &WorldStateMessage) {
        self.stats.world_states += 1;

        for entity in &msg.entity_states {
            if entity.entity == self.entity {
                continue;
            }
            if let Some(remote) = self
                .world
                .get_mut(entity.entity)
                .and_then(|controller| controller.as_remote_mut())
            {
                remote.push_state(entity.state);
            }
        }

        // Acks past the newest sent tick belong to a timeline abandoned by a snap
        let ack = msg.your_latest_input_tick;
        if ack >= self.tick {
            debug!(entity = self.entity, ack, tick = self.tick, "Ignoring ack ahead of local timeline");
        } else if ack > 0 {
            self.last_acked_input_tick = Some(self.last_acked_input_tick.map_or(ack, |a| a.max(ack)));

            let lead = i64::from(ack) - i64::from(msg.tick) + 1;
            let multiplier = self.adjuster.observe_lead(lead);
            if self.settings.time_dilation {
                self.clock.set_rate_multiplier(multiplier);
            }
            self.stats.missed_inputs = self.adjuster.missed_inputs();
            self.stats.rate_multiplier = self.clock.rate_multiplier();
        }
    }

    fn apply_world_state(&mut self, msg: &WorldStateMessage) {
        let server_tick = msg.tick;
        self.latest_state_tick = Some(server_tick);
        self.last_server_tick = server_tick;

        let Some(authoritative) = msg.state_of(self.entity).copied() else {
            warn!(entity = self.entity, tick = server_tick, "World state without local entity");
            return;
        };

        if server_tick >= self.tick {
            self.snap(server_tick, &authoritative);
            return;
        }
        if self.tick - server_tick >= HISTORY_CAPACITY as Tick {
            self.stats.history_overruns += 1;
            warn!(
                entity = self.entity,
                tick = self.tick,
                server_tick,
                "Server state older than history, resyncing"
            );
            self.snap(server_tick, &authoritative);
            return;
        }

        let outcome = reconcile(
            &mut self.world,
            self.entity,
            &mut self.history,
            server_tick,
            self.tick,
            &authoritative,
            self.settings.reconcile_epsilon,
            self.settings.tick_interval(),
        );
        match outcome {
            ReconcileOutcome::Confirmed { error_sq } => {
                self.stats.confirmed += 1;
                self.stats.last_error_sq = error_sq;
            }
            ReconcileOutcome::Replayed { error_sq, replayed } => {
                self.stats.replays += 1;
                self.stats.replayed_ticks += u64::from(replayed);
                self.stats.last_error_sq = error_sq;
                debug!(
                    entity = self.entity,
                    anchor = server_tick,
                    replayed,
                    error_sq,
                    "Prediction corrected"
                );
                self.publish();
            }
            ReconcileOutcome::Unrecorded => {
                self.stats.unrecorded_anchors += 1;
            }
            ReconcileOutcome::MissingEntity => {
                warn!(entity = self.entity, "Local entity missing during reconciliation");
            }
        }
    }

    /// Jump to `server_tick` plus the estimated lead, adopting the
    /// authoritative state without replay
    fn snap(&mut self, server_tick: Tick, authoritative: &StateSnapshot) {
        let from = self.tick;
        self.tick = server_tick + self.estimated_lead_ticks();
        self.first_recorded_tick = self.tick;
        self.last_acked_input_tick = None;
        self.history.clear();
        self.clock.reset();
        if let Some(controller) = self.world.get_mut(self.entity) {
            controller.apply_state(authoritative);
        }
        self.stats.snaps += 1;
        info!(
            entity = self.entity,
            from,
            to = self.tick,
            server_tick,
            "Snapped to server timeline"
        );
        self.publish();
    }

    /// Push the counters to the metrics sink
    pub fn publish(&self) {
        let category = self.metrics_category.as_str();
        let s = &self.stats;
        self.metrics.record(category, "ticks", s.ticks.into());
        self.metrics.record(category, "replays", s.replays.into());
        self.metrics.record(category, "replayed_ticks", s.replayed_ticks.into());
        self.metrics.record(category, "snaps", s.snaps.into());
        self.metrics.record(category, "history_overruns", s.history_overruns.into());
        self.metrics.record(category, "missed_inputs", s.missed_inputs.into());
        self.metrics.record(category, "last_error_sq", s.last_error_sq.into());
        self.metrics.record(category, "rate_multiplier", s.rate_multiplier.into());
        self.metrics.record(category, "lead_average", self.adjuster.average_lead().into());
    }
}
