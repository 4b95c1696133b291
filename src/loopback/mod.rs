//! In-process matches: one server and several predicting clients joined by
//! conditioned channels
//!
//! Input batches and world states travel as encoded bytes through
//! [`ConditionedChannel`]s, so they see the configured latency and loss.
//! Session events (join/leave) are reliable and ordered and skip the
//! conditioner.

pub mod bots;
pub mod r#match;

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, trace};

use crate::client::{ClientPredictor, ClientStats};
use crate::config::{LinkSettings, SimSettings};
use crate::game::{EntityId, StateSnapshot, Tick};
use crate::metrics::MetricsSink;
use crate::net::codec::{decode_batch, decode_world_state, encode_batch, encode_world_state};
use crate::net::link::{ChannelReceiver, ChannelSender, ChannelStats, ConditionedChannel};
use crate::net::{
    ClientLink, ConnectionId, InputSampler, ServerLink, ServerMsg, TickInputBatch, TimeSource,
    WorldStateMessage,
};
use crate::server::{ConnectionSummary, IngestError, ServerReconciler, ServerStats, SnapshotStats};

pub use bots::ScriptedInput;
pub use r#match::{GameMatch, MatchCommand, MatchHandle, MatchRegistry, MatchReport};

/// Client outbound path: encodes each batch onto a channel
struct ChannelClientLink {
    tx: ChannelSender,
    compress_quat: bool,
}

impl ClientLink for ChannelClientLink {
    fn send_input(&mut self, batch: &TickInputBatch) {
        self.tx.send(encode_batch(batch, self.compress_quat));
    }
}

/// Server outbound path: one channel per connection
#[derive(Clone, Default)]
struct ServerLinkHub {
    routes: Arc<Mutex<BTreeMap<ConnectionId, ChannelSender>>>,
}

impl ServerLinkHub {
    fn attach(&self, connection: ConnectionId, tx: ChannelSender) {
        self.routes.lock().insert(connection, tx);
    }

    fn detach(&self, connection: ConnectionId) {
        self.routes.lock().remove(&connection);
    }
}

impl ServerLink for ServerLinkHub {
    fn send_world_state(&mut self, connection: ConnectionId, msg: &WorldStateMessage) {
        match self.routes.lock().get(&connection) {
            Some(tx) => tx.send(encode_world_state(msg)),
            None => trace!(connection, "No route for world state"),
        }
    }
}

struct LoopbackClient {
    predictor: ClientPredictor,
    /// Server end of the client's input channel
    uplink: ChannelReceiver,
    uplink_tx: ChannelSender,
    /// Client end of the server's world state channel
    downlink: ChannelReceiver,
    downlink_tx: ChannelSender,
    /// Reliable ordered session events
    events: VecDeque<ServerMsg>,
    decode_errors: u64,
    rejected_batches: u64,
}

/// Per-client line of a [`MatchSummary`]
#[derive(Debug, Clone, Serialize)]
pub struct ClientSummary {
    pub connection: ConnectionId,
    pub entity: EntityId,
    pub tick: Tick,
    pub stats: ClientStats,
    pub uplink: ChannelStats,
    pub downlink: ChannelStats,
    pub decode_errors: u64,
    pub rejected_batches: u64,
}

/// Everything a loopback match counted
#[derive(Debug, Clone, Serialize)]
pub struct MatchSummary {
    pub server_tick: Tick,
    pub server: ServerStats,
    pub snapshots: SnapshotStats,
    pub connections: Vec<ConnectionSummary>,
    pub clients: Vec<ClientSummary>,
}

/// One server and its clients, stepped together
pub struct LoopbackMatch {
    settings: SimSettings,
    link: LinkSettings,
    time: TimeSource,
    server: ServerReconciler,
    hub: ServerLinkHub,
    clients: BTreeMap<ConnectionId, LoopbackClient>,
    metrics: Arc<dyn MetricsSink>,
    seed: u64,
    next_connection: ConnectionId,
    input_rate_limit: Option<u32>,
}

impl LoopbackMatch {
    pub fn new(
        settings: SimSettings,
        link: LinkSettings,
        time: TimeSource,
        metrics: Arc<dyn MetricsSink>,
        seed: u64,
    ) -> Self {
        let hub = ServerLinkHub::default();
        let server = ServerReconciler::new(settings.clone(), Box::new(hub.clone()), metrics.clone(), seed);
        Self {
            settings,
            link,
            time,
            server,
            hub,
            clients: BTreeMap::new(),
            metrics,
            seed,
            next_connection: 1,
            input_rate_limit: None,
        }
    }

    /// Rate-limit input batches of every client added from now on
    pub fn with_input_rate_limit(mut self, per_second: u32) -> Self {
        self.input_rate_limit = (per_second > 0).then_some(per_second);
        self
    }

    pub fn server(&self) -> &ServerReconciler {
        &self.server
    }

    pub fn time(&self) -> &TimeSource {
        &self.time
    }

    pub fn client(&self, connection: ConnectionId) -> Option<&ClientPredictor> {
        self.clients.get(&connection).map(|c| &c.predictor)
    }

    pub fn connections(&self) -> Vec<ConnectionId> {
        self.clients.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Join a client at a server-chosen spawn point
    pub fn add_client(&mut self, sampler: Box<dyn InputSampler>) -> ConnectionId {
        self.add_client_with(None, sampler)
    }

    /// Join a client whose entity starts at `state`
    pub fn add_client_at(&mut self, state: StateSnapshot, sampler: Box<dyn InputSampler>) -> ConnectionId {
        self.add_client_with(Some(state), sampler)
    }

    fn add_client_with(&mut self, state: Option<StateSnapshot>, sampler: Box<dyn InputSampler>) -> ConnectionId {
        let connection = self.next_connection;
        self.next_connection += 1;

        let accepted = match state {
            Some(state) => self.server.join_at(connection, state),
            None => self.server.join(connection),
        };
        if let Some(limit) = self.input_rate_limit {
            self.server.limit_input_rate(connection, limit);
        }

        let channel_seed = self.seed.wrapping_add(u64::from(connection).wrapping_mul(2));
        let (uplink_tx, uplink) = ConditionedChannel::pair(self.link.clone(), self.time.clone(), channel_seed);
        let (downlink_tx, downlink) =
            ConditionedChannel::pair(self.link.clone(), self.time.clone(), channel_seed.wrapping_add(1));
        self.hub.attach(connection, downlink_tx.clone());

        let predictor = ClientPredictor::new(
            self.settings.clone(),
            &accepted,
            self.link.mean_latency_ms(),
            sampler,
            Box::new(ChannelClientLink {
                tx: uplink_tx.clone(),
                compress_quat: self.settings.quat_compression,
            }),
            self.metrics.clone(),
        );

        let spawn = accepted
            .entities
            .iter()
            .find(|e| e.entity == accepted.entity)
            .map(|e| e.state)
            .unwrap_or_default();
        for other in self.clients.values_mut() {
            other.events.push_back(ServerMsg::PlayerJoined {
                entity: accepted.entity,
                state: spawn,
            });
        }

        self.clients.insert(
            connection,
            LoopbackClient {
                predictor,
                uplink,
                uplink_tx,
                downlink,
                downlink_tx,
                events: VecDeque::new(),
                decode_errors: 0,
                rejected_batches: 0,
            },
        );
        debug!(connection, entity = accepted.entity, "Loopback client added");
        connection
    }

    /// Disconnect a client. Returns false if it was not connected.
    pub fn remove_client(&mut self, connection: ConnectionId) -> bool {
        if self.clients.remove(&connection).is_none() {
            return false;
        }
        self.hub.detach(connection);
        if let Some(entity) = self.server.leave(connection) {
            for other in self.clients.values_mut() {
                other.events.push_back(ServerMsg::PlayerLeft { entity });
            }
        }
        true
    }

    /// Advance both roles by `real_dt` seconds
    pub fn step(&mut self, real_dt: f32) {
        self.time.advance_ms((real_dt * 1000.0).round() as u64);

        let compress = self.settings.quat_compression;
        for (&connection, client) in self.clients.iter_mut() {
            for payload in client.uplink.drain() {
                let batch = match decode_batch(&payload, compress) {
                    Ok(batch) => batch,
                    Err(err) => {
                        client.decode_errors += 1;
                        debug!(connection, %err, "Undecodable input batch");
                        continue;
                    }
                };
                match self.server.enqueue_input(connection, &batch) {
                    Ok(_) => {}
                    Err(IngestError::StaleInput { .. }) => client.rejected_batches += 1,
                    Err(err) => {
                        client.rejected_batches += 1;
                        debug!(connection, %err, "Input batch rejected");
                    }
                }
            }
        }

        self.server.update(real_dt);

        for (&connection, client) in self.clients.iter_mut() {
            while let Some(event) = client.events.pop_front() {
                client.predictor.handle_server_msg(event);
            }
            for payload in client.downlink.drain() {
                match decode_world_state(&payload) {
                    Ok(msg) => client.predictor.handle_server_msg(ServerMsg::WorldState(msg)),
                    Err(err) => {
                        client.decode_errors += 1;
                        debug!(connection, %err, "Undecodable world state");
                    }
                }
            }
            client.predictor.update(real_dt);
        }
    }

    /// Step `steps` times at `real_dt`
    pub fn run(&mut self, steps: u32, real_dt: f32) {
        for _ in 0..steps {
            self.step(real_dt);
        }
    }

    pub fn summary(&self) -> MatchSummary {
        MatchSummary {
            server_tick: self.server.current_tick(),
            server: self.server.stats().clone(),
            snapshots: self.server.snapshot_stats().clone(),
            connections: self.server.connection_summaries(),
            clients: self
                .clients
                .iter()
                .map(|(&connection, client)| ClientSummary {
                    connection,
                    entity: client.predictor.entity(),
                    tick: client.predictor.current_tick(),
                    stats: client.predictor.stats().clone(),
                    uplink: client.uplink_tx.stats(),
                    downlink: client.downlink_tx.stats(),
                    decode_errors: client.decode_errors,
                    rejected_batches: client.rejected_batches,
                })
                .collect(),
        }
    }

    /// Publish every role's counters to the metrics sink
    pub fn publish(&self) {
        self.server.publish();
        for client in self.clients.values() {
            client.predictor.publish();
        }
        info!(
            clients = self.clients.len(),
            server_tick = self.server.current_tick(),
            "Loopback metrics published"
        );
    }
}

#[cfg(test)]
mod tests {
    use glam::{Quat, Vec3};

    use super::*;
    use crate::game::InputFrame;
    use crate::metrics::NoopMetrics;

    fn ideal_match() -> LoopbackMatch {
        LoopbackMatch::new(
            SimSettings::default(),
            LinkSettings::ideal(),
            TimeSource::manual(),
            Arc::new(NoopMetrics),
            11,
        )
    }

    #[test]
    fn clients_learn_about_each_other() {
        let mut m = ideal_match();
        let a = m.add_client(Box::new(ScriptedInput::new(1)));
        let b = m.add_client(Box::new(ScriptedInput::new(2)));
        m.step(0.02);

        let entity_b = m.client(b).map(|c| c.entity()).unwrap();
        assert!(m.client(a).unwrap().world().contains(entity_b));
        assert_eq!(m.client(b).unwrap().world().len(), 2);

        assert!(m.remove_client(b));
        m.step(0.02);
        assert!(!m.client(a).unwrap().world().contains(entity_b));
        assert!(!m.remove_client(b));
        assert_eq!(m.server().connection_count(), 1);
    }

    #[test]
    fn departed_client_stays_gone_behind_latency() {
        let mut m = LoopbackMatch::new(
            SimSettings::default(),
            LinkSettings::default(),
            TimeSource::manual(),
            Arc::new(NoopMetrics),
            11,
        );
        let a = m.add_client(Box::new(ScriptedInput::new(1)));
        let b = m.add_client(Box::new(ScriptedInput::new(2)));
        m.run(10, 0.02);

        let entity_b = m.client(b).map(|c| c.entity()).unwrap();
        assert!(m.client(a).unwrap().world().contains(entity_b));

        assert!(m.remove_client(b));
        m.run(500, 0.02);
        assert!(!m.server().world().contains(entity_b));
        assert!(!m.client(a).unwrap().world().contains(entity_b));
    }

    #[test]
    fn ideal_link_keeps_prediction_confirmed() {
        let mut m = ideal_match();
        let conn = m.add_client_at(
            StateSnapshot::default(),
            Box::new(|_: Tick| Some(InputFrame::forward(Quat::IDENTITY))),
        );
        m.run(200, 0.02);

        let summary = m.summary();
        let client = &summary.clients[0];
        assert_eq!(client.connection, conn);
        assert!(client.stats.world_states > 0);
        assert!(client.stats.confirmed > 0);
        assert_eq!(client.decode_errors, 0);
        assert!(summary.server.world_states_sent > 0);
        assert!(summary.connections[0].synchronized);

        let position = m.client(conn).and_then(|c| c.local_state()).map(|s| s.position);
        assert!(position.is_some_and(|p| p.x > 0.0 && p.z.abs() < 1e-3));
        assert!(position.is_some_and(|p| p != Vec3::ZERO));
    }
}
