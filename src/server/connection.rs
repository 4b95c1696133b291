//! Per-connection server state

use serde::Serialize;

use crate::game::{EntityId, InputFrame, Tick};
use crate::net::ConnectionId;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::MovingAverage;

/// What the server tracks for one connected player
pub struct ConnectionState {
    pub id: ConnectionId,
    pub entity: EntityId,
    /// Set once the first input is accepted
    pub synchronized: bool,
    /// Highest input tick received
    pub latest_acked_input_tick: Option<Tick>,
    /// Server tick the client was viewing when it produced its latest input
    pub remote_view_tick: Tick,
    /// Input applied most recently, repeated when a tick's input is missing
    pub last_input: InputFrame,
    pub missed_inputs: u64,
    pub stale_batches: u64,
    /// Queued input frames, sampled at every world state send
    pub queue_depth: MovingAverage,
    limiter: Option<ConnectionRateLimiter>,
}

impl ConnectionState {
    pub fn new(id: ConnectionId, entity: EntityId, depth_window: usize) -> Self {
        Self {
            id,
            entity,
            synchronized: false,
            latest_acked_input_tick: None,
            remote_view_tick: 0,
            last_input: InputFrame::neutral(),
            missed_inputs: 0,
            stale_batches: 0,
            queue_depth: MovingAverage::new(depth_window),
            limiter: None,
        }
    }

    /// Enforce `per_second` input batches at ingress
    pub fn with_rate_limit(mut self, per_second: u32) -> Self {
        self.limiter = Some(ConnectionRateLimiter::new(per_second));
        self
    }

    /// False when the rate limiter rejects another batch
    pub fn admit_batch(&self) -> bool {
        self.limiter.as_ref().map_or(true, |l| l.check_input())
    }

    pub fn summary(&self) -> ConnectionSummary {
        ConnectionSummary {
            id: self.id,
            entity: self.entity,
            synchronized: self.synchronized,
            latest_acked_input_tick: self.latest_acked_input_tick,
            missed_inputs: self.missed_inputs,
            stale_batches: self.stale_batches,
            average_queue_depth: self.queue_depth.average(),
        }
    }
}

/// Serializable view of a connection for match summaries
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSummary {
    pub id: ConnectionId,
    pub entity: EntityId,
    pub synchronized: bool,
    pub latest_acked_input_tick: Option<Tick>,
    pub missed_inputs: u64,
    pub stale_batches: u64,
    pub average_queue_depth: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_connection_admits_everything() {
        let conn = ConnectionState::new(1, 1, 40);
        assert!((0..1000).all(|_| conn.admit_batch()));
        assert!(!conn.synchronized);
    }

    #[test]
    fn limited_connection_rejects_bursts() {
        let conn = ConnectionState::new(1, 1, 40).with_rate_limit(5);
        let admitted = (0..50).filter(|_| conn.admit_batch()).count();
        assert!(admitted < 50);
    }
}
