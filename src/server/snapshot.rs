//! World state building and send pacing

use serde::Serialize;

use crate::game::{SimulationClock, Tick, World};
use crate::net::{EntityState, WorldStateMessage};

/// Paces world state emission on its own clock and builds the messages
pub struct WorldStateBuilder {
    /// Runs at the send rate, independent of the simulation clock
    send_clock: SimulationClock,
    /// Send on the next check regardless of the clock
    forced: bool,
    stats: SnapshotStats,
}

impl WorldStateBuilder {
    pub fn new(send_interval: f32, max_catchup_ticks: u32) -> Self {
        Self {
            send_clock: SimulationClock::new(send_interval, max_catchup_ticks),
            forced: false,
            stats: SnapshotStats::default(),
        }
    }

    /// Advance the send clock by `real_dt`; true if a send is due.
    /// Several elapsed send intervals still produce a single send.
    pub fn should_send(&mut self, real_dt: f32) -> bool {
        let step = self.send_clock.advance(real_dt);
        let forced = std::mem::take(&mut self.forced);
        forced || step.ticks > 0
    }

    /// Force a send on the next check (used when a player joins)
    pub fn force_next(&mut self) {
        self.forced = true;
    }

    /// Entity states shared by every recipient of one send
    pub fn collect(&mut self, world: &World) -> Vec<EntityState> {
        let states: Vec<EntityState> = world
            .snapshot_all()
            .into_iter()
            .map(|(entity, state)| EntityState { entity, state })
            .collect();
        self.stats.record(states.len());
        states
    }

    /// Message for one recipient
    pub fn build(&self, tick: Tick, latest_input_tick: Option<Tick>, states: &[EntityState]) -> WorldStateMessage {
        WorldStateMessage {
            tick,
            your_latest_input_tick: latest_input_tick.unwrap_or(0),
            entity_states: states.to_vec(),
        }
    }

    pub fn stats(&self) -> &SnapshotStats {
        &self.stats
    }
}

/// World state send stats for debugging
#[derive(Debug, Clone, Default, Serialize)]
pub struct SnapshotStats {
    pub total_snapshots: u64,
    pub avg_entities_per_snapshot: f32,
}

impl SnapshotStats {
    pub fn record(&mut self, entity_count: usize) {
        self.total_snapshots += 1;

        // Running average
        let n = self.total_snapshots as f32;
        self.avg_entities_per_snapshot =
            self.avg_entities_per_snapshot * ((n - 1.0) / n) + (entity_count as f32 / n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sends_at_send_rate_not_tick_rate() {
        let mut builder = WorldStateBuilder::new(0.05, 8);
        let sends = (0..40).filter(|_| builder.should_send(0.025)).count();
        assert_eq!(sends, 20);
    }

    #[test]
    fn forced_send_fires_once() {
        let mut builder = WorldStateBuilder::new(1.0, 8);
        builder.force_next();
        assert!(builder.should_send(0.0));
        assert!(!builder.should_send(0.0));
    }

    #[test]
    fn running_average_of_entities() {
        let mut stats = SnapshotStats::default();
        stats.record(2);
        stats.record(4);
        assert_eq!(stats.total_snapshots, 2);
        assert!((stats.avg_entities_per_snapshot - 3.0).abs() < 1e-6);
    }

    #[test]
    fn missing_ack_is_sent_as_zero() {
        let builder = WorldStateBuilder::new(0.05, 8);
        let msg = builder.build(12, None, &[]);
        assert_eq!(msg.your_latest_input_tick, 0);
        assert_eq!(builder.build(12, Some(15), &[]).your_latest_input_tick, 15);
    }
}
