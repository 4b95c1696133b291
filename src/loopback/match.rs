//! Loopback matches as tokio tasks

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{LinkSettings, SimSettings};
use crate::metrics::MetricsSink;
use crate::net::TimeSource;
use crate::util::time::Timer;

use super::bots::ScriptedInput;
use super::{LoopbackMatch, MatchSummary};

/// Control messages for a running match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchCommand {
    /// Join another scripted client
    AddBot,
    /// Disconnect the most recently joined client
    RemoveBot,
    Stop,
}

/// Periodic and final statistics of one match
#[derive(Debug, Clone, Serialize)]
pub struct MatchReport {
    pub match_id: Uuid,
    pub elapsed_ms: u64,
    pub finished: bool,
    pub summary: MatchSummary,
}

/// Handle to a running match
#[derive(Clone)]
pub struct MatchHandle {
    pub id: Uuid,
    pub command_tx: mpsc::Sender<MatchCommand>,
    pub report_tx: broadcast::Sender<MatchReport>,
    pub player_count: Arc<AtomicUsize>,
}

impl MatchHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MatchReport> {
        self.report_tx.subscribe()
    }

    /// Ask the match to stop. False if it already has.
    pub async fn stop(&self) -> bool {
        self.command_tx.send(MatchCommand::Stop).await.is_ok()
    }
}

/// Registry of all active matches
pub struct MatchRegistry {
    matches: DashMap<Uuid, MatchHandle>,
}

impl MatchRegistry {
    pub fn new() -> Self {
        Self {
            matches: DashMap::new(),
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.get(id).map(|m| m.value().clone())
    }

    pub fn insert(&self, handle: MatchHandle) {
        self.matches.insert(handle.id, handle);
    }

    pub fn remove(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.remove(id).map(|(_, h)| h)
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn total_players(&self) -> usize {
        self.matches.iter().map(|m| m.value().player_count()).sum()
    }

    pub fn handles(&self) -> Vec<MatchHandle> {
        self.matches.iter().map(|m| m.value().clone()).collect()
    }

    /// Send `Stop` to every registered match
    pub async fn stop_all(&self) {
        for handle in self.handles() {
            if !handle.stop().await {
                warn!(match_id = %handle.id, "Match already stopped");
            }
        }
    }
}

impl Default for MatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// One loopback match driven in real time
pub struct GameMatch {
    id: Uuid,
    inner: LoopbackMatch,
    tick_interval: Duration,
    duration: Option<Duration>,
    command_rx: mpsc::Receiver<MatchCommand>,
    report_tx: broadcast::Sender<MatchReport>,
    player_count: Arc<AtomicUsize>,
    bot_rng: ChaCha8Rng,
}

impl GameMatch {
    /// Create a new match. It runs until stopped, or for `duration` if given.
    pub fn new(
        id: Uuid,
        settings: SimSettings,
        link: LinkSettings,
        metrics: Arc<dyn MetricsSink>,
        seed: u64,
        input_rate_limit: u32,
        duration: Option<Duration>,
    ) -> (Self, MatchHandle) {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (report_tx, _) = broadcast::channel(16);
        let player_count = Arc::new(AtomicUsize::new(0));

        let handle = MatchHandle {
            id,
            command_tx,
            report_tx: report_tx.clone(),
            player_count: player_count.clone(),
        };

        let tick_interval = Duration::from_secs_f32(settings.tick_interval());
        let inner = LoopbackMatch::new(settings, link, TimeSource::wall(), metrics, seed)
            .with_input_rate_limit(input_rate_limit);

        let game_match = Self {
            id,
            inner,
            tick_interval,
            duration,
            command_rx,
            report_tx,
            player_count,
            bot_rng: ChaCha8Rng::seed_from_u64(seed ^ 0x5eed),
        };
        (game_match, handle)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn add_bot(&mut self) {
        let seed = self.bot_rng.gen();
        self.inner.add_client(Box::new(ScriptedInput::new(seed)));
        self.player_count.store(self.inner.len(), Ordering::Relaxed);
    }

    fn remove_bot(&mut self) {
        if let Some(&connection) = self.inner.connections().last() {
            self.inner.remove_client(connection);
            self.player_count.store(self.inner.len(), Ordering::Relaxed);
        }
    }

    /// Apply pending commands. False once `Stop` has been received.
    fn process_commands(&mut self) -> bool {
        while let Ok(command) = self.command_rx.try_recv() {
            match command {
                MatchCommand::AddBot => self.add_bot(),
                MatchCommand::RemoveBot => self.remove_bot(),
                MatchCommand::Stop => {
                    info!(match_id = %self.id, "Stop requested");
                    return false;
                }
            }
        }
        true
    }

    fn report(&self, elapsed_ms: u64, finished: bool) -> MatchReport {
        MatchReport {
            match_id: self.id,
            elapsed_ms,
            finished,
            summary: self.inner.summary(),
        }
    }

    /// Run the match loop, returning the final report
    pub async fn run(mut self) -> MatchReport {
        info!(
            match_id = %self.id,
            players = self.inner.len(),
            "Match started"
        );

        let mut tick_interval = interval(self.tick_interval);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let started = Timer::new();
        let mut frame = Timer::new();
        let mut last_report_ms = 0;

        loop {
            tick_interval.tick().await;

            if !self.process_commands() {
                break;
            }

            self.inner.step(frame.lap_secs());

            let elapsed_ms = started.elapsed_ms();
            if elapsed_ms - last_report_ms >= 1000 {
                last_report_ms = elapsed_ms;
                // Nobody listening is fine
                let _ = self.report_tx.send(self.report(elapsed_ms, false));
            }

            if self
                .duration
                .is_some_and(|d| elapsed_ms >= d.as_millis() as u64)
            {
                info!(match_id = %self.id, "Match duration reached");
                break;
            }
        }

        self.inner.publish();
        let report = self.report(started.elapsed_ms(), true);
        let _ = self.report_tx.send(report.clone());
        info!(
            match_id = %self.id,
            server_tick = report.summary.server_tick,
            players = self.inner.len(),
            "Match ended"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NoopMetrics;

    fn new_match(duration: Option<Duration>) -> (GameMatch, MatchHandle) {
        GameMatch::new(
            Uuid::new_v4(),
            SimSettings::default(),
            LinkSettings::ideal(),
            Arc::new(NoopMetrics),
            5,
            0,
            duration,
        )
    }

    #[test]
    fn registry_tracks_handles() {
        let registry = MatchRegistry::new();
        let (mut game, handle) = new_match(None);
        game.add_bot();
        game.add_bot();
        registry.insert(handle.clone());

        assert_eq!(registry.active_matches(), 1);
        assert_eq!(registry.total_players(), 2);
        assert!(registry.get(&game.id()).is_some());
        assert!(registry.remove(&handle.id).is_some());
        assert_eq!(registry.active_matches(), 0);
    }

    #[tokio::test]
    async fn stop_command_ends_the_match() {
        let (mut game, handle) = new_match(None);
        game.add_bot();
        let task = tokio::spawn(game.run());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(handle.stop().await);

        let report = task.await.unwrap();
        assert!(report.finished);
        assert_eq!(report.match_id, handle.id);
        assert_eq!(report.summary.clients.len(), 1);
        assert!(report.summary.server_tick > 0);
    }

    #[tokio::test]
    async fn duration_bounds_the_match() {
        let (mut game, handle) = new_match(Some(Duration::from_millis(100)));
        game.add_bot();
        let mut reports = handle.subscribe();
        let report = game.run().await;
        assert!(report.finished);

        let last = reports.recv().await.unwrap();
        assert!(last.finished);
    }
}
