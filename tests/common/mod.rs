//! Shared fixtures for tickcore integration tests

#![allow(dead_code)]

use std::sync::{Arc, Once};

use tracing_subscriber::EnvFilter;

use tickcore::client::ClientPredictor;
use tickcore::config::SimSettings;
use tickcore::game::{InputFrame, StateSnapshot, Tick};
use tickcore::metrics::MemoryMetrics;
use tickcore::net::link::{CapturedInputs, CapturedWorldStates};
use tickcore::net::{ConnectionId, TickInputBatch};
use tickcore::server::ServerReconciler;

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tickcore=debug")))
            .with_test_writer()
            .init();
    });
}

/// One server and one predicting client exchanging messages directly,
/// one client tick and one server tick per step
pub struct Lockstep {
    pub server: ServerReconciler,
    pub client: ClientPredictor,
    pub connection: ConnectionId,
    pub metrics: Arc<MemoryMetrics>,
    inputs: CapturedInputs,
    world_states: CapturedWorldStates,
}

impl Lockstep {
    /// Join a client at the origin after the server has run `server_ticks`
    pub fn new<F>(settings: SimSettings, server_ticks: u32, script: F) -> Self
    where
        F: FnMut(Tick) -> Option<InputFrame> + Send + 'static,
    {
        let metrics = Arc::new(MemoryMetrics::new());
        let world_states = CapturedWorldStates::new();
        let mut server = ServerReconciler::new(settings.clone(), Box::new(world_states.clone()), metrics.clone(), 1);
        for _ in 0..server_ticks {
            server.tick();
        }

        let connection = 1;
        let accepted = server.join_at(connection, StateSnapshot::default());
        let inputs = CapturedInputs::new();
        let client = ClientPredictor::new(
            settings,
            &accepted,
            0,
            Box::new(script),
            Box::new(inputs.clone()),
            metrics.clone(),
        );

        Self {
            server,
            client,
            connection,
            metrics,
            inputs,
            world_states,
        }
    }

    /// Run one client tick, deliver its batch (unless `drop_batch` says so),
    /// run one server tick and optionally deliver a world state
    pub fn step_with<D, E>(&mut self, mut drop_batch: D, mut emit: E)
    where
        D: FnMut(&TickInputBatch) -> bool,
        E: FnMut(Tick) -> bool,
    {
        self.client.tick();
        for batch in self.inputs.take() {
            if !drop_batch(&batch) {
                // Stale batches are counted by the server
                let _ = self.server.enqueue_input(self.connection, &batch);
            }
        }

        self.server.tick();
        if emit(self.server.current_tick()) {
            self.server.emit_world_state();
        }
        for (_, msg) in self.world_states.take() {
            self.client.enqueue_world_state(msg);
        }
    }

    /// Run server ticks with the client paused
    pub fn advance_server(&mut self, ticks: u32) {
        for _ in 0..ticks {
            self.server.tick();
        }
    }

    /// Emit a world state now and hand it to the client
    pub fn deliver_world_state(&mut self) {
        self.server.emit_world_state();
        for (_, msg) in self.world_states.take() {
            self.client.enqueue_world_state(msg);
        }
    }

    /// Lossless step with a world state after every server tick
    pub fn step(&mut self) {
        self.step_with(|_| false, |_| true);
    }
}
