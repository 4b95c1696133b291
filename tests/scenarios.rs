//! End-to-end prediction, reconciliation and lag compensation scenarios

mod common;

use std::f32::consts::FRAC_PI_2;
use std::sync::Arc;

use glam::{Quat, Vec3};

use tickcore::config::SimSettings;
use tickcore::game::physics::MovementStats;
use tickcore::game::{InputFrame, StateSnapshot, Tick};
use tickcore::metrics::NoopMetrics;
use tickcore::net::link::CapturedWorldStates;
use tickcore::net::{TickInputBatch, TickInputFrame};
use tickcore::server::{IngestError, ServerReconciler};

use common::{init_test_logging, Lockstep};

fn neutral(_: Tick) -> Option<InputFrame> {
    Some(InputFrame::neutral())
}

#[test]
fn forward_motion_is_confirmed_without_replay() {
    init_test_logging();
    // Client starts at tick 4 and holds forward for ten ticks
    let mut lockstep = Lockstep::new(SimSettings::default(), 0, |tick| {
        Some(if (4..14).contains(&tick) {
            InputFrame::forward(Quat::IDENTITY)
        } else {
            InputFrame::neutral()
        })
    });
    assert_eq!(lockstep.client.current_tick(), 4);

    for _ in 0..30 {
        lockstep.step();
    }

    let entity = lockstep.client.entity();
    let server_state = lockstep.server.world().sample(entity).unwrap();
    let client_state = lockstep.client.local_state().unwrap();

    assert!((server_state.position - Vec3::new(5.0, 0.0, 0.0)).length() < 1e-3);
    assert_eq!(client_state.position, server_state.position);

    let stats = lockstep.client.stats();
    assert!(stats.confirmed > 0);
    assert_eq!(stats.replays, 0);
    assert_eq!(stats.snaps, 0);
    assert_eq!(stats.last_error_sq, 0.0);
}

#[test]
fn lost_inputs_are_repeated_and_client_replays() {
    init_test_logging();
    let settings = SimSettings {
        movement: MovementStats {
            ground_speed: 3.0,
            ..MovementStats::default()
        },
        ..SimSettings::default()
    };
    let mut lockstep = Lockstep::new(settings, 0, |tick| {
        Some(if tick == 20 || tick == 21 {
            InputFrame::forward(Quat::IDENTITY)
        } else {
            InputFrame::neutral()
        })
    });

    // Batches sent at client ticks 20..=25 never arrive, so the server runs
    // ticks 20 and 21 on the repeated neutral input. World states go out on
    // even server ticks only.
    let lost = |batch: &TickInputBatch| batch.end_tick().is_some_and(|t| (20..=25).contains(&t));
    let even = |tick: Tick| tick % 2 == 0;

    for _ in 0..=22 {
        lockstep.step_with(lost, even);
    }

    let stats = lockstep.client.stats().clone();
    assert_eq!(stats.replays, 1);
    assert_eq!(stats.replayed_ticks, 5);
    assert!((stats.last_error_sq - 0.04).abs() < 1e-4);
    assert_eq!(lockstep.server.stats().missing_inputs, 6);
    assert_eq!(lockstep.metrics.count("client.1", "replays"), 1);

    for _ in 0..20 {
        lockstep.step_with(lost, even);
    }

    let entity = lockstep.client.entity();
    let server_state = lockstep.server.world().sample(entity).unwrap();
    assert_eq!(lockstep.client.local_state(), Some(server_state));
    assert_eq!(lockstep.client.stats().replays, 1);
}

#[test]
fn batch_behind_server_tick_is_stale() {
    init_test_logging();
    let mut lockstep = Lockstep::new(SimSettings::default(), 0, neutral);
    lockstep.advance_server(65);

    let batch = TickInputBatch {
        start_tick: 50,
        frames: vec![
            TickInputFrame {
                input: InputFrame::neutral(),
                view_delta: 0,
            };
            11
        ],
    };
    let result = lockstep.server.enqueue_input(lockstep.connection, &batch);

    assert_eq!(
        result,
        Err(IngestError::StaleInput {
            end_tick: 60,
            server_tick: 65
        })
    );
    assert_eq!(lockstep.server.stats().stale_inputs, 1);
    assert_eq!(lockstep.server.connection(lockstep.connection).map(|c| c.stale_batches), Some(1));
}

#[test]
fn future_world_state_snaps_client_forward() {
    init_test_logging();
    let mut lockstep = Lockstep::new(SimSettings::default(), 146, neutral);
    assert_eq!(lockstep.client.current_tick(), 150);

    lockstep.advance_server(54);
    assert_eq!(lockstep.server.current_tick(), 200);
    lockstep.deliver_world_state();
    lockstep.client.tick();

    assert_eq!(lockstep.client.current_tick(), 204);
    let stats = lockstep.client.stats();
    assert_eq!(stats.snaps, 1);
    assert_eq!(stats.replays, 0);
    assert_eq!(lockstep.client.last_server_tick(), 200);
}

/// Defenders walking +Z cross the attacker's firing line (+X) at tick 39
#[test]
fn shot_is_resolved_against_the_attackers_view() {
    init_test_logging();
    let mut server = ServerReconciler::new(
        SimSettings::default(),
        Box::new(CapturedWorldStates::new()),
        Arc::new(NoopMetrics),
        9,
    );
    let attacker = server.join_at(1, StateSnapshot::default()).entity;
    let near = server
        .join_at(2, StateSnapshot::at(Vec3::new(10.0, 0.0, -19.5)))
        .entity;
    let far = server
        .join_at(3, StateSnapshot::at(Vec3::new(20.0, 0.0, -19.5)))
        .entity;

    let walk = InputFrame::forward(Quat::from_rotation_y(-FRAC_PI_2));
    let walking = TickInputBatch {
        start_tick: 0,
        frames: vec![TickInputFrame { input: walk, view_delta: 0 }; 61],
    };
    server.enqueue_input(2, &walking).unwrap();
    server.enqueue_input(3, &walking).unwrap();

    // Fire at tick 50 while viewing tick 40; interpolation puts the view at 39
    let mut frames = vec![
        TickInputFrame {
            input: InputFrame::neutral(),
            view_delta: 10,
        };
        51
    ];
    frames[50].input.fire = true;
    server
        .enqueue_input(1, &TickInputBatch { start_tick: 0, frames })
        .unwrap();

    for _ in 0..50 {
        server.tick();
    }
    let near_head = server.world().sample(near).unwrap();
    assert!(near_head.position.z > 5.0);

    server.tick();

    assert_eq!(server.stats().attacks, 1);
    assert_eq!(server.stats().hits, 1);
    assert_eq!(server.health(near), Some(75.0));
    assert_eq!(server.health(far), Some(100.0));
    assert_eq!(server.health(attacker), Some(100.0));

    // Rollback left the live world untouched
    let near_after = server.world().sample(near).unwrap();
    assert!((near_after.position.z - 6.0).abs() < 1e-3);
    let recorded = server.history_state(near, 39).unwrap();
    assert!(recorded.position.z.abs() < 1e-3);
}
