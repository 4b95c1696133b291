//! Rewind-and-replay correction of the locally predicted entity

use serde::{Deserialize, Serialize};

use crate::game::{EntityController, EntityId, InputFrame, RingHistory, StateSnapshot, Tick, World};

/// What the client remembers about one predicted tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientTickRecord {
    /// Input applied on this tick
    pub input: InputFrame,
    /// Local entity state before `input` was applied
    pub state: StateSnapshot,
    /// Newest server tick known when the input was captured
    pub server_tick: Tick,
}

/// Result of comparing an authoritative state against the prediction
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReconcileOutcome {
    /// Prediction within tolerance, nothing changed
    Confirmed { error_sq: f32 },
    /// State corrected and `replayed` ticks re-simulated
    Replayed { error_sq: f32, replayed: u32 },
    /// No prediction recorded for the anchor tick
    Unrecorded,
    /// The local entity is not in the world
    MissingEntity,
}

/// Correct `entity` against `authoritative`, the server's state for `anchor`.
///
/// When the squared position error exceeds `epsilon` the authoritative state
/// is applied and every tick from `anchor` up to (not including) `current`
/// is re-simulated from its recorded input, rewriting the recorded states
/// along the way. Only `entity` is stepped.
#[allow(clippy::too_many_arguments)]
pub fn reconcile(
    world: &mut World,
    entity: EntityId,
    history: &mut RingHistory<ClientTickRecord>,
    anchor: Tick,
    current: Tick,
    authoritative: &StateSnapshot,
    epsilon: f32,
    dt: f32,
) -> ReconcileOutcome {
    let Some(record) = history.get(anchor) else {
        return ReconcileOutcome::Unrecorded;
    };
    let Some(controller) = world.get_mut(entity) else {
        return ReconcileOutcome::MissingEntity;
    };

    let error_sq = record.state.position_error_sq(authoritative);
    if error_sq <= epsilon {
        return ReconcileOutcome::Confirmed { error_sq };
    }

    controller.apply_state(authoritative);
    let mut replayed = 0;
    for tick in anchor..current {
        let Some(record) = history.get_mut(tick) else {
            break;
        };
        record.state = controller.sample_state();
        controller.set_input(&record.input);
        controller.advance(dt);
        replayed += 1;
    }

    ReconcileOutcome::Replayed { error_sq, replayed }
}
