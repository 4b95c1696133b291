//! Protocol message definitions
//! These are the wire types exchanged between client and server roles

use serde::{Deserialize, Serialize};

use crate::game::{EntityId, InputFrame, StateSnapshot, Tick};

/// Transport-assigned connection identifier
pub type ConnectionId = u32;

/// Delivery class a transport must honour for a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// Every message arrives, in send order
    ReliableOrdered,
    /// Latest wins; messages may be dropped or arrive out of order
    Sequenced,
}

/// One tick of input inside a batch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickInputFrame {
    pub input: InputFrame,
    /// Ticks between this frame and the newest server state the client had
    /// seen when it captured the frame
    pub view_delta: i16,
}

/// Contiguous run of input frames starting at `start_tick`.
///
/// Batches are redundant: every send repeats all frames the server has not
/// acknowledged yet, so losing a batch loses no input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickInputBatch {
    pub start_tick: Tick,
    pub frames: Vec<TickInputFrame>,
}

impl TickInputBatch {
    /// Tick of the newest frame
    pub fn end_tick(&self) -> Option<Tick> {
        let len = u32::try_from(self.frames.len()).ok()?;
        len.checked_sub(1).map(|last| self.start_tick.saturating_add(last))
    }

    /// Frames paired with the tick each belongs to
    pub fn ticks(&self) -> impl Iterator<Item = (Tick, &TickInputFrame)> {
        (self.start_tick..).zip(self.frames.iter())
    }
}

/// One entity inside a world state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity: EntityId,
    pub state: StateSnapshot,
}

/// Authoritative world state for one server tick, tailored per connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldStateMessage {
    pub tick: Tick,
    /// Newest input tick the server has received from the recipient, zero
    /// when none
    pub your_latest_input_tick: Tick,
    pub entity_states: Vec<EntityState>,
}

impl WorldStateMessage {
    pub fn state_of(&self, entity: EntityId) -> Option<&StateSnapshot> {
        self.entity_states
            .iter()
            .find(|e| e.entity == entity)
            .map(|e| &e.state)
    }
}

/// Confirmation of a join
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinAccepted {
    /// Entity the joining connection controls
    pub entity: EntityId,
    pub server_tick: Tick,
    /// Every entity in the match at join time, the joiner's own included
    pub entities: Vec<EntityState>,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Request to join the match
    Join,

    /// Redundant input for the ticks not yet acknowledged
    Input(TickInputBatch),

    /// Leave the match
    Leave,
}

impl ClientMsg {
    pub fn delivery(&self) -> Delivery {
        match self {
            Self::Input(_) => Delivery::Sequenced,
            Self::Join | Self::Leave => Delivery::ReliableOrdered,
        }
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    JoinAccepted(JoinAccepted),

    /// Another player entered the match
    PlayerJoined { entity: EntityId, state: StateSnapshot },

    /// Another player left the match
    PlayerLeft { entity: EntityId },

    WorldState(WorldStateMessage),
}

impl ServerMsg {
    pub fn delivery(&self) -> Delivery {
        match self {
            Self::WorldState(_) => Delivery::Sequenced,
            _ => Delivery::ReliableOrdered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(start_tick: Tick, len: usize) -> TickInputBatch {
        TickInputBatch {
            start_tick,
            frames: vec![
                TickInputFrame {
                    input: InputFrame::neutral(),
                    view_delta: 0,
                };
                len
            ],
        }
    }

    #[test]
    fn end_tick_covers_last_frame() {
        assert_eq!(batch(50, 11).end_tick(), Some(60));
        assert_eq!(batch(50, 1).end_tick(), Some(50));
        assert_eq!(batch(50, 0).end_tick(), None);
        let ticks: Vec<Tick> = batch(7, 3).ticks().map(|(t, _)| t).collect();
        assert_eq!(ticks, vec![7, 8, 9]);
    }

    #[test]
    fn delivery_classes() {
        assert_eq!(ClientMsg::Input(batch(0, 1)).delivery(), Delivery::Sequenced);
        assert_eq!(ClientMsg::Join.delivery(), Delivery::ReliableOrdered);
        assert_eq!(ServerMsg::PlayerLeft { entity: 1 }.delivery(), Delivery::ReliableOrdered);
    }

    #[test]
    fn json_shape_is_tagged() {
        let json = serde_json::to_string(&ServerMsg::PlayerLeft { entity: 4 }).unwrap();
        assert_eq!(json, r#"{"type":"player_left","entity":4}"#);
    }
}
