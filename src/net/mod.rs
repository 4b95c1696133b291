//! Wire types, binary codec and transport seams

pub mod codec;
pub mod link;
pub mod protocol;

pub use codec::CodecError;
pub use link::{ClientLink, InputSampler, ServerLink, TimeSource};
pub use protocol::{
    ClientMsg, ConnectionId, Delivery, EntityState, JoinAccepted, ServerMsg, TickInputBatch,
    TickInputFrame, WorldStateMessage,
};
