//! Server role: tick-ordered input application, world state emission and
//! lag-compensated hit detection

pub mod connection;
pub mod input_queue;
pub mod lag_comp;
pub mod reconciler;
pub mod snapshot;

pub use connection::{ConnectionState, ConnectionSummary};
pub use input_queue::{InputQueue, QueuedInput};
pub use lag_comp::{EntityHistories, LagCompensator};
pub use reconciler::{IngestError, ServerReconciler, ServerStats};
pub use snapshot::{SnapshotStats, WorldStateBuilder};
