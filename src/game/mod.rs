//! Simulation building blocks shared by the client and server roles

pub mod clock;
pub mod combat;
pub mod controller;
pub mod history;
pub mod input;
pub mod physics;
pub mod state;
pub mod world;

pub use clock::{ClockStep, SimulationClock};
pub use controller::{AuthoritativeBody, Controller, EntityController, PredictedBody, RemoteInterpolator};
pub use history::{RingHistory, HISTORY_CAPACITY};
pub use input::InputFrame;
pub use state::StateSnapshot;
pub use world::World;

/// One fixed simulation step. Monotonically increasing, wrap is not handled.
pub type Tick = u32;

/// Entity identifier, unique within a match
pub type EntityId = u16;
