//! tickcore - fixed-tick prediction, reconciliation and lag compensation
//!
//! The crate holds both halves of a predicted, server-authoritative
//! simulation:
//! - [`client::ClientPredictor`] runs ahead of the server, records every
//!   tick and rewinds and replays when authoritative state disagrees
//! - [`server::ServerReconciler`] applies per-connection input in tick order
//!   and resolves shots against the past the shooter saw
//! - [`loopback`] wires both roles together in-process over conditioned links
//!
//! Transport, rendering and input devices stay outside; the roles talk to
//! them through the traits in [`net::link`] and [`metrics`].

pub mod client;
pub mod config;
pub mod game;
pub mod loopback;
pub mod metrics;
pub mod net;
pub mod server;
pub mod util;
