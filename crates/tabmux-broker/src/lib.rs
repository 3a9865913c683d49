//! tabmux broker library entry.
//!
//! This crate assembles the broker stack:
//! - Reactor: TCP listeners and per-connection tasks delivering serialized
//!   handler callbacks, with in-place handler replacement for the
//!   handshake → WebSocket handoff.
//! - Transport: the HTTP upgrade handler, the upstream WebSocket handler and
//!   the tabserver client line handler.
//! - Dispatch: the single-threaded event dispatcher owning the upstream
//!   lifecycle and the client table.
//!
//! The crate is consumed by the binary (`main.rs`) and by the socket-level
//! integration tests, which share [`broker::Broker::bind`].

pub mod broker;
pub mod config;
pub mod dispatch;
pub mod reactor;
pub mod transport;

pub use broker::{Broker, BrokerHandle};
pub use config::BrokerConfig;
