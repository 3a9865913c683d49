//! Per-connection protocol handlers.

pub mod client;
pub mod handshake;
pub mod upstream;
