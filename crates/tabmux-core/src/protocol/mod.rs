//! Wire protocols spoken by the broker: the binary broker command codec, the
//! HTTP/1.1 upgrade handshake and the WebSocket frame codec.

pub mod command;
pub mod handshake;
pub mod ws;
