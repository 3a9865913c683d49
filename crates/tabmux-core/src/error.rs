//! Shared error type across tabmux crates.

use thiserror::Error;

/// Shared result type.
pub type Result<T> = std::result::Result<T, TabmuxError>;

/// Unified error type used by core and broker.
#[derive(Debug, Error)]
pub enum TabmuxError {
    /// WebSocket framing or tabserver line-protocol violation. The affected
    /// connection is closed; no reply is sent.
    #[error("protocol error: {0}")]
    Protocol(&'static str),

    /// A broker command that does not decode. Treated like a protocol error
    /// on the upstream connection. HTTP handshake rejections are the one
    /// protocol failure not carried here: they travel as
    /// [`crate::protocol::handshake::HandshakeReject`] so the status/reason
    /// pair can be written back before the close.
    #[error("invalid broker command: {0}")]
    InvalidCommand(&'static str),

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl TabmuxError {
    pub(crate) fn protocol(reason: &'static str) -> Self {
        TabmuxError::Protocol(reason)
    }
}
