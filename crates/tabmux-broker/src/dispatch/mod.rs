//! Event dispatch: the broker's single cross-connection decision point.
//!
//! Reactor handlers translate what they see into [`Event`]s on a bounded
//! queue; one dispatcher task consumes them and owns every piece of state
//! that spans connections (the upstream lifecycle, the client table, id
//! assignment). Listener factories need the upstream phase synchronously at
//! accept time, so that one piece of state is mirrored in an atomic
//! [`UpstreamGate`]; only the `Idle → Handshaking` admission transition
//! happens outside the dispatcher task.

mod dispatcher;

pub use dispatcher::Dispatcher;

use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::mpsc;

use tabmux_core::buffer::PooledBuf;

use crate::reactor::{Conn, ConnId};
use crate::transport::upstream::UpstreamLink;

/// Everything the dispatcher reacts to.
pub enum Event {
    /// Terminate: close all clients and the upstream, then stop consuming.
    Stop,
    /// The WebSocket handshake completed and the upstream handler took over.
    UpstreamConnected { link: UpstreamLink },
    /// The upstream socket is gone (any phase).
    UpstreamDisconnected,
    /// A client finished `HELLO\n<name>\n`.
    ClientConnected { conn: Conn, name: Vec<u8> },
    /// A registered client's socket closed.
    ClientDisconnected { conn_id: ConnId },
    /// The upstream asked for `payload` to be delivered to client `id`.
    ForwardToClient { id: i32, payload: Vec<u8> },
    /// A client produced bytes to relay upstream.
    ForwardToUpstream { conn_id: ConnId, payload: PooledBuf },
}

pub type EventSender = mpsc::Sender<Event>;

/// Upstream lifecycle, as visible to the listener factories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamPhase {
    /// No upstream. The next connection on the upstream port is admitted;
    /// clients are refused.
    Idle,
    /// TCP accepted, HTTP handshake in progress.
    Handshaking,
    /// WebSocket established; clients are admitted.
    Connected,
}

const PHASE_IDLE: u8 = 0;
const PHASE_HANDSHAKING: u8 = 1;
const PHASE_CONNECTED: u8 = 2;

/// Atomic mirror of the upstream phase. At most one upstream exists at any
/// time: admission claims the slot with a compare-exchange, every other
/// transition belongs to the dispatcher.
#[derive(Debug, Default)]
pub struct UpstreamGate(AtomicU8);

impl UpstreamGate {
    pub fn new() -> Self {
        Self(AtomicU8::new(PHASE_IDLE))
    }

    pub fn phase(&self) -> UpstreamPhase {
        match self.0.load(Ordering::Acquire) {
            PHASE_HANDSHAKING => UpstreamPhase::Handshaking,
            PHASE_CONNECTED => UpstreamPhase::Connected,
            _ => UpstreamPhase::Idle,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.0.load(Ordering::Acquire) == PHASE_CONNECTED
    }

    /// Claim the upstream slot for a freshly accepted connection.
    pub fn try_begin_handshake(&self) -> bool {
        self.0
            .compare_exchange(
                PHASE_IDLE,
                PHASE_HANDSHAKING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn set_connected(&self) {
        self.0.store(PHASE_CONNECTED, Ordering::Release);
    }

    pub(crate) fn set_idle(&self) {
        self.0.store(PHASE_IDLE, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_admits_exactly_one_upstream() {
        let gate = UpstreamGate::new();
        assert_eq!(gate.phase(), UpstreamPhase::Idle);
        assert!(!gate.is_connected());

        assert!(gate.try_begin_handshake());
        assert!(!gate.try_begin_handshake());
        assert_eq!(gate.phase(), UpstreamPhase::Handshaking);

        gate.set_connected();
        assert!(gate.is_connected());
        assert!(!gate.try_begin_handshake());

        gate.set_idle();
        assert!(gate.try_begin_handshake());
    }
}
