//! HTTP upgrade handler for the upstream listener.
//!
//! Assembles CRLF-terminated lines out of whatever the socket delivers and
//! feeds them to the core validator. A rejected request gets its error line
//! written and the socket closed behind it; a valid one gets the 101 reply,
//! after which this handler swaps itself for the WebSocket handler, handing
//! over any bytes the peer pipelined behind the request.

use async_trait::async_trait;

use tabmux_core::buffer::{BufferPool, RecvBuffer};
use tabmux_core::protocol::handshake::{self, HandshakeParser, HandshakeReject, Progress};

use crate::dispatch::{Event, EventSender};
use crate::reactor::{Conn, Handler};
use crate::transport::upstream::UpstreamHandler;

/// Upper bound on one request line or header line.
const HANDSHAKE_BUFFER_LEN: usize = 8 * 1024;

enum HsState {
    Reading,
    /// 101 queued; swap on send completion.
    AwaitSwap,
    /// Error reply queued; the close behind it will finish the connection.
    Failing,
    Done,
}

enum LineScan {
    Pending,
    Complete { accept: String },
}

pub struct HandshakeHandler {
    pool: BufferPool,
    events: EventSender,
    parser: HandshakeParser,
    recv: RecvBuffer,
    state: HsState,
    leftover: Vec<u8>,
}

impl HandshakeHandler {
    pub fn new(pool: BufferPool, events: EventSender) -> Self {
        Self {
            parser: HandshakeParser::new(),
            recv: RecvBuffer::new(&pool, HANDSHAKE_BUFFER_LEN),
            pool,
            events,
            state: HsState::Reading,
            leftover: Vec::new(),
        }
    }

    /// Feed complete buffered lines to the validator.
    fn drain_lines(&mut self) -> Result<LineScan, HandshakeReject> {
        loop {
            let filled = self.recv.filled();
            let Some(newline) = filled.iter().position(|byte| *byte == b'\n') else {
                return Ok(LineScan::Pending);
            };
            let line_end = if newline > 0 && filled[newline - 1] == b'\r' {
                newline - 1
            } else {
                newline
            };
            let outcome = self.parser.offer_line(&self.recv.filled()[..line_end]);
            self.recv.consume(newline + 1);
            match outcome? {
                Progress::Pending => continue,
                Progress::Complete { accept } => return Ok(LineScan::Complete { accept }),
            }
        }
    }

    fn write_string(&self, conn: &Conn, text: &str) {
        let mut buf = self.pool.take(text.len());
        buf.extend_from_slice(text.as_bytes());
        conn.send_all(buf);
    }

    fn fail(&mut self, conn: &Conn, reject: HandshakeReject) {
        tracing::debug!(
            conn = conn.id(),
            status = reject.status,
            "handshake rejected: {}",
            reject.detail
        );
        self.write_string(conn, &reject.response());
        conn.close();
        self.state = HsState::Failing;
    }
}

#[async_trait]
impl Handler for HandshakeHandler {
    async fn on_connected(&mut self, conn: &Conn) {
        conn.receive();
    }

    async fn on_receive(&mut self, conn: &Conn, bytes: &mut [u8]) {
        if !matches!(self.state, HsState::Reading) {
            return;
        }
        let mut offset = 0;
        loop {
            offset += self.recv.append_upto(&bytes[offset..]);
            match self.drain_lines() {
                Ok(LineScan::Pending) => {
                    if offset >= bytes.len() {
                        break;
                    }
                    if self.recv.is_full() {
                        self.fail(conn, HandshakeReject::line_too_long());
                        return;
                    }
                }
                Ok(LineScan::Complete { accept }) => {
                    let mut leftover = self.recv.filled().to_vec();
                    leftover.extend_from_slice(&bytes[offset..]);
                    self.leftover = leftover;
                    self.write_string(conn, &handshake::switching_protocols(&accept));
                    self.state = HsState::AwaitSwap;
                    tracing::debug!(conn = conn.id(), "handshake complete");
                    return;
                }
                Err(reject) => {
                    self.fail(conn, reject);
                    return;
                }
            }
        }
        if self.recv.is_full() {
            self.fail(conn, HandshakeReject::line_too_long());
            return;
        }
        conn.receive();
    }

    async fn on_send(&mut self, conn: &Conn) {
        if matches!(self.state, HsState::AwaitSwap) {
            self.state = HsState::Done;
            let pending = std::mem::take(&mut self.leftover);
            let handler = UpstreamHandler::new(self.pool.clone(), self.events.clone(), pending);
            conn.replace_handler(Box::new(handler));
        }
    }

    async fn on_close(&mut self) {
        // Still this handler at close time means the upgrade never finished.
        let _ = self.events.send(Event::UpstreamDisconnected).await;
    }
}
