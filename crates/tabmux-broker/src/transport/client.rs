//! Tabserver client line handler.
//!
//! A client opens with exactly `HELLO\n`, names itself on the next line, and
//! from then on every received chunk is relayed upstream verbatim — newline
//! boundaries inside the stream are not message boundaries. Anything that is
//! not that, including a HELLO sequence that cannot fit the receive buffer,
//! closes the socket.

use async_trait::async_trait;

use tabmux_core::buffer::{BufferPool, RecvBuffer};

use crate::dispatch::{Event, EventSender};
use crate::reactor::{Conn, ConnId, Handler};

/// Fixed receive capacity: the largest broker `Send` body, so one forwarded
/// chunk always fits the 16-bit length prefix.
pub const CLIENT_BUFFER_LEN: usize = u16::MAX as usize;

const HELLO_LINE: &[u8] = b"HELLO\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineState {
    AwaitHello,
    AwaitIntro,
    Forward,
}

pub struct ClientHandler {
    pool: BufferPool,
    events: EventSender,
    recv: RecvBuffer,
    state: LineState,
    conn_id: Option<ConnId>,
}

impl ClientHandler {
    pub fn new(pool: BufferPool, events: EventSender) -> Self {
        Self {
            recv: RecvBuffer::new(&pool, CLIENT_BUFFER_LEN),
            pool,
            events,
            state: LineState::AwaitHello,
            conn_id: None,
        }
    }

    /// Walk the state machine over the buffered bytes. Returns `true` when
    /// the connection was closed on a protocol violation.
    async fn scan(&mut self, conn: &Conn) -> bool {
        let mut consumed = 0;
        loop {
            match self.state {
                LineState::AwaitHello => {
                    let filled = self.recv.filled();
                    if filled.len() < HELLO_LINE.len() {
                        break;
                    }
                    if &filled[..HELLO_LINE.len()] != HELLO_LINE {
                        tracing::debug!(conn = conn.id(), "bad hello line");
                        conn.close();
                        return true;
                    }
                    self.state = LineState::AwaitIntro;
                }
                LineState::AwaitIntro => {
                    let filled = self.recv.filled();
                    let intro = &filled[HELLO_LINE.len()..];
                    let Some(rel) = intro.iter().position(|byte| *byte == b'\n') else {
                        break;
                    };
                    let name = intro[..rel].to_vec();
                    consumed = HELLO_LINE.len() + rel + 1;
                    self.state = LineState::Forward;
                    tracing::debug!(
                        conn = conn.id(),
                        name = %String::from_utf8_lossy(&name),
                        "client introduced"
                    );
                    let _ = self
                        .events
                        .send(Event::ClientConnected {
                            conn: conn.clone(),
                            name,
                        })
                        .await;
                }
                LineState::Forward => {
                    let filled = self.recv.filled();
                    if consumed < filled.len() {
                        let chunk = &filled[consumed..];
                        let mut payload = self.pool.take(chunk.len());
                        payload.extend_from_slice(chunk);
                        consumed = filled.len();
                        let _ = self
                            .events
                            .send(Event::ForwardToUpstream {
                                conn_id: conn.id(),
                                payload,
                            })
                            .await;
                    }
                    break;
                }
            }
        }
        self.recv.consume(consumed);
        false
    }
}

#[async_trait]
impl Handler for ClientHandler {
    async fn on_connected(&mut self, conn: &Conn) {
        self.conn_id = Some(conn.id());
        conn.receive();
    }

    async fn on_receive(&mut self, conn: &Conn, bytes: &mut [u8]) {
        let mut offset = 0;
        loop {
            offset += self.recv.append_upto(&bytes[offset..]);
            if self.scan(conn).await {
                return;
            }
            if offset >= bytes.len() {
                break;
            }
            if self.recv.is_full() {
                // HELLO or the intro line cannot fit; the forwarding state
                // always drains the buffer, so only the gate states land here.
                tracing::debug!(conn = conn.id(), "hello sequence does not fit");
                conn.close();
                return;
            }
        }
        if self.state != LineState::Forward && self.recv.is_full() {
            tracing::debug!(conn = conn.id(), "hello sequence does not fit");
            conn.close();
            return;
        }
        conn.receive();
    }

    async fn on_send(&mut self, _conn: &Conn) {}

    async fn on_close(&mut self) {
        if self.state == LineState::Forward {
            if let Some(conn_id) = self.conn_id {
                let _ = self.events.send(Event::ClientDisconnected { conn_id }).await;
            }
        }
    }
}
