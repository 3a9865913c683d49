//! Upstream WebSocket handler.
//!
//! Owns the socket after the handshake. Inbound Binary frames carry broker
//! commands: `Send` is routed to the addressed client, anything else from
//! the upstream is discarded. Ping is answered with a Pong carrying the
//! already-unmasked payload; Close is answered with an empty Close and the
//! socket is torn down once that reply is flushed.

use async_trait::async_trait;

use tabmux_core::buffer::{BufferPool, PooledBuf};
use tabmux_core::protocol::command::{self, BrokerCommand};
use tabmux_core::protocol::ws::{message_capacity, payload_offset, FrameHeader, FrameParser, Message, OpCode};
use tabmux_core::Result;

use crate::dispatch::{Event, EventSender};
use crate::reactor::{Conn, Handler};

/// The dispatcher's sending half of the upstream connection: frames broker
/// commands into Binary frames and queues them on the socket.
#[derive(Clone)]
pub struct UpstreamLink {
    conn: Conn,
    pool: BufferPool,
}

impl UpstreamLink {
    pub fn new(conn: Conn, pool: BufferPool) -> Self {
        Self { conn, pool }
    }

    pub fn conn(&self) -> &Conn {
        &self.conn
    }

    pub fn send_hello(&self, id: i32, name: &[u8]) {
        self.send_framed(command::BODY_HEADER_LEN + name.len(), |dst| {
            command::encode_hello_into(id, name, dst)
        });
    }

    pub fn send_goodbye(&self, id: i32) {
        self.send_framed(command::GOODBYE_LEN, |dst| {
            command::encode_goodbye_into(id, dst)
        });
    }

    pub fn send_send(&self, id: i32, payload: &[u8]) {
        self.send_framed(command::BODY_HEADER_LEN + payload.len(), |dst| {
            command::encode_send_into(id, payload, dst)
        });
    }

    pub fn close(&self) {
        self.conn.close();
    }

    /// Reserve the frame header slot, let `fill` append the command body,
    /// then write the Binary header in front and queue the buffer.
    fn send_framed(&self, body_len: usize, fill: impl FnOnce(&mut Vec<u8>)) {
        let offset = payload_offset(body_len);
        let mut buf = self.pool.take(message_capacity(body_len));
        buf.resize(offset, 0);
        fill(&mut buf);
        debug_assert_eq!(buf.len(), offset + body_len);
        FrameHeader::message(OpCode::Binary, body_len).write(&mut buf[..offset]);
        self.conn.send_all(buf);
    }
}

/// Build a complete outbound control/data frame around `payload`.
fn frame_message(pool: &BufferPool, op_code: OpCode, payload: &[u8]) -> PooledBuf {
    let offset = payload_offset(payload.len());
    let mut buf = pool.take(message_capacity(payload.len()));
    buf.resize(offset, 0);
    buf.extend_from_slice(payload);
    FrameHeader::message(op_code, payload.len()).write(&mut buf[..offset]);
    buf
}

/// What one parsed message asks the handler to do, gathered while the
/// borrow-only parse callback runs.
enum Reply {
    Forward { id: i32, payload: Vec<u8> },
    Pong(PooledBuf),
    CloseReply(PooledBuf),
}

pub struct UpstreamHandler {
    pool: BufferPool,
    events: EventSender,
    parser: FrameParser,
    /// Bytes the peer pipelined behind the handshake terminator.
    pending: Vec<u8>,
    sending_close: bool,
}

impl UpstreamHandler {
    pub fn new(pool: BufferPool, events: EventSender, pending: Vec<u8>) -> Self {
        Self {
            parser: FrameParser::new(pool.clone()),
            pool,
            events,
            pending,
            sending_close: false,
        }
    }

    fn on_message(pool: &BufferPool, replies: &mut Vec<Reply>, msg: Message<'_>) -> Result<()> {
        match msg.op_code {
            OpCode::Binary => match BrokerCommand::decode(msg.payload)? {
                BrokerCommand::Send { id, command } => {
                    replies.push(Reply::Forward {
                        id,
                        payload: command,
                    });
                }
                BrokerCommand::Hello { .. } | BrokerCommand::Goodbye { .. } => {
                    tracing::debug!("discarding hello/goodbye from upstream");
                }
            },
            OpCode::Ping => replies.push(Reply::Pong(frame_message(pool, OpCode::Pong, msg.payload))),
            OpCode::Close => {
                replies.push(Reply::CloseReply(frame_message(pool, OpCode::Close, &[])));
            }
            OpCode::Text | OpCode::Pong | OpCode::Continuation => {}
        }
        Ok(())
    }

    /// Run `bytes` through the parser and apply the resulting replies.
    /// Returns whether another receive should be armed.
    async fn ingest(&mut self, conn: &Conn, bytes: &mut [u8]) -> bool {
        let mut replies = Vec::new();
        let parsed = {
            let pool = &self.pool;
            self.parser
                .feed(bytes, |msg| Self::on_message(pool, &mut replies, msg))
        };
        if let Err(err) = parsed {
            tracing::warn!(conn = conn.id(), "upstream protocol error: {err}");
            conn.close();
            return false;
        }
        for reply in replies {
            if self.sending_close {
                break;
            }
            match reply {
                Reply::Forward { id, payload } => {
                    let _ = self
                        .events
                        .send(Event::ForwardToClient { id, payload })
                        .await;
                }
                Reply::Pong(frame) => conn.send_all(frame),
                Reply::CloseReply(frame) => {
                    self.sending_close = true;
                    conn.send_all(frame);
                    conn.close();
                }
            }
        }
        !self.sending_close
    }
}

#[async_trait]
impl Handler for UpstreamHandler {
    async fn on_connected(&mut self, conn: &Conn) {
        let link = UpstreamLink::new(conn.clone(), self.pool.clone());
        if self
            .events
            .send(Event::UpstreamConnected { link })
            .await
            .is_err()
        {
            conn.close();
            return;
        }
        let mut pending = std::mem::take(&mut self.pending);
        if !pending.is_empty() && !self.ingest(conn, &mut pending).await {
            return;
        }
        conn.receive();
    }

    async fn on_receive(&mut self, conn: &Conn, bytes: &mut [u8]) {
        if self.ingest(conn, bytes).await {
            conn.receive();
        }
    }

    async fn on_send(&mut self, _conn: &Conn) {}

    async fn on_close(&mut self) {
        let _ = self.events.send(Event::UpstreamDisconnected).await;
    }
}
