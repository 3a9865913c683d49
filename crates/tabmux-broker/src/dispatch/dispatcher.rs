//! The dispatcher task.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use tabmux_core::buffer::BufferPool;

use crate::reactor::{Conn, ConnId};
use crate::transport::upstream::UpstreamLink;

use super::{Event, UpstreamGate, UpstreamPhase};

/// Single consumer of the event queue. Owns the upstream link, the client
/// table and client-id assignment; every mutation of cross-connection state
/// happens on this task.
pub struct Dispatcher {
    pool: BufferPool,
    gate: Arc<UpstreamGate>,
    events: mpsc::Receiver<Event>,
    upstream: Option<UpstreamLink>,
    clients: HashMap<i32, Conn>,
    by_conn: HashMap<ConnId, i32>,
    next_id: i32,
}

impl Dispatcher {
    pub fn new(pool: BufferPool, gate: Arc<UpstreamGate>, events: mpsc::Receiver<Event>) -> Self {
        Self {
            pool,
            gate,
            events,
            upstream: None,
            clients: HashMap::new(),
            by_conn: HashMap::new(),
            next_id: 1,
        }
    }

    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            if !self.handle(event) {
                break;
            }
        }
        tracing::info!("dispatcher stopped");
    }

    /// Apply one event; returns `false` to break the loop.
    fn handle(&mut self, event: Event) -> bool {
        match event {
            Event::Stop => {
                self.teardown_clients();
                if let Some(link) = self.upstream.take() {
                    link.close();
                }
                self.gate.set_idle();
                return false;
            }
            Event::UpstreamConnected { link } => {
                if self.gate.phase() == UpstreamPhase::Handshaking {
                    tracing::info!(peer = %link.conn().peer_addr(), "upstream connected");
                    self.upstream = Some(link);
                    self.gate.set_connected();
                } else {
                    tracing::warn!("upstream connected in unexpected phase; dropping");
                    link.close();
                }
            }
            Event::UpstreamDisconnected => {
                if self.gate.phase() != UpstreamPhase::Idle {
                    tracing::info!(
                        clients = self.clients.len(),
                        "upstream disconnected; dropping clients"
                    );
                    self.upstream = None;
                    self.teardown_clients();
                    self.gate.set_idle();
                }
            }
            Event::ClientConnected { conn, name } => match self.upstream.as_ref() {
                Some(link) => {
                    let id = self.next_id;
                    self.next_id = self.next_id.wrapping_add(1);
                    tracing::debug!(id, name = %String::from_utf8_lossy(&name), "client registered");
                    self.by_conn.insert(conn.id(), id);
                    self.clients.insert(id, conn);
                    link.send_hello(id, &name);
                }
                // The upstream vanished while the client's HELLO was in
                // flight; admission already lost the race, drop it.
                None => conn.close(),
            },
            Event::ClientDisconnected { conn_id } => {
                if let Some(link) = self.upstream.as_ref() {
                    if let Some(id) = self.by_conn.remove(&conn_id) {
                        self.clients.remove(&id);
                        tracing::debug!(id, "client disconnected");
                        link.send_goodbye(id);
                    }
                }
            }
            Event::ForwardToClient { id, payload } => match self.clients.get(&id) {
                Some(conn) => {
                    let mut buf = self.pool.take(payload.len());
                    buf.extend_from_slice(&payload);
                    conn.send_all(buf);
                }
                // The client may have disconnected after the upstream
                // issued the reply.
                None => tracing::debug!(id, "dropping payload for unknown client"),
            },
            Event::ForwardToUpstream { conn_id, payload } => {
                if let Some(link) = self.upstream.as_ref() {
                    if let Some(id) = self.by_conn.get(&conn_id) {
                        link.send_send(*id, &payload);
                    }
                }
            }
        }
        true
    }

    fn teardown_clients(&mut self) {
        for (_, conn) in self.clients.drain() {
            conn.close();
        }
        self.by_conn.clear();
    }
}
