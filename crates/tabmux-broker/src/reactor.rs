//! Asynchronous socket reactor.
//!
//! The reactor owns the listening sockets and every accepted connection.
//! Each connection runs one task that owns the socket halves and the boxed
//! [`Handler`], so callbacks for a connection are naturally serialized;
//! callbacks for different connections run concurrently on the runtime's
//! workers. Handlers drive I/O through a [`Conn`] handle whose operations
//! enqueue onto the connection's control mailbox:
//!
//! - `receive` arms exactly one read; one `on_receive` fires per armed read.
//! - `send_all` writes an entire pooled buffer; `on_send` fires once the
//!   last byte is handed to the socket and the buffer returns to the pool.
//! - `replace_handler` swaps the handler in place and runs `on_connected`
//!   on the replacement (the handshake → WebSocket handoff).
//! - `close` tears the connection down; `on_close` always fires last.
//!
//! Mailbox ordering is the per-connection ordering guarantee: messages
//! enqueued before a `close` are flushed before the socket goes away.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tabmux_core::buffer::{BufferPool, PooledBuf};

/// Bytes requested per receive. Equal to the largest broker `Send` body so
/// one receive always fits the client line handler's buffer.
pub const RECV_CHUNK_LEN: usize = u16::MAX as usize;

pub type ConnId = u64;

/// Per-connection callback set. At most one callback is in flight per
/// connection at any time.
#[async_trait]
pub trait Handler: Send {
    async fn on_connected(&mut self, conn: &Conn);
    async fn on_receive(&mut self, conn: &Conn, bytes: &mut [u8]);
    async fn on_send(&mut self, conn: &Conn);
    async fn on_close(&mut self);
}

/// Admission decision for an accepted socket: a handler, or `None` to refuse
/// (the socket is closed immediately).
pub type HandlerFactory =
    Arc<dyn Fn(SocketAddr, SocketAddr) -> Option<Box<dyn Handler>> + Send + Sync>;

enum ConnCommand {
    Receive,
    SendAll(PooledBuf),
    Swap(Box<dyn Handler>),
    Close,
}

struct ConnShared {
    id: ConnId,
    local: SocketAddr,
    peer: SocketAddr,
    ctrl: mpsc::UnboundedSender<ConnCommand>,
}

/// Handle to one accepted connection. Cheap to clone; safe to use from any
/// task. Operations on a connection that already went away are silent no-ops.
#[derive(Clone)]
pub struct Conn {
    shared: Arc<ConnShared>,
}

impl Conn {
    pub fn id(&self) -> ConnId {
        self.shared.id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.shared.peer
    }

    /// Arm a single read; one `on_receive` will fire for it.
    pub fn receive(&self) {
        let _ = self.shared.ctrl.send(ConnCommand::Receive);
    }

    /// Queue a pooled buffer for transmission. Buffers are written whole, in
    /// FIFO order, one at a time.
    pub fn send_all(&self, buf: PooledBuf) {
        let _ = self.shared.ctrl.send(ConnCommand::SendAll(buf));
    }

    /// Substitute the connection's handler and run `on_connected` on the
    /// replacement. Callers must not have a receive armed across the swap.
    pub fn replace_handler(&self, handler: Box<dyn Handler>) {
        let _ = self.shared.ctrl.send(ConnCommand::Swap(handler));
    }

    /// Close after everything already queued has been written.
    pub fn close(&self) {
        let _ = self.shared.ctrl.send(ConnCommand::Close);
    }
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("id", &self.shared.id)
            .field("peer", &self.shared.peer)
            .finish()
    }
}

struct ReactorShared {
    pool: BufferPool,
    connections: DashMap<ConnId, Conn>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    next_id: AtomicU64,
}

/// Owns listeners and accepted connections. Cheap to clone.
#[derive(Clone)]
pub struct Reactor {
    shared: Arc<ReactorShared>,
}

impl Reactor {
    pub fn new(pool: BufferPool) -> Self {
        Self {
            shared: Arc::new(ReactorShared {
                pool,
                connections: DashMap::new(),
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn pool(&self) -> &BufferPool {
        &self.shared.pool
    }

    /// Open a TCP listener and start accepting. Returns the actually-bound
    /// address (relevant when the requested port is 0).
    pub async fn bind(
        &self,
        addr: SocketAddr,
        factory: HandlerFactory,
    ) -> std::io::Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        let task = tokio::spawn(accept_loop(self.clone(), listener, factory));
        self.lock_listeners().push(task);
        tracing::info!(%local, "listening");
        Ok(local)
    }

    /// Close all listeners and all accepted connections.
    pub fn close_all(&self) {
        for task in self.lock_listeners().drain(..) {
            task.abort();
        }
        for entry in self.shared.connections.iter() {
            entry.value().close();
        }
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        match self.shared.listeners.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn register(&self, conn: Conn) {
        self.shared.connections.insert(conn.id(), conn);
    }

    fn deregister(&self, id: ConnId) {
        self.shared.connections.remove(&id);
    }
}

async fn accept_loop(reactor: Reactor, listener: TcpListener, factory: HandlerFactory) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let local = match stream.local_addr() {
                    Ok(local) => local,
                    Err(err) => {
                        tracing::warn!(%peer, "accepted socket unusable: {err}");
                        continue;
                    }
                };
                match factory(local, peer) {
                    Some(handler) => spawn_connection(&reactor, stream, handler, local, peer),
                    None => {
                        tracing::debug!(%peer, "connection refused");
                        drop(stream);
                    }
                }
            }
            Err(err) => {
                // Aborting the accept task swallows shutdown-time errors;
                // anything surfacing here happened while live. Back off so a
                // persistent failure (fd exhaustion) cannot spin the loop.
                tracing::warn!("accept error: {err}");
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
}

fn spawn_connection(
    reactor: &Reactor,
    stream: TcpStream,
    handler: Box<dyn Handler>,
    local: SocketAddr,
    peer: SocketAddr,
) {
    let id = reactor.shared.next_id.fetch_add(1, Ordering::Relaxed);
    let (ctrl, mailbox) = mpsc::unbounded_channel();
    let conn = Conn {
        shared: Arc::new(ConnShared {
            id,
            local,
            peer,
            ctrl,
        }),
    };
    reactor.register(conn.clone());
    tracing::debug!(conn = id, %peer, "connection accepted");
    tokio::spawn(run_connection(reactor.clone(), stream, handler, mailbox, conn));
}

async fn run_connection(
    reactor: Reactor,
    stream: TcpStream,
    mut handler: Box<dyn Handler>,
    mut mailbox: mpsc::UnboundedReceiver<ConnCommand>,
    conn: Conn,
) {
    let (mut rd, mut wr) = stream.into_split();
    let mut feed = reactor.pool().take(RECV_CHUNK_LEN);
    feed.resize(RECV_CHUNK_LEN, 0);
    let mut armed = false;

    handler.on_connected(&conn).await;

    loop {
        tokio::select! {
            cmd = mailbox.recv() => match cmd {
                Some(ConnCommand::Receive) => armed = true,
                Some(ConnCommand::SendAll(buf)) => {
                    if let Err(err) = wr.write_all(&buf).await {
                        tracing::debug!(conn = conn.id(), "send failed: {err}");
                        break;
                    }
                    drop(buf);
                    handler.on_send(&conn).await;
                }
                Some(ConnCommand::Swap(replacement)) => {
                    handler = replacement;
                    handler.on_connected(&conn).await;
                }
                Some(ConnCommand::Close) | None => break,
            },
            read = rd.read(&mut feed[..]), if armed => {
                armed = false;
                match read {
                    Ok(0) => {
                        tracing::debug!(conn = conn.id(), "peer closed");
                        break;
                    }
                    Ok(n) => handler.on_receive(&conn, &mut feed[..n]).await,
                    Err(err) => {
                        tracing::debug!(conn = conn.id(), "receive failed: {err}");
                        break;
                    }
                }
            }
        }
    }

    reactor.deregister(conn.id());
    tracing::debug!(conn = conn.id(), "connection closed");
    handler.on_close().await;
}
