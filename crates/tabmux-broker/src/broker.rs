//! Broker assembly: wires the listeners, factories and dispatcher together.
//! Consumed by the binary and by the integration tests.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tabmux_core::buffer::BufferPool;
use tabmux_core::Result;

use crate::config::BrokerConfig;
use crate::dispatch::{Dispatcher, Event, EventSender, UpstreamGate};
use crate::reactor::{Handler, HandlerFactory, Reactor};
use crate::transport::client::ClientHandler;
use crate::transport::handshake::HandshakeHandler;

pub struct Broker;

impl Broker {
    /// Bind both listeners and start the dispatcher.
    ///
    /// The upstream listener admits one connection while no upstream exists
    /// and attaches the HTTP handshake handler to it; the client listener
    /// admits connections only while the upstream is established. Everything
    /// else is refused at accept time.
    pub async fn bind(cfg: BrokerConfig) -> Result<BrokerHandle> {
        cfg.validate()?;

        let pool = BufferPool::new();
        let reactor = Reactor::new(pool.clone());
        let gate = Arc::new(UpstreamGate::new());
        let (events, mailbox) = mpsc::channel(cfg.event_queue_depth);

        let upstream_factory: HandlerFactory = {
            let pool = pool.clone();
            let events = events.clone();
            let gate = Arc::clone(&gate);
            Arc::new(move |_local, peer| {
                if !gate.try_begin_handshake() {
                    tracing::debug!(%peer, "refusing upstream: one already present");
                    return None;
                }
                Some(Box::new(HandshakeHandler::new(pool.clone(), events.clone())) as Box<dyn Handler>)
            })
        };

        let client_factory: HandlerFactory = {
            let pool = pool.clone();
            let events = events.clone();
            let gate = Arc::clone(&gate);
            Arc::new(move |_local, peer| {
                if !gate.is_connected() {
                    tracing::debug!(%peer, "refusing client: no upstream");
                    return None;
                }
                Some(Box::new(ClientHandler::new(pool.clone(), events.clone())) as Box<dyn Handler>)
            })
        };

        let upstream_addr = reactor.bind(cfg.upstream_listen, upstream_factory).await?;
        let client_addr = reactor.bind(cfg.client_listen, client_factory).await?;

        let dispatcher = Dispatcher::new(pool, gate, mailbox);
        let dispatcher_task = tokio::spawn(dispatcher.run());

        Ok(BrokerHandle {
            client_addr,
            upstream_addr,
            events,
            reactor,
            dispatcher_task,
        })
    }
}

/// A running broker.
pub struct BrokerHandle {
    pub client_addr: SocketAddr,
    pub upstream_addr: SocketAddr,
    events: EventSender,
    reactor: Reactor,
    dispatcher_task: JoinHandle<()>,
}

impl BrokerHandle {
    pub fn events(&self) -> EventSender {
        self.events.clone()
    }

    /// Post `Stop`, wait for the dispatcher to drain, then drop listeners
    /// and any connection the dispatcher did not know about.
    pub async fn stop(self) {
        let _ = self.events.send(Event::Stop).await;
        if let Err(err) = self.dispatcher_task.await {
            tracing::warn!("dispatcher task failed: {err}");
        }
        self.reactor.close_all();
    }
}
