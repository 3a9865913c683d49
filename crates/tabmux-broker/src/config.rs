//! Broker configuration.

use std::net::{Ipv4Addr, SocketAddr};

use tabmux_core::{Result, TabmuxError};

/// Events buffered between the reactor and the dispatcher.
const DEFAULT_EVENT_QUEUE_DEPTH: usize = 1024;

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Listener for tabserver line-protocol clients.
    pub client_listen: SocketAddr,
    /// Listener for the single WebSocket upstream.
    pub upstream_listen: SocketAddr,
    pub event_queue_depth: usize,
}

impl BrokerConfig {
    /// Build a config from the CLI's two positional ports, enforcing the
    /// invocation contract: both ports positive and distinct.
    pub fn from_ports(client_port: u16, upstream_port: u16) -> Result<Self> {
        if client_port == 0 || upstream_port == 0 {
            return Err(TabmuxError::Config("ports must be positive".into()));
        }
        if client_port == upstream_port {
            return Err(TabmuxError::Config("ports must be distinct".into()));
        }
        Ok(Self {
            client_listen: (Ipv4Addr::UNSPECIFIED, client_port).into(),
            upstream_listen: (Ipv4Addr::UNSPECIFIED, upstream_port).into(),
            event_queue_depth: DEFAULT_EVENT_QUEUE_DEPTH,
        })
    }

    /// Addresses chosen by tests (port 0) skip `from_ports`; the queue depth
    /// still has to make sense.
    pub fn validate(&self) -> Result<()> {
        if self.event_queue_depth == 0 {
            return Err(TabmuxError::Config("event_queue_depth must be positive".into()));
        }
        Ok(())
    }

    /// Both listeners on ephemeral ports, for tests.
    pub fn ephemeral() -> Self {
        Self {
            client_listen: (Ipv4Addr::LOCALHOST, 0).into(),
            upstream_listen: (Ipv4Addr::LOCALHOST, 0).into(),
            event_queue_depth: DEFAULT_EVENT_QUEUE_DEPTH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_positive_ports_required() {
        assert!(BrokerConfig::from_ports(0, 9000).is_err());
        assert!(BrokerConfig::from_ports(9000, 0).is_err());
        assert!(BrokerConfig::from_ports(9000, 9000).is_err());
        let cfg = BrokerConfig::from_ports(8100, 8200).expect("valid ports");
        assert_eq!(cfg.client_listen.port(), 8100);
        assert_eq!(cfg.upstream_listen.port(), 8200);
        cfg.validate().expect("default config validates");
    }
}
