//! tabmux broker binary.
//!
//! `tabmux CLIENT-PORT UPSTREAM-PORT` — tabserver clients connect to the
//! first port, the WebSocket upstream to the second. Ctrl-C shuts the broker
//! down gracefully.

use std::process::ExitCode;

use tracing_subscriber::{fmt, EnvFilter};

use tabmux_broker::{Broker, BrokerConfig};

fn parse_args() -> Option<BrokerConfig> {
    let mut args = std::env::args().skip(1);
    let client = args.next()?.parse::<u16>().ok()?;
    let upstream = args.next()?.parse::<u16>().ok()?;
    if args.next().is_some() {
        return None;
    }
    BrokerConfig::from_ports(client, upstream).ok()
}

#[tokio::main]
async fn main() -> ExitCode {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let Some(cfg) = parse_args() else {
        eprintln!("usage: tabmux CLIENT-PORT UPSTREAM-PORT");
        return ExitCode::from(1);
    };

    let handle = match Broker::bind(cfg).await {
        Ok(handle) => handle,
        Err(err) => {
            tracing::error!("broker failed to start: {err}");
            return ExitCode::from(1);
        }
    };
    tracing::info!(
        clients = %handle.client_addr,
        upstream = %handle.upstream_addr,
        "tabmux broker up"
    );

    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("signal handler failed: {err}");
    }
    tracing::info!("shutting down");
    handle.stop().await;
    ExitCode::SUCCESS
}
