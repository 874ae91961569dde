//! relaystats relay smoke binary.
//!
//! Loads the config (argv[1], default `relaystats.yaml`), forwards one
//! `ping` per configured service through a loopback upstream, and logs the
//! resulting metrics.

use std::sync::Arc;

use bytes::Bytes;
use tracing_subscriber::{fmt, EnvFilter};

use relaystats_relay::{app_state::RelayState, config, forward::LoopbackUpstream};

#[tokio::main]
async fn main() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "relaystats.yaml".into());
    let cfg = match config::load_from_file(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(%path, error = %e, "config load failed");
            std::process::exit(1);
        }
    };

    let state = match RelayState::new(cfg, Arc::new(LoopbackUpstream::new())) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "relay startup failed");
            std::process::exit(1);
        }
    };

    tracing::info!(
        relay = %state.cfg().relay.name,
        services = ?state.relay().registered_services(),
        "relaystats relay starting"
    );

    let services: Vec<String> = state.cfg().services.iter().map(|s| s.name.clone()).collect();
    for svc in services {
        let frame = state.frame(&svc, "ping");
        match state.relay().forward(&frame, Bytes::from_static(b"ping")).await {
            Ok(_) => tracing::info!(edge = %frame.edge_key(), "ping ok"),
            Err(e) => tracing::warn!(edge = %frame.edge_key(), error = %e, "ping failed"),
        }
    }

    match state.render_metrics() {
        Some(text) => tracing::info!("metrics:\n{text}"),
        None => tracing::info!("stats disabled; no metrics to render"),
    }
}
