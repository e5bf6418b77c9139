//! cellbook server - binary entry point.
//!
//! ```text
//! main() -> EngineConfig::load() -> Hub + ProcessSupervisor + SessionCoordinator
//!                                        |
//!                                        v
//!                          GET /ws  (until Ctrl-C) -> coordinator.shutdown()
//! ```

mod sessions;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use cellbook_channel::{Hub, TopicSpec};
use cellbook_config::EngineConfig;
use cellbook_engine::SessionCoordinator;
use cellbook_process::{ProcessConfig, ProcessSupervisor};

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = EngineConfig::load().context("loading configuration")?;

    let (hub, coordinator) = build(&config)?;

    for session_config in &config.sessions {
        let session = sessions::discover(session_config)
            .with_context(|| format!("loading session {}", session_config.id))?;
        let cells = session.cells().len();
        coordinator
            .open_session(session)
            .await
            .with_context(|| format!("opening session {}", session_config.id))?;
        tracing::info!(session = %session_config.id, dir = %session_config.dir.display(), cells, "session ready");
    }
    if config.sessions.is_empty() {
        tracing::warn!("no sessions configured; clients will have nothing to subscribe to");
    }

    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("binding {}", config.server.bind))?;
    tracing::info!(addr = %listener.local_addr()?, "listening on /ws");

    let app = cellbook_channel::router(Arc::clone(&hub), coordinator.clone());
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    coordinator.shutdown().await;
    tracing::info!("shut down");
    served.context("serving channel")
}

/// The channel hub and the coordinator driving it, sized from `config`.
fn build(config: &EngineConfig) -> Result<(Arc<Hub>, Arc<SessionCoordinator>)> {
    let spec = TopicSpec::session().context("compiling channel schemas")?;
    let hub = Arc::new(Hub::new(spec, &config.channel));
    let coordinator = Arc::new(SessionCoordinator::new(
        Arc::clone(&hub),
        Arc::new(supervisor(&config.process)),
        config.process.clone(),
        config.lsp.clone(),
    ));
    Ok((hub, coordinator))
}

fn supervisor(process: &ProcessConfig) -> ProcessSupervisor {
    ProcessSupervisor::new(process.output_capacity)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Ctrl-C received, shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supervisor_buffers_the_configured_output() {
        let config = EngineConfig::parse("[process]\noutput_capacity = 7\n").unwrap();
        assert_eq!(supervisor(&config.process).output_capacity(), 7);
        let defaults = EngineConfig::default();
        assert_eq!(
            supervisor(&defaults.process).output_capacity(),
            defaults.process.output_capacity
        );
    }

    #[tokio::test]
    async fn build_accepts_the_default_config() {
        let (_hub, coordinator) = build(&EngineConfig::default()).unwrap();
        assert!(coordinator.session_ids().is_empty());
    }
}
