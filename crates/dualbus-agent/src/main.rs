//! # dualbus Agent
//!
//! Verifies that every message published during a dual-write migration
//! reaches both the legacy ZeroMQ bus and the AMQP broker.
//!
//! ## Architecture
//!
//! The agent runs three independent units:
//! 1. **AMQP ingest**: consumes the configured queues into the AMQP store
//! 2. **ZeroMQ ingest**: subscribes to the legacy publishers into the ZeroMQ store
//! 3. **Comparator**: removes messages seen on both transports and reports
//!    the ones that stayed on one transport past the match window

use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod supervisor;

pub use config::AgentConfig;
pub use supervisor::Supervisor;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting dualbus agent"
    );

    // Load configuration
    let config = AgentConfig::from_env()?;

    tracing::info!(
        amqp_bindings = config.amqp.bindings.len(),
        zmq_endpoints = config.zmq.endpoints.len(),
        match_window_secs = config.comparator.match_window.as_secs(),
        "Configuration loaded"
    );

    // Run until Ctrl+C / SIGTERM
    Supervisor::from_config(config)
        .run_until(supervisor::shutdown_signal())
        .await?;

    tracing::info!("dualbus agent stopped");
    Ok(())
}
