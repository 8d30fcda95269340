//! Unit supervision and ordered shutdown.

use crate::config::AgentConfig;
use anyhow::{bail, Result};
use dualbus_adapter_amqp::AmqpIngestSource;
use dualbus_adapter_zmq::ZmqIngestSource;
use dualbus_core::{Comparator, MessageStore, Transport};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// How an ingest unit ended.
#[derive(Debug)]
struct UnitExit {
    name: &'static str,
    failed: bool,
}

/// Runs the ingest units and the comparator as independent tasks.
///
/// Ingest units stop first on shutdown so that nothing new reaches the
/// stores, then the comparator.
pub struct Supervisor {
    ingest: JoinSet<UnitExit>,
    comparator: Option<JoinHandle<()>>,
    ingest_token: CancellationToken,
    comparator_token: CancellationToken,
    grace: Duration,
}

impl Supervisor {
    /// Create a supervisor with no units.
    pub fn new(grace: Duration) -> Self {
        Self {
            ingest: JoinSet::new(),
            comparator: None,
            ingest_token: CancellationToken::new(),
            comparator_token: CancellationToken::new(),
            grace,
        }
    }

    /// Build both stores, both ingest sources and the comparator.
    pub fn from_config(config: AgentConfig) -> Self {
        let amqp_store = MessageStore::new(Transport::Amqp);
        let zmq_store = MessageStore::new(Transport::Zmq);

        let mut supervisor = Self::new(config.shutdown_grace);

        let amqp = AmqpIngestSource::new(config.amqp, amqp_store.clone());
        supervisor.spawn_ingest("amqp", |token| amqp.run(token));

        let zmq = ZmqIngestSource::new(config.zmq, zmq_store.clone());
        supervisor.spawn_ingest("zmq", |token| zmq.run(token));

        supervisor.spawn_comparator(Comparator::new(amqp_store, zmq_store, config.comparator));
        supervisor
    }

    /// Start an ingest unit. A failure is logged and leaves the other
    /// units running.
    pub fn spawn_ingest<F, Fut, E>(&mut self, name: &'static str, unit: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display,
    {
        let run = unit(self.ingest_token.clone());
        self.ingest.spawn(async move {
            match run.await {
                Ok(()) => {
                    tracing::info!(unit = name, "Ingest unit stopped");
                    UnitExit { name, failed: false }
                }
                Err(e) => {
                    tracing::error!(unit = name, error = %e, "Ingest unit failed");
                    UnitExit { name, failed: true }
                }
            }
        });
    }

    /// Start the comparator.
    pub fn spawn_comparator(&mut self, comparator: Comparator) {
        let token = self.comparator_token.clone();
        self.comparator = Some(tokio::spawn(async move { comparator.run(token).await }));
    }

    /// Run until `signal` resolves or every ingest unit has ended.
    ///
    /// # Errors
    ///
    /// Returns error if every ingest unit ended without being asked to and
    /// at least one of them failed.
    pub async fn run_until(mut self, signal: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(signal);
        let mut failed = Vec::new();

        while !self.ingest.is_empty() {
            tokio::select! {
                () = &mut signal => {
                    tracing::info!("Shutdown requested");
                    self.shutdown().await;
                    return Ok(());
                }
                Some(joined) = self.ingest.join_next() => {
                    match joined {
                        Ok(exit) if exit.failed => failed.push(exit.name),
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!(error = %e, "Ingest task panicked");
                            failed.push("unknown");
                        }
                    }
                }
            }
        }

        tracing::warn!("Every ingest unit has ended");
        self.shutdown().await;
        if failed.is_empty() {
            Ok(())
        } else {
            bail!("ingest unit(s) failed: {}", failed.join(", "))
        }
    }

    /// Stop ingest within the grace period, then the comparator.
    async fn shutdown(&mut self) {
        self.ingest_token.cancel();
        let drained = tokio::time::timeout(self.grace, async {
            while let Some(joined) = self.ingest.join_next().await {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Ingest task panicked");
                }
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                grace_secs = self.grace.as_secs_f64(),
                remaining = self.ingest.len(),
                "Ingest units did not stop within the grace period, aborting"
            );
            self.ingest.shutdown().await;
        }

        self.comparator_token.cancel();
        if let Some(comparator) = self.comparator.take() {
            if let Err(e) = comparator.await {
                tracing::error!(error = %e, "Comparator task panicked");
            }
        }
        tracing::info!("All units stopped");
    }
}

/// Wait for Ctrl+C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
