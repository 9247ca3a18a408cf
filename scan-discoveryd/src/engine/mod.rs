//! Discovery engine: turns browse and resolve events into published devices.
//!
//! All state lives in one [`Engine`] value driven from a single task (see
//! [`handle::run`]). Transport callbacks arrive as [`Envelope`]s on a flume
//! channel; queries from elsewhere go through [`EngineHandle`].

pub mod client;
pub mod gate;
pub mod handle;
mod handler;
pub mod registry;
pub mod tracker;


use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use shared::types::{AddrFamily, Method};
use crate::catalog::Catalog;
use crate::transport::{Envelope, ResolveOp, Transport, TransportError};
use self::client::ClientManager;
use self::gate::InitialScanGate;
use self::registry::{FindingId, FindingInfo, Registry};

pub use self::handle::EngineHandle;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// When false, no transport client is ever created
    pub enabled: bool,
    /// Address families resolved for every new finding
    pub families: Vec<AddrFamily>,
    pub restart_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            families: vec![AddrFamily::Ipv4, AddrFamily::Ipv6],
            restart_backoff: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Failed to start discovery: {0}")]
    Startup(#[from] TransportError),
}

pub struct Engine {
    config: EngineConfig,
    catalog: Arc<dyn Catalog>,
    registry: Registry,
    gate: InitialScanGate,
    client: ClientManager,
    /// Outstanding resolve operations and the finding each belongs to
    resolvers: HashMap<ResolveOp, FindingId>,
    next_op: u64,
}

impl Engine {
    /// Create an engine. Transport events for it arrive on the returned receiver.
    pub fn new(
        config: EngineConfig,
        transport: Box<dyn Transport>,
        catalog: Arc<dyn Catalog>,
    ) -> (Self, flume::Receiver<Envelope>) {
        let (events_tx, events_rx) = flume::unbounded();
        let client = ClientManager::new(transport, events_tx, config.restart_backoff);

        let engine = Self {
            config,
            catalog,
            registry: Registry::new(),
            gate: InitialScanGate::new(),
            client,
            resolvers: HashMap::new(),
            next_op: 0,
        };
        (engine, events_rx)
    }

    /// Create the transport client. Browsing begins once the client reports ready.
    ///
    /// With discovery disabled, every method's initial scan completes at once.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if !self.config.enabled {
            tracing::info!("Discovery disabled, skipping transport startup");
            for method in self.gate.finish_all() {
                self.catalog.initial_scan_done(method);
            }
            return Ok(());
        }

        tracing::info!("Starting discovery engine");
        self.client.connect()?;
        Ok(())
    }

    /// Tear everything down: findings (withdrawing published ones), browse
    /// sessions, the client and any pending restart.
    pub fn stop(&mut self) {
        tracing::info!("Stopping discovery engine");
        self.client.stop_browsing();
        self.flush_findings(false);
        self.client.disconnect();
        self.client.cancel_restart();
    }

    pub fn restart_deadline(&self) -> Option<Instant> {
        self.client.restart_deadline()
    }

    #[cfg(test)]
    pub fn client_phase(&self) -> client::ClientPhase {
        self.client.phase()
    }

    /// The restart deadline passed: try to create the client again
    pub fn on_restart_timer(&mut self) {
        self.client.cancel_restart();
        tracing::info!("Restarting discovery client");

        if let Err(e) = self.client.connect() {
            tracing::warn!("{}", e);
            self.client.arm_restart();
        }
    }

    pub fn findings(&self) -> Vec<FindingInfo> {
        self.registry.iter().map(|f| f.info()).collect()
    }

    /// Methods whose initial scan has not completed yet
    pub fn initial_scan_pending(&self) -> Vec<Method> {
        Method::ALL
            .iter()
            .copied()
            .filter(|&method| !self.gate.is_done(method))
            .collect()
    }

    fn next_op(&mut self) -> ResolveOp {
        self.next_op += 1;
        ResolveOp(self.next_op)
    }
}
