use std::time::Duration;
use tokio::time::Instant;
use shared::types::Method;
use crate::transport::{
    Envelope, EventSink, ResolveOp, ResolveRequest, Transport, TransportClient, TransportError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPhase {
    Stopped,
    /// Client created, waiting for it to become ready
    Starting,
    /// Browse sessions are up
    Running,
    /// Torn down, waiting for the restart deadline
    Restarting,
}

/// Owns the transport client, its browse sessions and the restart timer.
pub struct ClientManager {
    transport: Box<dyn Transport>,
    client: Option<Box<dyn TransportClient>>,
    events: flume::Sender<Envelope>,
    /// Bumped on every connect and teardown; events from other generations are stale
    generation: u64,
    phase: ClientPhase,
    restart_at: Option<Instant>,
    backoff: Duration,
}

impl ClientManager {
    pub fn new(
        transport: Box<dyn Transport>,
        events: flume::Sender<Envelope>,
        backoff: Duration,
    ) -> Self {
        Self {
            transport,
            client: None,
            events,
            generation: 0,
            phase: ClientPhase::Stopped,
            restart_at: None,
            backoff,
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> ClientPhase {
        self.phase
    }

    pub fn is_browsing(&self) -> bool {
        self.phase == ClientPhase::Running
    }

    /// Whether an event from `generation` belongs to the live client
    pub fn is_current(&self, generation: u64) -> bool {
        self.client.is_some() && generation == self.generation
    }

    pub fn connect(&mut self) -> Result<(), TransportError> {
        self.restart_at = None;
        self.generation += 1;

        let sink = EventSink::new(self.generation, self.events.clone());
        let client = self.transport.connect(sink)?;

        tracing::info!("Discovery client created (generation {})", self.generation);
        self.client = Some(client);
        self.phase = ClientPhase::Starting;
        Ok(())
    }

    /// Start one browse session per method
    pub fn start_browsing(&mut self) -> Result<(), TransportError> {
        let Some(client) = self.client.as_mut() else {
            return Err(TransportError::Client("no discovery client".to_string()));
        };

        for method in Method::ALL {
            client.browse(method)?;
            tracing::debug!("Browsing for {}", method.service_type());
        }

        self.phase = ClientPhase::Running;
        Ok(())
    }

    pub fn resolve(
        &mut self,
        op: ResolveOp,
        request: ResolveRequest,
    ) -> Result<(), TransportError> {
        match self.client.as_mut() {
            Some(client) => client.resolve(op, request),
            None => Err(TransportError::Resolve {
                method: request.method,
                name: request.name,
                reason: "no discovery client".to_string(),
            }),
        }
    }

    /// Mark browse sessions as stopped. The caller flushes findings next.
    pub fn stop_browsing(&mut self) {
        if self.phase == ClientPhase::Running {
            self.phase = ClientPhase::Starting;
        }
    }

    /// Shut down and drop the client
    pub fn disconnect(&mut self) {
        if let Some(mut client) = self.client.take() {
            client.shutdown();
            tracing::info!("Discovery client stopped (generation {})", self.generation);
        }
        self.generation += 1;
        self.phase = ClientPhase::Stopped;
    }

    /// Arm the restart timer, replacing any pending deadline
    pub fn arm_restart(&mut self) {
        let deadline = Instant::now() + self.backoff;
        if self.restart_at.replace(deadline).is_some() {
            tracing::debug!("Restart timer re-armed");
        }
        self.phase = ClientPhase::Restarting;
    }

    pub fn cancel_restart(&mut self) {
        self.restart_at = None;
    }

    pub fn restart_deadline(&self) -> Option<Instant> {
        self.restart_at
    }
}
