use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use anyhow::Result;
use shared::types::Method;
use crate::transport::Envelope;
use super::registry::FindingInfo;
use super::Engine;

/// Queries handed into the engine task
pub enum EngineCommand {
    Findings(oneshot::Sender<Vec<FindingInfo>>),
    ScanPending(oneshot::Sender<Vec<Method>>),
}

/// Handle to a running engine task
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    /// Move a started engine onto its own task. Cancelling `cancel` stops the
    /// engine and ends the task.
    pub fn spawn(
        engine: Engine,
        events: flume::Receiver<Envelope>,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(32);
        let task = tokio::spawn(run(engine, events, rx, cancel));
        (Self { tx }, task)
    }

    /// Snapshot of every live finding
    pub async fn findings(&self) -> Result<Vec<FindingInfo>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(EngineCommand::Findings(reply)).await?;
        Ok(rx.await?)
    }

    /// Methods still in their initial scan
    pub async fn initial_scan_pending(&self) -> Result<Vec<Method>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(EngineCommand::ScanPending(reply)).await?;
        Ok(rx.await?)
    }
}

/// Engine event loop: transport events, queries and the restart timer, one at a time
pub async fn run(
    mut engine: Engine,
    events: flume::Receiver<Envelope>,
    mut commands: mpsc::Receiver<EngineCommand>,
    cancel: CancellationToken,
) {
    loop {
        let deadline = engine.restart_deadline();

        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                tracing::info!("Discovery engine shutting down");
                break;
            }

            Ok(envelope) = events.recv_async() => {
                engine.handle(envelope);
            }

            () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                engine.on_restart_timer();
            }

            Some(cmd) = commands.recv() => {
                match cmd {
                    EngineCommand::Findings(reply) => {
                        let _ = reply.send(engine.findings());
                    }
                    EngineCommand::ScanPending(reply) => {
                        let _ = reply.send(engine.initial_scan_pending());
                    }
                }
            }
        }
    }

    engine.stop();
}
