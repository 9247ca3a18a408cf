use std::thread;
use tokio::sync::{mpsc, oneshot};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;
use shared::endpoint;
use shared::types::{DeviceSnapshot, Endpoint, Method};

/// Receiver of discovery results.
///
/// Called from the engine task only; implementations must not block.
pub trait Catalog: Send + Sync {
    /// A finding finished resolving and is eligible for publication
    fn publish(&self, device: &DeviceSnapshot);

    /// A previously published finding is about to be destroyed
    fn withdraw(&self, device: &DeviceSnapshot);

    /// Called once per method, when its startup scan has settled
    fn initial_scan_done(&self, method: Method);

    /// Canonical endpoint ordering, applied when a finding is finalized
    fn sort_and_dedup(&self, endpoints: Vec<Endpoint>) -> Vec<Endpoint> {
        endpoint::sort_and_dedup(endpoints)
    }
}

/// A published device as held by the catalog
#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    #[serde(flatten)]
    pub device: DeviceSnapshot,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanStatus {
    pub method: Method,
    pub initial_scan_done: bool,
}

/// Commands sent to the catalog thread
enum CatalogCommand {
    Publish(DeviceSnapshot),
    Withdraw(DeviceSnapshot),
    ScanDone(Method),
    GetAll(oneshot::Sender<Vec<CatalogEntry>>),
    GetByUuid(Uuid, oneshot::Sender<Vec<CatalogEntry>>),
    ScanStatus(oneshot::Sender<Vec<ScanStatus>>),
    Shutdown,
}

/// Published devices, keyed by (method, interface, instance name)
#[derive(Default)]
struct DeviceTable {
    entries: Vec<CatalogEntry>,
    scan_done: [bool; Method::COUNT],
}

fn same_finding(a: &DeviceSnapshot, b: &DeviceSnapshot) -> bool {
    a.method == b.method && a.interface == b.interface && a.name.eq_ignore_ascii_case(&b.name)
}

impl DeviceTable {
    fn publish(&mut self, device: DeviceSnapshot) {
        let now = Utc::now();
        match self.entries.iter_mut().find(|e| same_finding(&e.device, &device)) {
            Some(entry) => {
                entry.device = device;
                entry.last_seen = now;
            }
            None => {
                tracing::info!(
                    "Device published: {:?} ({}, {} endpoints)",
                    device.name,
                    device.method,
                    device.endpoints.len()
                );
                self.entries.push(CatalogEntry {
                    device,
                    first_seen: now,
                    last_seen: now,
                });
            }
        }
    }

    fn withdraw(&mut self, device: &DeviceSnapshot) {
        let before = self.entries.len();
        self.entries.retain(|e| !same_finding(&e.device, device));
        if self.entries.len() == before {
            tracing::warn!("Withdraw of unknown device {:?} ({})", device.name, device.method);
        } else {
            tracing::info!("Device withdrawn: {:?} ({})", device.name, device.method);
        }
    }

    fn by_uuid(&self, uuid: Uuid) -> Vec<CatalogEntry> {
        self.entries
            .iter()
            .filter(|e| e.device.uuid == uuid)
            .cloned()
            .collect()
    }

    fn scan_status(&self) -> Vec<ScanStatus> {
        Method::ALL
            .iter()
            .map(|&method| ScanStatus {
                method,
                initial_scan_done: self.scan_done[method.index()],
            })
            .collect()
    }
}

/// Handle to the in-process device catalog
#[derive(Clone)]
pub struct CatalogHandle {
    tx: mpsc::UnboundedSender<CatalogCommand>,
}

impl CatalogHandle {
    /// Spawn the catalog thread
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<CatalogCommand>();

        thread::spawn(move || {
            let mut table = DeviceTable::default();

            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    CatalogCommand::Publish(device) => table.publish(device),
                    CatalogCommand::Withdraw(device) => table.withdraw(&device),
                    CatalogCommand::ScanDone(method) => {
                        tracing::info!("Initial scan done for {}", method);
                        table.scan_done[method.index()] = true;
                    }
                    CatalogCommand::GetAll(reply) => {
                        let _ = reply.send(table.entries.clone());
                    }
                    CatalogCommand::GetByUuid(uuid, reply) => {
                        let _ = reply.send(table.by_uuid(uuid));
                    }
                    CatalogCommand::ScanStatus(reply) => {
                        let _ = reply.send(table.scan_status());
                    }
                    CatalogCommand::Shutdown => {
                        tracing::info!("Catalog thread shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    fn post(&self, cmd: CatalogCommand) {
        if self.tx.send(cmd).is_err() {
            tracing::error!("Catalog thread is gone");
        }
    }

    /// Get all published devices
    pub async fn devices(&self) -> Result<Vec<CatalogEntry>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(CatalogCommand::GetAll(reply))?;
        Ok(rx.await?)
    }

    /// Get every published finding carrying `uuid`
    pub async fn devices_by_uuid(&self, uuid: Uuid) -> Result<Vec<CatalogEntry>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(CatalogCommand::GetByUuid(uuid, reply))?;
        Ok(rx.await?)
    }

    pub async fn scan_status(&self) -> Result<Vec<ScanStatus>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(CatalogCommand::ScanStatus(reply))?;
        Ok(rx.await?)
    }

    /// Shutdown the catalog thread
    pub fn shutdown(&self) -> Result<()> {
        self.tx.send(CatalogCommand::Shutdown)?;
        Ok(())
    }
}

impl Catalog for CatalogHandle {
    fn publish(&self, device: &DeviceSnapshot) {
        self.post(CatalogCommand::Publish(device.clone()));
    }

    fn withdraw(&self, device: &DeviceSnapshot) {
        self.post(CatalogCommand::Withdraw(device.clone()));
    }

    fn initial_scan_done(&self, method: Method) {
        self.post(CatalogCommand::ScanDone(method));
    }
}
