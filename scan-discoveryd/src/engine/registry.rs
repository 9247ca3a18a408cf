use std::fmt;
use std::net::IpAddr;
use serde::Serialize;
use uuid::Uuid;
use shared::addrset::AddrSet;
use shared::identity::synthesize_uuid;
use shared::types::{DeviceSnapshot, Endpoint, Method};
use crate::catalog::Catalog;
use super::gate::InitialScanGate;
use super::tracker::PendingResolutions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FindingId(u64);

impl fmt::Display for FindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "finding#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingState {
    /// Resolve operations outstanding
    Discovering,
    /// Finalized and handed to the catalog
    Published,
    /// Finalized, not eligible for publication
    Unpublished,
}

/// One service instance, on one interface, for one discovery method
#[derive(Debug)]
pub struct Finding {
    pub id: FindingId,
    pub method: Method,
    pub interface: u32,
    pub name: String,
    pub model: Option<String>,
    pub uuid: Option<Uuid>,
    pub addrs: AddrSet,
    pub endpoints: Vec<Endpoint>,
    pub should_publish: bool,
    /// Counted toward the method's initial scan, not yet released
    pub initscan: bool,
    pub state: FindingState,
    pub pending: PendingResolutions,
}

impl Finding {
    fn matches(&self, method: Method, interface: u32, name: &str) -> bool {
        self.method == method && self.interface == interface && self.name.eq_ignore_ascii_case(name)
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            method: self.method,
            interface: self.interface,
            name: self.name.clone(),
            model: self.model.clone().unwrap_or_else(|| self.name.clone()),
            uuid: self.uuid.unwrap_or_else(|| synthesize_uuid(&self.name)),
            addresses: self.addrs.to_vec(),
            endpoints: self.endpoints.clone(),
        }
    }

    pub fn info(&self) -> FindingInfo {
        FindingInfo {
            method: self.method,
            interface: self.interface,
            name: self.name.clone(),
            state: self.state,
            model: self.model.clone(),
            uuid: self.uuid,
            addresses: self.addrs.to_vec(),
            endpoints: self.endpoints.iter().map(|ep| ep.uri.to_string()).collect(),
            pending_resolves: self.pending.len(),
        }
    }
}

/// Read-only view of a live finding, for queries from outside the engine
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FindingInfo {
    pub method: Method,
    pub interface: u32,
    pub name: String,
    pub state: FindingState,
    pub model: Option<String>,
    pub uuid: Option<Uuid>,
    pub addresses: Vec<IpAddr>,
    pub endpoints: Vec<String>,
    pub pending_resolves: usize,
}

/// Live findings. At most one per (method, interface, case-insensitive name).
#[derive(Debug, Default)]
pub struct Registry {
    findings: Vec<Finding>,
    next_id: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, method: Method, interface: u32, name: &str) -> Option<&Finding> {
        self.findings.iter().find(|f| f.matches(method, interface, name))
    }

    /// Return the existing finding for this key, or register a new one.
    /// A new finding is attributed to the initial scan if its method is still
    /// scanning.
    pub fn get_or_create(
        &mut self,
        method: Method,
        interface: u32,
        name: &str,
        gate: &mut InitialScanGate,
    ) -> &mut Finding {
        if let Some(pos) = self.findings.iter().position(|f| f.matches(method, interface, name)) {
            return &mut self.findings[pos];
        }

        let id = FindingId(self.next_id);
        self.next_id += 1;

        self.findings.push(Finding {
            id,
            method,
            interface,
            name: name.to_string(),
            model: None,
            uuid: None,
            addrs: AddrSet::new(),
            endpoints: Vec::new(),
            should_publish: false,
            initscan: gate.attach(method),
            state: FindingState::Discovering,
            pending: PendingResolutions::default(),
        });

        let last = self.findings.len() - 1;
        &mut self.findings[last]
    }

    pub fn get_mut(&mut self, id: FindingId) -> Option<&mut Finding> {
        self.findings.iter_mut().find(|f| f.id == id)
    }

    /// Remove a finding, withdrawing it from the catalog first if it was
    /// published. Returns the removed finding.
    pub fn delete(&mut self, id: FindingId, catalog: &dyn Catalog) -> Option<Finding> {
        let pos = self.findings.iter().position(|f| f.id == id)?;
        if self.findings[pos].state == FindingState::Published {
            catalog.withdraw(&self.findings[pos].snapshot());
        }
        Some(self.findings.swap_remove(pos))
    }

    /// Remove every finding, withdrawing published ones
    pub fn delete_all(&mut self, catalog: &dyn Catalog) -> Vec<Finding> {
        let findings = std::mem::take(&mut self.findings);
        for finding in &findings {
            if finding.state == FindingState::Published {
                catalog.withdraw(&finding.snapshot());
            }
        }
        findings
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.findings.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Withdrawals(Mutex<Vec<String>>);

    impl Catalog for Withdrawals {
        fn publish(&self, _device: &DeviceSnapshot) {}

        fn withdraw(&self, device: &DeviceSnapshot) {
            self.0.lock().unwrap().push(device.name.clone());
        }

        fn initial_scan_done(&self, _method: Method) {}
    }

    #[test]
    fn test_get_or_create_is_case_insensitive() {
        let mut registry = Registry::new();
        let mut gate = InitialScanGate::new();

        let a = registry.get_or_create(Method::Uscan, 2, "Scanner", &mut gate).id;
        let b = registry.get_or_create(Method::Uscan, 2, "SCANNER", &mut gate).id;
        assert_eq!(a, b);
        assert_eq!(registry.len(), 1);
        assert_eq!(
            gate.pending_count(Method::Uscan),
            2,
            "Only the first call attaches to the scan"
        );

        // Different interface or method is a different finding
        registry.get_or_create(Method::Uscan, 3, "Scanner", &mut gate);
        registry.get_or_create(Method::Uscans, 2, "Scanner", &mut gate);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_initscan_flag_follows_gate() {
        let mut registry = Registry::new();
        let mut gate = InitialScanGate::new();
        gate.all_for_now(Method::IppPrinter);

        let early = registry.get_or_create(Method::Uscan, 1, "A", &mut gate);
        assert!(early.initscan);
        let late = registry.get_or_create(Method::IppPrinter, 1, "B", &mut gate);
        assert!(!late.initscan);
    }

    #[test]
    fn test_delete_withdraws_only_published() {
        let mut registry = Registry::new();
        let mut gate = InitialScanGate::new();
        let catalog = Withdrawals::default();

        let published = registry.get_or_create(Method::Uscan, 1, "Published", &mut gate);
        published.state = FindingState::Published;
        let published = published.id;

        let discovering = registry.get_or_create(Method::Uscan, 1, "Discovering", &mut gate);
        discovering.should_publish = true;
        let discovering = discovering.id;

        registry.delete(discovering, &catalog).unwrap();
        assert!(catalog.0.lock().unwrap().is_empty());

        registry.delete(published, &catalog).unwrap();
        assert_eq!(*catalog.0.lock().unwrap(), vec!["Published".to_string()]);
        assert!(registry.is_empty());
        assert!(registry.delete(published, &catalog).is_none());
    }

    #[test]
    fn test_delete_all_empties_registry() {
        let mut registry = Registry::new();
        let mut gate = InitialScanGate::new();
        let catalog = Withdrawals::default();

        for name in ["A", "B", "C"] {
            let f = registry.get_or_create(Method::Uscan, 1, name, &mut gate);
            f.state = FindingState::Published;
        }
        registry.get_or_create(Method::Uscan, 1, "D", &mut gate);

        let removed = registry.delete_all(&catalog);
        assert_eq!(removed.len(), 4);
        assert_eq!(catalog.0.lock().unwrap().len(), 3);
        assert!(registry.is_empty());
    }
}
