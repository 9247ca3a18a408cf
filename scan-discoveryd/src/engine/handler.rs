use shared::endpoint::build_endpoint;
use shared::identity::{parse_device_uuid, synthesize_uuid};
use shared::protocol::{TXT_MODEL, TXT_RESOURCE_PATH, TXT_SCAN, TXT_UUID};
use shared::types::Method;
use crate::transport::{
    BrowseEvent, ClientState, Envelope, ResolveEvent, ResolveOp, ResolveRequest, Resolved,
    TransportEvent,
};
use super::registry::{Finding, FindingId, FindingState};
use super::tracker::Completion;
use super::Engine;

impl Engine {
    /// Process one transport event
    pub fn handle(&mut self, envelope: Envelope) {
        if !self.client.is_current(envelope.generation) {
            tracing::trace!("Dropping event from stale client generation {}", envelope.generation);
            return;
        }

        match envelope.event {
            TransportEvent::Client(state) => self.on_client_state(state),
            TransportEvent::Browse { method, event } => self.on_browse(method, event),
            TransportEvent::Resolve { op, event } => self.on_resolve(op, event),
        }
    }

    fn on_client_state(&mut self, state: ClientState) {
        match state {
            ClientState::Registering | ClientState::Running | ClientState::Collision => {
                if self.client.is_browsing() {
                    return;
                }
                if let Err(e) = self.client.start_browsing() {
                    tracing::warn!("{}", e);
                    self.schedule_restart();
                }
            }
            ClientState::Failure => {
                tracing::warn!("Discovery client failed");
                self.schedule_restart();
            }
            ClientState::Connecting => {
                tracing::debug!("Discovery client connecting");
            }
        }
    }

    fn on_browse(&mut self, method: Method, event: BrowseEvent) {
        match event {
            BrowseEvent::New { name, interface, family } => {
                if self.registry.find(method, interface, &name).is_some() {
                    tracing::trace!(
                        "{} {:?} on if {} already known ({})",
                        method,
                        name,
                        interface,
                        family
                    );
                    return;
                }
                tracing::debug!("{} found {:?} on if {} ({})", method, name, interface, family);
                self.begin_finding(method, interface, name);
            }
            BrowseEvent::Remove { name, interface, .. } => {
                let Some(id) = self.registry.find(method, interface, &name).map(|f| f.id) else {
                    return;
                };
                tracing::debug!("{} removed {:?} on if {}", method, name, interface);
                self.drop_finding(id);
            }
            BrowseEvent::Failure(reason) => {
                tracing::warn!("Browse for {} failed: {}", method, reason);
                self.schedule_restart();
            }
            BrowseEvent::CacheExhausted => {
                tracing::trace!("{} cache exhausted", method);
            }
            BrowseEvent::AllForNow => {
                tracing::debug!("{} all for now", method);
                if self.gate.all_for_now(method) {
                    self.catalog.initial_scan_done(method);
                }
            }
        }
    }

    /// Register a new finding and start one resolve per configured family
    fn begin_finding(&mut self, method: Method, interface: u32, name: String) {
        let id = self
            .registry
            .get_or_create(method, interface, &name, &mut self.gate)
            .id;

        for i in 0..self.config.families.len() {
            let family = self.config.families[i];
            let op = self.next_op();
            let request = ResolveRequest {
                method,
                interface,
                name: name.clone(),
                family,
            };

            if let Err(e) = self.client.resolve(op, request) {
                tracing::warn!("{}", e);
                self.drop_finding(id);
                self.schedule_restart();
                return;
            }

            self.resolvers.insert(op, id);
            if let Some(finding) = self.registry.get_mut(id) {
                finding.pending.begin(op);
            }
        }
    }

    fn on_resolve(&mut self, op: ResolveOp, event: ResolveEvent) {
        let Some(id) = self.resolvers.remove(&op) else {
            tracing::trace!("Ignoring stale {}", op);
            return;
        };
        let Some(finding) = self.registry.get_mut(id) else {
            return;
        };

        let completion = finding.pending.complete(op);
        if completion == Completion::Stale {
            tracing::trace!("Ignoring duplicate {} for {:?}", op, finding.name);
            return;
        }

        match event {
            ResolveEvent::Found(resolved) => {
                tracing::debug!(
                    "{} {:?} resolved to {}:{}",
                    finding.method,
                    finding.name,
                    resolved.addr,
                    resolved.port
                );
                apply_resolved(finding, resolved);
            }
            ResolveEvent::Failure(reason) => {
                tracing::debug!(
                    "{} {:?}: resolve failed: {}",
                    finding.method,
                    finding.name,
                    reason
                );
            }
        }

        if completion == Completion::Done {
            self.finalize(id);
        }
    }

    /// All resolves of a finding completed: fill fallbacks and publish
    fn finalize(&mut self, id: FindingId) {
        let catalog = self.catalog.clone();
        let Some(finding) = self.registry.get_mut(id) else {
            return;
        };

        let endpoints = std::mem::take(&mut finding.endpoints);
        finding.endpoints = catalog.sort_and_dedup(endpoints);

        if finding.model.is_none() {
            finding.model = Some(finding.name.clone());
        }
        if finding.uuid.is_none() {
            finding.uuid = Some(synthesize_uuid(&finding.name));
        }

        finding.state = if finding.should_publish {
            FindingState::Published
        } else {
            FindingState::Unpublished
        };

        if finding.state == FindingState::Published {
            tracing::info!(
                "{} {:?}: publishing with {} endpoint(s)",
                finding.method,
                finding.name,
                finding.endpoints.len()
            );
            catalog.publish(&finding.snapshot());
        } else {
            tracing::debug!("{} {:?}: not a scanner, not published", finding.method, finding.name);
        }

        let method = finding.method;
        if std::mem::replace(&mut finding.initscan, false) {
            self.release_initscan(method, true);
        }
    }

    /// Delete one finding, withdrawing it if it was published
    fn drop_finding(&mut self, id: FindingId) {
        if let Some(finding) = self.registry.delete(id, self.catalog.as_ref()) {
            self.forget(finding, true);
        }
    }

    /// Delete every finding. `notify` controls whether initial-scan completion
    /// may still be reported.
    pub(super) fn flush_findings(&mut self, notify: bool) {
        let findings = self.registry.delete_all(self.catalog.as_ref());
        if !findings.is_empty() {
            tracing::debug!("Dropped {} finding(s)", findings.len());
        }
        for finding in findings {
            self.forget(finding, notify);
        }
    }

    /// Release what a deleted finding still holds
    fn forget(&mut self, mut finding: Finding, notify: bool) {
        for op in finding.pending.drain() {
            self.resolvers.remove(&op);
        }
        if finding.initscan {
            self.release_initscan(finding.method, notify);
        }
    }

    fn release_initscan(&mut self, method: Method, notify: bool) {
        if self.gate.release(method) && notify {
            self.catalog.initial_scan_done(method);
        }
    }

    /// Tear down the client with all its findings and arm the restart timer
    fn schedule_restart(&mut self) {
        self.client.stop_browsing();
        self.flush_findings(true);
        self.client.disconnect();
        self.client.arm_restart();
        tracing::warn!("Discovery client restart scheduled");
    }
}

/// Fold one resolve result into its finding
fn apply_resolved(finding: &mut Finding, resolved: Resolved) {
    if finding.model.is_none() {
        finding.model = resolved
            .txt
            .get(TXT_MODEL)
            .filter(|model| !model.is_empty())
            .map(str::to_string);
    }
    if finding.uuid.is_none() {
        finding.uuid = resolved.txt.get(TXT_UUID).and_then(parse_device_uuid);
    }

    finding.addrs.add(resolved.addr);

    if finding.method.is_escl() {
        let endpoint = build_endpoint(
            finding.method,
            resolved.addr,
            resolved.interface,
            resolved.port,
            resolved.txt.get(TXT_RESOURCE_PATH),
        );
        finding.endpoints.insert(0, endpoint);
        finding.should_publish = true;
    } else if resolved
        .txt
        .get(TXT_SCAN)
        .is_some_and(|scan| scan.eq_ignore_ascii_case("t"))
    {
        finding.should_publish = true;
    }
}
