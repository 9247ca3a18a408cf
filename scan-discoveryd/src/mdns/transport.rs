use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use mdns_sd::{DaemonEvent, IfKind, ServiceDaemon, ServiceEvent, ServiceInfo};
use shared::endpoint::is_link_local_v6;
use shared::types::{AddrFamily, Method, TxtRecord};
use crate::config::DiscoveryConfig;
use crate::transport::{
    BrowseEvent, ClientState, EventSink, ResolveEvent, ResolveOp, ResolveRequest, Resolved,
    Transport, TransportClient, TransportError, TransportEvent,
};
use super::ifindex::interface_index;

/// mdns-sd answers for both families on one socket set; announcements are
/// reported once per family, like a per-protocol browser would.
const FAMILIES: [AddrFamily; 2] = [AddrFamily::Ipv4, AddrFamily::Ipv6];

/// How often unanswered resolves are checked for expiry
const RESOLVE_SWEEP: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct MdnsSettings {
    pub interface: Option<String>,
    /// IPv6 zone of link-local endpoints. 0 means unknown: looked up from
    /// `interface` when set, otherwise link-local IPv6 addresses are skipped.
    pub interface_index: u32,
    pub all_for_now: Duration,
    pub resolve_timeout: Duration,
}

impl From<&DiscoveryConfig> for MdnsSettings {
    fn from(config: &DiscoveryConfig) -> Self {
        Self {
            interface: config.interface.clone(),
            interface_index: config.interface_index,
            all_for_now: Duration::from_millis(config.all_for_now_ms),
            resolve_timeout: Duration::from_millis(config.resolve_timeout_ms),
        }
    }
}

impl MdnsSettings {
    /// The interface index reported with every event
    fn zone(&self) -> Result<u32, TransportError> {
        if self.interface_index != 0 {
            return Ok(self.interface_index);
        }
        match &self.interface {
            Some(name) => interface_index(name).map_err(|e| TransportError::Interface {
                interface: name.clone(),
                reason: e.to_string(),
            }),
            None => Ok(0),
        }
    }
}

/// Transport backed by the mdns-sd daemon
pub struct MdnsTransport {
    settings: MdnsSettings,
}

impl MdnsTransport {
    pub fn new(settings: MdnsSettings) -> Self {
        Self { settings }
    }
}

impl Transport for MdnsTransport {
    fn connect(&mut self, sink: EventSink) -> Result<Box<dyn TransportClient>, TransportError> {
        sink.send(TransportEvent::Client(ClientState::Connecting));

        let mut settings = self.settings.clone();
        settings.interface_index = settings.zone()?;
        if settings.interface_index == 0 {
            tracing::info!("No interface index known, skipping link-local IPv6 addresses");
        }

        let daemon = ServiceDaemon::new().map_err(|e| TransportError::Client(e.to_string()))?;

        if let Some(interface) = &self.settings.interface {
            let bind = || -> Result<(), mdns_sd::Error> {
                daemon.disable_interface(IfKind::All)?;
                daemon.enable_interface(interface.as_str())?;
                Ok(())
            };
            if let Err(e) = bind() {
                let _ = daemon.shutdown();
                return Err(TransportError::Interface {
                    interface: interface.clone(),
                    reason: e.to_string(),
                });
            }
        }

        let monitor = match daemon.monitor() {
            Ok(monitor) => monitor,
            Err(e) => {
                let _ = daemon.shutdown();
                return Err(TransportError::Client(e.to_string()));
            }
        };
        let cancel = CancellationToken::new();
        tokio::spawn(run_monitor(monitor, sink.clone(), cancel.clone()));

        // The daemon is usable as soon as it exists
        sink.send(TransportEvent::Client(ClientState::Running));

        Ok(Box::new(MdnsClient {
            daemon,
            sink,
            settings,
            sessions: HashMap::new(),
            cancel,
            closed: false,
        }))
    }
}

struct BrowseSession {
    cancel: CancellationToken,
    requests: mpsc::UnboundedSender<PendingResolve>,
}

struct PendingResolve {
    op: ResolveOp,
    name: String,
    family: AddrFamily,
    deadline: Instant,
}

struct MdnsClient {
    daemon: ServiceDaemon,
    sink: EventSink,
    settings: MdnsSettings,
    sessions: HashMap<Method, BrowseSession>,
    /// Stops the daemon monitor
    cancel: CancellationToken,
    closed: bool,
}

impl TransportClient for MdnsClient {
    fn browse(&mut self, method: Method) -> Result<(), TransportError> {
        let receiver = self
            .daemon
            .browse(method.service_type())
            .map_err(|e| TransportError::Browse {
                method,
                reason: e.to_string(),
            })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        tokio::spawn(run_session(
            method,
            receiver,
            rx,
            self.sink.clone(),
            self.settings.clone(),
            cancel.clone(),
        ));

        if let Some(old) = self.sessions.insert(method, BrowseSession { cancel, requests: tx }) {
            old.cancel.cancel();
        }
        Ok(())
    }

    fn resolve(&mut self, op: ResolveOp, request: ResolveRequest) -> Result<(), TransportError> {
        let failed = |reason: &str| TransportError::Resolve {
            method: request.method,
            name: request.name.clone(),
            reason: reason.to_string(),
        };

        let session = self
            .sessions
            .get(&request.method)
            .ok_or_else(|| failed("not browsing"))?;

        let pending = PendingResolve {
            op,
            name: request.name.clone(),
            family: request.family,
            deadline: Instant::now() + self.settings.resolve_timeout,
        };
        session
            .requests
            .send(pending)
            .map_err(|_| failed("browse session ended"))
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.cancel.cancel();

        for (method, session) in self.sessions.drain() {
            session.cancel.cancel();
            if let Err(e) = self.daemon.stop_browse(method.service_type()) {
                tracing::debug!("Failed to stop browsing {}: {}", method.service_type(), e);
            }
        }

        if let Err(e) = self.daemon.shutdown() {
            tracing::error!("Failed to shutdown mDNS daemon: {}", e);
        }
    }
}

impl Drop for MdnsClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Watch the daemon itself. Its thread going away is a client failure.
async fn run_monitor(
    monitor: flume::Receiver<DaemonEvent>,
    sink: EventSink,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            event = monitor.recv_async() => match event {
                // Per-interface socket errors; the daemon keeps running
                Ok(DaemonEvent::Error(e)) => {
                    tracing::warn!("mDNS daemon error: {}", e);
                }
                Ok(_) => {}
                Err(_) => {
                    tracing::warn!("mDNS daemon stopped unexpectedly");
                    sink.send(TransportEvent::Client(ClientState::Failure));
                    break;
                }
            },
        }
    }
}

/// One browse session: forwards announcements and answers resolves from the
/// records the daemon has resolved so far.
async fn run_session(
    method: Method,
    receiver: flume::Receiver<ServiceEvent>,
    mut requests: mpsc::UnboundedReceiver<PendingResolve>,
    sink: EventSink,
    settings: MdnsSettings,
    cancel: CancellationToken,
) {
    let interface = settings.interface_index;
    let browse = |event: BrowseEvent| sink.send(TransportEvent::Browse { method, event });

    // Keyed by lowercased instance name
    let mut resolved: HashMap<String, ServiceInfo> = HashMap::new();
    let mut pending: Vec<PendingResolve> = Vec::new();

    let all_for_now = tokio::time::sleep(settings.all_for_now);
    tokio::pin!(all_for_now);
    let mut all_for_now_sent = false;
    let mut sweep = tokio::time::interval(RESOLVE_SWEEP);

    loop {
        tokio::select! {
            event = receiver.recv_async() => {
                match event {
                    Ok(ServiceEvent::ServiceFound(ty, fullname)) => {
                        let name = instance_name(&fullname, &ty);
                        tracing::debug!("mDNS found {} ({})", name, method);
                        for family in FAMILIES {
                            browse(BrowseEvent::New { name: name.clone(), interface, family });
                        }
                        // Hold all-for-now until announcements go quiet
                        if !all_for_now_sent {
                            all_for_now.as_mut().reset(Instant::now() + settings.all_for_now);
                        }
                    }
                    Ok(ServiceEvent::ServiceResolved(info)) => {
                        let name = instance_name(info.get_fullname(), info.get_type());
                        let key = name.to_lowercase();

                        // Records often arrive piecemeal: a request whose
                        // family is still missing waits for the next update
                        pending.retain(|request| {
                            request.name.to_lowercase() != key
                                || !answer(&sink, request, &info, interface)
                        });

                        resolved.insert(key, info);
                    }
                    Ok(ServiceEvent::ServiceRemoved(ty, fullname)) => {
                        let name = instance_name(&fullname, &ty);
                        tracing::debug!("mDNS removed {} ({})", name, method);
                        resolved.remove(&name.to_lowercase());
                        for family in FAMILIES {
                            browse(BrowseEvent::Remove { name: name.clone(), interface, family });
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("mDNS receiver for {} disconnected: {}", method, e);
                        browse(BrowseEvent::Failure(e.to_string()));
                        break;
                    }
                }
            }

            Some(request) = requests.recv() => {
                let answered = resolved
                    .get(&request.name.to_lowercase())
                    .is_some_and(|info| answer(&sink, &request, info, interface));
                if !answered {
                    pending.push(request);
                }
            }

            () = &mut all_for_now, if !all_for_now_sent => {
                all_for_now_sent = true;
                browse(BrowseEvent::AllForNow);
            }

            _ = sweep.tick(), if !pending.is_empty() => {
                let now = Instant::now();
                let (expired, waiting): (Vec<_>, Vec<_>) = pending
                    .drain(..)
                    .partition(|p| p.deadline <= now);
                pending = waiting;
                for request in expired {
                    let reason = if resolved.contains_key(&request.name.to_lowercase()) {
                        format!("no {} address", request.family)
                    } else {
                        "resolve timed out".to_string()
                    };
                    sink.send(TransportEvent::Resolve {
                        op: request.op,
                        event: ResolveEvent::Failure(reason),
                    });
                }
            }

            () = cancel.cancelled() => {
                tracing::debug!("mDNS browse for {} shutting down", method);
                break;
            }
        }
    }
}

/// Answer `request` from `info` if it carries a usable address of the
/// requested family. Returns whether an answer was sent.
fn answer(sink: &EventSink, request: &PendingResolve, info: &ServiceInfo, interface: u32) -> bool {
    let Some(addr) = pick_address(info.get_addresses().iter(), request.family, interface) else {
        return false;
    };

    let resolved = Resolved {
        addr,
        interface,
        port: info.get_port(),
        txt: txt_record(info),
    };
    sink.send(TransportEvent::Resolve {
        op: request.op,
        event: ResolveEvent::Found(resolved),
    });
    true
}

/// One address of `family`, preferring routable over link-local. Link-local
/// IPv6 needs a zone, so it is skipped while the interface index is unknown.
fn pick_address<'a>(
    addrs: impl Iterator<Item = &'a IpAddr>,
    family: AddrFamily,
    interface: u32,
) -> Option<IpAddr> {
    addrs
        .filter(|addr| AddrFamily::of(addr) == family)
        .filter(|addr| match addr {
            IpAddr::V6(v6) => interface != 0 || !is_link_local_v6(v6),
            IpAddr::V4(_) => true,
        })
        .min_by_key(|addr| {
            let link_local = match addr {
                IpAddr::V4(v4) => v4.is_link_local(),
                IpAddr::V6(v6) => is_link_local_v6(v6),
            };
            (link_local, **addr)
        })
        .copied()
}

fn txt_record(info: &ServiceInfo) -> TxtRecord {
    info.get_properties()
        .iter()
        .map(|prop| (prop.key().to_string(), prop.val_str().to_string()))
        .collect()
}

/// Extract the instance label from a full DNS-SD name
///
/// `My Scanner._uscan._tcp.local.` with type `_uscan._tcp.local.` yields
/// `My Scanner`.
fn instance_name(fullname: &str, service_type: &str) -> String {
    fullname
        .strip_suffix(service_type)
        .map(|s| s.trim_end_matches('.'))
        .unwrap_or(fullname)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};
    use pretty_assertions::assert_eq;
    use shared::protocol::USCAN_SERVICE_TYPE;
    use crate::transport::Envelope;

    const IFACE: u32 = 3;

    fn settings(resolve_timeout: Duration) -> MdnsSettings {
        MdnsSettings {
            interface: None,
            interface_index: IFACE,
            all_for_now: Duration::from_secs(3600),
            resolve_timeout,
        }
    }

    struct Session {
        services: flume::Sender<ServiceEvent>,
        requests: mpsc::UnboundedSender<PendingResolve>,
        events: flume::Receiver<Envelope>,
        cancel: CancellationToken,
    }

    impl Session {
        fn spawn(settings: MdnsSettings) -> Self {
            let (services, receiver) = flume::unbounded();
            let (requests, rx) = mpsc::unbounded_channel();
            let (tx, events) = flume::unbounded();
            let cancel = CancellationToken::new();

            tokio::spawn(run_session(
                Method::Uscan,
                receiver,
                rx,
                EventSink::new(1, tx),
                settings,
                cancel.clone(),
            ));
            Self { services, requests, events, cancel }
        }

        fn resolve(&self, op: u64, family: AddrFamily, timeout: Duration) {
            let request = PendingResolve {
                op: ResolveOp(op),
                name: "Scanner".to_string(),
                family,
                deadline: Instant::now() + timeout,
            };
            assert!(self.requests.send(request).is_ok());
        }

        fn resolved(&self, addrs: &str) {
            let info = ServiceInfo::new(
                USCAN_SERVICE_TYPE,
                "Scanner",
                "scanner.local.",
                addrs,
                8080,
                &[("ty", "Model X")][..],
            )
            .unwrap();
            assert!(self.services.send(ServiceEvent::ServiceResolved(info)).is_ok());
        }

        async fn next_event(&self) -> TransportEvent {
            tokio::time::timeout(Duration::from_secs(5), self.events.recv_async())
                .await
                .expect("no event from browse session")
                .unwrap()
                .event
        }
    }

    fn resolve_result(event: TransportEvent) -> (ResolveOp, ResolveEvent) {
        match event {
            TransportEvent::Resolve { op, event } => (op, event),
            other => panic!("expected a resolve event, got {other:?}"),
        }
    }

    #[test]
    fn test_instance_name() {
        assert_eq!(
            instance_name("My Scanner._uscan._tcp.local.", "_uscan._tcp.local."),
            "My Scanner"
        );
        assert_eq!(instance_name("odd-name", "_uscan._tcp.local."), "odd-name");
    }

    #[test]
    fn test_pick_address_by_family() {
        let addrs = [
            IpAddr::V6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 9)),
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 9)),
            IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 9)),
        ];

        assert_eq!(
            pick_address(addrs.iter(), AddrFamily::Ipv4, IFACE),
            Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 9)))
        );
        assert_eq!(
            pick_address(addrs.iter(), AddrFamily::Ipv6, IFACE),
            Some(IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 9)))
        );
        assert_eq!(pick_address(addrs[..2].iter(), AddrFamily::Ipv6, IFACE), Some(addrs[0]));
        assert_eq!(pick_address([].iter(), AddrFamily::Ipv4, IFACE), None);
    }

    #[test]
    fn test_link_local_skipped_without_zone() {
        let link_local = [IpAddr::V6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1))];
        assert_eq!(pick_address(link_local.iter(), AddrFamily::Ipv6, 0), None);

        let both = [
            link_local[0],
            IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1)),
        ];
        assert_eq!(pick_address(both.iter(), AddrFamily::Ipv6, 0), Some(both[1]));
    }

    #[test]
    fn test_zone_from_settings() {
        let mut settings = settings(Duration::from_secs(1));
        assert_eq!(settings.zone().unwrap(), IFACE);

        settings.interface_index = 0;
        assert_eq!(settings.zone().unwrap(), 0, "Unbound daemon has no zone");

        settings.interface = Some("no-such-if0".to_string());
        assert!(matches!(settings.zone(), Err(TransportError::Interface { .. })));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_zone_looked_up_by_name() {
        let settings = MdnsSettings {
            interface: Some("lo".to_string()),
            interface_index: 0,
            ..settings(Duration::from_secs(1))
        };
        assert_eq!(settings.zone().unwrap(), interface_index("lo").unwrap());
    }

    #[tokio::test]
    async fn test_resolve_waits_for_missing_family() {
        let session = Session::spawn(settings(Duration::from_secs(30)));
        session.resolve(1, AddrFamily::Ipv6, Duration::from_secs(30));
        session.resolved("192.168.1.5");
        session.resolved("192.168.1.5,2001:db8::5");

        let (op, event) = resolve_result(session.next_event().await);
        assert_eq!(op, ResolveOp(1));
        match event {
            ResolveEvent::Found(resolved) => {
                assert_eq!(resolved.addr, "2001:db8::5".parse::<IpAddr>().unwrap());
                assert_eq!(resolved.interface, IFACE);
                assert_eq!(resolved.port, 8080);
                assert_eq!(resolved.txt.get("ty"), Some("Model X"));
            }
            other => panic!("expected the IPv6 address, got {other:?}"),
        }
        session.cancel.cancel();
    }

    #[tokio::test]
    async fn test_resolve_answered_from_cached_record() {
        let session = Session::spawn(settings(Duration::from_secs(30)));
        session.resolved("192.168.1.5");
        session.resolve(1, AddrFamily::Ipv4, Duration::from_secs(30));

        let (op, event) = resolve_result(session.next_event().await);
        assert_eq!(op, ResolveOp(1));
        let expected = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 5));
        assert!(matches!(event, ResolveEvent::Found(r) if r.addr == expected));
        session.cancel.cancel();
    }

    #[tokio::test]
    async fn test_missing_family_fails_at_deadline() {
        let session = Session::spawn(settings(Duration::from_millis(100)));
        session.resolved("192.168.1.5");
        session.resolve(1, AddrFamily::Ipv6, Duration::from_millis(100));

        let (op, event) = resolve_result(session.next_event().await);
        assert_eq!(op, ResolveOp(1));
        assert_eq!(event, ResolveEvent::Failure("no ipv6 address".to_string()));
        session.cancel.cancel();
    }

    #[tokio::test]
    async fn test_monitor_reports_daemon_exit() {
        let (monitor_tx, monitor_rx) = flume::unbounded();
        let (tx, events) = flume::unbounded::<Envelope>();
        let sink = EventSink::new(1, tx);
        let task = tokio::spawn(run_monitor(monitor_rx, sink, CancellationToken::new()));

        let error = DaemonEvent::Error(mdns_sd::Error::Msg("socket error".to_string()));
        assert!(monitor_tx.send(error).is_ok());
        drop(monitor_tx);
        task.await.unwrap();

        let states: Vec<TransportEvent> = events.drain().map(|e| e.event).collect();
        assert_eq!(states, vec![TransportEvent::Client(ClientState::Failure)]);
    }

    #[tokio::test]
    async fn test_monitor_quiet_after_cancel() {
        let (monitor_tx, monitor_rx) = flume::unbounded::<DaemonEvent>();
        let (tx, events) = flume::unbounded::<Envelope>();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_monitor(monitor_rx, EventSink::new(1, tx), cancel.clone()));

        cancel.cancel();
        drop(monitor_tx);
        task.await.unwrap();

        assert!(events.is_empty());
    }
}
