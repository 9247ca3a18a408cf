use std::fmt;
use std::net::IpAddr;
use shared::types::{AddrFamily, Method, TxtRecord};

/// Handle of one outstanding resolve operation. Never reused within an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResolveOp(pub u64);

impl fmt::Display for ResolveOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resolve#{}", self.0)
    }
}

/// State notifications from the transport client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connecting,
    Registering,
    Running,
    Collision,
    Failure,
}

/// Events of one per-method browse session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowseEvent {
    New {
        name: String,
        interface: u32,
        family: AddrFamily,
    },
    Remove {
        name: String,
        interface: u32,
        family: AddrFamily,
    },
    Failure(String),
    CacheExhausted,
    AllForNow,
}

/// A successful resolve: one address of the requested family
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub addr: IpAddr,
    pub interface: u32,
    pub port: u16,
    pub txt: TxtRecord,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveEvent {
    Found(Resolved),
    Failure(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Client(ClientState),
    Browse { method: Method, event: BrowseEvent },
    Resolve { op: ResolveOp, event: ResolveEvent },
}

/// An event stamped with the generation of the client that produced it
#[derive(Debug, Clone)]
pub struct Envelope {
    pub generation: u64,
    pub event: TransportEvent,
}

/// What to resolve: one service instance, for one address family
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveRequest {
    pub method: Method,
    pub interface: u32,
    pub name: String,
    pub family: AddrFamily,
}

/// Callback side of a transport client. Cloned into every task the client runs.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: flume::Sender<Envelope>,
}

impl EventSink {
    pub fn new(generation: u64, tx: flume::Sender<Envelope>) -> Self {
        Self { generation, tx }
    }

    /// Deliver an event to the engine. Events sent after the engine is gone
    /// are dropped.
    pub fn send(&self, event: TransportEvent) {
        let envelope = Envelope {
            generation: self.generation,
            event,
        };
        if self.tx.send(envelope).is_err() {
            tracing::trace!("Engine gone, dropping transport event");
        }
    }
}

/// Errors reported synchronously by the transport
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The client could not be created
    #[error("Failed to create discovery client: {0}")]
    Client(String),

    /// The client could not be restricted to the configured interface
    #[error("Failed to bind interface {interface}: {reason}")]
    Interface { interface: String, reason: String },

    #[error("Failed to browse {method}: {reason}")]
    Browse { method: Method, reason: String },

    #[error("Failed to resolve {name:?} ({method}): {reason}")]
    Resolve {
        method: Method,
        name: String,
        reason: String,
    },
}

/// Factory for transport clients. The engine creates a fresh client on every
/// start and restart.
pub trait Transport: Send {
    fn connect(&mut self, sink: EventSink) -> Result<Box<dyn TransportClient>, TransportError>;
}

/// A live transport client. Dropping or shutting it down cancels every browse
/// and resolve it owns.
pub trait TransportClient: Send {
    fn browse(&mut self, method: Method) -> Result<(), TransportError>;

    fn resolve(&mut self, op: ResolveOp, request: ResolveRequest) -> Result<(), TransportError>;

    /// Stop every browse session and release the client
    fn shutdown(&mut self);
}
