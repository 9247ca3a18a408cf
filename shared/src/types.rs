use std::fmt;
use std::net::IpAddr;
use http::Uri;
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;
use crate::protocol::{
    IPPS_SERVICE_TYPE, IPP_SERVICE_TYPE, USCANS_SERVICE_TYPE, USCAN_SERVICE_TYPE,
};

/// A discovery method: one mDNS service type the engine browses for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// Plain eSCL (`_uscan._tcp`)
    Uscan,
    /// eSCL over TLS (`_uscans._tcp`)
    Uscans,
    /// IPP printer (`_ipp._tcp`)
    IppPrinter,
    /// IPP printer over TLS (`_ipps._tcp`)
    IppsPrinter,
}

struct MethodInfo {
    name: &'static str,
    service_type: &'static str,
    scheme: &'static str,
    escl: bool,
}

/// Indexed by `Method as usize`
const METHOD_TABLE: [MethodInfo; Method::COUNT] = [
    MethodInfo {
        name: "uscan",
        service_type: USCAN_SERVICE_TYPE,
        scheme: "http",
        escl: true,
    },
    MethodInfo {
        name: "uscans",
        service_type: USCANS_SERVICE_TYPE,
        scheme: "https",
        escl: true,
    },
    MethodInfo {
        name: "ipp_printer",
        service_type: IPP_SERVICE_TYPE,
        scheme: "http",
        escl: false,
    },
    MethodInfo {
        name: "ipps_printer",
        service_type: IPPS_SERVICE_TYPE,
        scheme: "https",
        escl: false,
    },
];

impl Method {
    pub const COUNT: usize = 4;

    pub const ALL: [Method; Method::COUNT] = [
        Method::Uscan,
        Method::Uscans,
        Method::IppPrinter,
        Method::IppsPrinter,
    ];

    /// Position of this method in per-method arrays
    pub fn index(self) -> usize {
        self as usize
    }

    fn info(self) -> &'static MethodInfo {
        &METHOD_TABLE[self.index()]
    }

    pub fn as_str(self) -> &'static str {
        self.info().name
    }

    pub fn service_type(self) -> &'static str {
        self.info().service_type
    }

    /// URI scheme for endpoints built from this method
    pub fn scheme(self) -> &'static str {
        self.info().scheme
    }

    /// Whether announcements of this method point directly at an eSCL service
    pub fn is_escl(self) -> bool {
        self.info().escl
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// IP address family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddrFamily {
    Ipv4,
    Ipv6,
}

impl AddrFamily {
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => AddrFamily::Ipv4,
            IpAddr::V6(_) => AddrFamily::Ipv6,
        }
    }
}

impl fmt::Display for AddrFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddrFamily::Ipv4 => f.write_str("ipv4"),
            AddrFamily::Ipv6 => f.write_str("ipv6"),
        }
    }
}

/// Scan protocol spoken at an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Proto {
    Escl,
}

/// A protocol endpoint: where a discovered device's scan service is reachable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Endpoint {
    pub proto: Proto,
    #[serde(serialize_with = "serialize_uri")]
    pub uri: Uri,
}

fn serialize_uri<S: Serializer>(uri: &Uri, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(uri)
}

/// TXT record key-value pairs. Keys compare case-insensitively, as in DNS-SD.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxtRecord(Vec<(String, String)>);

impl TxtRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    /// Value of the first entry whose key matches `key`, ignoring ASCII case
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TxtRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Read-only view of a finalized finding, handed to the device catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    pub method: Method,

    /// Network interface index the device was seen on
    pub interface: u32,

    /// DNS-SD service instance name, e.g. "Kyocera ECOSYS M2040dn"
    pub name: String,

    pub model: String,

    pub uuid: Uuid,

    /// Addresses the device resolved to, in resolution order
    pub addresses: Vec<IpAddr>,

    /// Canonically ordered, duplicate-free endpoints
    pub endpoints: Vec<Endpoint>,
}
