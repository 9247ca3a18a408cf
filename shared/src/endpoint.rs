use std::net::{IpAddr, Ipv6Addr};
use http::Uri;
use crate::protocol::DEFAULT_ESCL_PATH;
use crate::types::{Endpoint, Method, Proto};

/// Build the eSCL endpoint for one resolved address.
///
/// Link-local IPv6 addresses carry the interface index as an RFC 6874 zone
/// identifier, percent-encoded inside the brackets.
///
/// # Panics
///
/// Panics if the composed URI fails to parse. Every input here comes from a
/// parsed `IpAddr` and a normalized path, so a failure is a bug.
pub fn build_endpoint(
    method: Method,
    addr: IpAddr,
    interface: u32,
    port: u16,
    resource_path: Option<&str>,
) -> Endpoint {
    let host = format_host(&addr, interface);
    let path = normalize_path(resource_path);
    let text = format!("{}://{}:{}{}", method.scheme(), host, port, path);

    let uri = text
        .parse::<Uri>()
        .unwrap_or_else(|e| panic!("Constructed endpoint URI {text:?} is invalid: {e}"));

    Endpoint { proto: Proto::Escl, uri }
}

fn format_host(addr: &IpAddr, interface: u32) -> String {
    match addr {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) if is_link_local_v6(v6) => format!("[{}%25{}]", v6, interface),
        IpAddr::V6(v6) => format!("[{}]", v6),
    }
}

/// Normalize the `rs` TXT value into an absolute path with a trailing slash
pub fn normalize_path(resource_path: Option<&str>) -> String {
    let Some(raw) = resource_path else {
        return DEFAULT_ESCL_PATH.to_string();
    };

    let trimmed = raw.trim_start_matches('/').trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", trimmed)
    }
}

/// fe80::/10
pub fn is_link_local_v6(addr: &Ipv6Addr) -> bool {
    (addr.segments()[0] & 0xffc0) == 0xfe80
}

fn is_link_local(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_link_local(),
        IpAddr::V6(v6) => is_link_local_v6(v6),
    }
}

/// Extract the IP address from an endpoint URI host, dropping any zone id
pub fn endpoint_addr(uri: &Uri) -> Option<IpAddr> {
    let host = uri.host()?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let host = host.split_once('%').map_or(host, |(addr, _)| addr);
    host.parse().ok()
}

/// Sort endpoints into canonical order and drop duplicates.
///
/// Order: protocol, then routable before link-local, then IPv4 before IPv6,
/// then URI text.
pub fn sort_and_dedup(mut endpoints: Vec<Endpoint>) -> Vec<Endpoint> {
    endpoints.sort_by_cached_key(|ep| {
        let addr = endpoint_addr(&ep.uri);
        (
            ep.proto,
            addr.as_ref().map_or(false, is_link_local),
            addr.as_ref().map_or(false, IpAddr::is_ipv6),
            ep.uri.to_string(),
        )
    });
    endpoints.dedup();
    endpoints
}
