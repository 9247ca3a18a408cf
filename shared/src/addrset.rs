use std::net::IpAddr;

/// A small, duplicate-free set of IP addresses.
///
/// Devices rarely resolve to more than a handful of addresses, so lookups are
/// a linear scan over a vector rather than a hash.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddrSet {
    addrs: Vec<IpAddr>,
}

impl AddrSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        self.addrs.iter().any(|a| a == addr)
    }

    /// Add `addr` if absent. Returns true if the set changed.
    pub fn add(&mut self, addr: IpAddr) -> bool {
        if self.contains(&addr) {
            return false;
        }
        self.addrs.push(addr);
        true
    }

    /// Add `addr` without a membership check. The caller guarantees it is absent.
    pub fn add_unconditional(&mut self, addr: IpAddr) {
        debug_assert!(!self.contains(&addr), "duplicate address {addr}");
        self.addrs.push(addr);
    }

    pub fn remove(&mut self, addr: &IpAddr) {
        self.addrs.retain(|a| a != addr);
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IpAddr> {
        self.addrs.iter()
    }

    pub fn to_vec(&self) -> Vec<IpAddr> {
        self.addrs.clone()
    }
}
