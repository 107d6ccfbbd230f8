//! Access control lists guarding NOTIFY and zone transfer: an ordered list
//! of address specs, first match wins. A spec is one of
//!
//!   10.20.30.40            single address
//!   10.20.30.0&255.255.255.0   explicit mask
//!   10.20.30.0/28          subnet
//!   10.20.30.40-10.20.30.60    inclusive range
//!
//! optionally suffixed with `@port`, followed by a key name, `NOKEY` or
//! `BLOCKED`. A BLOCKED match silently drops the query instead of refusing.
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::dname::DomainName;
use crate::error::{DNSError, DNSResult};

#[derive(Debug, Clone, PartialEq)]
pub enum AddressMatch {
    Single(IpAddr),
    Mask(IpAddr, IpAddr),
    Subnet(IpAddr, u8),
    Range(IpAddr, IpAddr),
}

#[derive(Debug, Clone)]
pub struct AclEntry {
    // the textual form, kept for logging the match reason
    pub spec: String,
    pub matcher: AddressMatch,
    // 0 matches any source port
    pub port: u16,
    pub key_name: Option<DomainName>,
    pub blocked: bool,
}

fn to_bits(addr: &IpAddr) -> u128 {
    match addr {
        IpAddr::V4(v4) => u32::from(*v4) as u128,
        IpAddr::V6(v6) => u128::from(*v6),
    }
}

fn same_family(a: &IpAddr, b: &IpAddr) -> bool {
    a.is_ipv4() == b.is_ipv4()
}

impl AclEntry {
    /// Parse `"<address-spec> [keyname|NOKEY|BLOCKED]"`.
    pub fn from_spec(spec: &str) -> DNSResult<AclEntry> {
        let mut tokens = spec.split_whitespace();
        let addr_spec = tokens
            .next()
            .ok_or_else(|| DNSError::new("empty ACL entry"))?;
        let key_spec = tokens.next();
        if tokens.next().is_some() {
            return Err(DNSError::DNS(format!("trailing data in ACL entry '{}'", spec)));
        }

        // split off the optional @port
        let (addr_part, port) = match addr_spec.split_once('@') {
            Some((a, p)) => (
                a,
                p.parse::<u16>()
                    .map_err(|_| DNSError::DNS(format!("bad ACL port in '{}'", spec)))?,
            ),
            None => (addr_spec, 0),
        };

        let matcher = if let Some((addr, mask)) = addr_part.split_once('&') {
            let addr = IpAddr::from_str(addr)?;
            let mask = IpAddr::from_str(mask)?;
            if !same_family(&addr, &mask) {
                return Err(DNSError::DNS(format!("mixed families in '{}'", spec)));
            }
            AddressMatch::Mask(addr, mask)
        } else if let Some((addr, prefix)) = addr_part.split_once('/') {
            let addr = IpAddr::from_str(addr)?;
            let prefix = prefix
                .parse::<u8>()
                .map_err(|_| DNSError::DNS(format!("bad prefix length in '{}'", spec)))?;
            let max = if addr.is_ipv4() { 32 } else { 128 };
            if prefix > max {
                return Err(DNSError::DNS(format!("bad prefix length in '{}'", spec)));
            }
            AddressMatch::Subnet(addr, prefix)
        } else if let Some((lo, hi)) = addr_part.split_once('-') {
            let lo = IpAddr::from_str(lo)?;
            let hi = IpAddr::from_str(hi)?;
            if !same_family(&lo, &hi) {
                return Err(DNSError::DNS(format!("mixed families in '{}'", spec)));
            }
            AddressMatch::Range(lo, hi)
        } else {
            AddressMatch::Single(IpAddr::from_str(addr_part)?)
        };

        let (key_name, blocked) = match key_spec {
            None | Some("NOKEY") => (None, false),
            Some("BLOCKED") => (None, true),
            Some(name) => (Some(DomainName::try_from(name)?), false),
        };

        Ok(AclEntry {
            spec: spec.to_string(),
            matcher,
            port,
            key_name,
            blocked,
        })
    }

    fn addr_matches(&self, addr: &IpAddr) -> bool {
        match &self.matcher {
            AddressMatch::Single(a) => same_family(a, addr) && to_bits(a) == to_bits(addr),
            AddressMatch::Mask(a, m) => {
                same_family(a, addr) && to_bits(a) & to_bits(m) == to_bits(addr) & to_bits(m)
            }
            AddressMatch::Subnet(a, prefix) => {
                if !same_family(a, addr) {
                    return false;
                }
                let width: u32 = if a.is_ipv4() { 32 } else { 128 };
                if *prefix == 0 {
                    return true;
                }
                let shift = width - u32::from(*prefix);
                (to_bits(a) >> shift) == (to_bits(addr) >> shift)
            }
            AddressMatch::Range(lo, hi) => {
                same_family(lo, addr)
                    && to_bits(lo) <= to_bits(addr)
                    && to_bits(addr) <= to_bits(hi)
            }
        }
    }

    /// Address, port and key must all agree. An entry with a key name only
    /// matches queries whose TSIG verified under that key.
    pub fn matches(&self, src: &SocketAddr, key: Option<&DomainName>) -> bool {
        if self.port != 0 && self.port != src.port() {
            return false;
        }
        if !self.addr_matches(&src.ip()) {
            return false;
        }
        match (&self.key_name, key) {
            (None, _) => true,
            (Some(want), Some(have)) => want == have,
            (Some(_), None) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclDecision {
    // index of the matching entry, for logging
    Allow(usize),
    Refuse,
    Drop,
}

/// An ordered ACL; empty lists refuse everything.
#[derive(Debug, Clone, Default)]
pub struct Acl {
    pub entries: Vec<AclEntry>,
}

impl Acl {
    pub fn from_specs(specs: &[String]) -> DNSResult<Acl> {
        let entries = specs
            .iter()
            .map(|s| AclEntry::from_spec(s))
            .collect::<DNSResult<Vec<_>>>()?;
        Ok(Acl { entries })
    }

    pub fn check(&self, src: &SocketAddr, key: Option<&DomainName>) -> AclDecision {
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.matches(src, key) {
                if entry.blocked {
                    return AclDecision::Drop;
                }
                return AclDecision::Allow(i);
            }
        }
        AclDecision::Refuse
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // the peers named by the list, used to pick transfer masters
    pub fn addresses(&self) -> Vec<(IpAddr, u16)> {
        self.entries
            .iter()
            .filter(|e| !e.blocked)
            .filter_map(|e| match &e.matcher {
                AddressMatch::Single(a) => Some((*a, e.port)),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sa(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn single_address() {
        let acl = Acl::from_specs(&["10.0.0.1 NOKEY".to_string()]).unwrap();
        assert_eq!(acl.check(&sa("10.0.0.1:5300"), None), AclDecision::Allow(0));
        assert_eq!(acl.check(&sa("10.0.0.2:5300"), None), AclDecision::Refuse);
    }

    #[test]
    fn subnet_and_mask() {
        let acl = Acl::from_specs(&[
            "192.0.2.0/28".to_string(),
            "10.0.0.0&255.0.0.0".to_string(),
        ])
        .unwrap();
        assert_eq!(acl.check(&sa("192.0.2.14:53"), None), AclDecision::Allow(0));
        assert_eq!(acl.check(&sa("192.0.2.16:53"), None), AclDecision::Refuse);
        assert_eq!(acl.check(&sa("10.99.1.2:53"), None), AclDecision::Allow(1));
    }

    #[test]
    fn range_and_port() {
        let acl = Acl::from_specs(&["10.0.0.5-10.0.0.9@5300".to_string()]).unwrap();
        assert_eq!(acl.check(&sa("10.0.0.7:5300"), None), AclDecision::Allow(0));
        assert_eq!(acl.check(&sa("10.0.0.7:53"), None), AclDecision::Refuse);
        assert_eq!(acl.check(&sa("10.0.0.10:5300"), None), AclDecision::Refuse);
    }

    #[test]
    fn first_match_wins_and_blocked_drops() {
        let acl = Acl::from_specs(&[
            "10.0.0.66 BLOCKED".to_string(),
            "10.0.0.0/24".to_string(),
        ])
        .unwrap();
        assert_eq!(acl.check(&sa("10.0.0.66:53"), None), AclDecision::Drop);
        assert_eq!(acl.check(&sa("10.0.0.67:53"), None), AclDecision::Allow(1));
    }

    #[test]
    fn key_requirement() {
        let acl = Acl::from_specs(&["10.0.0.1 transfer.key".to_string()]).unwrap();
        let key = DomainName::try_from("transfer.key").unwrap();
        let wrong = DomainName::try_from("other.key").unwrap();
        assert_eq!(acl.check(&sa("10.0.0.1:53"), None), AclDecision::Refuse);
        assert_eq!(acl.check(&sa("10.0.0.1:53"), Some(&wrong)), AclDecision::Refuse);
        assert_eq!(
            acl.check(&sa("10.0.0.1:53"), Some(&key)),
            AclDecision::Allow(0)
        );
    }

    #[test]
    fn ipv6_subnet() {
        let acl = Acl::from_specs(&["2001:db8::/32".to_string()]).unwrap();
        assert_eq!(acl.check(&sa("[2001:db8::1]:53"), None), AclDecision::Allow(0));
        assert_eq!(acl.check(&sa("[2001:db9::1]:53"), None), AclDecision::Refuse);
    }
}
