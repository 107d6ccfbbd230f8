//! The set of zones the server is authoritative for, searchable by the
//! deepest apex at or above a query name. Zones are shared behind `Arc` so
//! a reload builds a new set and swaps it while in-flight queries keep
//! their snapshot.
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::dname::DomainName;
use crate::zone::Zone;

#[derive(Debug, Default, Clone)]
pub struct ZoneSet {
    // canonical apex key -> zone
    zones: BTreeMap<Vec<u8>, Arc<Zone>>,
}

impl ZoneSet {
    pub fn new() -> Self {
        ZoneSet::default()
    }

    /// Insert or replace a zone, keyed by its apex.
    pub fn insert(&mut self, zone: Zone) {
        self.zones.insert(zone.apex.canonical_key(), Arc::new(zone));
    }

    pub fn get(&self, apex: &DomainName) -> Option<&Arc<Zone>> {
        self.zones.get(&apex.canonical_key())
    }

    pub fn remove(&mut self, apex: &DomainName) -> Option<Arc<Zone>> {
        self.zones.remove(&apex.canonical_key())
    }

    /// The deepest apex equal to or an ancestor of `qname`; none means the
    /// question is outside our authority.
    pub fn find_zone(&self, qname: &DomainName) -> Option<&Arc<Zone>> {
        for skip in 0..=qname.label_count() {
            let candidate = qname.suffix(skip);
            if let Some(zone) = self.zones.get(&candidate.canonical_key()) {
                return Some(zone);
            }
        }
        None
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Zone>> {
        self.zones.values()
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone::tests::{a_rr, dn, ns_rr, sample_zone, soa_rr};
    use crate::zone::Zone;

    fn two_zone_set() -> ZoneSet {
        let mut set = ZoneSet::new();
        set.insert(sample_zone());
        set.insert(
            Zone::from_records(
                dn("sub.example.com"),
                vec![
                    soa_rr("sub.example.com", 7),
                    ns_rr("sub.example.com", "ns1.sub.example.com"),
                    a_rr("ns1.sub.example.com", [192, 0, 2, 53]),
                ],
            )
            .unwrap(),
        );
        set
    }

    #[test]
    fn deepest_apex_wins() {
        let set = two_zone_set();
        let zone = set.find_zone(&dn("host.sub.example.com")).unwrap();
        assert_eq!(zone.apex, dn("sub.example.com"));

        let zone = set.find_zone(&dn("www.example.com")).unwrap();
        assert_eq!(zone.apex, dn("example.com"));

        // apex itself matches its own zone
        let zone = set.find_zone(&dn("sub.example.com")).unwrap();
        assert_eq!(zone.apex, dn("sub.example.com"));
    }

    #[test]
    fn out_of_authority_is_none() {
        let set = two_zone_set();
        assert!(set.find_zone(&dn("example.org")).is_none());
        assert!(set.find_zone(&dn("com")).is_none());
    }

    #[test]
    fn insert_replaces_by_apex() {
        let mut set = two_zone_set();
        assert_eq!(set.len(), 2);
        let newer = Zone::from_records(
            dn("sub.example.com"),
            vec![soa_rr("sub.example.com", 8)],
        )
        .unwrap();
        set.insert(newer);
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(&dn("sub.example.com")).unwrap().serial(), 8);
    }
}
