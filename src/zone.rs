//! One authoritative zone held in memory: the RRset map keyed by canonical
//! name order, the owner-name set driving empty-non-terminal detection and
//! the NSEC denial walk, and the wildcard index. A zone is an immutable
//! snapshot; reloads and transfers build a new one and swap it in.
use std::collections::{BTreeMap, BTreeSet};

use crate::dname::DomainName;
use crate::error::{DNSError, DNSResult, InternalError};
use crate::rdata::{RData, SOA};
use crate::rfc1035::{QType, RRSet, RRType, ResourceRecord};

// CNAME/DNAME indirections are chased at most this far inside one zone
pub const MAX_CNAME_CHAIN: usize = 8;

#[derive(Debug, Clone)]
pub struct Zone {
    pub apex: DomainName,
    pub soa: ResourceRecord,
    // (canonical owner key, type) -> RRset, in canonical zone order
    rrsets: BTreeMap<(Vec<u8>, RRType), RRSet>,
    // canonical keys of every explicit owner name
    names: BTreeMap<Vec<u8>, DomainName>,
    // canonical keys of the base names under which a wildcard exists
    wildcards: BTreeSet<Vec<u8>>,
    pub signed: bool,
}

/// What the authoritative lookup produced; the query machine turns this
/// into sections.
#[derive(Debug)]
pub enum LookupOutcome {
    // rrsets for the answer section, CNAME/DNAME chains already flattened
    // and wildcard owners rewritten; `wildcard` records that an expansion
    // happened so signed answers can attach the proof
    Answer { rrsets: Vec<RRSet>, wildcard: bool },
    // the name exists (possibly as an empty non-terminal) but has no data
    // of the requested type
    Nodata { chain: Vec<RRSet>, name: DomainName },
    // the question falls below a zone cut
    Referral { chain: Vec<RRSet>, ns: RRSet },
    Nxdomain { chain: Vec<RRSet> },
}

// the outcome of a single non-chasing step
enum Step {
    Match(Vec<RRSet>, bool),
    Cname(RRSet, DomainName),
    Dname(RRSet, DomainName),
    Referral(RRSet),
    Nodata(DomainName),
    Nxdomain,
    // chased out of the zone, the chain so far is the whole answer
    OutOfZone,
}

impl Zone {
    /// Build a zone from its records. Exactly one SOA must be present and
    /// it must own the apex; records with owners outside the apex are
    /// dropped with a warning.
    pub fn from_records(apex: DomainName, records: Vec<ResourceRecord>) -> DNSResult<Zone> {
        let mut soa: Option<ResourceRecord> = None;
        let mut rrsets: BTreeMap<(Vec<u8>, RRType), RRSet> = BTreeMap::new();
        let mut names: BTreeMap<Vec<u8>, DomainName> = BTreeMap::new();
        let mut wildcards: BTreeSet<Vec<u8>> = BTreeSet::new();
        let mut signed = false;

        for rr in records {
            if !rr.name.is_subdomain_of(&apex) {
                log::warn!("ignoring out-of-zone data for {} in zone {}", rr.name, apex);
                continue;
            }

            if rr.rtype == QType::SOA {
                if rr.name != apex {
                    log::warn!("ignoring SOA not at the apex of zone {}", apex);
                    continue;
                }
                if let Some(prev) = &soa {
                    if prev.rdata != rr.rdata {
                        return Err(DNSError::ZoneFile(format!(
                            "zone {} has more than one SOA record",
                            apex
                        )));
                    }
                    continue;
                }
                soa = Some(rr.clone());
            }

            if rr.rtype == QType::NSEC || rr.rtype == QType::NSEC3 {
                signed = true;
            }

            let key = rr.name.canonical_key();
            if rr.name.is_wildcard() {
                wildcards.insert(rr.name.wildcard_base().canonical_key());
            }
            names.entry(key.clone()).or_insert_with(|| rr.name.clone());

            rrsets
                .entry((key, rr.rtype))
                .and_modify(|set| set.push(rr.clone()))
                .or_insert_with(|| RRSet::from_rr(rr));
        }

        let soa = soa.ok_or_else(|| {
            DNSError::ZoneFile(format!("zone {} has no SOA record", apex))
        })?;

        Ok(Zone {
            apex,
            soa,
            rrsets,
            names,
            wildcards,
            signed,
        })
    }

    pub fn serial(&self) -> u32 {
        match &self.soa.rdata {
            RData::SOA(soa) => soa.serial,
            _ => 0,
        }
    }

    pub fn soa_rdata(&self) -> Option<&SOA> {
        match &self.soa.rdata {
            RData::SOA(soa) => Some(soa),
            _ => None,
        }
    }

    // the TTL for negative answers: min(SOA TTL, SOA minimum) per RFC2308
    pub fn negative_ttl(&self) -> u32 {
        match &self.soa.rdata {
            RData::SOA(soa) => self.soa.ttl.min(soa.minimum),
            _ => self.soa.ttl,
        }
    }

    // the apex SOA with the negative TTL applied, for authority sections
    pub fn soa_for_authority(&self) -> RRSet {
        let mut set = RRSet::from_rr(self.soa.clone());
        set.ttl = self.negative_ttl();
        set
    }

    pub fn rrset(&self, name: &DomainName, rtype: RRType) -> Option<&RRSet> {
        self.rrsets.get(&(name.canonical_key(), rtype))
    }

    pub fn rrsets_at(&self, name: &DomainName) -> Vec<&RRSet> {
        let key = name.canonical_key();
        self.rrsets
            .range((key.clone(), RRType(0))..=(key, RRType(u16::MAX)))
            .map(|(_, set)| set)
            .collect()
    }

    /// All RRsets in canonical zone order (owner, then type).
    pub fn iter_rrsets(&self) -> impl Iterator<Item = &RRSet> {
        self.rrsets.values()
    }

    pub fn rrset_count(&self) -> usize {
        self.rrsets.len()
    }

    pub fn record_count(&self) -> usize {
        self.rrsets.values().map(|s| s.rdatas.len()).sum()
    }

    /// A name exists if it owns data or is an empty non-terminal (an
    /// ancestor of a name that owns data). Canonical keys make the latter a
    /// prefix probe.
    pub fn name_exists(&self, name: &DomainName) -> bool {
        let key = name.canonical_key();
        self.names
            .range(key.clone()..)
            .next()
            .map(|(k, _)| k.starts_with(&key))
            .unwrap_or(false)
    }

    /// The longest existing ancestor of `name` (the apex in the worst case).
    pub fn closest_encloser(&self, name: &DomainName) -> DomainName {
        let mut skip = 0;
        loop {
            let candidate = name.suffix(skip);
            if candidate.label_count() <= self.apex.label_count() {
                return self.apex.clone();
            }
            if self.name_exists(&candidate) {
                return candidate;
            }
            skip += 1;
        }
    }

    // the first zone cut crossed on the way down from the apex to `name`
    // (at most `name` itself, never the apex); anything at or below a
    // nested cut is occluded by the topmost one
    fn find_cut(&self, name: &DomainName) -> Option<&RRSet> {
        let apex_labels = self.apex.label_count();
        for depth in apex_labels + 1..=name.label_count() {
            let ancestor = name.suffix(name.label_count() - depth);
            if let Some(ns) = self.rrset(&ancestor, RRType::from(QType::NS)) {
                if self.rrset(&ancestor, RRType::from(QType::SOA)).is_none() {
                    return Some(ns);
                }
            }
        }
        None
    }

    // the first DNAME crossed on the way down, at a strict ancestor of
    // `name`; it redirects everything below its owner
    fn find_dname(&self, name: &DomainName) -> Option<&RRSet> {
        let apex_labels = self.apex.label_count();
        for depth in apex_labels..name.label_count() {
            let ancestor = name.suffix(name.label_count() - depth);
            if let Some(dname) = self.rrset(&ancestor, RRType::from(QType::DNAME)) {
                return Some(dname);
            }
        }
        None
    }

    fn step(&self, owner: &DomainName, qtype: RRType) -> DNSResult<Step> {
        if !owner.is_subdomain_of(&self.apex) {
            return Ok(Step::OutOfZone);
        }

        // a zone cut shadows everything at and below it
        if let Some(ns) = self.find_cut(owner) {
            return Ok(Step::Referral(ns.clone()));
        }

        if self.name_exists(owner) {
            if qtype == RRType::from(QType::ANY) {
                let all: Vec<RRSet> = self
                    .rrsets_at(owner)
                    .into_iter()
                    .filter(|s| !s.name.is_wildcard())
                    .cloned()
                    .collect();
                if all.is_empty() {
                    return Ok(Step::Nodata(owner.clone()));
                }
                return Ok(Step::Match(all, false));
            }

            if let Some(set) = self.rrset(owner, qtype) {
                return Ok(Step::Match(vec![set.clone()], false));
            }
            if let Some(cname) = self.rrset(owner, RRType::from(QType::CNAME)) {
                let target = match cname.rdatas.first() {
                    Some(RData::CNAME(target)) => target.clone(),
                    _ => return Err(DNSError::new("malformed CNAME rrset")),
                };
                return Ok(Step::Cname(cname.clone(), target));
            }
            return Ok(Step::Nodata(owner.clone()));
        }

        // DNAME redirection of everything below its owner
        if let Some(dname_set) = self.find_dname(owner) {
            let target = match dname_set.rdatas.first() {
                Some(RData::DNAME(target)) => target.clone(),
                _ => return Err(DNSError::new("malformed DNAME rrset")),
            };
            // substitute the DNAME owner suffix with its target
            let prefix_labels = owner.label_count() - dname_set.name.label_count();
            let mut rewritten = target;
            for label in owner.labels()[..prefix_labels].iter().rev() {
                rewritten = rewritten.prepend(label)?;
            }
            return Ok(Step::Dname(dname_set.clone(), rewritten));
        }

        // wildcard synthesis at the closest encloser
        let encloser = self.closest_encloser(owner);
        if self.wildcards.contains(&encloser.canonical_key()) {
            let wildcard = encloser.to_wildcard();
            if qtype == RRType::from(QType::ANY) {
                let all: Vec<RRSet> = self
                    .rrsets_at(&wildcard)
                    .into_iter()
                    .map(|s| s.with_owner(owner))
                    .collect();
                if !all.is_empty() {
                    return Ok(Step::Match(all, true));
                }
            }
            if let Some(set) = self.rrset(&wildcard, qtype) {
                return Ok(Step::Match(vec![set.with_owner(owner)], true));
            }
            if let Some(cname) = self.rrset(&wildcard, RRType::from(QType::CNAME)) {
                let target = match cname.rdatas.first() {
                    Some(RData::CNAME(target)) => target.clone(),
                    _ => return Err(DNSError::new("malformed CNAME rrset")),
                };
                return Ok(Step::Cname(cname.with_owner(owner), target));
            }
            // the wildcard exists but has no data of this type
            return Ok(Step::Nodata(owner.clone()));
        }

        Ok(Step::Nxdomain)
    }

    /// The authoritative lookup: exact match, CNAME/DNAME chasing bounded
    /// to 8 hops, wildcard expansion, delegation and denial.
    pub fn lookup(&self, qname: &DomainName, qtype: RRType) -> DNSResult<LookupOutcome> {
        let mut chain: Vec<RRSet> = Vec::new();
        let mut owner = qname.clone();
        let mut wildcard = false;

        for _hop in 0..=MAX_CNAME_CHAIN {
            match self.step(&owner, qtype)? {
                Step::Match(rrsets, from_wildcard) => {
                    wildcard |= from_wildcard;
                    chain.extend(rrsets);
                    return Ok(LookupOutcome::Answer { rrsets: chain, wildcard });
                }
                Step::Cname(set, target) => {
                    chain.push(set);
                    owner = target;
                }
                Step::Dname(set, rewritten) => {
                    // the DNAME plus a synthesized CNAME for the query name
                    chain.push(set.clone());
                    let cname = ResourceRecord::new(
                        owner.clone(),
                        RRType::from(QType::CNAME),
                        set.ttl,
                        RData::CNAME(rewritten.clone()),
                    );
                    chain.push(RRSet::from_rr(cname));
                    owner = rewritten;
                }
                Step::Referral(ns) => {
                    return Ok(LookupOutcome::Referral { chain, ns });
                }
                Step::Nodata(name) => {
                    return Ok(LookupOutcome::Nodata { chain, name });
                }
                Step::Nxdomain => {
                    if chain.is_empty() {
                        return Ok(LookupOutcome::Nxdomain { chain });
                    }
                    // a chased CNAME pointing at a hole still answers with
                    // the chain collected so far
                    return Ok(LookupOutcome::Answer { rrsets: chain, wildcard });
                }
                Step::OutOfZone => {
                    return Ok(LookupOutcome::Answer { rrsets: chain, wildcard });
                }
            }
        }

        Err(DNSError::DNSInternalError(InternalError::CnameChainTooLong))
    }

    /// The NSEC record whose owner/next span covers `name`, for NXDOMAIN
    /// and wildcard proofs in signed zones.
    pub fn nsec_covering(&self, name: &DomainName) -> Option<RRSet> {
        if !self.signed {
            return None;
        }
        let key = name.canonical_key();
        // walk backwards from the name to the previous owner with an NSEC
        for (k, _) in self.names.range(..=key).rev() {
            if let Some(nsec) = self.rrsets.get(&(k.clone(), RRType::from(QType::NSEC))) {
                return Some(nsec.clone());
            }
        }
        // wrapped: the last NSEC of the zone covers the front
        for (k, _) in self.names.iter().rev() {
            if let Some(nsec) = self.rrsets.get(&(k.clone(), RRType::from(QType::NSEC))) {
                return Some(nsec.clone());
            }
        }
        None
    }

    /// NSEC proof set for a non-existent name: the record covering the name
    /// itself plus the one covering the wildcard at the closest encloser.
    pub fn nxdomain_proof(&self, qname: &DomainName) -> Vec<RRSet> {
        let mut proof = Vec::new();
        if let Some(nsec) = self.nsec_covering(qname) {
            proof.push(nsec);
        }
        let wildcard = self.closest_encloser(qname).to_wildcard();
        if let Some(nsec) = self.nsec_covering(&wildcard) {
            if !proof.iter().any(|p| p.name == nsec.name) {
                proof.push(nsec);
            }
        }
        proof
    }

    /// Proof that a wildcard expansion was allowed: the NSEC covering the
    /// next-closer name.
    pub fn wildcard_proof(&self, qname: &DomainName) -> Option<RRSet> {
        if !self.signed {
            return None;
        }
        let encloser = self.closest_encloser(qname);
        let next_closer = qname.suffix(qname.label_count() - encloser.label_count() - 1);
        self.nsec_covering(&next_closer)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::rdata::MX;
    use std::net::Ipv4Addr;

    pub fn dn(s: &str) -> DomainName {
        DomainName::try_from(s).unwrap()
    }

    pub fn a_rr(name: &str, ip: [u8; 4]) -> ResourceRecord {
        ResourceRecord::new(
            dn(name),
            RRType::from(QType::A),
            300,
            RData::A(Ipv4Addr::from(ip)),
        )
    }

    pub fn ns_rr(name: &str, target: &str) -> ResourceRecord {
        ResourceRecord::new(dn(name), RRType::from(QType::NS), 300, RData::NS(dn(target)))
    }

    pub fn soa_rr(name: &str, serial: u32) -> ResourceRecord {
        ResourceRecord::new(
            dn(name),
            RRType::from(QType::SOA),
            3600,
            RData::SOA(SOA {
                mname: dn("ns1.example.com"),
                rname: dn("hostmaster.example.com"),
                serial,
                refresh: 7200,
                retry: 3600,
                expire: 1209600,
                minimum: 300,
            }),
        )
    }

    pub fn cname_rr(name: &str, target: &str) -> ResourceRecord {
        ResourceRecord::new(
            dn(name),
            RRType::from(QType::CNAME),
            300,
            RData::CNAME(dn(target)),
        )
    }

    pub fn sample_zone() -> Zone {
        Zone::from_records(
            dn("example.com"),
            vec![
                soa_rr("example.com", 2024010101),
                ns_rr("example.com", "ns1.example.com"),
                a_rr("ns1.example.com", [192, 0, 2, 1]),
                a_rr("www.example.com", [192, 0, 2, 10]),
                ResourceRecord::new(
                    dn("example.com"),
                    RRType::from(QType::MX),
                    300,
                    RData::MX(MX {
                        preference: 10,
                        exchange: dn("mail.example.com"),
                    }),
                ),
                a_rr("mail.example.com", [192, 0, 2, 25]),
                cname_rr("alias.example.com", "www.example.com"),
                a_rr("*.wild.example.com", [192, 0, 2, 5]),
                // a delegation with in-zone glue
                ns_rr("sub.example.com", "ns1.sub.example.com"),
                a_rr("ns1.sub.example.com", [192, 0, 2, 53]),
                // makes ent.deep.example.com an empty non-terminal
                a_rr("leaf.ent.deep.example.com", [192, 0, 2, 99]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn exact_match() {
        let zone = sample_zone();
        match zone.lookup(&dn("www.example.com"), RRType::from(QType::A)).unwrap() {
            LookupOutcome::Answer { rrsets, .. } => {
                assert_eq!(rrsets.len(), 1);
                assert_eq!(rrsets[0].name, dn("www.example.com"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn soa_at_apex() {
        let zone = sample_zone();
        assert_eq!(zone.serial(), 2024010101);
        match zone.lookup(&dn("example.com"), RRType::from(QType::SOA)).unwrap() {
            LookupOutcome::Answer { rrsets, .. } => {
                assert_eq!(rrsets[0].rtype, QType::SOA);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn nxdomain() {
        let zone = sample_zone();
        match zone.lookup(&dn("nx.example.com"), RRType::from(QType::A)).unwrap() {
            LookupOutcome::Nxdomain { chain } => assert!(chain.is_empty()),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn empty_non_terminal_is_nodata() {
        let zone = sample_zone();
        match zone
            .lookup(&dn("ent.deep.example.com"), RRType::from(QType::A))
            .unwrap()
        {
            LookupOutcome::Nodata { chain, name } => {
                assert!(chain.is_empty());
                assert_eq!(name, dn("ent.deep.example.com"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn cname_is_chased() {
        let zone = sample_zone();
        match zone.lookup(&dn("alias.example.com"), RRType::from(QType::A)).unwrap() {
            LookupOutcome::Answer { rrsets, .. } => {
                assert_eq!(rrsets.len(), 2);
                assert_eq!(rrsets[0].rtype, QType::CNAME);
                assert_eq!(rrsets[1].rtype, QType::A);
                assert_eq!(rrsets[1].name, dn("www.example.com"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn cname_loop_is_bounded() {
        let zone = Zone::from_records(
            dn("loop.test"),
            vec![
                soa_rr("loop.test", 1),
                cname_rr("a.loop.test", "b.loop.test"),
                cname_rr("b.loop.test", "a.loop.test"),
            ],
        )
        .unwrap();
        assert!(zone.lookup(&dn("a.loop.test"), RRType::from(QType::A)).is_err());
    }

    #[test]
    fn wildcard_expansion() {
        let zone = sample_zone();
        match zone
            .lookup(&dn("x.wild.example.com"), RRType::from(QType::A))
            .unwrap()
        {
            LookupOutcome::Answer { rrsets, .. } => {
                assert_eq!(rrsets.len(), 1);
                // owner rewritten to the query name
                assert_eq!(rrsets[0].name, dn("x.wild.example.com"));
                assert_eq!(rrsets[0].rdatas[0], RData::A(Ipv4Addr::new(192, 0, 2, 5)));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn wildcard_does_not_shadow_explicit_names() {
        let zone = sample_zone();
        // the wildcard base itself has no A record
        match zone
            .lookup(&dn("wild.example.com"), RRType::from(QType::A))
            .unwrap()
        {
            LookupOutcome::Nodata { .. } => {}
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn delegation_is_a_referral() {
        let zone = sample_zone();
        match zone
            .lookup(&dn("host.sub.example.com"), RRType::from(QType::A))
            .unwrap()
        {
            LookupOutcome::Referral { ns, .. } => {
                assert_eq!(ns.name, dn("sub.example.com"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        // the delegation point itself is also a referral
        match zone
            .lookup(&dn("sub.example.com"), RRType::from(QType::A))
            .unwrap()
        {
            LookupOutcome::Referral { .. } => {}
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn nested_cut_is_occluded_by_the_topmost() {
        let zone = Zone::from_records(
            dn("example.com"),
            vec![
                soa_rr("example.com", 1),
                ns_rr("example.com", "ns1.example.com"),
                ns_rr("sub.example.com", "ns1.sub.example.com"),
                // occluded: lives below the sub.example.com cut
                ns_rr("deep.sub.example.com", "ns1.deep.sub.example.com"),
            ],
        )
        .unwrap();
        match zone
            .lookup(&dn("x.deep.sub.example.com"), RRType::from(QType::A))
            .unwrap()
        {
            LookupOutcome::Referral { ns, .. } => {
                assert_eq!(ns.name, dn("sub.example.com"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn any_returns_all_rrsets() {
        let zone = sample_zone();
        match zone.lookup(&dn("example.com"), RRType::from(QType::ANY)).unwrap() {
            LookupOutcome::Answer { rrsets, .. } => {
                assert!(rrsets.len() >= 3); // SOA, NS, MX
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn duplicate_soa_rejected() {
        let mut records = vec![soa_rr("t.test", 1), soa_rr("t.test", 2)];
        records.push(a_rr("x.t.test", [1, 2, 3, 4]));
        assert!(Zone::from_records(dn("t.test"), records).is_err());
    }

    #[test]
    fn negative_ttl_is_soa_minimum() {
        let zone = sample_zone();
        // SOA TTL 3600, minimum 300
        assert_eq!(zone.negative_ttl(), 300);
        assert_eq!(zone.soa_for_authority().ttl, 300);
    }
}
