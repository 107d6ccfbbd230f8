//! Base structures for DNS messages. Taken from https://datatracker.ietf.org/doc/html/rfc1035
//! plus the updates the server needs: EDNS0 (RFC6891), TSIG (RFC8945),
//! NOTIFY (RFC1996) and AXFR (RFC5936).
//!
//! The DnsStruct procedural macro automatically defines the implementation of
//! the ToNetworkOrder/FromNetworkOrder traits. The DnsEnum procedural macro
//! automatically implements Default, FromStr, TryFrom<u8> and TryFrom<u16>.
use std::fmt;

use crate::dname::DomainName;
use crate::rdata::RData;

use dns_derive::DnsEnum;

// DNS packets are called "messages" in RFC1035:
// "All communications inside of the domain protocol are carried in a single
// format called a message"
pub const QHEADER_SIZE: usize = 12;

// maximum reply without EDNS0
pub const MAX_UDP_PACKET_SIZE: usize = 512;

// default EDNS0 advertised payload
pub const EDNS_MAX_MESSAGE_LEN: usize = 4096;

// minimum IPv6 MTU, used as the EDNS payload on v6 when configured so
pub const IPV6_MIN_MTU: usize = 1280;

// TCP messages carry a 2 octet length prefix, so they are bounded by it
pub const MAX_TCP_MESSAGE_LEN: usize = 65535;

pub const DEFAULT_PORT: u16 = 53;

// DNS packet header: https://datatracker.ietf.org/doc/html/rfc1035#section-4.1.1
#[derive(Debug, Default, Clone)]
pub struct DNSPacketHeader {
    pub id: u16, // A 16 bit identifier assigned by the program that
    // generates any kind of query. This identifier is copied into
    // the corresponding reply to match up replies to outstanding queries.
    pub flags: DNSPacketFlags,
    pub qd_count: u16, // number of entries in the question section
    pub an_count: u16, // number of resource records in the answer section
    pub ns_count: u16, // number of RRs in the authority records section
    pub ar_count: u16, // number of RRs in the additional records section
}

// Flags: https://datatracker.ietf.org/doc/html/rfc1035#section-4.1.1
//                                1  1  1  1  1  1
//  0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
// +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
// |QR|   Opcode  |AA|TC|RD|RA| Z|AD|CD|   RCODE   |
// +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
#[derive(Debug, Default, Clone)]
pub struct DNSPacketFlags {
    pub packet_type: PacketType, // one bit: query (0) or response (1)
    pub op_code: OpCode,         // four bits specifying the kind of query
    pub authoritative_answer: bool, // valid in responses: the responding
    // name server is an authority for the domain name in the question
    pub truncated: bool, // this message was cut down to what fits the channel
    pub recursion_desired: bool, // copied into the response; we never recurse
    pub recursion_available: bool, // always false here, this is an
    // authoritative-only server
    pub z: bool,               // reserved, must be zero
    pub authentic_data: bool,  // DNSSEC (RFC4035)
    pub checking_disabled: bool, // DNSSEC (RFC4035)
    pub response_code: ResponseCode, // 4 bits in the header, extended by
                                     // EDNS0/TSIG to 12 bits
}

/// The flags' first bit is 0 or 1 meaning a query or a response. Better is to
/// use an enum which is both clearer and type oriented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, DnsEnum)]
#[repr(u8)]
pub enum PacketType {
    Query = 0,
    Response = 1,
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            PacketType::Query => write!(f, "QUERY"),
            PacketType::Response => write!(f, "RESPONSE"),
        }
    }
}

// op codes: https://www.iana.org/assignments/dns-parameters/dns-parameters.xhtml#dns-parameters-5
#[derive(Debug, Clone, Copy, PartialEq, Eq, DnsEnum)]
#[repr(u8)]
pub enum OpCode {
    Query = 0,  // [RFC1035]
    IQuery = 1, // (Inverse Query, OBSOLETE) [RFC3425]
    Status = 2, // [RFC1035]
    Unassigned = 3,
    Notify = 4, // [RFC1996]
    Update = 5, // [RFC2136]
    DSO = 6,    // DNS Stateful Operations [RFC8490]
                // 7-15 Unassigned
}

// response codes: https://www.iana.org/assignments/dns-parameters/dns-parameters.xhtml#dns-parameters-6
#[derive(Debug, Clone, Copy, PartialEq, Eq, DnsEnum)]
#[repr(u16)]
pub enum ResponseCode {
    NoError = 0,  // No Error	[RFC1035]
    FormErr = 1,  // Format Error	[RFC1035]
    ServFail = 2, // Server Failure	[RFC1035]
    NXDomain = 3, // Non-Existent Domain	[RFC1035]
    NotImp = 4,   // Not Implemented	[RFC1035]
    Refused = 5,  // Query Refused	[RFC1035]
    YXDomain = 6, // Name Exists when it should not	[RFC2136]
    YXRRSet = 7,  // RR Set Exists when it should not	[RFC2136]
    NXRRSet = 8,  // RR Set that should exist does not	[RFC2136]
    NotAuth = 9,  // Not Authorized	[RFC8945]
    NotZone = 10, // Name not contained in zone	[RFC2136]
    // 11-15 Unassigned
    BADVERS = 16, // Bad OPT Version	[RFC6891]
}

// extended rcodes carried in the TSIG RR error field [RFC8945]
#[derive(Debug, Clone, Copy, PartialEq, Eq, DnsEnum)]
#[repr(u16)]
pub enum TsigRcode {
    NOERROR = 0,
    BADSIG = 16,   // TSIG Signature Failure
    BADKEY = 17,   // Key not recognized
    BADTIME = 18,  // Signature out of time window
    BADTRUNC = 22, // Bad Truncation
}

// RR type codes: https://www.iana.org/assignments/dns-parameters/dns-parameters.xhtml#dns-parameters-4
#[derive(Debug, Copy, Clone, PartialEq, Eq, DnsEnum)]
#[repr(u16)]
pub enum QType {
    A = 1,       // a host address	[RFC1035]
    NS = 2,      // an authoritative name server	[RFC1035]
    MD = 3,      // a mail destination (OBSOLETE - use MX)	[RFC1035]
    MF = 4,      // a mail forwarder (OBSOLETE - use MX)	[RFC1035]
    CNAME = 5,   // the canonical name for an alias	[RFC1035]
    SOA = 6,     // marks the start of a zone of authority	[RFC1035]
    MB = 7,      // a mailbox domain name (EXPERIMENTAL)	[RFC1035]
    MG = 8,      // a mail group member (EXPERIMENTAL)	[RFC1035]
    MR = 9,      // a mail rename domain name (EXPERIMENTAL)	[RFC1035]
    NULL = 10,   // a null RR (EXPERIMENTAL)	[RFC1035]
    WKS = 11,    // a well known service description	[RFC1035]
    PTR = 12,    // a domain name pointer	[RFC1035]
    HINFO = 13,  // host information	[RFC1035]
    MINFO = 14,  // mailbox or mail list information	[RFC1035]
    MX = 15,     // mail exchange	[RFC1035]
    TXT = 16,    // text strings	[RFC1035]
    RP = 17,     // for Responsible Person	[RFC1183]
    AFSDB = 18,  // for AFS Data Base location	[RFC1183][RFC5864]
    AAAA = 28,   // IP6 Address	[RFC3596]
    LOC = 29,    // Location Information	[RFC1876]
    SRV = 33,    // Server Selection	[RFC2782]
    NAPTR = 35,  // Naming Authority Pointer	[RFC3403]
    KX = 36,     // Key Exchanger	[RFC2230]
    CERT = 37,   // CERT	[RFC4398]
    DNAME = 39,  // DNAME	[RFC6672]
    OPT = 41,    // OPT	[RFC3225][RFC6891]
    APL = 42,    // APL	[RFC3123]
    DS = 43,     // Delegation Signer	[RFC4034]
    SSHFP = 44,  // SSH Key Fingerprint	[RFC4255]
    RRSIG = 46,  // RRSIG	[RFC4034]
    NSEC = 47,   // NSEC	[RFC4034][RFC9077]
    DNSKEY = 48, // DNSKEY	[RFC4034]
    DHCID = 49,  // DHCID	[RFC4701]
    NSEC3 = 50,  // NSEC3	[RFC5155][RFC9077]
    NSEC3PARAM = 51, // NSEC3PARAM	[RFC5155]
    TLSA = 52,   // TLSA	[RFC6698]
    SPF = 99,    // [RFC7208]
    TKEY = 249,  // Transaction Key	[RFC2930]
    TSIG = 250,  // Transaction Signature	[RFC8945]
    IXFR = 251,  // incremental transfer	[RFC1995]
    AXFR = 252,  // transfer of an entire zone	[RFC1035][RFC5936]
    MAILB = 253, // mailbox-related RRs (MB, MG or MR)	[RFC1035]
    MAILA = 254, // mail agent RRs (OBSOLETE - see MX)	[RFC1035]
    ANY = 255,   // A request for some or all records the server has available
    CAA = 257,   // Certification Authority Restriction	[RFC8659]
}

/// The wire carries arbitrary 16 bit type values, assigned or not, and an
/// authoritative server has to serve what it loaded even for types it knows
/// nothing about. So records hold the raw value; `QType` supplies the
/// mnemonics for the assigned ones.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RRType(pub u16);

impl RRType {
    pub fn qtype(&self) -> Option<QType> {
        QType::try_from(self.0).ok()
    }
}

impl From<QType> for RRType {
    fn from(q: QType) -> Self {
        RRType(q as u16)
    }
}

impl PartialEq<QType> for RRType {
    fn eq(&self, other: &QType) -> bool {
        self.0 == *other as u16
    }
}

/// ```
/// use authdns::rfc1035::{QType, RRType};
/// use std::str::FromStr;
///
/// assert_eq!(RRType::from(QType::AAAA).to_string(), "AAAA");
/// assert_eq!(RRType(65280).to_string(), "TYPE65280");
/// assert_eq!(RRType::from_str("TYPE65280").unwrap(), RRType(65280));
/// assert_eq!(RRType::from_str("MX").unwrap(), RRType::from(QType::MX));
/// ```
impl fmt::Display for RRType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.qtype() {
            Some(q) => write!(f, "{:?}", q),
            // RFC3597 mnemonic for unassigned types
            None => write!(f, "TYPE{}", self.0),
        }
    }
}

impl std::str::FromStr for RRType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(num) = s.strip_prefix("TYPE") {
            let value = num
                .parse::<u16>()
                .map_err(|_| format!("bad RFC3597 type '{}'", s))?;
            return Ok(RRType(value));
        }
        QType::from_str(s).map(RRType::from)
    }
}

// RR Class values: https://datatracker.ietf.org/doc/html/rfc1035#section-3.2.4
#[derive(Debug, Copy, Clone, PartialEq, Eq, DnsEnum)]
#[repr(u16)]
pub enum QClass {
    IN = 1, // the Internet
    CS = 2, // the CSNET class (Obsolete)
    CH = 3, // the CHAOS class
    HS = 4, // Hesiod [Dyer 87]
    NONE = 254,
    ANY = 255,
}

impl fmt::Display for QClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Records carry the raw 16 bit class: the OPT pseudo-RR stores the EDNS
/// payload size there, so an enum cannot represent it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RRClass(pub u16);

impl Default for RRClass {
    fn default() -> Self {
        RRClass(QClass::IN as u16)
    }
}

impl RRClass {
    pub fn qclass(&self) -> Option<QClass> {
        QClass::try_from(self.0).ok()
    }

    pub fn is_in(&self) -> bool {
        self.0 == QClass::IN as u16
    }
}

impl From<QClass> for RRClass {
    fn from(c: QClass) -> Self {
        RRClass(c as u16)
    }
}

impl PartialEq<QClass> for RRClass {
    fn eq(&self, other: &QClass) -> bool {
        self.0 == *other as u16
    }
}

impl fmt::Display for RRClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.qclass() {
            Some(c) => write!(f, "{}", c),
            // RFC3597 mnemonic for unassigned classes
            None => write!(f, "CLASS{}", self.0),
        }
    }
}

impl std::str::FromStr for RRClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(num) = s.strip_prefix("CLASS") {
            let value = num
                .parse::<u16>()
                .map_err(|_| format!("bad RFC3597 class '{}'", s))?;
            return Ok(RRClass(value));
        }
        QClass::from_str(s).map(RRClass::from)
    }
}

//--------------------------------------------------------------------------------
// Question structure: https://datatracker.ietf.org/doc/html/rfc1035#section-4.1.2
//--------------------------------------------------------------------------------
#[derive(Debug, Default, Clone)]
pub struct DNSQuestion {
    pub name: DomainName,
    pub rtype: RRType,
    pub class: QClass,
}

impl DNSQuestion {
    /// Create a new question. By default, the IN class is used if None is
    /// provided as the qclass parameter
    pub fn new(domain: &str, qtype: QType, qclass: Option<QClass>) -> crate::error::DNSResult<Self> {
        let dn = DomainName::try_from(domain)?;
        let question = DNSQuestion {
            name: dn,
            rtype: RRType::from(qtype),
            class: qclass.unwrap_or(QClass::IN),
        };

        Ok(question)
    }
}

impl fmt::Display for DNSQuestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.name, self.class, self.rtype)
    }
}

//------------------------------------------------------------------------
// Definition of a resource record in the RFC1035
//------------------------------------------------------------------------
#[derive(Debug, Default, Clone)]
pub struct ResourceRecord {
    pub name: DomainName, // an owner name, i.e., the name of the node to
    // which this resource record pertains
    pub rtype: RRType,
    pub class: RRClass,
    pub ttl: u32, // the time interval that the resource record may be
    // cached. Zero means use for the transaction in progress only.
    pub rdata: RData,
}

impl ResourceRecord {
    pub fn new(name: DomainName, rtype: RRType, ttl: u32, rdata: RData) -> Self {
        ResourceRecord {
            name,
            rtype,
            class: RRClass::from(QClass::IN),
            ttl,
            rdata,
        }
    }
}

impl fmt::Display for ResourceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}",
            self.name, self.ttl, self.class, self.rtype, self.rdata
        )
    }
}

/// A set of records sharing owner, type and class. All members share the TTL
/// of the first record added and duplicate RDATA is dropped.
#[derive(Debug, Default, Clone)]
pub struct RRSet {
    pub name: DomainName,
    pub rtype: RRType,
    pub class: RRClass,
    pub ttl: u32,
    pub rdatas: Vec<RData>,
}

impl RRSet {
    pub fn from_rr(rr: ResourceRecord) -> Self {
        RRSet {
            name: rr.name,
            rtype: rr.rtype,
            class: rr.class,
            ttl: rr.ttl,
            rdatas: vec![rr.rdata],
        }
    }

    // duplicates (same owner/type/class/rdata) are silently dropped
    pub fn push(&mut self, rr: ResourceRecord) {
        debug_assert!(rr.rtype == self.rtype);
        if !self.rdatas.iter().any(|r| *r == rr.rdata) {
            self.rdatas.push(rr.rdata);
        }
    }

    pub fn records(&self) -> impl Iterator<Item = ResourceRecord> + '_ {
        self.rdatas.iter().map(move |rdata| ResourceRecord {
            name: self.name.clone(),
            rtype: self.rtype,
            class: self.class,
            ttl: self.ttl,
            rdata: rdata.clone(),
        })
    }

    // same RRset with the owner rewritten, for wildcard expansion
    pub fn with_owner(&self, owner: &DomainName) -> RRSet {
        let mut c = self.clone();
        c.name = owner.clone();
        c
    }
}

// A whole message, sections parsed out
#[derive(Debug, Default, Clone)]
pub struct DNSMessage {
    pub header: DNSPacketHeader,
    pub questions: Vec<DNSQuestion>,
    pub answers: Vec<ResourceRecord>,
    pub authorities: Vec<ResourceRecord>,
    pub additionals: Vec<ResourceRecord>,
}

impl DNSMessage {
    // Add another question into the list of questions to send
    pub fn push_question(&mut self, question: DNSQuestion) {
        self.questions.push(question);

        // as we add a question, we need to increment the counter
        self.header.qd_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn qtype_mnemonics() {
        assert_eq!(QType::try_from(6u16).unwrap(), QType::SOA);
        assert_eq!(QType::from_str("AXFR").unwrap(), QType::AXFR);
        assert!(QType::try_from(65280u16).is_err());
    }

    #[test]
    fn rrtype_wraps_unassigned() {
        let t = RRType(65280);
        assert!(t.qtype().is_none());
        assert_eq!(RRType::from_str("TYPE65280").unwrap(), t);
        assert_eq!(RRType::from(QType::SOA), RRType(6));
        assert!(RRType(252) == QType::AXFR);
    }

    #[test]
    fn rrset_dedups() {
        let a = ResourceRecord::new(
            DomainName::try_from("x.example.com").unwrap(),
            RRType::from(QType::A),
            300,
            RData::A(std::net::Ipv4Addr::new(192, 0, 2, 5)),
        );
        let mut set = RRSet::from_rr(a.clone());
        set.push(a);
        assert_eq!(set.rdatas.len(), 1);
    }
}
