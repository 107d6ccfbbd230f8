//! Definition of all RRs from all different RFCs starting with RFC1035,
//! their wire codecs and their presentation (master file) form.
//!
//! Per-type behavior is table-driven: `RRTYPE_DESCRIPTORS` maps a type number
//! to its mnemonic and the ordered list of field kinds, and both the
//! presentation parser and printer walk that table. Types absent from the
//! table round-trip through the RFC3597 `\# len hex` syntax.
use std::fmt;
use std::io::Cursor;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::dname::DomainName;
use crate::error::{DNSError, DNSResult, InternalError};
use crate::network_order::{FromNetworkOrder, ToNetworkOrder};
use crate::rfc1035::{QType, RRType};
use crate::util::parse_ttl;

use dns_derive::DnsStruct;

//------------------------------------------------------------------------
// Field kinds making up the RDATA of the known types
//------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdataKind {
    // a domain name, possibly compressed on the wire
    Dname,
    // a domain name that must never be compressed (DNSSEC types, RFC3597)
    UncompressedDname,
    Byte,
    Short,
    Long,
    // an RR type mnemonic (or TYPEnnn), stored as its 16 bit value
    Type,
    Ipv4,
    Ipv6,
    // base64 blob, runs to the end of the RDATA
    Base64,
    // hex blob, runs to the end of the RDATA
    Hex,
    // length-prefixed hex blob (NSEC3 salt/next hash)
    HexLen,
    // one or more <character-string>s
    Text,
    // a 32 bit timestamp (seconds since the epoch)
    Time,
    // a 32 bit duration, accepts the s/m/h/d/w suffixes in master files
    Period,
    // NSEC/NSEC3 window-block type bitmap
    TypeBitmap,
}

pub struct RRTypeDescriptor {
    pub rtype: u16,
    pub mnemonic: &'static str,
    pub kinds: &'static [RdataKind],
}

use RdataKind::*;

pub const RRTYPE_DESCRIPTORS: &[RRTypeDescriptor] = &[
    RRTypeDescriptor { rtype: 1, mnemonic: "A", kinds: &[Ipv4] },
    RRTypeDescriptor { rtype: 2, mnemonic: "NS", kinds: &[Dname] },
    RRTypeDescriptor { rtype: 5, mnemonic: "CNAME", kinds: &[Dname] },
    RRTypeDescriptor { rtype: 6, mnemonic: "SOA", kinds: &[Dname, Dname, Long, Period, Period, Period, Period] },
    RRTypeDescriptor { rtype: 12, mnemonic: "PTR", kinds: &[Dname] },
    RRTypeDescriptor { rtype: 13, mnemonic: "HINFO", kinds: &[Text, Text] },
    RRTypeDescriptor { rtype: 15, mnemonic: "MX", kinds: &[Short, Dname] },
    RRTypeDescriptor { rtype: 16, mnemonic: "TXT", kinds: &[Text] },
    RRTypeDescriptor { rtype: 28, mnemonic: "AAAA", kinds: &[Ipv6] },
    RRTypeDescriptor { rtype: 33, mnemonic: "SRV", kinds: &[Short, Short, Short, Dname] },
    RRTypeDescriptor { rtype: 39, mnemonic: "DNAME", kinds: &[UncompressedDname] },
    RRTypeDescriptor { rtype: 43, mnemonic: "DS", kinds: &[Short, Byte, Byte, Hex] },
    RRTypeDescriptor { rtype: 46, mnemonic: "RRSIG", kinds: &[Type, Byte, Byte, Long, Time, Time, Short, UncompressedDname, Base64] },
    RRTypeDescriptor { rtype: 47, mnemonic: "NSEC", kinds: &[UncompressedDname, TypeBitmap] },
    RRTypeDescriptor { rtype: 48, mnemonic: "DNSKEY", kinds: &[Short, Byte, Byte, Base64] },
    RRTypeDescriptor { rtype: 50, mnemonic: "NSEC3", kinds: &[Byte, Byte, Short, HexLen, HexLen, TypeBitmap] },
    RRTypeDescriptor { rtype: 51, mnemonic: "NSEC3PARAM", kinds: &[Byte, Byte, Short, HexLen] },
];

pub fn descriptor_by_type(rtype: RRType) -> Option<&'static RRTypeDescriptor> {
    RRTYPE_DESCRIPTORS.iter().find(|d| d.rtype == rtype.0)
}

//------------------------------------------------------------------------
// Fixed-field RRs get their wire codec from the DnsStruct derive
//------------------------------------------------------------------------

// SOA RR
#[derive(Debug, Default, Clone, PartialEq, DnsStruct)]
pub struct SOA {
    pub mname: DomainName, // the name server that was the original or
    // primary source of data for this zone
    pub rname: DomainName, // the mailbox of the person responsible
    pub serial: u32, // version number of the zone; wraps and must be
    // compared using sequence space arithmetic (RFC1982)
    pub refresh: u32, // interval before the zone should be refreshed
    pub retry: u32,   // interval before a failed refresh should be retried
    pub expire: u32,  // upper limit before the zone is no longer authoritative
    pub minimum: u32, // minimum TTL, doubles as the negative-answer TTL
                      // (RFC2308)
}

// MX RR
#[derive(Debug, Default, Clone, PartialEq, DnsStruct)]
pub struct MX {
    pub preference: u16, // lower values are preferred
    pub exchange: DomainName, // a host willing to act as a mail exchange
}

// HINFO RR
#[derive(Debug, Default, Clone, PartialEq, DnsStruct)]
pub struct HINFO {
    pub cpu: CharacterString,
    pub os: CharacterString,
}

// SRV RR [RFC2782]
#[derive(Debug, Default, Clone, PartialEq, DnsStruct)]
pub struct SRV {
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    pub target: DomainName,
}

//------------------------------------------------------------------------
// Variable-tail RRs are parsed by hand against the RDLENGTH bound
//------------------------------------------------------------------------

// DS RR [RFC4034]
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DS {
    pub key_tag: u16,
    pub algorithm: u8,
    pub digest_type: u8,
    pub digest: Vec<u8>,
}

// RRSIG RR [RFC4034]
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RRSIG {
    pub type_covered: RRType,
    pub algorithm: u8,
    pub labels: u8,
    pub original_ttl: u32,
    pub expiration: u32,
    pub inception: u32,
    pub key_tag: u16,
    pub signer: DomainName,
    pub signature: Vec<u8>,
}

// NSEC RR [RFC4034]
#[derive(Debug, Default, Clone, PartialEq)]
pub struct NSEC {
    pub next: DomainName,
    pub types: Vec<RRType>,
}

// DNSKEY RR [RFC4034]
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DNSKEY {
    pub flags: u16,
    pub protocol: u8,
    pub algorithm: u8,
    pub public_key: Vec<u8>,
}

// NSEC3 RR [RFC5155]
#[derive(Debug, Default, Clone, PartialEq)]
pub struct NSEC3 {
    pub hash_algorithm: u8,
    pub flags: u8,
    pub iterations: u16,
    pub salt: Vec<u8>,
    pub next_hashed: Vec<u8>,
    pub types: Vec<RRType>,
}

// TSIG RR rdata [RFC8945 §4.2]
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TSIG {
    pub algorithm: DomainName,
    pub time_signed: u64, // 48 bits on the wire
    pub fudge: u16,
    pub mac: Vec<u8>,
    pub original_id: u16,
    pub error: u16,
    pub other: Vec<u8>, // carries the server clock on BADTIME
}

// Character string as described in: https://datatracker.ietf.org/doc/html/rfc1035#section-4.1.4
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CharacterString(pub Vec<u8>);

impl From<&str> for CharacterString {
    fn from(s: &str) -> Self {
        CharacterString(s.as_bytes().to_vec())
    }
}

impl fmt::Display for CharacterString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"")?;
        for &b in &self.0 {
            let c = b as char;
            if c == '"' || c == '\\' {
                write!(f, "\\{}", c)?;
            } else if c.is_ascii_graphic() || c == ' ' {
                write!(f, "{}", c)?;
            } else {
                write!(f, "\\{:03}", b)?;
            }
        }
        write!(f, "\"")
    }
}

impl ToNetworkOrder for CharacterString {
    fn to_network_bytes(&self, v: &mut Vec<u8>) -> std::io::Result<usize> {
        v.write_u8(self.0.len() as u8)?;
        v.extend_from_slice(&self.0);
        Ok(1 + self.0.len())
    }
}

impl FromNetworkOrder for CharacterString {
    fn from_network_bytes(&mut self, v: &mut Cursor<&[u8]>) -> DNSResult<()> {
        let size = v.read_u8()? as usize;
        let mut data = vec![0u8; size];
        std::io::Read::read_exact(v, &mut data)?;
        self.0 = data;
        Ok(())
    }
}

//------------------------------------------------------------------------
// The tagged RDATA variant
//------------------------------------------------------------------------
#[derive(Debug, Clone, PartialEq)]
pub enum RData {
    A(Ipv4Addr),
    NS(DomainName),
    CNAME(DomainName),
    SOA(SOA),
    PTR(DomainName),
    HINFO(HINFO),
    MX(MX),
    TXT(Vec<CharacterString>),
    AAAA(Ipv6Addr),
    SRV(SRV),
    DNAME(DomainName),
    DS(DS),
    RRSIG(RRSIG),
    NSEC(NSEC),
    DNSKEY(DNSKEY),
    NSEC3(NSEC3),
    NSEC3PARAM(NSEC3),
    // raw EDNS options, interpreted by the edns module
    OPT(Vec<u8>),
    TSIG(TSIG),
    // opaque bytes for every type we have no descriptor for
    Unknown(Vec<u8>),
}

impl Default for RData {
    fn default() -> Self {
        RData::Unknown(Vec::new())
    }
}

fn read_tail(buffer: &mut Cursor<&[u8]>, end: u64) -> DNSResult<Vec<u8>> {
    if buffer.position() > end {
        return Err(DNSError::DNSInternalError(InternalError::RdataLengthMismatch));
    }
    let mut data = vec![0u8; (end - buffer.position()) as usize];
    std::io::Read::read_exact(buffer, &mut data)?;
    Ok(data)
}

fn read_dname(buffer: &mut Cursor<&[u8]>) -> DNSResult<DomainName> {
    let mut dn = DomainName::default();
    dn.from_network_bytes(buffer)?;
    Ok(dn)
}

impl RData {
    /// Decode the RDATA of a record of type `rtype` from the message cursor.
    /// `rd_length` bounds the field; compressed names inside the RDATA still
    /// resolve against the whole message.
    pub fn from_wire(
        rtype: RRType,
        buffer: &mut Cursor<&[u8]>,
        rd_length: u16,
    ) -> DNSResult<RData> {
        let end = buffer.position() + rd_length as u64;

        let rdata = match rtype.qtype() {
            Some(QType::A) => {
                let mut ip = Ipv4Addr::UNSPECIFIED;
                ip.from_network_bytes(buffer)?;
                RData::A(ip)
            }
            Some(QType::NS) => RData::NS(read_dname(buffer)?),
            Some(QType::CNAME) => RData::CNAME(read_dname(buffer)?),
            Some(QType::PTR) => RData::PTR(read_dname(buffer)?),
            Some(QType::DNAME) => RData::DNAME(read_dname(buffer)?),
            Some(QType::SOA) => {
                let mut soa = SOA::default();
                soa.from_network_bytes(buffer)?;
                RData::SOA(soa)
            }
            Some(QType::HINFO) => {
                let mut hinfo = HINFO::default();
                hinfo.from_network_bytes(buffer)?;
                RData::HINFO(hinfo)
            }
            Some(QType::MX) => {
                let mut mx = MX::default();
                mx.from_network_bytes(buffer)?;
                RData::MX(mx)
            }
            Some(QType::SRV) => {
                let mut srv = SRV::default();
                srv.from_network_bytes(buffer)?;
                RData::SRV(srv)
            }
            Some(QType::AAAA) => {
                let mut ip = Ipv6Addr::UNSPECIFIED;
                ip.from_network_bytes(buffer)?;
                RData::AAAA(ip)
            }
            Some(QType::TXT) => {
                let mut strings = Vec::new();
                while buffer.position() < end {
                    let mut cs = CharacterString::default();
                    cs.from_network_bytes(buffer)?;
                    strings.push(cs);
                }
                RData::TXT(strings)
            }
            Some(QType::DS) => {
                let key_tag = buffer.read_u16::<BigEndian>()?;
                let algorithm = buffer.read_u8()?;
                let digest_type = buffer.read_u8()?;
                RData::DS(DS {
                    key_tag,
                    algorithm,
                    digest_type,
                    digest: read_tail(buffer, end)?,
                })
            }
            Some(QType::RRSIG) => {
                let type_covered = RRType(buffer.read_u16::<BigEndian>()?);
                let algorithm = buffer.read_u8()?;
                let labels = buffer.read_u8()?;
                let original_ttl = buffer.read_u32::<BigEndian>()?;
                let expiration = buffer.read_u32::<BigEndian>()?;
                let inception = buffer.read_u32::<BigEndian>()?;
                let key_tag = buffer.read_u16::<BigEndian>()?;
                let signer = read_dname(buffer)?;
                RData::RRSIG(RRSIG {
                    type_covered,
                    algorithm,
                    labels,
                    original_ttl,
                    expiration,
                    inception,
                    key_tag,
                    signer,
                    signature: read_tail(buffer, end)?,
                })
            }
            Some(QType::NSEC) => {
                let next = read_dname(buffer)?;
                let bitmap = read_tail(buffer, end)?;
                RData::NSEC(NSEC {
                    next,
                    types: decode_type_bitmap(&bitmap)?,
                })
            }
            Some(QType::DNSKEY) => {
                let flags = buffer.read_u16::<BigEndian>()?;
                let protocol = buffer.read_u8()?;
                let algorithm = buffer.read_u8()?;
                RData::DNSKEY(DNSKEY {
                    flags,
                    protocol,
                    algorithm,
                    public_key: read_tail(buffer, end)?,
                })
            }
            Some(QType::NSEC3) | Some(QType::NSEC3PARAM) => {
                let hash_algorithm = buffer.read_u8()?;
                let flags = buffer.read_u8()?;
                let iterations = buffer.read_u16::<BigEndian>()?;
                let salt_len = buffer.read_u8()? as usize;
                let mut salt = vec![0u8; salt_len];
                std::io::Read::read_exact(buffer, &mut salt)?;
                if rtype == QType::NSEC3PARAM {
                    RData::NSEC3PARAM(NSEC3 {
                        hash_algorithm,
                        flags,
                        iterations,
                        salt,
                        next_hashed: Vec::new(),
                        types: Vec::new(),
                    })
                } else {
                    let next_len = buffer.read_u8()? as usize;
                    let mut next_hashed = vec![0u8; next_len];
                    std::io::Read::read_exact(buffer, &mut next_hashed)?;
                    let bitmap = read_tail(buffer, end)?;
                    RData::NSEC3(NSEC3 {
                        hash_algorithm,
                        flags,
                        iterations,
                        salt,
                        next_hashed,
                        types: decode_type_bitmap(&bitmap)?,
                    })
                }
            }
            Some(QType::OPT) => RData::OPT(read_tail(buffer, end)?),
            Some(QType::TSIG) => {
                let algorithm = read_dname(buffer)?;
                let high = buffer.read_u16::<BigEndian>()? as u64;
                let low = buffer.read_u32::<BigEndian>()? as u64;
                let fudge = buffer.read_u16::<BigEndian>()?;
                let mac_size = buffer.read_u16::<BigEndian>()? as usize;
                let mut mac = vec![0u8; mac_size];
                std::io::Read::read_exact(buffer, &mut mac)?;
                let original_id = buffer.read_u16::<BigEndian>()?;
                let error = buffer.read_u16::<BigEndian>()?;
                let other_len = buffer.read_u16::<BigEndian>()? as usize;
                let mut other = vec![0u8; other_len];
                std::io::Read::read_exact(buffer, &mut other)?;
                RData::TSIG(TSIG {
                    algorithm,
                    time_signed: (high << 32) | low,
                    fudge,
                    mac,
                    original_id,
                    error,
                    other,
                })
            }
            _ => RData::Unknown(read_tail(buffer, end)?),
        };

        // the parsed fields must use up exactly RDLENGTH octets
        if buffer.position() != end {
            return Err(DNSError::DNSInternalError(InternalError::RdataLengthMismatch));
        }
        Ok(rdata)
    }

    /// Uncompressed wire form; RDATA names are emitted verbatim so that
    /// DNSSEC types keep their canonical form.
    pub fn to_wire(&self, v: &mut Vec<u8>) -> std::io::Result<usize> {
        let start = v.len();
        match self {
            RData::A(ip) => {
                ip.to_network_bytes(v)?;
            }
            RData::NS(dn) | RData::CNAME(dn) | RData::PTR(dn) | RData::DNAME(dn) => {
                dn.to_wire(v);
            }
            RData::SOA(soa) => {
                soa.to_network_bytes(v)?;
            }
            RData::HINFO(hinfo) => {
                hinfo.to_network_bytes(v)?;
            }
            RData::MX(mx) => {
                mx.to_network_bytes(v)?;
            }
            RData::TXT(strings) => {
                for cs in strings {
                    cs.to_network_bytes(v)?;
                }
            }
            RData::AAAA(ip) => {
                ip.to_network_bytes(v)?;
            }
            RData::SRV(srv) => {
                srv.to_network_bytes(v)?;
            }
            RData::DS(ds) => {
                v.write_u16::<BigEndian>(ds.key_tag)?;
                v.write_u8(ds.algorithm)?;
                v.write_u8(ds.digest_type)?;
                v.extend_from_slice(&ds.digest);
            }
            RData::RRSIG(sig) => {
                v.write_u16::<BigEndian>(sig.type_covered.0)?;
                v.write_u8(sig.algorithm)?;
                v.write_u8(sig.labels)?;
                v.write_u32::<BigEndian>(sig.original_ttl)?;
                v.write_u32::<BigEndian>(sig.expiration)?;
                v.write_u32::<BigEndian>(sig.inception)?;
                v.write_u16::<BigEndian>(sig.key_tag)?;
                sig.signer.to_wire(v);
                v.extend_from_slice(&sig.signature);
            }
            RData::NSEC(nsec) => {
                nsec.next.to_wire(v);
                v.extend_from_slice(&encode_type_bitmap(&nsec.types));
            }
            RData::DNSKEY(key) => {
                v.write_u16::<BigEndian>(key.flags)?;
                v.write_u8(key.protocol)?;
                v.write_u8(key.algorithm)?;
                v.extend_from_slice(&key.public_key);
            }
            RData::NSEC3(n3) => {
                v.write_u8(n3.hash_algorithm)?;
                v.write_u8(n3.flags)?;
                v.write_u16::<BigEndian>(n3.iterations)?;
                v.write_u8(n3.salt.len() as u8)?;
                v.extend_from_slice(&n3.salt);
                v.write_u8(n3.next_hashed.len() as u8)?;
                v.extend_from_slice(&n3.next_hashed);
                v.extend_from_slice(&encode_type_bitmap(&n3.types));
            }
            RData::NSEC3PARAM(n3) => {
                v.write_u8(n3.hash_algorithm)?;
                v.write_u8(n3.flags)?;
                v.write_u16::<BigEndian>(n3.iterations)?;
                v.write_u8(n3.salt.len() as u8)?;
                v.extend_from_slice(&n3.salt);
            }
            RData::OPT(raw) | RData::Unknown(raw) => {
                v.extend_from_slice(raw);
            }
            RData::TSIG(tsig) => {
                tsig.algorithm.to_wire(v);
                v.write_u16::<BigEndian>((tsig.time_signed >> 32) as u16)?;
                v.write_u32::<BigEndian>(tsig.time_signed as u32)?;
                v.write_u16::<BigEndian>(tsig.fudge)?;
                v.write_u16::<BigEndian>(tsig.mac.len() as u16)?;
                v.extend_from_slice(&tsig.mac);
                v.write_u16::<BigEndian>(tsig.original_id)?;
                v.write_u16::<BigEndian>(tsig.error)?;
                v.write_u16::<BigEndian>(tsig.other.len() as u16)?;
                v.extend_from_slice(&tsig.other);
            }
        }
        Ok(v.len() - start)
    }

    /// Presentation form as individual fields (the zone file writer joins
    /// them and inserts the SOA parentheses).
    pub fn presentation_fields(&self) -> Vec<String> {
        match self {
            RData::A(ip) => vec![ip.to_string()],
            RData::NS(dn) | RData::CNAME(dn) | RData::PTR(dn) | RData::DNAME(dn) => {
                vec![dn.to_string()]
            }
            RData::SOA(soa) => vec![
                soa.mname.to_string(),
                soa.rname.to_string(),
                soa.serial.to_string(),
                soa.refresh.to_string(),
                soa.retry.to_string(),
                soa.expire.to_string(),
                soa.minimum.to_string(),
            ],
            RData::HINFO(hinfo) => vec![hinfo.cpu.to_string(), hinfo.os.to_string()],
            RData::MX(mx) => vec![mx.preference.to_string(), mx.exchange.to_string()],
            RData::TXT(strings) => strings.iter().map(|cs| cs.to_string()).collect(),
            RData::AAAA(ip) => vec![ip.to_string()],
            RData::SRV(srv) => vec![
                srv.priority.to_string(),
                srv.weight.to_string(),
                srv.port.to_string(),
                srv.target.to_string(),
            ],
            RData::DS(ds) => vec![
                ds.key_tag.to_string(),
                ds.algorithm.to_string(),
                ds.digest_type.to_string(),
                hex::encode(&ds.digest),
            ],
            RData::RRSIG(sig) => vec![
                sig.type_covered.to_string(),
                sig.algorithm.to_string(),
                sig.labels.to_string(),
                sig.original_ttl.to_string(),
                sig.expiration.to_string(),
                sig.inception.to_string(),
                sig.key_tag.to_string(),
                sig.signer.to_string(),
                base64::encode(&sig.signature),
            ],
            RData::NSEC(nsec) => {
                let mut fields = vec![nsec.next.to_string()];
                fields.extend(nsec.types.iter().map(|t| t.to_string()));
                fields
            }
            RData::DNSKEY(key) => vec![
                key.flags.to_string(),
                key.protocol.to_string(),
                key.algorithm.to_string(),
                base64::encode(&key.public_key),
            ],
            RData::NSEC3(n3) => {
                let mut fields = vec![
                    n3.hash_algorithm.to_string(),
                    n3.flags.to_string(),
                    n3.iterations.to_string(),
                    hex_or_dash(&n3.salt),
                    hex::encode(&n3.next_hashed),
                ];
                fields.extend(n3.types.iter().map(|t| t.to_string()));
                fields
            }
            RData::NSEC3PARAM(n3) => vec![
                n3.hash_algorithm.to_string(),
                n3.flags.to_string(),
                n3.iterations.to_string(),
                hex_or_dash(&n3.salt),
            ],
            RData::TSIG(tsig) => vec![
                tsig.algorithm.to_string(),
                tsig.time_signed.to_string(),
                tsig.fudge.to_string(),
                base64::encode(&tsig.mac),
                tsig.error.to_string(),
            ],
            // RFC3597 unknown RDATA syntax
            RData::OPT(raw) | RData::Unknown(raw) => {
                let mut fields = vec!["\\#".to_string(), raw.len().to_string()];
                if !raw.is_empty() {
                    fields.push(hex::encode(raw));
                }
                fields
            }
        }
    }

    /// Parse the presentation form of a record of type `rtype` out of the
    /// already-tokenized RDATA fields, relative names resolved against
    /// `origin`. The token layout is driven by the descriptor table; the
    /// `\#` syntax is accepted for every type.
    pub fn from_presentation(
        rtype: RRType,
        tokens: &[String],
        origin: &DomainName,
    ) -> DNSResult<RData> {
        // RFC3597: \# length hex...
        if tokens.first().map(|t| t.as_str()) == Some("\\#") {
            let length = tokens
                .get(1)
                .ok_or_else(|| DNSError::new("missing \\# length"))?
                .parse::<usize>()
                .map_err(|_| DNSError::new("bad \\# length"))?;
            let blob = tokens[2..].join("");
            let raw = hex::decode(&blob).map_err(|_| DNSError::new("bad \\# hex data"))?;
            if raw.len() != length {
                return Err(DNSError::new("\\# length does not match data"));
            }
            return Ok(RData::Unknown(raw));
        }

        let descriptor = match descriptor_by_type(rtype) {
            Some(d) => d,
            None => return Err(DNSError::DNS(format!("no presentation syntax for {}", rtype))),
        };

        let mut atoms = Vec::new();
        let mut pos = 0usize;
        for (i, kind) in descriptor.kinds.iter().enumerate() {
            let last = i == descriptor.kinds.len() - 1;
            atoms.push(parse_atom(*kind, tokens, &mut pos, origin, last)?);
        }
        if pos != tokens.len() {
            return Err(DNSError::new("trailing RDATA fields"));
        }

        assemble(rtype, atoms)
    }
}

impl fmt::Display for RData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.presentation_fields().join(" "))
    }
}

fn hex_or_dash(data: &[u8]) -> String {
    if data.is_empty() {
        "-".to_string()
    } else {
        hex::encode(data)
    }
}

// intermediate atoms between the token list and the typed variant
enum Atom {
    Name(DomainName),
    Byte(u8),
    Short(u16),
    Long(u32),
    Ip4(Ipv4Addr),
    Ip6(Ipv6Addr),
    Bytes(Vec<u8>),
    Texts(Vec<CharacterString>),
    Types(Vec<RRType>),
}

fn next_token<'a>(tokens: &'a [String], pos: &mut usize) -> DNSResult<&'a str> {
    let t = tokens
        .get(*pos)
        .ok_or_else(|| DNSError::new("missing RDATA field"))?;
    *pos += 1;
    Ok(t)
}

fn parse_atom(
    kind: RdataKind,
    tokens: &[String],
    pos: &mut usize,
    origin: &DomainName,
    last: bool,
) -> DNSResult<Atom> {
    Ok(match kind {
        RdataKind::Dname | RdataKind::UncompressedDname => {
            let t = next_token(tokens, pos)?;
            Atom::Name(name_from_token(t, origin)?)
        }
        RdataKind::Byte => {
            let t = next_token(tokens, pos)?;
            Atom::Byte(t.parse::<u8>().map_err(|_| DNSError::new("bad u8 field"))?)
        }
        RdataKind::Short => {
            let t = next_token(tokens, pos)?;
            Atom::Short(t.parse::<u16>().map_err(|_| DNSError::new("bad u16 field"))?)
        }
        RdataKind::Type => {
            let t = next_token(tokens, pos)?;
            Atom::Short(RRType::from_str(t).map_err(DNSError::DNS)?.0)
        }
        RdataKind::Long | RdataKind::Time => {
            let t = next_token(tokens, pos)?;
            Atom::Long(t.parse::<u32>().map_err(|_| DNSError::new("bad u32 field"))?)
        }
        RdataKind::Period => {
            let t = next_token(tokens, pos)?;
            Atom::Long(parse_ttl(t)?)
        }
        RdataKind::Ipv4 => {
            let t = next_token(tokens, pos)?;
            Atom::Ip4(Ipv4Addr::from_str(t).map_err(|_| DNSError::new("bad IPv4 address"))?)
        }
        RdataKind::Ipv6 => {
            let t = next_token(tokens, pos)?;
            Atom::Ip6(Ipv6Addr::from_str(t).map_err(|_| DNSError::new("bad IPv6 address"))?)
        }
        RdataKind::Base64 => {
            // base64 may be split over several tokens, it runs to the end
            let blob = tokens[*pos..].join("");
            *pos = tokens.len();
            Atom::Bytes(base64::decode(&blob).map_err(|_| DNSError::new("bad base64 field"))?)
        }
        RdataKind::Hex => {
            let blob = tokens[*pos..].join("");
            *pos = tokens.len();
            Atom::Bytes(hex::decode(&blob).map_err(|_| DNSError::new("bad hex field"))?)
        }
        RdataKind::HexLen => {
            let t = next_token(tokens, pos)?;
            if t == "-" {
                Atom::Bytes(Vec::new())
            } else {
                Atom::Bytes(hex::decode(t).map_err(|_| DNSError::new("bad hex field"))?)
            }
        }
        RdataKind::Text => {
            // the final Text field swallows every remaining token (TXT is
            // one or more <character-string>s), earlier ones take exactly one
            let mut texts = Vec::new();
            texts.push(CharacterString(
                next_token(tokens, pos)?.as_bytes().to_vec(),
            ));
            if last {
                while *pos < tokens.len() {
                    texts.push(CharacterString(tokens[*pos].as_bytes().to_vec()));
                    *pos += 1;
                }
            }
            Atom::Texts(texts)
        }
        RdataKind::TypeBitmap => {
            let mut types = Vec::new();
            while *pos < tokens.len() {
                let t = next_token(tokens, pos)?;
                types.push(RRType::from_str(t).map_err(DNSError::DNS)?);
            }
            Atom::Types(types)
        }
    })
}

macro_rules! atom {
    ($iter:expr, $variant:ident) => {
        match $iter.next() {
            Some(Atom::$variant(v)) => v,
            _ => return Err(DNSError::new("RDATA field mismatch")),
        }
    };
}

fn assemble(rtype: RRType, atoms: Vec<Atom>) -> DNSResult<RData> {
    let mut it = atoms.into_iter();
    let rdata = match rtype.qtype() {
        Some(QType::A) => RData::A(atom!(it, Ip4)),
        Some(QType::NS) => RData::NS(atom!(it, Name)),
        Some(QType::CNAME) => RData::CNAME(atom!(it, Name)),
        Some(QType::PTR) => RData::PTR(atom!(it, Name)),
        Some(QType::DNAME) => RData::DNAME(atom!(it, Name)),
        Some(QType::SOA) => RData::SOA(SOA {
            mname: atom!(it, Name),
            rname: atom!(it, Name),
            serial: atom!(it, Long),
            refresh: atom!(it, Long),
            retry: atom!(it, Long),
            expire: atom!(it, Long),
            minimum: atom!(it, Long),
        }),
        Some(QType::HINFO) => {
            let mut cpu = atom!(it, Texts);
            let mut os = atom!(it, Texts);
            RData::HINFO(HINFO {
                cpu: cpu.remove(0),
                os: os.remove(0),
            })
        }
        Some(QType::MX) => RData::MX(MX {
            preference: atom!(it, Short),
            exchange: atom!(it, Name),
        }),
        Some(QType::TXT) => RData::TXT(atom!(it, Texts)),
        Some(QType::AAAA) => RData::AAAA(atom!(it, Ip6)),
        Some(QType::SRV) => RData::SRV(SRV {
            priority: atom!(it, Short),
            weight: atom!(it, Short),
            port: atom!(it, Short),
            target: atom!(it, Name),
        }),
        Some(QType::DS) => RData::DS(DS {
            key_tag: atom!(it, Short),
            algorithm: atom!(it, Byte),
            digest_type: atom!(it, Byte),
            digest: atom!(it, Bytes),
        }),
        Some(QType::RRSIG) => RData::RRSIG(RRSIG {
            type_covered: RRType(atom!(it, Short)),
            algorithm: atom!(it, Byte),
            labels: atom!(it, Byte),
            original_ttl: atom!(it, Long),
            expiration: atom!(it, Long),
            inception: atom!(it, Long),
            key_tag: atom!(it, Short),
            signer: atom!(it, Name),
            signature: atom!(it, Bytes),
        }),
        Some(QType::NSEC) => RData::NSEC(NSEC {
            next: atom!(it, Name),
            types: atom!(it, Types),
        }),
        Some(QType::DNSKEY) => RData::DNSKEY(DNSKEY {
            flags: atom!(it, Short),
            protocol: atom!(it, Byte),
            algorithm: atom!(it, Byte),
            public_key: atom!(it, Bytes),
        }),
        Some(QType::NSEC3) => RData::NSEC3(NSEC3 {
            hash_algorithm: atom!(it, Byte),
            flags: atom!(it, Byte),
            iterations: atom!(it, Short),
            salt: atom!(it, Bytes),
            next_hashed: atom!(it, Bytes),
            types: atom!(it, Types),
        }),
        Some(QType::NSEC3PARAM) => RData::NSEC3PARAM(NSEC3 {
            hash_algorithm: atom!(it, Byte),
            flags: atom!(it, Byte),
            iterations: atom!(it, Short),
            salt: atom!(it, Bytes),
            next_hashed: Vec::new(),
            types: Vec::new(),
        }),
        _ => return Err(DNSError::DNS(format!("cannot assemble RDATA for {}", rtype))),
    };
    Ok(rdata)
}

//------------------------------------------------------------------------
// NSEC/NSEC3 type bitmaps [RFC4034 §4.1.2]
//------------------------------------------------------------------------
pub fn encode_type_bitmap(types: &[RRType]) -> Vec<u8> {
    let mut sorted: Vec<u16> = types.iter().map(|t| t.0).collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut out = Vec::new();
    let mut window = 0u8;
    let mut bits = [0u8; 32];
    let mut max_byte = 0usize;
    let mut dirty = false;

    let mut flush = |out: &mut Vec<u8>, window: u8, bits: &[u8; 32], max_byte: usize| {
        out.push(window);
        out.push((max_byte + 1) as u8);
        out.extend_from_slice(&bits[..=max_byte]);
    };

    for t in sorted {
        let w = (t >> 8) as u8;
        if w != window && dirty {
            flush(&mut out, window, &bits, max_byte);
            bits = [0u8; 32];
            max_byte = 0;
            dirty = false;
        }
        window = w;
        let low = (t & 0xFF) as usize;
        bits[low / 8] |= 0x80 >> (low % 8);
        max_byte = max_byte.max(low / 8);
        dirty = true;
    }
    if dirty {
        flush(&mut out, window, &bits, max_byte);
    }
    out
}

pub fn decode_type_bitmap(bitmap: &[u8]) -> DNSResult<Vec<RRType>> {
    let mut types = Vec::new();
    let mut pos = 0usize;
    while pos < bitmap.len() {
        if pos + 2 > bitmap.len() {
            return Err(DNSError::new("truncated type bitmap"));
        }
        let window = bitmap[pos] as u16;
        let len = bitmap[pos + 1] as usize;
        if len == 0 || len > 32 || pos + 2 + len > bitmap.len() {
            return Err(DNSError::new("bad type bitmap window"));
        }
        for (i, byte) in bitmap[pos + 2..pos + 2 + len].iter().enumerate() {
            for bit in 0..8 {
                if byte & (0x80 >> bit) != 0 {
                    types.push(RRType((window << 8) | (i as u16 * 8 + bit as u16)));
                }
            }
        }
        pos += 2 + len;
    }
    Ok(types)
}

/// Resolve a name token from a master file: `@` is the origin, names
/// without a trailing dot are relative to it.
pub fn name_from_token(token: &str, origin: &DomainName) -> DNSResult<DomainName> {
    if token == "@" {
        return Ok(origin.clone());
    }
    let dn = DomainName::try_from(token)?;
    if token.ends_with('.') {
        Ok(dn)
    } else {
        dn.concat(origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dn(s: &str) -> DomainName {
        DomainName::try_from(s).unwrap()
    }

    fn toks(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn soa_wire_round_trip() {
        let soa = SOA {
            mname: dn("ns1.example.com"),
            rname: dn("hostmaster.example.com"),
            serial: 2024010101,
            refresh: 7200,
            retry: 3600,
            expire: 1209600,
            minimum: 3600,
        };
        let rdata = RData::SOA(soa.clone());
        let mut wire = Vec::new();
        let written = rdata.to_wire(&mut wire).unwrap();
        assert_eq!(written, wire.len());

        let mut cursor = Cursor::new(wire.as_slice());
        let parsed = RData::from_wire(RRType::from(QType::SOA), &mut cursor, wire.len() as u16)
            .unwrap();
        assert_eq!(parsed, rdata);
    }

    #[test]
    fn txt_wire_round_trip() {
        let rdata = RData::TXT(vec![
            CharacterString::from("v=spf1 -all"),
            CharacterString::from("second"),
        ]);
        let mut wire = Vec::new();
        rdata.to_wire(&mut wire).unwrap();
        let mut cursor = Cursor::new(wire.as_slice());
        let parsed =
            RData::from_wire(RRType::from(QType::TXT), &mut cursor, wire.len() as u16).unwrap();
        assert_eq!(parsed, rdata);
    }

    #[test]
    fn tsig_wire_round_trip() {
        let rdata = RData::TSIG(TSIG {
            algorithm: dn("hmac-sha256"),
            time_signed: 0x0000_6543_2100,
            fudge: 300,
            mac: vec![0xAA; 32],
            original_id: 0x1234,
            error: 0,
            other: Vec::new(),
        });
        let mut wire = Vec::new();
        rdata.to_wire(&mut wire).unwrap();
        let mut cursor = Cursor::new(wire.as_slice());
        let parsed =
            RData::from_wire(RRType::from(QType::TSIG), &mut cursor, wire.len() as u16).unwrap();
        assert_eq!(parsed, rdata);
    }

    #[test]
    fn rdlength_mismatch_detected() {
        let rdata = RData::A(Ipv4Addr::new(192, 0, 2, 5));
        let mut wire = Vec::new();
        rdata.to_wire(&mut wire).unwrap();
        let mut cursor = Cursor::new(wire.as_slice());
        // lie about the length: parsing must not read past it silently
        assert!(RData::from_wire(RRType::from(QType::A), &mut cursor, 3).is_err());
    }

    #[test]
    fn presentation_a_and_mx() {
        let origin = dn("example.com");
        let a = RData::from_presentation(RRType::from(QType::A), &toks("192.0.2.5"), &origin)
            .unwrap();
        assert_eq!(a, RData::A(Ipv4Addr::new(192, 0, 2, 5)));

        let mx =
            RData::from_presentation(RRType::from(QType::MX), &toks("10 mail"), &origin).unwrap();
        assert_eq!(
            mx,
            RData::MX(MX {
                preference: 10,
                exchange: dn("mail.example.com"),
            })
        );
        assert_eq!(mx.presentation_fields(), vec!["10", "mail.example.com."]);
    }

    #[test]
    fn presentation_soa_with_periods() {
        let origin = dn("example.com");
        let soa = RData::from_presentation(
            RRType::from(QType::SOA),
            &toks("ns1 hostmaster 2024010101 2h 1h 2w 1h"),
            &origin,
        )
        .unwrap();
        match soa {
            RData::SOA(soa) => {
                assert_eq!(soa.serial, 2024010101);
                assert_eq!(soa.refresh, 7200);
                assert_eq!(soa.expire, 1209600);
            }
            _ => panic!("not a SOA"),
        }
    }

    #[test]
    fn unknown_type_round_trips_via_rfc3597() {
        let origin = dn("example.com");
        let raw = RData::from_presentation(
            RRType(65280),
            &toks("\\# 4 0a000001"),
            &origin,
        )
        .unwrap();
        assert_eq!(raw, RData::Unknown(vec![0x0a, 0, 0, 1]));
        assert_eq!(raw.presentation_fields().join(" "), "\\# 4 0a000001");
    }

    #[test]
    fn rrsig_presentation_round_trip() {
        let origin = dn("example.com");
        let fields = "A 8 3 300 1710000000 1700000000 12345 example.com. dGVzdHNpZw==";
        let sig =
            RData::from_presentation(RRType::from(QType::RRSIG), &toks(fields), &origin).unwrap();
        match &sig {
            RData::RRSIG(rrsig) => {
                assert_eq!(rrsig.type_covered, RRType::from(QType::A));
                assert_eq!(rrsig.key_tag, 12345);
                assert_eq!(rrsig.signature, b"testsig");
            }
            other => panic!("unexpected rdata {:?}", other),
        }
        assert_eq!(sig.presentation_fields().join(" "), fields);
    }

    #[test]
    fn descriptor_table_is_consistent() {
        for descriptor in RRTYPE_DESCRIPTORS {
            // the mnemonic resolves back to the type number it describes
            let parsed = RRType::from_str(descriptor.mnemonic).unwrap();
            assert_eq!(parsed.0, descriptor.rtype);
            assert_eq!(parsed.to_string(), descriptor.mnemonic);
            assert!(!descriptor.kinds.is_empty());
        }
    }

    #[test]
    fn type_bitmap_round_trip() {
        let types = vec![
            RRType::from(QType::A),
            RRType::from(QType::NS),
            RRType::from(QType::SOA),
            RRType::from(QType::RRSIG),
            RRType::from(QType::NSEC),
            RRType(1234),
        ];
        let bitmap = encode_type_bitmap(&types);
        let decoded = decode_type_bitmap(&bitmap).unwrap();
        assert_eq!(decoded, types);
    }
}
