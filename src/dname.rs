//! Owned domain names and the canonical ordering the server relies on
//! everywhere: zone apex matching, the NSEC walk, the persistent index and
//! TSIG digests all use the RFC4034 §6.1 canonical form (labels compared
//! right to left, case-insensitively).
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{DNSError, DNSResult, InternalError};
use crate::util::is_pointer;

// Upper bounds from RFC1035 §2.3.4
pub const MAX_DOMAIN_NAME_LEN: usize = 255;
pub const MAX_LABEL_LEN: usize = 63;

// compression pointer chains deeper than this are treated as loops
pub const MAX_POINTER_CHAIN: usize = 128;

/// A domain name: a sequence of labels, the root being the empty sequence.
/// Immutable once constructed (all operations return a new name).
#[derive(Debug, Default, Clone, Eq)]
pub struct DomainName {
    labels: Vec<Vec<u8>>,
}

impl DomainName {
    pub fn root() -> Self {
        DomainName { labels: Vec::new() }
    }

    pub fn labels(&self) -> &[Vec<u8>] {
        &self.labels
    }

    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    pub fn is_root(&self) -> bool {
        self.labels.is_empty()
    }

    // length of the uncompressed wire representation, final zero included
    pub fn wire_len(&self) -> usize {
        self.labels.iter().map(|l| l.len() + 1).sum::<usize>() + 1
    }

    fn push_label(&mut self, label: &[u8]) -> DNSResult<()> {
        if label.len() > MAX_LABEL_LEN {
            return Err(DNSError::DNSInternalError(InternalError::DnsLabelTooLong));
        }
        self.labels.push(label.to_vec());
        if self.wire_len() > MAX_DOMAIN_NAME_LEN {
            return Err(DNSError::DNSInternalError(
                InternalError::DnsDomainNameTooLong,
            ));
        }
        Ok(())
    }

    /// Parse a name out of a raw message starting at `pos`, following
    /// compression pointers. Returns the position one past the name in the
    /// original (non-pointed-to) byte stream.
    ///
    /// From RFC1035: the pointer takes the form of a two octet sequence
    /// starting with two one bits; the offset counts from the start of the
    /// message. Pointers may only point backwards, and chains are bounded to
    /// defeat loops.
    pub fn from_position(&mut self, pos: usize, buffer: &[u8]) -> DNSResult<usize> {
        let mut index = pos;
        let mut followed = 0usize;
        // end of the name in the outer stream, set when the first pointer
        // is taken
        let mut resume = None;

        loop {
            let length_byte = *buffer
                .get(index)
                .ok_or(DNSError::DNSInternalError(InternalError::BufferTooShort))?;

            // we reached the sentinel
            if length_byte == 0 {
                index += 1;
                break;
            }

            if is_pointer(length_byte) {
                // get pointer which is on 2 bytes
                let second = *buffer
                    .get(index + 1)
                    .ok_or(DNSError::DNSInternalError(InternalError::BufferTooShort))?;
                let target = (((length_byte & 0b0011_1111) as usize) << 8) | second as usize;

                // offsets must go backwards, otherwise loops are trivial
                if target >= index {
                    return Err(DNSError::DNSInternalError(InternalError::ForwardPointer));
                }
                followed += 1;
                if followed > MAX_POINTER_CHAIN {
                    return Err(DNSError::DNSInternalError(InternalError::PointerLoop));
                }

                if resume.is_none() {
                    resume = Some(index + 2);
                }
                index = target;
                continue;
            }

            // regular label: the first byte is the length
            let size = length_byte as usize;
            if size > MAX_LABEL_LEN {
                return Err(DNSError::DNSInternalError(InternalError::DnsLabelTooLong));
            }
            let label = buffer
                .get(index + 1..index + 1 + size)
                .ok_or(DNSError::DNSInternalError(InternalError::BufferTooShort))?;
            self.push_label(label)?;

            index += size + 1;
        }

        Ok(resume.unwrap_or(index))
    }

    // uncompressed wire form, case preserved
    pub fn to_wire(&self, v: &mut Vec<u8>) {
        for label in &self.labels {
            v.push(label.len() as u8);
            v.extend_from_slice(label);
        }
        v.push(0);
    }

    // uncompressed lowercased wire form, as digested by TSIG and DNSSEC
    pub fn canonical_wire(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(self.wire_len());
        for label in &self.labels {
            v.push(label.len() as u8);
            v.extend(label.iter().map(|b| b.to_ascii_lowercase()));
        }
        v.push(0);
        v
    }

    /// The sort key used by the zone tables and the persistent radix index:
    /// labels reversed and lowercased, each terminated by a 0x00 separator
    /// (0x00/0x01 bytes inside a label are escaped behind 0x01 so the
    /// separator still sorts first). Plain byte order on these keys equals
    /// the canonical name order.
    pub fn canonical_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.wire_len());
        for label in self.labels.iter().rev() {
            for &b in label {
                match b.to_ascii_lowercase() {
                    0x00 => {
                        key.push(0x01);
                        key.push(0x01);
                    }
                    0x01 => {
                        key.push(0x01);
                        key.push(0x02);
                    }
                    c => key.push(c),
                }
            }
            key.push(0x00);
        }
        key
    }

    /// ```
    /// use authdns::dname::DomainName;
    ///
    /// let www = DomainName::try_from("www.example.com").unwrap();
    /// let apex = DomainName::try_from("example.com").unwrap();
    /// assert!(www.is_subdomain_of(&apex));
    /// assert!(apex.is_subdomain_of(&apex));
    /// assert!(!apex.is_subdomain_of(&www));
    /// ```
    pub fn is_subdomain_of(&self, other: &DomainName) -> bool {
        if other.label_count() > self.label_count() {
            return false;
        }
        self.labels
            .iter()
            .rev()
            .zip(other.labels.iter().rev())
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }

    // strip the left-most label; the root is its own origin
    pub fn origin_of(&self) -> DomainName {
        if self.is_root() {
            DomainName::root()
        } else {
            DomainName {
                labels: self.labels[1..].to_vec(),
            }
        }
    }

    // the longest suffix of labels shared by both names
    pub fn common_suffix(&self, other: &DomainName) -> DomainName {
        let shared = self
            .labels
            .iter()
            .rev()
            .zip(other.labels.iter().rev())
            .take_while(|(a, b)| a.eq_ignore_ascii_case(b))
            .count();
        DomainName {
            labels: self.labels[self.labels.len() - shared..].to_vec(),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self.labels.first(), Some(l) if l.as_slice() == b"*")
    }

    // "*.wild.example.com" -> "wild.example.com"
    pub fn wildcard_base(&self) -> DomainName {
        if self.is_wildcard() {
            self.origin_of()
        } else {
            self.clone()
        }
    }

    // "wild.example.com" -> "*.wild.example.com"
    pub fn to_wildcard(&self) -> DomainName {
        let mut labels = Vec::with_capacity(self.labels.len() + 1);
        labels.push(b"*".to_vec());
        labels.extend(self.labels.iter().cloned());
        DomainName { labels }
    }

    // the name with its first `skip` labels removed
    pub fn suffix(&self, skip: usize) -> DomainName {
        DomainName {
            labels: self.labels[skip.min(self.labels.len())..].to_vec(),
        }
    }

    // append another name, completing a relative name with its origin
    pub fn concat(&self, origin: &DomainName) -> DNSResult<DomainName> {
        let mut dn = DomainName::root();
        for label in self.labels.iter().chain(origin.labels.iter()) {
            dn.push_label(label)?;
        }
        Ok(dn)
    }

    // prepend one label
    pub fn prepend(&self, label: &[u8]) -> DNSResult<DomainName> {
        let mut dn = DomainName {
            labels: Vec::with_capacity(self.labels.len() + 1),
        };
        dn.push_label(label)?;
        for l in &self.labels {
            dn.push_label(l)?;
        }
        Ok(dn)
    }

    // presentation form relative to an origin, if below it
    pub fn relative_to(&self, origin: &DomainName) -> Option<String> {
        if !self.is_subdomain_of(origin) || self == origin {
            return None;
        }
        let cut = self.label_count() - origin.label_count();
        let rel: Vec<String> = self.labels[..cut]
            .iter()
            .map(|l| String::from_utf8_lossy(l).to_string())
            .collect();
        Some(rel.join("."))
    }
}

/// Canonical comparison per RFC4034 §6.1: compare label sequences right to
/// left; within a label, lowercased byte comparison; a missing label sorts
/// first. This is a total order.
pub fn dname_compare(a: &DomainName, b: &DomainName) -> Ordering {
    let mut ia = a.labels.iter().rev();
    let mut ib = b.labels.iter().rev();
    loop {
        match (ia.next(), ib.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(la), Some(lb)) => {
                let la = la.iter().map(|c| c.to_ascii_lowercase());
                let lb = lb.iter().map(|c| c.to_ascii_lowercase());
                match la.cmp(lb) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
        }
    }
}

impl PartialEq for DomainName {
    fn eq(&self, other: &Self) -> bool {
        self.labels.len() == other.labels.len()
            && self
                .labels
                .iter()
                .zip(other.labels.iter())
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }
}

impl Hash for DomainName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for label in &self.labels {
            for b in label {
                state.write_u8(b.to_ascii_lowercase());
            }
            state.write_u8(0);
        }
    }
}

impl Ord for DomainName {
    fn cmp(&self, other: &Self) -> Ordering {
        dname_compare(self, other)
    }
}

impl PartialOrd for DomainName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// ```
/// use authdns::dname::DomainName;
///
/// let dn = DomainName::try_from("www.example.com").unwrap();
/// assert_eq!(dn.to_string(), "www.example.com.");
///
/// let dn = DomainName::try_from(".").unwrap();
/// assert_eq!(dn.to_string(), ".");
/// ```
impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return write!(f, ".");
        }
        for label in &self.labels {
            for &b in label {
                let c = b as char;
                if c == '.' || c == '\\' {
                    write!(f, "\\{}", c)?;
                } else if c.is_ascii_graphic() {
                    write!(f, "{}", c)?;
                } else {
                    write!(f, "\\{:03}", b)?;
                }
            }
            write!(f, ".")?;
        }
        Ok(())
    }
}

impl TryFrom<&str> for DomainName {
    type Error = DNSError;

    fn try_from(domain: &str) -> Result<Self, Self::Error> {
        // safeguard
        if domain.is_empty() {
            return Err(DNSError::DNSInternalError(InternalError::EmptyDomainName));
        }

        let mut dn = DomainName::root();

        // handle case for root domain
        if domain == "." {
            return Ok(dn);
        }

        for label in domain.split('.').filter(|x| !x.is_empty()) {
            dn.push_label(label.as_bytes())?;
        }

        Ok(dn)
    }
}

impl std::str::FromStr for DomainName {
    type Err = DNSError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DomainName::try_from(s)
    }
}
