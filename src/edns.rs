//! EDNS0 (RFC6891): the OPT pseudo-RR parsed out of the additional section
//! and the payload-size negotiation it carries.
//!
//! OPT RR layout:
//! +------------+--------------+------------------------------+
//! | NAME       | domain name  | MUST be 0 (root domain)      |
//! | TYPE       | u_int16_t    | OPT (41)                     |
//! | CLASS      | u_int16_t    | requestor's UDP payload size |
//! | TTL        | u_int32_t    | extended RCODE and flags     |
//! | RDATA      | octet stream | {attribute,value} pairs      |
//! +------------+--------------+------------------------------+
use crate::dname::DomainName;
use crate::error::{DNSError, DNSResult};
use crate::rdata::RData;
use crate::rfc1035::{
    DNSMessage, QType, RRClass, RRType, ResourceRecord, EDNS_MAX_MESSAGE_LEN, MAX_TCP_MESSAGE_LEN,
    MAX_UDP_PACKET_SIZE,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct EdnsInfo {
    pub payload_size: u16,
    pub extended_rcode: u8,
    pub version: u8,
    pub dnssec_ok: bool,
}

impl EdnsInfo {
    // what we advertise back to the peer
    pub fn our_default() -> Self {
        EdnsInfo {
            payload_size: EDNS_MAX_MESSAGE_LEN as u16,
            extended_rcode: 0,
            version: 0,
            dnssec_ok: false,
        }
    }
}

/// Pull the OPT record out of the additional section. `Ok(None)` when the
/// query carries none, FORMERR when there is more than one or its owner is
/// not the root. Unknown EDNS options inside the RDATA are ignored wholesale.
pub fn parse_edns(message: &DNSMessage) -> DNSResult<Option<EdnsInfo>> {
    let mut found: Option<EdnsInfo> = None;

    for rr in &message.additionals {
        if rr.rtype != QType::OPT {
            continue;
        }
        if found.is_some() {
            return Err(DNSError::new("more than one OPT record"));
        }
        if !rr.name.is_root() {
            return Err(DNSError::new("OPT owner is not the root"));
        }

        //             +0 (MSB)                            +1 (LSB)
        //    +---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+
        // 0: |         EXTENDED-RCODE        |            VERSION            |
        //    +---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+
        // 2: | DO|                           Z                               |
        //    +---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+
        found = Some(EdnsInfo {
            payload_size: rr.class.0,
            extended_rcode: (rr.ttl >> 24) as u8,
            version: (rr.ttl >> 16) as u8,
            dnssec_ok: rr.ttl & 0x8000 != 0,
        });
    }

    Ok(found)
}

/// The OPT record we append to a response: our payload size, the high bits
/// of an extended rcode, and the DO bit echoed when we serve signed data.
pub fn opt_rr(payload_size: u16, extended_rcode: u8, dnssec_ok: bool) -> ResourceRecord {
    let mut ttl = (extended_rcode as u32) << 24;
    if dnssec_ok {
        ttl |= 0x8000;
    }
    ResourceRecord {
        name: DomainName::root(),
        rtype: RRType::from(QType::OPT),
        class: RRClass(payload_size),
        ttl,
        rdata: RData::OPT(Vec::new()),
    }
}

/// The response size budget: the negotiated EDNS payload on UDP (capped at
/// our own maximum, floored at 512), 512 for plain UDP, the frame maximum
/// on TCP.
pub fn response_limit(via_tcp: bool, edns: Option<&EdnsInfo>) -> usize {
    if via_tcp {
        return MAX_TCP_MESSAGE_LEN;
    }
    match edns {
        Some(info) => (info.payload_size as usize)
            .clamp(MAX_UDP_PACKET_SIZE, EDNS_MAX_MESSAGE_LEN),
        None => MAX_UDP_PACKET_SIZE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::parse_message;
    use crate::network_order::ToNetworkOrder;

    #[test]
    fn opt_round_trip() {
        let mut message = DNSMessage::default();
        message.header.ar_count = 1;
        message.additionals.push(opt_rr(4096, 0, true));

        let mut wire = Vec::new();
        message.to_network_bytes(&mut wire).unwrap();
        let parsed = parse_message(&wire).unwrap();

        let edns = parse_edns(&parsed).unwrap().unwrap();
        assert_eq!(edns.payload_size, 4096);
        assert_eq!(edns.version, 0);
        assert!(edns.dnssec_ok);
    }

    #[test]
    fn duplicate_opt_is_rejected() {
        let mut message = DNSMessage::default();
        message.additionals.push(opt_rr(4096, 0, false));
        message.additionals.push(opt_rr(1232, 0, false));
        assert!(parse_edns(&message).is_err());
    }

    #[test]
    fn budgets() {
        assert_eq!(response_limit(true, None), MAX_TCP_MESSAGE_LEN);
        assert_eq!(response_limit(false, None), 512);
        let small = EdnsInfo {
            payload_size: 100,
            ..Default::default()
        };
        assert_eq!(response_limit(false, Some(&small)), 512);
        let big = EdnsInfo {
            payload_size: 65000,
            ..Default::default()
        };
        assert_eq!(response_limit(false, Some(&big)), 4096);
    }
}
