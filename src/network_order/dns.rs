//! Wire codecs for the DNS structures themselves: names, flags, header,
//! question, resource records and whole messages.
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Result};

use crate::derive_enum;
use crate::dname::DomainName;
use crate::error::{DNSError, DNSResult};
use crate::network_order::{FromNetworkOrder, ToNetworkOrder};
use crate::rdata::RData;
use crate::rfc1035::{
    DNSMessage, DNSPacketFlags, DNSPacketHeader, DNSQuestion, OpCode, QClass, RRClass, RRType,
    ResourceRecord, ResponseCode,
};

impl ToNetworkOrder for DomainName {
    /// ```
    /// use authdns::dname::DomainName;
    /// use authdns::network_order::ToNetworkOrder;
    ///
    /// let mut buffer: Vec<u8> = Vec::new();
    /// let dn = DomainName::try_from("www.google.ie").unwrap();
    /// assert_eq!(dn.to_network_bytes(&mut buffer).unwrap(), 15);
    /// assert_eq!(buffer, &[0x03, 0x77, 0x77, 0x77, 0x06, 0x67, 0x6f, 0x6f, 0x67, 0x6c, 0x65, 0x02, 0x69, 0x65, 0x00]);
    /// ```
    fn to_network_bytes(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        self.to_wire(buffer);
        Ok(self.wire_len())
    }
}

impl FromNetworkOrder for DomainName {
    /// ```
    /// use std::io::Cursor;
    /// use authdns::dname::DomainName;
    /// use authdns::network_order::FromNetworkOrder;
    ///
    /// let b = vec![0x03, 0x77, 0x77, 0x77, 0x06, 0x67, 0x6f, 0x6f, 0x67, 0x6c, 0x65, 0x02, 0x69, 0x65, 0x00];
    /// let mut buffer = Cursor::new(b.as_slice());
    /// let mut dn = DomainName::default();
    /// assert!(dn.from_network_bytes(&mut buffer).is_ok());
    /// assert_eq!(dn.to_string(), "www.google.ie.");
    /// assert_eq!(buffer.position(), 15);
    /// ```
    fn from_network_bytes(&mut self, buffer: &mut Cursor<&[u8]>) -> DNSResult<()> {
        let start = buffer.position() as usize;
        let next = self.from_position(start, buffer.get_ref())?;
        buffer.set_position(next as u64);
        Ok(())
    }
}

// Impl QClass enum
derive_enum!(QClass, u16);

// the raw 16 bit type value goes through untouched
impl ToNetworkOrder for RRType {
    fn to_network_bytes(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        buffer.write_u16::<BigEndian>(self.0)?;
        Ok(2)
    }
}

impl FromNetworkOrder for RRType {
    fn from_network_bytes(&mut self, buffer: &mut Cursor<&[u8]>) -> DNSResult<()> {
        self.0 = buffer.read_u16::<BigEndian>()?;
        Ok(())
    }
}

// same for classes: OPT smuggles the EDNS payload size in here
impl ToNetworkOrder for RRClass {
    fn to_network_bytes(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        buffer.write_u16::<BigEndian>(self.0)?;
        Ok(2)
    }
}

impl FromNetworkOrder for RRClass {
    fn from_network_bytes(&mut self, buffer: &mut Cursor<&[u8]>) -> DNSResult<()> {
        self.0 = buffer.read_u16::<BigEndian>()?;
        Ok(())
    }
}

impl ToNetworkOrder for DNSPacketFlags {
    /// ```
    /// use authdns::network_order::ToNetworkOrder;
    /// use authdns::rfc1035::{DNSPacketFlags, ResponseCode, OpCode, PacketType};
    ///
    /// let flags = DNSPacketFlags {
    ///     packet_type: PacketType::Response,
    ///     op_code: OpCode::IQuery,
    ///     authoritative_answer: true,
    ///     truncated: true,
    ///     recursion_desired: true,
    ///     recursion_available: true,
    ///     z: false,
    ///     authentic_data: false,
    ///     checking_disabled: false,
    ///     response_code: ResponseCode::NoError,
    /// };
    ///
    /// let mut buffer: Vec<u8> = Vec::new();
    /// assert!(flags.to_network_bytes(&mut buffer).is_ok());
    /// assert_eq!(buffer, &[0b1000_1111, 0b1000_0000]);
    /// ```
    fn to_network_bytes(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        // combine all flags according to the header structure
        //                                1  1  1  1  1  1
        //  0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
        // +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
        // |QR|   Opcode  |AA|TC|RD|RA| Z|AD|CD|   RCODE   |
        // +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
        let mut flags = (self.packet_type as u16) << 15;
        flags |= (self.op_code as u16) << 11;
        flags |= (self.authoritative_answer as u16) << 10;
        flags |= (self.truncated as u16) << 9;
        flags |= (self.recursion_desired as u16) << 8;
        flags |= (self.recursion_available as u16) << 7;
        flags |= (self.z as u16) << 6;
        flags |= (self.authentic_data as u16) << 5;
        flags |= (self.checking_disabled as u16) << 4;
        // only the low 4 bits fit the header; the extension lives in OPT/TSIG
        flags |= (self.response_code as u16) & 0b1111;

        buffer.write_u16::<BigEndian>(flags)?;
        Ok(2)
    }
}

impl FromNetworkOrder for DNSPacketFlags {
    /// ```
    /// use std::io::Cursor;
    /// use authdns::network_order::FromNetworkOrder;
    /// use authdns::rfc1035::{DNSPacketFlags, ResponseCode, OpCode, PacketType};
    ///
    /// let b = vec![0b1000_1111, 0b1000_0000];
    /// let mut buffer = Cursor::new(b.as_slice());
    /// let mut v = DNSPacketFlags::default();
    /// assert!(v.from_network_bytes(&mut buffer).is_ok());
    /// assert_eq!(v.packet_type, PacketType::Response);
    /// assert_eq!(v.op_code, OpCode::IQuery);
    /// assert!(v.authoritative_answer);
    /// assert!(v.truncated);
    /// assert!(v.recursion_desired);
    /// assert!(v.recursion_available);
    /// assert!(!v.z);
    /// assert_eq!(v.response_code, ResponseCode::NoError);
    /// ```
    fn from_network_bytes(&mut self, buffer: &mut Cursor<&[u8]>) -> DNSResult<()> {
        // read as u16
        let flags = buffer.read_u16::<BigEndian>()?;

        self.packet_type = if flags >> 15 == 1 {
            crate::rfc1035::PacketType::Response
        } else {
            crate::rfc1035::PacketType::Query
        };

        // unassigned opcodes are kept parseable so the query machine can
        // answer NOTIMP instead of choking on the packet
        self.op_code = OpCode::try_from((flags >> 11) & 0b1111).unwrap_or(OpCode::Unassigned);

        self.authoritative_answer = (flags >> 10) & 1 == 1;
        self.truncated = (flags >> 9) & 1 == 1;
        self.recursion_desired = (flags >> 8) & 1 == 1;
        self.recursion_available = (flags >> 7) & 1 == 1;
        self.z = (flags >> 6) & 1 == 1;
        self.authentic_data = (flags >> 5) & 1 == 1;
        self.checking_disabled = (flags >> 4) & 1 == 1;

        // same leniency: an unassigned rcode never equals NoError
        self.response_code =
            ResponseCode::try_from(flags & 0b1111).unwrap_or(ResponseCode::ServFail);

        Ok(())
    }
}

impl ToNetworkOrder for DNSPacketHeader {
    fn to_network_bytes(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        self.id.to_network_bytes(buffer)?;
        self.flags.to_network_bytes(buffer)?;
        self.qd_count.to_network_bytes(buffer)?;
        self.an_count.to_network_bytes(buffer)?;
        self.ns_count.to_network_bytes(buffer)?;
        self.ar_count.to_network_bytes(buffer)?;
        Ok(12)
    }
}

impl FromNetworkOrder for DNSPacketHeader {
    fn from_network_bytes(&mut self, buffer: &mut Cursor<&[u8]>) -> DNSResult<()> {
        self.id.from_network_bytes(buffer)?;
        self.flags.from_network_bytes(buffer)?;
        self.qd_count.from_network_bytes(buffer)?;
        self.an_count.from_network_bytes(buffer)?;
        self.ns_count.from_network_bytes(buffer)?;
        self.ar_count.from_network_bytes(buffer)?;
        Ok(())
    }
}

impl ToNetworkOrder for DNSQuestion {
    /// ```
    /// use authdns::network_order::ToNetworkOrder;
    /// use authdns::rfc1035::{DNSQuestion, QType};
    ///
    /// let question = DNSQuestion::new("aaa.bb.c", QType::A, None).unwrap();
    /// let mut buffer: Vec<u8> = Vec::new();
    /// assert_eq!(question.to_network_bytes(&mut buffer).unwrap(), 14);
    /// assert_eq!(buffer, &[3, 97, 97, 97, 2, 98, 98, 1, 99, 0, 0, 1, 0, 1]);
    /// ```
    fn to_network_bytes(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        let mut length = self.name.to_network_bytes(buffer)?;
        length += self.rtype.to_network_bytes(buffer)?;
        length += self.class.to_network_bytes(buffer)?;
        Ok(length)
    }
}

impl FromNetworkOrder for DNSQuestion {
    fn from_network_bytes(&mut self, buffer: &mut Cursor<&[u8]>) -> DNSResult<()> {
        self.name.from_network_bytes(buffer)?;
        self.rtype.from_network_bytes(buffer)?;
        self.class.from_network_bytes(buffer)?;
        Ok(())
    }
}

impl ToNetworkOrder for ResourceRecord {
    // uncompressed form with the RDLENGTH patched in after the RDATA is
    // written out
    fn to_network_bytes(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        let mut length = self.name.to_network_bytes(buffer)?;
        length += self.rtype.to_network_bytes(buffer)?;
        length += self.class.to_network_bytes(buffer)?;
        length += self.ttl.to_network_bytes(buffer)?;

        let rd_length_at = buffer.len();
        buffer.write_u16::<BigEndian>(0)?;
        let written = self.rdata.to_wire(buffer)?;
        let bytes = (written as u16).to_be_bytes();
        buffer[rd_length_at] = bytes[0];
        buffer[rd_length_at + 1] = bytes[1];

        Ok(length + 2 + written)
    }
}

impl FromNetworkOrder for ResourceRecord {
    fn from_network_bytes(&mut self, buffer: &mut Cursor<&[u8]>) -> DNSResult<()> {
        self.name.from_network_bytes(buffer)?;
        self.rtype.from_network_bytes(buffer)?;
        self.class.from_network_bytes(buffer)?;
        self.ttl.from_network_bytes(buffer)?;
        let rd_length = buffer.read_u16::<BigEndian>()?;
        self.rdata = RData::from_wire(self.rtype, buffer, rd_length)?;
        Ok(())
    }
}

impl ToNetworkOrder for DNSMessage {
    fn to_network_bytes(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        let mut length = self.header.to_network_bytes(buffer)?;
        length += self.questions.to_network_bytes(buffer)?;
        length += self.answers.to_network_bytes(buffer)?;
        length += self.authorities.to_network_bytes(buffer)?;
        length += self.additionals.to_network_bytes(buffer)?;
        Ok(length)
    }
}

impl FromNetworkOrder for DNSMessage {
    fn from_network_bytes(&mut self, buffer: &mut Cursor<&[u8]>) -> DNSResult<()> {
        self.header.from_network_bytes(buffer)?;

        for _ in 0..self.header.qd_count {
            let mut question = DNSQuestion::default();
            question.from_network_bytes(buffer)?;
            self.questions.push(question);
        }
        for _ in 0..self.header.an_count {
            let mut rr = ResourceRecord::default();
            rr.from_network_bytes(buffer)?;
            self.answers.push(rr);
        }
        for _ in 0..self.header.ns_count {
            let mut rr = ResourceRecord::default();
            rr.from_network_bytes(buffer)?;
            self.authorities.push(rr);
        }
        for _ in 0..self.header.ar_count {
            let mut rr = ResourceRecord::default();
            rr.from_network_bytes(buffer)?;
            self.additionals.push(rr);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rfc1035::{PacketType, QType};
    use crate::{test_from_network, test_to_network};

    #[test]
    fn dns_packet_header() {
        const PACKET: &'static str = r#"
0000   76 86 81 a0 00 01 00 08 00 00 00 01
        "#;

        // from
        let header = test_from_network!(PACKET, DNSPacketHeader);
        assert_eq!(header.id, 0x7686);
        assert_eq!(header.flags.packet_type, PacketType::Response);
        assert_eq!(header.flags.op_code, OpCode::Query);
        assert!(!header.flags.authoritative_answer);
        assert!(!header.flags.truncated);
        assert!(header.flags.recursion_desired);
        assert!(header.flags.recursion_available);
        assert!(!header.flags.z);
        assert!(header.flags.authentic_data);
        assert!(!header.flags.checking_disabled);
        assert_eq!(header.flags.response_code, ResponseCode::NoError);
        assert_eq!(header.qd_count, 1);
        assert_eq!(header.an_count, 8);
        assert_eq!(header.ns_count, 0);
        assert_eq!(header.ar_count, 1);

        // to
        let values = test_to_network!(header);
        assert_eq!(values.0, crate::util::get_sample_slice(PACKET));
        assert_eq!(values.1, 12);
    }

    #[test]
    fn compressed_ns_response() {
        // a captured response for "hk. NS?" with compressed owner names
        const PACKET: &'static str = r#"
0000   76 86 81 a0 00 01 00 02 00 00 00 00 02 68 6b 00
0010   00 02 00 01 c0 0c 00 02 00 01 00 00 54 60 00 0e
0020   01 7a 05 68 6b 69 72 63 03 6e 65 74 c0 0c c0 0c
0030   00 02 00 01 00 00 54 60 00 04 01 64 c0 22
"#;
        let message = test_from_network!(PACKET, DNSMessage);
        assert_eq!(message.questions.len(), 1);
        assert_eq!(message.questions[0].name.to_string(), "hk.");
        assert_eq!(message.answers.len(), 2);
        assert!(message.answers[0].rtype == QType::NS);
        match &message.answers[0].rdata {
            RData::NS(dn) => assert_eq!(dn.to_string(), "z.hkirc.net.hk."),
            other => panic!("unexpected rdata {:?}", other),
        }
        match &message.answers[1].rdata {
            RData::NS(dn) => assert_eq!(dn.to_string(), "d.hkirc.net.hk."),
            other => panic!("unexpected rdata {:?}", other),
        }
    }

    #[test]
    fn rr_round_trip() {
        let rr = ResourceRecord::new(
            DomainName::try_from("x.example.com").unwrap(),
            RRType::from(QType::A),
            300,
            RData::A(std::net::Ipv4Addr::new(192, 0, 2, 5)),
        );
        let mut wire = Vec::new();
        let written = rr.to_network_bytes(&mut wire).unwrap();
        assert_eq!(written, wire.len());

        let mut parsed = ResourceRecord::default();
        let mut cursor = Cursor::new(wire.as_slice());
        parsed.from_network_bytes(&mut cursor).unwrap();
        assert_eq!(parsed.name, rr.name);
        assert_eq!(parsed.rdata, rr.rdata);
        assert_eq!(parsed.ttl, 300);
    }
}
