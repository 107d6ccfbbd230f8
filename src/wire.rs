//! Whole-message assembly: parsing an inbound packet into its sections and
//! building a response with name compression, a size budget and section
//! rollback when the budget is exceeded.
use std::io::Cursor;

use byteorder::{BigEndian, WriteBytesExt};

use crate::dname::DomainName;
use crate::error::DNSResult;
use crate::network_order::{FromNetworkOrder, ToNetworkOrder};
use crate::rdata::RData;
use crate::rfc1035::{
    DNSMessage, DNSPacketHeader, DNSQuestion, QHEADER_SIZE, ResourceRecord,
};

// compression pointers can only address the first 0x3FFF octets
const MAX_COMPRESSION_OFFSET: usize = 0x3FFF;

// a handful of recent names is all compression needs in practice
const COMPRESSION_TABLE_SIZE: usize = 14;

/// Decode a full message. Every failure mode here (short buffer, looping
/// pointers, bad RDLENGTH) maps to a FORMERR answer in the query machine.
pub fn parse_message(packet: &[u8]) -> DNSResult<DNSMessage> {
    let mut cursor = Cursor::new(packet);
    let mut message = DNSMessage::default();
    message.from_network_bytes(&mut cursor)?;
    Ok(message)
}

/// Returned when an RR does not fit the response budget. The writer has
/// already rolled the buffer back to the last record boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Truncated;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Answer = 0,
    Authority = 1,
    Additional = 2,
}

/// Builds one response message: a header patched in at the end, a running
/// compression table pointing at names already written, and a byte budget
/// the caller picked from the transport and EDNS negotiation.
pub struct MessageWriter {
    buf: Vec<u8>,
    limit: usize,
    pub header: DNSPacketHeader,
    qd_count: u16,
    counts: [u16; 3],
    table: Vec<(DomainName, u16)>,
}

impl MessageWriter {
    pub fn new(limit: usize) -> Self {
        MessageWriter {
            buf: vec![0u8; QHEADER_SIZE],
            limit,
            header: DNSPacketHeader::default(),
            qd_count: 0,
            counts: [0; 3],
            table: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.len() <= QHEADER_SIZE
    }

    pub fn count(&self, section: Section) -> u16 {
        self.counts[section as usize]
    }

    // emit a name, reusing the longest already-written suffix
    fn write_name(&mut self, name: &DomainName) {
        let label_count = name.label_count();
        for i in 0..label_count {
            let suffix = name.suffix(i);

            if let Some(offset) = self
                .table
                .iter()
                .find(|(n, _)| *n == suffix)
                .map(|(_, off)| *off)
            {
                self.buf
                    .write_u16::<BigEndian>(0xC000 | offset)
                    .expect("write to Vec cannot fail");
                return;
            }

            // remember this suffix for later messages parts
            if self.buf.len() <= MAX_COMPRESSION_OFFSET {
                if self.table.len() == COMPRESSION_TABLE_SIZE {
                    self.table.remove(0);
                }
                self.table.push((suffix, self.buf.len() as u16));
            }

            let label = &name.labels()[i];
            self.buf.push(label.len() as u8);
            self.buf.extend_from_slice(label);
        }
        self.buf.push(0);
    }

    pub fn write_question(&mut self, question: &DNSQuestion) -> Result<(), Truncated> {
        let snapshot = self.snapshot();
        self.write_name(&question.name);
        let _ = question.rtype.to_network_bytes(&mut self.buf);
        let _ = question.class.to_network_bytes(&mut self.buf);
        if self.buf.len() > self.limit {
            self.restore(snapshot);
            return Err(Truncated);
        }
        self.qd_count += 1;
        Ok(())
    }

    /// Append one RR to a section. On overflow the buffer is rolled back to
    /// the previous record boundary and `Truncated` is returned; the caller
    /// decides between dropping additionals and setting TC.
    pub fn write_rr(&mut self, section: Section, rr: &ResourceRecord) -> Result<(), Truncated> {
        let snapshot = self.snapshot();

        self.write_name(&rr.name);
        let _ = rr.rtype.to_network_bytes(&mut self.buf);
        let _ = rr.class.to_network_bytes(&mut self.buf);
        let _ = rr.ttl.to_network_bytes(&mut self.buf);

        let rd_length_at = self.buf.len();
        let _ = self.buf.write_u16::<BigEndian>(0);
        match self.write_rdata(&rr.rdata) {
            Ok(written) => {
                let bytes = (written as u16).to_be_bytes();
                self.buf[rd_length_at] = bytes[0];
                self.buf[rd_length_at + 1] = bytes[1];
            }
            Err(_) => {
                self.restore(snapshot);
                return Err(Truncated);
            }
        }

        if self.buf.len() > self.limit {
            self.restore(snapshot);
            return Err(Truncated);
        }

        self.counts[section as usize] += 1;
        Ok(())
    }

    // RDATA with the compression table applied to the names the classic
    // types (NS/CNAME/SOA/MX/SRV/PTR) may compress on the wire; everything
    // else, DNSSEC types included, keeps the canonical uncompressed
    // encoding from RData::to_wire
    fn write_rdata(&mut self, rdata: &RData) -> std::io::Result<usize> {
        let start = self.buf.len();
        match rdata {
            RData::NS(dn) | RData::CNAME(dn) | RData::PTR(dn) => {
                self.write_name(dn);
            }
            RData::SOA(soa) => {
                self.write_name(&soa.mname);
                self.write_name(&soa.rname);
                let _ = soa.serial.to_network_bytes(&mut self.buf);
                let _ = soa.refresh.to_network_bytes(&mut self.buf);
                let _ = soa.retry.to_network_bytes(&mut self.buf);
                let _ = soa.expire.to_network_bytes(&mut self.buf);
                let _ = soa.minimum.to_network_bytes(&mut self.buf);
            }
            RData::MX(mx) => {
                let _ = mx.preference.to_network_bytes(&mut self.buf);
                self.write_name(&mx.exchange);
            }
            RData::SRV(srv) => {
                let _ = srv.priority.to_network_bytes(&mut self.buf);
                let _ = srv.weight.to_network_bytes(&mut self.buf);
                let _ = srv.port.to_network_bytes(&mut self.buf);
                self.write_name(&srv.target);
            }
            other => return other.to_wire(&mut self.buf),
        }
        Ok(self.buf.len() - start)
    }

    fn snapshot(&self) -> (usize, Vec<(DomainName, u16)>) {
        (self.buf.len(), self.table.clone())
    }

    fn restore(&mut self, snapshot: (usize, Vec<(DomainName, u16)>)) {
        self.buf.truncate(snapshot.0);
        self.table = snapshot.1;
    }

    /// Serialize the header and hand the finished packet over.
    pub fn finish(mut self) -> Vec<u8> {
        self.header.qd_count = self.qd_count;
        self.header.an_count = self.counts[Section::Answer as usize];
        self.header.ns_count = self.counts[Section::Authority as usize];
        self.header.ar_count = self.counts[Section::Additional as usize];

        let mut head = Vec::with_capacity(QHEADER_SIZE);
        let _ = self.header.to_network_bytes(&mut head);
        self.buf[..QHEADER_SIZE].copy_from_slice(&head);
        self.buf
    }
}

//------------------------------------------------------------------------
// Header field patching on finished buffers, used by the TSIG code which
// has to strip/append records and fix ARCOUNT/ID in place
//------------------------------------------------------------------------
pub fn patch_id(packet: &mut [u8], id: u16) {
    packet[0..2].copy_from_slice(&id.to_be_bytes());
}

pub fn read_id(packet: &[u8]) -> u16 {
    u16::from_be_bytes([packet[0], packet[1]])
}

pub fn read_arcount(packet: &[u8]) -> u16 {
    u16::from_be_bytes([packet[10], packet[11]])
}

pub fn patch_arcount(packet: &mut [u8], arcount: u16) {
    packet[10..12].copy_from_slice(&arcount.to_be_bytes());
}

pub fn set_tc(packet: &mut [u8]) {
    packet[2] |= 0b0000_0010;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rdata::RData;
    use crate::rfc1035::{QType, RRType};
    use std::net::Ipv4Addr;

    fn dn(s: &str) -> DomainName {
        DomainName::try_from(s).unwrap()
    }

    fn a_rr(name: &str, ip: [u8; 4]) -> ResourceRecord {
        ResourceRecord::new(
            dn(name),
            RRType::from(QType::A),
            300,
            RData::A(Ipv4Addr::from(ip)),
        )
    }

    #[test]
    fn owner_names_are_compressed() {
        let mut writer = MessageWriter::new(512);
        let q = DNSQuestion::new("www.example.com", QType::A, None).unwrap();
        writer.write_question(&q).unwrap();
        writer
            .write_rr(Section::Answer, &a_rr("www.example.com", [192, 0, 2, 1]))
            .unwrap();
        writer
            .write_rr(Section::Answer, &a_rr("www.example.com", [192, 0, 2, 2]))
            .unwrap();
        let packet = writer.finish();

        // second and third occurrence collapse to a 2 byte pointer to
        // offset 12, the question name
        let first = 12 + dn("www.example.com").wire_len() + 4;
        assert_eq!(packet[first], 0xC0);
        assert_eq!(packet[first + 1], 12);

        // and the message still parses back with both answers expanded
        let message = parse_message(&packet).unwrap();
        assert_eq!(message.answers.len(), 2);
        assert_eq!(message.answers[0].name, dn("www.example.com"));
        assert_eq!(message.answers[1].name, dn("www.example.com"));
    }

    #[test]
    fn rdata_names_are_compressed() {
        let mut writer = MessageWriter::new(512);
        let q = DNSQuestion::new("example.com", QType::NS, None).unwrap();
        writer.write_question(&q).unwrap();
        let ns = ResourceRecord::new(
            dn("example.com"),
            RRType::from(QType::NS),
            300,
            RData::NS(dn("example.com")),
        );
        writer.write_rr(Section::Answer, &ns).unwrap();
        let packet = writer.finish();

        // both the owner and the NS target collapse to pointers at the
        // question name; the RDATA is nothing but a 2 byte pointer
        let rr_start = 12 + dn("example.com").wire_len() + 4;
        assert_eq!(&packet[rr_start..rr_start + 2], &[0xC0, 12]);
        assert_eq!(&packet[rr_start + 10..rr_start + 12], &[0, 2]); // RDLENGTH
        assert_eq!(&packet[rr_start + 12..rr_start + 14], &[0xC0, 12]);

        // and the parser expands it back
        let message = parse_message(&packet).unwrap();
        match &message.answers[0].rdata {
            RData::NS(target) => assert_eq!(target, &dn("example.com")),
            other => panic!("unexpected rdata {:?}", other),
        }
    }

    #[test]
    fn rrsig_rdata_stays_uncompressed() {
        use crate::rdata::RRSIG;

        let mut writer = MessageWriter::new(512);
        let q = DNSQuestion::new("example.com", QType::RRSIG, None).unwrap();
        writer.write_question(&q).unwrap();
        let sig = ResourceRecord::new(
            dn("example.com"),
            RRType::from(QType::RRSIG),
            300,
            RData::RRSIG(RRSIG {
                type_covered: RRType::from(QType::A),
                algorithm: 8,
                labels: 2,
                original_ttl: 300,
                expiration: 1_710_000_000,
                inception: 1_700_000_000,
                key_tag: 12345,
                signer: dn("example.com"),
                signature: vec![0xAB; 8],
            }),
        );
        writer.write_rr(Section::Answer, &sig).unwrap();
        let packet = writer.finish();

        // the signer name inside the RRSIG must appear as plain labels,
        // never as a pointer: RDLENGTH covers the full 18 fixed octets plus
        // the uncompressed name and the signature
        let rr_start = 12 + dn("example.com").wire_len() + 4;
        let rd_length =
            u16::from_be_bytes([packet[rr_start + 10], packet[rr_start + 11]]) as usize;
        assert_eq!(rd_length, 18 + dn("example.com").wire_len() + 8);
    }

    #[test]
    fn overflow_rolls_back_to_record_boundary() {
        let mut writer = MessageWriter::new(60);
        let q = DNSQuestion::new("example.com", QType::A, None).unwrap();
        writer.write_question(&q).unwrap();

        writer
            .write_rr(Section::Answer, &a_rr("example.com", [192, 0, 2, 1]))
            .unwrap();
        let len_before = writer.len();

        // no room for a second record: the writer must refuse and keep the
        // buffer exactly as it was
        let result = writer.write_rr(Section::Answer, &a_rr("example.com", [192, 0, 2, 2]));
        assert_eq!(result, Err(Truncated));
        assert_eq!(writer.len(), len_before);
        assert_eq!(writer.count(Section::Answer), 1);

        let packet = writer.finish();
        let message = parse_message(&packet).unwrap();
        assert_eq!(message.header.an_count, 1);
    }

    #[test]
    fn header_patches() {
        let mut packet = vec![0u8; 12];
        patch_id(&mut packet, 0xBEEF);
        assert_eq!(read_id(&packet), 0xBEEF);
        patch_arcount(&mut packet, 3);
        assert_eq!(read_arcount(&packet), 3);
        set_tc(&mut packet);
        assert_eq!(packet[2] & 0b10, 0b10);
    }
}
