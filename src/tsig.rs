//! TSIG (RFC8945): per-message authentication with a shared HMAC key.
//!
//! One `TsigState` follows a whole exchange: it signs an outbound query,
//! verifies the response(s), and for AXFR streams keeps the running digest
//! chained across packets (prior MAC, length-prefixed). The server side uses
//! the same state to verify a request and sign the answer.
use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt};
use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;
use sha2::Sha256;

use crate::dname::DomainName;
use crate::error::{DNSError, DNSResult};
use crate::network_order::{FromNetworkOrder, ToNetworkOrder};
use crate::rdata::{RData, TSIG};
use crate::rfc1035::{
    DNSPacketHeader, QClass, QType, RRClass, RRType, ResourceRecord, TsigRcode,
};
use crate::wire::{patch_arcount, patch_id, read_arcount};

// RFC8945 recommends 300 seconds
pub const TSIG_FUDGE: u16 = 300;

// in an AXFR stream at most this many packets may go by without a TSIG
pub const TSIG_MAX_UNSIGNED: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsigAlgorithm {
    HmacMd5,
    HmacSha1,
    HmacSha256,
}

impl TsigAlgorithm {
    // the algorithm identifier carried in the TSIG RR
    pub fn wire_name(&self) -> DomainName {
        let name = match self {
            TsigAlgorithm::HmacMd5 => "hmac-md5.sig-alg.reg.int",
            TsigAlgorithm::HmacSha1 => "hmac-sha1",
            TsigAlgorithm::HmacSha256 => "hmac-sha256",
        };
        DomainName::try_from(name).expect("static algorithm names parse")
    }

    pub fn from_wire_name(name: &DomainName) -> Option<Self> {
        let s = name.to_string().to_lowercase();
        match s.as_str() {
            "hmac-md5.sig-alg.reg.int." | "hmac-md5." => Some(TsigAlgorithm::HmacMd5),
            "hmac-sha1." => Some(TsigAlgorithm::HmacSha1),
            "hmac-sha256." => Some(TsigAlgorithm::HmacSha256),
            _ => None,
        }
    }

    pub fn digest_len(&self) -> usize {
        match self {
            TsigAlgorithm::HmacMd5 => 16,
            TsigAlgorithm::HmacSha1 => 20,
            TsigAlgorithm::HmacSha256 => 32,
        }
    }
}

impl std::str::FromStr for TsigAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hmac-md5" => Ok(TsigAlgorithm::HmacMd5),
            "hmac-sha1" => Ok(TsigAlgorithm::HmacSha1),
            "hmac-sha256" => Ok(TsigAlgorithm::HmacSha256),
            _ => Err(format!("unknown TSIG algorithm '{}'", s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TsigKey {
    pub name: DomainName,
    pub algorithm: TsigAlgorithm,
    pub secret: Vec<u8>,
}

impl TsigKey {
    pub fn new(name: DomainName, algorithm: TsigAlgorithm, secret: Vec<u8>) -> Self {
        TsigKey {
            name,
            algorithm,
            secret,
        }
    }

    /// Parse the `-y name:secret_base64` or `name:algorithm:secret_base64`
    /// command line form.
    pub fn from_spec(spec: &str) -> DNSResult<TsigKey> {
        let parts: Vec<&str> = spec.split(':').collect();
        let (name, algorithm, secret) = match parts.as_slice() {
            [name, secret] => (*name, TsigAlgorithm::HmacMd5, *secret),
            [name, algo, secret] => (
                *name,
                algo.parse::<TsigAlgorithm>().map_err(DNSError::DNS)?,
                *secret,
            ),
            _ => return Err(DNSError::DNS(format!("bad key syntax {}", spec))),
        };

        Ok(TsigKey {
            name: DomainName::try_from(name)?,
            algorithm,
            secret: base64::decode(secret)
                .map_err(|_| DNSError::DNS(format!("bad key syntax {}", spec)))?,
        })
    }
}

/// The configured keys, looked up by name when a signed query comes in.
#[derive(Debug, Default, Clone)]
pub struct KeyStore {
    keys: Vec<TsigKey>,
}

impl KeyStore {
    pub fn add(&mut self, key: TsigKey) {
        log::info!("added key {}", key.name);
        self.keys.push(key);
    }

    pub fn find(&self, name: &DomainName) -> Option<&TsigKey> {
        self.keys.iter().find(|k| k.name == *name)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

// one running HMAC, algorithm chosen at key setup
enum HmacCtx {
    Md5(Hmac<Md5>),
    Sha1(Hmac<Sha1>),
    Sha256(Hmac<Sha256>),
}

impl HmacCtx {
    fn new(key: &TsigKey) -> DNSResult<Self> {
        let ctx = match key.algorithm {
            TsigAlgorithm::HmacMd5 => HmacCtx::Md5(
                Hmac::<Md5>::new_from_slice(&key.secret)
                    .map_err(|_| DNSError::new("bad TSIG key length"))?,
            ),
            TsigAlgorithm::HmacSha1 => HmacCtx::Sha1(
                Hmac::<Sha1>::new_from_slice(&key.secret)
                    .map_err(|_| DNSError::new("bad TSIG key length"))?,
            ),
            TsigAlgorithm::HmacSha256 => HmacCtx::Sha256(
                Hmac::<Sha256>::new_from_slice(&key.secret)
                    .map_err(|_| DNSError::new("bad TSIG key length"))?,
            ),
        };
        Ok(ctx)
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            HmacCtx::Md5(ctx) => ctx.update(data),
            HmacCtx::Sha1(ctx) => ctx.update(data),
            HmacCtx::Sha256(ctx) => ctx.update(data),
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            HmacCtx::Md5(ctx) => ctx.finalize().into_bytes().to_vec(),
            HmacCtx::Sha1(ctx) => ctx.finalize().into_bytes().to_vec(),
            HmacCtx::Sha256(ctx) => ctx.finalize().into_bytes().to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsigStatus {
    Ok,
    NotPresent,
    Error,
}

/// A TSIG RR located at the tail of a raw packet.
#[derive(Debug)]
pub struct TsigFound {
    // byte offset where the TSIG RR starts; everything before it is what
    // gets digested
    pub position: usize,
    pub key_name: DomainName,
    pub rdata: TSIG,
}

/// Scan a raw packet for a trailing TSIG RR without building the whole
/// message. Returns None when the additional section carries no TSIG.
pub fn find_tsig(packet: &[u8]) -> DNSResult<Option<TsigFound>> {
    let mut cursor = Cursor::new(packet);
    let mut header = DNSPacketHeader::default();
    header.from_network_bytes(&mut cursor)?;

    for _ in 0..header.qd_count {
        let mut name = DomainName::default();
        name.from_network_bytes(&mut cursor)?;
        cursor.set_position(cursor.position() + 4);
    }

    let rr_count = header.an_count as usize + header.ns_count as usize + header.ar_count as usize;
    for i in 0..rr_count {
        let position = cursor.position() as usize;

        let mut name = DomainName::default();
        name.from_network_bytes(&mut cursor)?;
        let rtype = RRType(cursor.read_u16::<BigEndian>()?);
        let _class = cursor.read_u16::<BigEndian>()?;
        let _ttl = cursor.read_u32::<BigEndian>()?;
        let rd_length = cursor.read_u16::<BigEndian>()?;

        if rtype == QType::TSIG {
            // a TSIG RR must be the very last record of the message
            if i != rr_count - 1 {
                return Err(DNSError::new("TSIG RR is not the last record"));
            }
            let rdata = match RData::from_wire(rtype, &mut cursor, rd_length)? {
                RData::TSIG(tsig) => tsig,
                _ => return Err(DNSError::new("bad TSIG RDATA")),
            };
            return Ok(Some(TsigFound {
                position,
                key_name: name,
                rdata,
            }));
        }

        cursor.set_position(cursor.position() + rd_length as u64);
        if cursor.position() as usize > packet.len() {
            return Err(DNSError::new("RR past the end of the packet"));
        }
    }

    Ok(None)
}

/// Running authentication state for one signed exchange.
pub struct TsigState {
    key: TsigKey,
    ctx: Option<HmacCtx>,
    prior_mac: Vec<u8>,
    pub original_id: u16,
    pub status: TsigStatus,
    pub error_code: TsigRcode,
    pub response_count: usize,
    // responses we have signed; from the second one on, only the timers
    // enter the digest [RFC8945 §5.3.1]
    signed_count: usize,
    pub updates_since_last_prepare: u32,
}

impl TsigState {
    pub fn new(key: &TsigKey) -> Self {
        TsigState {
            key: key.clone(),
            ctx: None,
            prior_mac: Vec::new(),
            original_id: 0,
            status: TsigStatus::NotPresent,
            error_code: TsigRcode::NOERROR,
            response_count: 0,
            signed_count: 0,
            updates_since_last_prepare: 0,
        }
    }

    pub fn key_name(&self) -> &DomainName {
        &self.key.name
    }

    /// Snapshot point: start a fresh digest, seeded with the prior MAC
    /// (length-prefixed) once there is one. Subsequent `update` calls are
    /// committed by the next `sign`/`verify`.
    pub fn prepare(&mut self) -> DNSResult<()> {
        let mut ctx = HmacCtx::new(&self.key)?;
        if !self.prior_mac.is_empty() {
            ctx.update(&(self.prior_mac.len() as u16).to_be_bytes());
            ctx.update(&self.prior_mac);
        }
        self.ctx = Some(ctx);
        self.updates_since_last_prepare = 0;
        Ok(())
    }

    pub fn update(&mut self, data: &[u8]) {
        if let Some(ctx) = self.ctx.as_mut() {
            ctx.update(data);
        }
        self.updates_since_last_prepare += 1;
    }

    // the TSIG variables covered by every full digest [RFC8945 §4.3.3]
    fn digest_variables(ctx: &mut HmacCtx, key: &TsigKey, time_signed: u64, fudge: u16, error: u16, other: &[u8]) {
        ctx.update(&key.name.canonical_wire());
        ctx.update(&(QClass::ANY as u16).to_be_bytes());
        ctx.update(&0u32.to_be_bytes());
        ctx.update(&key.algorithm.wire_name().canonical_wire());
        ctx.update(&time_signed.to_be_bytes()[2..8]);
        ctx.update(&fudge.to_be_bytes());
        ctx.update(&error.to_be_bytes());
        ctx.update(&(other.len() as u16).to_be_bytes());
        ctx.update(other);
    }

    // timers only, for the non-first packets of a stream [RFC8945 §5.3.1]
    fn digest_timers(ctx: &mut HmacCtx, time_signed: u64, fudge: u16) {
        ctx.update(&time_signed.to_be_bytes()[2..8]);
        ctx.update(&fudge.to_be_bytes());
    }

    /// Sign an outbound query: digest the whole packet plus the TSIG
    /// variables, then append the TSIG RR and bump ARCOUNT.
    pub fn sign_query(&mut self, packet: &mut Vec<u8>, now: u64) -> DNSResult<()> {
        self.original_id = crate::wire::read_id(packet);
        self.prior_mac.clear();
        self.prepare()?;
        self.update(&packet.clone());

        let mut ctx = self.ctx.take().ok_or_else(|| DNSError::new("TSIG not prepared"))?;
        Self::digest_variables(&mut ctx, &self.key, now, TSIG_FUDGE, 0, &[]);
        let mac = ctx.finalize();

        self.append_tsig_rr(packet, now, &mac, TsigRcode::NOERROR, &[])?;
        self.prior_mac = mac;

        // ready for the first response
        self.prepare()?;
        Ok(())
    }

    /// Sign a response. The request MAC must already be in `prior_mac`
    /// (a successful `verify` of the request put it there). On BADTIME the
    /// other-data field carries our clock so the peer can resubmit.
    pub fn sign_response(
        &mut self,
        packet: &mut Vec<u8>,
        now: u64,
        error: TsigRcode,
    ) -> DNSResult<()> {
        self.prepare()?;
        self.update(&packet.clone());

        let other = if error == TsigRcode::BADTIME {
            now.to_be_bytes()[2..8].to_vec()
        } else {
            Vec::new()
        };

        let mut ctx = self.ctx.take().ok_or_else(|| DNSError::new("TSIG not prepared"))?;
        if self.signed_count > 0 {
            Self::digest_timers(&mut ctx, now, TSIG_FUDGE);
        } else {
            Self::digest_variables(&mut ctx, &self.key, now, TSIG_FUDGE, error as u16, &other);
        }
        let mac = ctx.finalize();

        self.append_tsig_rr(packet, now, &mac, error, &other)?;
        self.prior_mac = mac;
        self.signed_count += 1;
        Ok(())
    }

    fn append_tsig_rr(
        &mut self,
        packet: &mut Vec<u8>,
        now: u64,
        mac: &[u8],
        error: TsigRcode,
        other: &[u8],
    ) -> DNSResult<()> {
        let rr = ResourceRecord {
            name: self.key.name.clone(),
            rtype: RRType::from(QType::TSIG),
            class: RRClass::from(QClass::ANY),
            ttl: 0,
            rdata: RData::TSIG(TSIG {
                algorithm: self.key.algorithm.wire_name(),
                time_signed: now,
                fudge: TSIG_FUDGE,
                mac: mac.to_vec(),
                original_id: crate::wire::read_id(packet),
                error: error as u16,
                other: other.to_vec(),
            }),
        };
        rr.to_network_bytes(packet)?;
        let arcount = read_arcount(packet) + 1;
        patch_arcount(packet, arcount);
        Ok(())
    }

    /// Verify a packet carrying a TSIG RR signed with our key. The MAC is
    /// recomputed over the message with the TSIG stripped (ARCOUNT
    /// decremented, ID restored) chained onto the prior MAC.
    pub fn verify(&mut self, packet: &[u8], found: &TsigFound, now: u64) -> DNSResult<()> {
        self.verify_inner(packet, found, now, false)
    }

    fn verify_inner(
        &mut self,
        packet: &[u8],
        found: &TsigFound,
        now: u64,
        timers_only: bool,
    ) -> DNSResult<()> {
        if found.key_name != self.key.name {
            self.status = TsigStatus::Error;
            self.error_code = TsigRcode::BADKEY;
            return Err(DNSError::Tsig(TsigRcode::BADKEY));
        }
        match TsigAlgorithm::from_wire_name(&found.rdata.algorithm) {
            Some(algo) if algo == self.key.algorithm => {}
            _ => {
                self.status = TsigStatus::Error;
                self.error_code = TsigRcode::BADKEY;
                return Err(DNSError::Tsig(TsigRcode::BADKEY));
            }
        }
        if found.rdata.mac.len() != self.key.algorithm.digest_len() {
            self.status = TsigStatus::Error;
            self.error_code = TsigRcode::BADTRUNC;
            return Err(DNSError::Tsig(TsigRcode::BADTRUNC));
        }

        if self.ctx.is_none() {
            self.prepare()?;
        }

        // the digested image: the message up to the TSIG RR, with the
        // original id restored and the TSIG RR taken out of ARCOUNT
        let mut image = packet[..found.position].to_vec();
        patch_id(&mut image, found.rdata.original_id);
        let arcount = read_arcount(&image);
        patch_arcount(&mut image, arcount.saturating_sub(1));
        self.update(&image);

        let mut ctx = self.ctx.take().ok_or_else(|| DNSError::new("TSIG not prepared"))?;
        if timers_only {
            Self::digest_timers(&mut ctx, found.rdata.time_signed, found.rdata.fudge);
        } else {
            Self::digest_variables(
                &mut ctx,
                &self.key,
                found.rdata.time_signed,
                found.rdata.fudge,
                found.rdata.error,
                &found.rdata.other,
            );
        }
        let mac = ctx.finalize();

        if mac != found.rdata.mac {
            self.status = TsigStatus::Error;
            self.error_code = TsigRcode::BADSIG;
            return Err(DNSError::Tsig(TsigRcode::BADSIG));
        }

        // only a valid signature can fail the time check [RFC8945 §5.2.3]
        let skew = now.abs_diff(found.rdata.time_signed);
        if skew > found.rdata.fudge as u64 {
            self.status = TsigStatus::Error;
            self.error_code = TsigRcode::BADTIME;
            // the MAC was good, keep it for the signed BADTIME answer
            self.prior_mac = found.rdata.mac.clone();
            return Err(DNSError::Tsig(TsigRcode::BADTIME));
        }

        self.status = TsigStatus::Ok;
        self.error_code = TsigRcode::NOERROR;
        self.original_id = found.rdata.original_id;
        self.prior_mac = found.rdata.mac.clone();
        self.response_count += 1;

        // chain up for the next packet of the exchange
        self.prepare()?;
        Ok(())
    }

    /// One packet of an AXFR stream. Packets without TSIG are folded into
    /// the running digest; the first packet and at least every 100th must be
    /// signed, and verification of a signed one commits everything since the
    /// last.
    pub fn verify_stream(&mut self, packet: &[u8], now: u64) -> DNSResult<()> {
        let found = find_tsig(packet)?;

        match found {
            None => {
                if self.response_count == 0 {
                    return Err(DNSError::Xfer("required TSIG not present".to_string()));
                }
                if self.updates_since_last_prepare >= TSIG_MAX_UNSIGNED {
                    return Err(DNSError::Xfer(
                        "too many response packets without TSIG".to_string(),
                    ));
                }
                if self.ctx.is_none() {
                    self.prepare()?;
                }
                self.update(packet);
                Ok(())
            }
            Some(found) => {
                let timers_only = self.response_count > 0;
                self.verify_inner(packet, &found, now, timers_only)
            }
        }
    }
}
