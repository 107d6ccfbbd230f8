//! The answer machine: one parsed inbound packet in, one response (or a
//! stream, or silence) out. No state survives between queries; everything
//! the machine needs arrives in the `QueryContext`.
use std::net::SocketAddr;

use log::{debug, warn};

use crate::acl::AclDecision;
use crate::config::Config;
use crate::dname::DomainName;
use crate::edns::{self, EdnsInfo};
use crate::error::DNSError;
use crate::rdata::{CharacterString, RData};
use crate::rfc1035::{
    DNSMessage, DNSPacketFlags, DNSQuestion, OpCode, PacketType, QClass, QType, RRSet, RRType,
    ResourceRecord, ResponseCode, TsigRcode, QHEADER_SIZE,
};
use crate::server::stats::ServerStats;
use crate::tsig::{find_tsig, KeyStore, TsigState};
use crate::wire::{parse_message, MessageWriter, Section, Truncated};
use crate::zone::{LookupOutcome, Zone};
use crate::zonedb::ZoneSet;

pub struct QueryContext<'a> {
    pub config: &'a Config,
    pub zones: &'a ZoneSet,
    pub keys: &'a KeyStore,
    pub stats: &'a ServerStats,
    pub now: u64,
}

/// What the caller should do with the outcome.
#[derive(Debug)]
pub enum QueryResponse {
    Single(Vec<u8>),
    // an AXFR answer: a sequence of messages for the TCP stream
    Stream(Vec<Vec<u8>>),
    // a NOTIFY acknowledgement plus the zone to schedule a refresh for
    Notify { reply: Vec<u8>, zone: DomainName },
    Drop,
}

// how the reply gets signed, when it does
struct TsigReply {
    state: TsigState,
    error: TsigRcode,
}

/// The whole per-query state machine. Every early exit maps to either a
/// protocol error response or a silent drop; internal errors never reach
/// the peer as anything but SERVFAIL.
pub fn answer_query(
    ctx: &QueryContext,
    src: SocketAddr,
    packet: &[u8],
    via_tcp: bool,
) -> QueryResponse {
    if packet.len() < QHEADER_SIZE {
        ctx.stats.dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        return QueryResponse::Drop;
    }

    let message = match parse_message(packet) {
        Ok(message) => message,
        Err(e) => {
            debug!("malformed packet from {}: {:?}", src, e);
            return error_from_raw(ctx, packet, ResponseCode::FormErr);
        }
    };

    // never answer an answer
    if message.header.flags.packet_type == PacketType::Response {
        ctx.stats.dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        return QueryResponse::Drop;
    }

    ctx.stats.count_opcode(message.header.flags.op_code);

    match message.header.flags.op_code {
        OpCode::Query => {}
        OpCode::Notify => return answer_notify(ctx, src, packet, &message),
        _ => return error_response(ctx, &message, ResponseCode::NotImp, None),
    }

    if message.header.qd_count != 1 || message.questions.len() != 1 {
        return error_response(ctx, &message, ResponseCode::FormErr, None);
    }
    let question = message.questions[0].clone();
    ctx.stats.count_qtype(question.rtype);

    // EDNS0
    let edns_info = match edns::parse_edns(&message) {
        Ok(info) => info,
        Err(e) => {
            debug!("bad OPT from {}: {:?}", src, e);
            return error_response(ctx, &message, ResponseCode::FormErr, None);
        }
    };
    if let Some(info) = &edns_info {
        if info.version > 0 {
            return badvers_response(ctx, &message, &question);
        }
    }

    // TSIG verification comes before anything the key might authorize
    let mut tsig_reply: Option<TsigReply> = None;
    let mut verified_key: Option<DomainName> = None;
    match find_tsig(packet) {
        Err(e) => {
            debug!("unparseable TSIG from {}: {:?}", src, e);
            return error_response(ctx, &message, ResponseCode::FormErr, None);
        }
        Ok(None) => {}
        Ok(Some(found)) => match ctx.keys.find(&found.key_name) {
            None => {
                // RFC8945: unsigned response, NOTAUTH, BADKEY in the TSIG
                warn!("query from {} signed with unknown key {}", src, found.key_name);
                return tsig_error_response(ctx, &message, &question, &found.key_name, TsigRcode::BADKEY);
            }
            Some(key) => {
                let mut state = TsigState::new(key);
                match state.verify(packet, &found, ctx.now) {
                    Ok(()) => {
                        verified_key = Some(found.key_name.clone());
                        tsig_reply = Some(TsigReply {
                            state,
                            error: TsigRcode::NOERROR,
                        });
                    }
                    Err(DNSError::Tsig(code)) => {
                        warn!("TSIG failure {:?} from {} with key {}", code, src, found.key_name);
                        if code == TsigRcode::BADTIME {
                            // a BADTIME answer is signed so the peer can trust
                            // our clock
                            let reply = TsigReply { state, error: code };
                            return build_tsig_time_response(ctx, &message, &question, reply);
                        }
                        return tsig_error_response(ctx, &message, &question, &found.key_name, code);
                    }
                    Err(e) => {
                        debug!("TSIG processing error from {}: {:?}", src, e);
                        return error_response(ctx, &message, ResponseCode::FormErr, None);
                    }
                }
            }
        },
    }

    // CHAOS class carries only the server identity
    if question.class == QClass::CH {
        return chaos_response(ctx, &message, &question);
    }
    if question.class != QClass::IN && question.class != QClass::ANY {
        return error_response(ctx, &message, ResponseCode::Refused, None);
    }

    // zone transfer questions take the AXFR path
    if question.rtype == QType::AXFR || question.rtype == QType::IXFR {
        return answer_axfr(ctx, src, &message, &question, via_tcp, verified_key, tsig_reply);
    }

    let zone = match ctx.zones.find_zone(&question.name) {
        Some(zone) => zone.clone(),
        None => {
            ctx.stats.wrongzone.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return error_response(ctx, &message, ResponseCode::Refused, tsig_reply);
        }
    };

    build_answer(ctx, &message, &question, &zone, edns_info, via_tcp, tsig_reply)
}

//------------------------------------------------------------------------
// section assembly
//------------------------------------------------------------------------

fn response_flags(request: &DNSMessage, rcode: ResponseCode, authoritative: bool) -> DNSPacketFlags {
    DNSPacketFlags {
        packet_type: PacketType::Response,
        op_code: request.header.flags.op_code,
        authoritative_answer: authoritative,
        truncated: false,
        recursion_desired: request.header.flags.recursion_desired,
        recursion_available: false,
        z: false,
        authentic_data: false,
        checking_disabled: false,
        response_code: rcode,
    }
}

// room kept at the tail for the OPT record and, when signing, the TSIG RR
fn tail_reserve(edns: bool, tsig: Option<&TsigReply>) -> usize {
    let mut reserve = 0;
    if edns {
        reserve += 11;
    }
    if let Some(reply) = tsig {
        reserve += reply.state.key_name().wire_len() + 10 // fixed RR fields
            + 64 // algorithm name, times, mac length
            + 32; // the largest supported mac
    }
    reserve
}

fn finish(
    ctx: &QueryContext,
    writer: MessageWriter,
    truncated: bool,
    edns_info: Option<EdnsInfo>,
    tsig_reply: Option<TsigReply>,
) -> QueryResponse {
    ctx.stats.count_rcode(writer.header.flags.response_code);
    let mut packet = writer.finish();
    if truncated {
        crate::wire::set_tc(&mut packet);
        ctx.stats.truncated.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    if edns_info.is_some() {
        let opt = edns::opt_rr(crate::rfc1035::EDNS_MAX_MESSAGE_LEN as u16, 0, false);
        append_rr(&mut packet, &opt);
    }

    if let Some(mut reply) = tsig_reply {
        if let Err(e) = reply.state.sign_response(&mut packet, ctx.now, reply.error) {
            warn!("failed to sign response: {:?}", e);
            ctx.stats.txerr.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return QueryResponse::Drop;
        }
    }

    QueryResponse::Single(packet)
}

// append a record to a finished buffer, bumping ARCOUNT
fn append_rr(packet: &mut Vec<u8>, rr: &ResourceRecord) {
    use crate::network_order::ToNetworkOrder;
    if rr.to_network_bytes(packet).is_ok() {
        let arcount = crate::wire::read_arcount(packet) + 1;
        crate::wire::patch_arcount(packet, arcount);
    }
}

fn write_rrsets(
    writer: &mut MessageWriter,
    section: Section,
    rrsets: &[RRSet],
) -> Result<(), Truncated> {
    for set in rrsets {
        for rr in set.records() {
            writer.write_rr(section, &rr)?;
        }
    }
    Ok(())
}

/// Names whose addresses belong in the additional section: NS, MX and SRV
/// targets of the records already emitted.
fn additional_targets(rrsets: &[RRSet]) -> Vec<DomainName> {
    let mut targets = Vec::new();
    for set in rrsets {
        for rdata in &set.rdatas {
            let target = match rdata {
                RData::NS(name) => name,
                RData::MX(mx) => &mx.exchange,
                RData::SRV(srv) => &srv.target,
                _ => continue,
            };
            if !targets.contains(target) {
                targets.push(target.clone());
            }
        }
    }
    targets
}

// best effort: addresses for every target until the budget runs out
fn write_additionals(writer: &mut MessageWriter, zone: &Zone, targets: &[DomainName]) {
    for target in targets {
        for rtype in [RRType::from(QType::A), RRType::from(QType::AAAA)] {
            if let Some(set) = zone.rrset(target, rtype) {
                if write_rrsets(writer, Section::Additional, &[set.clone()]).is_err() {
                    return;
                }
            }
        }
    }
}

fn build_answer(
    ctx: &QueryContext,
    request: &DNSMessage,
    question: &DNSQuestion,
    zone: &Zone,
    edns_info: Option<EdnsInfo>,
    via_tcp: bool,
    tsig_reply: Option<TsigReply>,
) -> QueryResponse {
    let outcome = match zone.lookup(&question.name, question.rtype) {
        Ok(outcome) => outcome,
        Err(e) => {
            // an invariant violation must never leak to the peer
            warn!("lookup failure for {}: {:?}", question.name, e);
            return error_response(ctx, request, ResponseCode::ServFail, tsig_reply);
        }
    };

    let limit = edns::response_limit(via_tcp, edns_info.as_ref());
    let mut writer =
        MessageWriter::new(limit.saturating_sub(tail_reserve(edns_info.is_some(), tsig_reply.as_ref())));
    writer.header.id = request.header.id;

    if writer.write_question(question).is_err() {
        return error_response(ctx, request, ResponseCode::ServFail, tsig_reply);
    }

    let mut truncated = false;
    let mut authoritative = true;
    let mut rcode = ResponseCode::NoError;

    match outcome {
        LookupOutcome::Answer { rrsets, wildcard } => {
            if write_rrsets(&mut writer, Section::Answer, &rrsets).is_err() {
                if via_tcp {
                    // answer overflow on TCP cannot be repaired by retrying
                    return error_response(ctx, request, ResponseCode::ServFail, tsig_reply);
                }
                truncated = true;
            }
            if !truncated {
                if wildcard {
                    if let Some(proof) = zone.wildcard_proof(&question.name) {
                        let _ = write_rrsets(&mut writer, Section::Authority, &[proof]);
                    }
                }
                write_additionals(&mut writer, zone, &additional_targets(&rrsets));
            }
        }
        LookupOutcome::Nodata { chain, name } => {
            if write_rrsets(&mut writer, Section::Answer, &chain).is_err() && !via_tcp {
                truncated = true;
            }
            let mut authority = vec![zone.soa_for_authority()];
            if zone.signed {
                if let Some(nsec) = zone.nsec_covering(&name) {
                    authority.push(nsec);
                }
            }
            let _ = write_rrsets(&mut writer, Section::Authority, &authority);
        }
        LookupOutcome::Referral { chain, ns } => {
            authoritative = false;
            ctx.stats.nona.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            if write_rrsets(&mut writer, Section::Answer, &chain).is_err() && !via_tcp {
                truncated = true;
            }
            if write_rrsets(&mut writer, Section::Authority, &[ns.clone()]).is_err() && !via_tcp {
                truncated = true;
            }
            if !truncated {
                write_additionals(&mut writer, zone, &additional_targets(&[ns]));
            }
        }
        LookupOutcome::Nxdomain { chain } => {
            rcode = ResponseCode::NXDomain;
            let _ = write_rrsets(&mut writer, Section::Answer, &chain);
            let mut authority = vec![zone.soa_for_authority()];
            authority.extend(zone.nxdomain_proof(&question.name));
            let _ = write_rrsets(&mut writer, Section::Authority, &authority);
        }
    }

    writer.header.flags = response_flags(request, rcode, authoritative);
    finish(ctx, writer, truncated, edns_info, tsig_reply)
}

//------------------------------------------------------------------------
// error responses
//------------------------------------------------------------------------

fn error_response(
    ctx: &QueryContext,
    request: &DNSMessage,
    rcode: ResponseCode,
    tsig_reply: Option<TsigReply>,
) -> QueryResponse {
    let mut writer = MessageWriter::new(crate::rfc1035::MAX_UDP_PACKET_SIZE);
    writer.header.id = request.header.id;
    writer.header.flags = response_flags(request, rcode, false);
    if let Some(question) = request.questions.first() {
        let _ = writer.write_question(question);
    }
    finish(ctx, writer, false, None, tsig_reply)
}

// a FORMERR for packets too mangled to parse: echo the id, nothing else
fn error_from_raw(ctx: &QueryContext, packet: &[u8], rcode: ResponseCode) -> QueryResponse {
    ctx.stats.count_rcode(rcode);
    let mut writer = MessageWriter::new(crate::rfc1035::MAX_UDP_PACKET_SIZE);
    writer.header.id = crate::wire::read_id(packet);
    writer.header.flags.packet_type = PacketType::Response;
    writer.header.flags.response_code = rcode;
    QueryResponse::Single(writer.finish())
}

// BADVERS: empty sections, an OPT carrying the extended rcode high bits
fn badvers_response(
    ctx: &QueryContext,
    request: &DNSMessage,
    question: &DNSQuestion,
) -> QueryResponse {
    let mut writer = MessageWriter::new(crate::rfc1035::MAX_UDP_PACKET_SIZE);
    writer.header.id = request.header.id;
    // BADVERS = 16: rcode bits 0 in the header, 1 in the OPT extension
    writer.header.flags = response_flags(request, ResponseCode::NoError, false);
    let _ = writer.write_question(question);
    let mut packet = writer.finish();
    append_rr(
        &mut packet,
        &edns::opt_rr(crate::rfc1035::EDNS_MAX_MESSAGE_LEN as u16, 1, false),
    );
    ctx.stats.count_rcode(ResponseCode::BADVERS);
    QueryResponse::Single(packet)
}

// NOTAUTH + a TSIG RR carrying the error code, unsigned [RFC8945 §5.2]
fn tsig_error_response(
    ctx: &QueryContext,
    request: &DNSMessage,
    question: &DNSQuestion,
    key_name: &DomainName,
    code: TsigRcode,
) -> QueryResponse {
    let mut writer = MessageWriter::new(crate::rfc1035::MAX_UDP_PACKET_SIZE);
    writer.header.id = request.header.id;
    writer.header.flags = response_flags(request, ResponseCode::NotAuth, false);
    let _ = writer.write_question(question);
    let mut packet = writer.finish();

    let tsig = ResourceRecord {
        name: key_name.clone(),
        rtype: RRType::from(QType::TSIG),
        class: crate::rfc1035::RRClass::from(QClass::ANY),
        ttl: 0,
        rdata: RData::TSIG(crate::rdata::TSIG {
            algorithm: DomainName::try_from("hmac-sha256").unwrap_or_default(),
            time_signed: ctx.now,
            fudge: crate::tsig::TSIG_FUDGE,
            mac: Vec::new(),
            original_id: request.header.id,
            error: code as u16,
            other: Vec::new(),
        }),
    };
    append_rr(&mut packet, &tsig);
    ctx.stats.count_rcode(ResponseCode::NotAuth);
    QueryResponse::Single(packet)
}

// BADTIME is answered signed, with our clock in the other-data field
fn build_tsig_time_response(
    ctx: &QueryContext,
    request: &DNSMessage,
    question: &DNSQuestion,
    reply: TsigReply,
) -> QueryResponse {
    let mut writer = MessageWriter::new(crate::rfc1035::MAX_UDP_PACKET_SIZE);
    writer.header.id = request.header.id;
    writer.header.flags = response_flags(request, ResponseCode::NotAuth, false);
    let _ = writer.write_question(question);
    finish(ctx, writer, false, None, Some(reply))
}

//------------------------------------------------------------------------
// CHAOS identity
//------------------------------------------------------------------------
fn chaos_response(
    ctx: &QueryContext,
    request: &DNSMessage,
    question: &DNSQuestion,
) -> QueryResponse {
    let qname = question.name.to_string().to_lowercase();
    let wants_identity = qname == "id.server." || qname == "hostname.bind.";
    let type_ok = question.rtype == QType::TXT || question.rtype == QType::ANY;

    if !wants_identity || !type_ok || ctx.config.identity.is_empty() {
        return error_response(ctx, request, ResponseCode::Refused, None);
    }

    let mut writer = MessageWriter::new(crate::rfc1035::MAX_UDP_PACKET_SIZE);
    writer.header.id = request.header.id;
    writer.header.flags = response_flags(request, ResponseCode::NoError, true);
    let _ = writer.write_question(question);
    let txt = ResourceRecord {
        name: question.name.clone(),
        rtype: RRType::from(QType::TXT),
        class: crate::rfc1035::RRClass::from(QClass::CH),
        ttl: 0,
        rdata: RData::TXT(vec![CharacterString::from(ctx.config.identity.as_str())]),
    };
    let _ = writer.write_rr(Section::Answer, &txt);
    finish(ctx, writer, false, None, None)
}

//------------------------------------------------------------------------
// NOTIFY receive [RFC1996]
//------------------------------------------------------------------------
fn answer_notify(
    ctx: &QueryContext,
    src: SocketAddr,
    packet: &[u8],
    message: &DNSMessage,
) -> QueryResponse {
    if message.header.qd_count != 1 || message.questions.len() != 1 {
        return error_response(ctx, message, ResponseCode::FormErr, None);
    }
    let question = &message.questions[0];

    let zone_config = match ctx.config.zone(&question.name) {
        Some(config) if config.is_slave() => config,
        _ => {
            warn!("NOTIFY from {} for unhandled zone {}", src, question.name);
            return error_response(ctx, message, ResponseCode::NotAuth, None);
        }
    };

    // a TSIG signature names the key the ACL may require
    let mut key_name = None;
    match find_tsig(packet) {
        Err(_) => return error_response(ctx, message, ResponseCode::FormErr, None),
        Ok(None) => {}
        Ok(Some(found)) => match ctx.keys.find(&found.key_name) {
            None => {
                return tsig_error_response(ctx, message, question, &found.key_name, TsigRcode::BADKEY)
            }
            Some(key) => {
                let mut state = TsigState::new(key);
                if let Err(e) = state.verify(packet, &found, ctx.now) {
                    warn!("NOTIFY TSIG failure from {}: {:?}", src, e);
                    let code = match e {
                        DNSError::Tsig(code) => code,
                        _ => TsigRcode::BADSIG,
                    };
                    return tsig_error_response(ctx, message, question, &found.key_name, code);
                }
                key_name = Some(found.key_name);
            }
        },
    }

    match zone_config.allow_notify.check(&src, key_name.as_ref()) {
        AclDecision::Allow(index) => {
            debug!(
                "NOTIFY for {} accepted from {} (acl entry {})",
                question.name, src, index
            );
        }
        AclDecision::Refuse => {
            warn!("NOTIFY for {} refused from {}", question.name, src);
            return error_response(ctx, message, ResponseCode::Refused, None);
        }
        AclDecision::Drop => return QueryResponse::Drop,
    }

    // mirrored header, QR set
    let mut writer = MessageWriter::new(crate::rfc1035::MAX_UDP_PACKET_SIZE);
    writer.header.id = message.header.id;
    writer.header.flags = response_flags(message, ResponseCode::NoError, true);
    let _ = writer.write_question(question);
    ctx.stats.count_rcode(ResponseCode::NoError);

    QueryResponse::Notify {
        reply: writer.finish(),
        zone: question.name.clone(),
    }
}

//------------------------------------------------------------------------
// AXFR serving [RFC5936]
//------------------------------------------------------------------------
fn answer_axfr(
    ctx: &QueryContext,
    src: SocketAddr,
    request: &DNSMessage,
    question: &DNSQuestion,
    via_tcp: bool,
    verified_key: Option<DomainName>,
    tsig_reply: Option<TsigReply>,
) -> QueryResponse {
    let zone = match ctx.zones.get(&question.name) {
        Some(zone) => zone.clone(),
        None => {
            ctx.stats.wrongzone.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return error_response(ctx, request, ResponseCode::NotAuth, tsig_reply);
        }
    };

    // transfers are gated by the per-zone ACL
    let allowed = match ctx.config.zone(&question.name) {
        Some(config) => config.provide_xfr.check(&src, verified_key.as_ref()),
        None => AclDecision::Refuse,
    };
    match allowed {
        AclDecision::Allow(_) => {}
        AclDecision::Refuse => {
            warn!("AXFR of {} refused for {}", question.name, src);
            return error_response(ctx, request, ResponseCode::Refused, tsig_reply);
        }
        AclDecision::Drop => return QueryResponse::Drop,
    }

    // IXFR falls back to AXFR; over UDP only the SOA fits, which tells the
    // peer to come back over TCP
    if !via_tcp {
        let mut writer = MessageWriter::new(crate::rfc1035::MAX_UDP_PACKET_SIZE);
        writer.header.id = request.header.id;
        writer.header.flags = response_flags(request, ResponseCode::NoError, true);
        let _ = writer.write_question(question);
        let _ = writer.write_rr(Section::Answer, &zone.soa);
        return finish(ctx, writer, false, None, tsig_reply);
    }

    ctx.stats.raxfr.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    log::info!("AXFR of {} (serial {}) to {}", question.name, zone.serial(), src);

    let mut tsig_state = tsig_reply.map(|r| r.state);
    let mut messages: Vec<Vec<u8>> = Vec::new();
    let limit = crate::rfc1035::MAX_TCP_MESSAGE_LEN - tail_reserve(false, None) - 128;

    // the stream: SOA first, every other rrset, SOA again
    let mut records: Vec<ResourceRecord> = vec![zone.soa.clone()];
    for set in zone.iter_rrsets() {
        if set.rtype == QType::SOA {
            continue;
        }
        records.extend(set.records());
    }
    records.push(zone.soa.clone());

    let mut writer = new_axfr_writer(request, question, limit, messages.is_empty());
    for rr in &records {
        loop {
            match writer.write_rr(Section::Answer, rr) {
                Ok(()) => break,
                Err(Truncated) => {
                    if writer.count(Section::Answer) == 0 {
                        // a single record larger than a message cannot happen
                        // with valid zone data
                        ctx.stats.txerr.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        return error_response(ctx, request, ResponseCode::ServFail, None);
                    }
                    let full = std::mem::replace(
                        &mut writer,
                        new_axfr_writer(request, question, limit, false),
                    );
                    messages.push(full.finish());
                }
            }
        }
    }
    messages.push(writer.finish());

    // every packet of the stream is signed; the first carries the request
    // digest, later ones chain on the previous mac
    if let Some(state) = tsig_state.as_mut() {
        for message in messages.iter_mut() {
            if let Err(e) = state.sign_response(message, ctx.now, TsigRcode::NOERROR) {
                warn!("failed to sign AXFR stream: {:?}", e);
                return error_response(ctx, request, ResponseCode::ServFail, None);
            }
        }
    }

    ctx.stats.count_rcode(ResponseCode::NoError);
    QueryResponse::Stream(messages)
}

fn new_axfr_writer(
    request: &DNSMessage,
    question: &DNSQuestion,
    limit: usize,
    first: bool,
) -> MessageWriter {
    let mut writer = MessageWriter::new(limit);
    writer.header.id = request.header.id;
    writer.header.flags = response_flags(request, ResponseCode::NoError, true);
    if first {
        let _ = writer.write_question(question);
    }
    writer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ZoneConfig};
    use crate::rfc1035::DNSPacketHeader;
    use crate::network_order::{FromNetworkOrder, ToNetworkOrder};
    use crate::zone::tests::{dn, sample_zone};

    fn test_setup() -> (Config, ZoneSet, KeyStore, ServerStats) {
        let mut config = Config::default();
        config.identity = "ns.example.com".to_string();
        let mut zone_config = ZoneConfig::new(dn("example.com"));
        zone_config.provide_xfr = crate::acl::Acl::from_specs(&["127.0.0.1".to_string()]).unwrap();
        config.zones.push(zone_config);

        let mut zones = ZoneSet::new();
        zones.insert(sample_zone());

        (config, zones, KeyStore::default(), ServerStats::default())
    }

    fn run_query(
        setup: &(Config, ZoneSet, KeyStore, ServerStats),
        question: DNSQuestion,
        via_tcp: bool,
    ) -> QueryResponse {
        let ctx = QueryContext {
            config: &setup.0,
            zones: &setup.1,
            keys: &setup.2,
            stats: &setup.3,
            now: 1_700_000_000,
        };
        let mut writer = MessageWriter::new(512);
        writer.header.id = 0x1234;
        writer.header.flags.packet_type = PacketType::Query;
        writer.write_question(&question).unwrap();
        let packet = writer.finish();
        answer_query(&ctx, "127.0.0.1:5300".parse().unwrap(), &packet, via_tcp)
    }

    fn parse_single(response: QueryResponse) -> DNSMessage {
        match response {
            QueryResponse::Single(packet) => parse_message(&packet).unwrap(),
            other => panic!("expected a single response, got {:?}", other),
        }
    }

    #[test]
    fn soa_query_is_answered_authoritatively() {
        let setup = test_setup();
        let q = DNSQuestion::new("example.com", QType::SOA, None).unwrap();
        let reply = parse_single(run_query(&setup, q, false));

        assert_eq!(reply.header.id, 0x1234);
        assert_eq!(reply.header.flags.packet_type, PacketType::Response);
        assert!(reply.header.flags.authoritative_answer);
        assert_eq!(reply.header.flags.response_code, ResponseCode::NoError);
        assert_eq!(reply.header.an_count, 1);
        match &reply.answers[0].rdata {
            RData::SOA(soa) => assert_eq!(soa.serial, 2024010101),
            other => panic!("unexpected rdata {:?}", other),
        }
    }

    #[test]
    fn nxdomain_carries_the_soa() {
        let setup = test_setup();
        let q = DNSQuestion::new("nx.example.com", QType::A, None).unwrap();
        let reply = parse_single(run_query(&setup, q, false));

        assert_eq!(reply.header.flags.response_code, ResponseCode::NXDomain);
        assert_eq!(reply.header.an_count, 0);
        assert_eq!(reply.header.ns_count, 1);
        assert!(reply.authorities[0].rtype == QType::SOA);
        // the negative TTL is the SOA minimum
        assert_eq!(reply.authorities[0].ttl, 300);
    }

    #[test]
    fn wildcard_answer_has_the_query_owner() {
        let setup = test_setup();
        let q = DNSQuestion::new("x.wild.example.com", QType::A, None).unwrap();
        let reply = parse_single(run_query(&setup, q, false));

        assert_eq!(reply.header.an_count, 1);
        assert_eq!(reply.answers[0].name, dn("x.wild.example.com"));
        assert_eq!(
            reply.answers[0].rdata,
            RData::A(std::net::Ipv4Addr::new(192, 0, 2, 5))
        );
    }

    #[test]
    fn out_of_authority_is_refused() {
        let setup = test_setup();
        let q = DNSQuestion::new("www.example.org", QType::A, None).unwrap();
        let reply = parse_single(run_query(&setup, q, false));
        assert_eq!(reply.header.flags.response_code, ResponseCode::Refused);
    }

    #[test]
    fn mx_answer_pulls_addresses_into_additional() {
        let setup = test_setup();
        let q = DNSQuestion::new("example.com", QType::MX, None).unwrap();
        let reply = parse_single(run_query(&setup, q, false));

        assert_eq!(reply.header.an_count, 1);
        assert_eq!(reply.header.ar_count, 1);
        assert_eq!(reply.additionals[0].name, dn("mail.example.com"));
    }

    #[test]
    fn referral_clears_aa_and_carries_glue() {
        let setup = test_setup();
        let q = DNSQuestion::new("host.sub.example.com", QType::A, None).unwrap();
        let reply = parse_single(run_query(&setup, q, false));

        assert!(!reply.header.flags.authoritative_answer);
        assert_eq!(reply.header.an_count, 0);
        assert_eq!(reply.header.ns_count, 1);
        assert!(reply.authorities[0].rtype == QType::NS);
        // glue for the in-zone NS target
        assert_eq!(reply.header.ar_count, 1);
        assert_eq!(reply.additionals[0].name, dn("ns1.sub.example.com"));
    }

    #[test]
    fn response_packets_are_dropped() {
        let setup = test_setup();
        let ctx = QueryContext {
            config: &setup.0,
            zones: &setup.1,
            keys: &setup.2,
            stats: &setup.3,
            now: 0,
        };
        let mut writer = MessageWriter::new(512);
        writer.header.flags.packet_type = PacketType::Response;
        let packet = writer.finish();
        assert!(matches!(
            answer_query(&ctx, "127.0.0.1:5300".parse().unwrap(), &packet, false),
            QueryResponse::Drop
        ));
    }

    #[test]
    fn unknown_opcode_is_notimp() {
        let setup = test_setup();
        let ctx = QueryContext {
            config: &setup.0,
            zones: &setup.1,
            keys: &setup.2,
            stats: &setup.3,
            now: 0,
        };
        let mut writer = MessageWriter::new(512);
        writer.header.flags.op_code = OpCode::Status;
        let packet = writer.finish();
        let reply = parse_single(answer_query(
            &ctx,
            "127.0.0.1:5300".parse().unwrap(),
            &packet,
            false,
        ));
        assert_eq!(reply.header.flags.response_code, ResponseCode::NotImp);
    }

    #[test]
    fn chaos_identity_txt() {
        let setup = test_setup();
        let q = DNSQuestion::new("id.server", QType::TXT, Some(QClass::CH)).unwrap();
        let reply = parse_single(run_query(&setup, q, false));

        assert_eq!(reply.header.an_count, 1);
        match &reply.answers[0].rdata {
            RData::TXT(strings) => assert_eq!(strings[0].0, b"ns.example.com"),
            other => panic!("unexpected rdata {:?}", other),
        }
    }

    #[test]
    fn unknown_tsig_key_gets_notauth_badkey() {
        let setup = test_setup();
        let ctx = QueryContext {
            config: &setup.0,
            zones: &setup.1,
            keys: &setup.2,
            stats: &setup.3,
            now: 1_700_000_000,
        };

        // sign a query with a key the server does not know
        let key = crate::tsig::TsigKey::new(
            dn("stranger.key"),
            crate::tsig::TsigAlgorithm::HmacSha256,
            b"0123456789abcdef0123456789abcdef".to_vec(),
        );
        let mut signer = TsigState::new(&key);
        let mut writer = MessageWriter::new(512);
        writer.header.id = 0x4242;
        writer
            .write_question(&DNSQuestion::new("example.com", QType::SOA, None).unwrap())
            .unwrap();
        let mut packet = writer.finish();
        signer.sign_query(&mut packet, 1_700_000_000).unwrap();

        let reply = parse_single(answer_query(
            &ctx,
            "127.0.0.1:5300".parse().unwrap(),
            &packet,
            false,
        ));
        assert_eq!(reply.header.flags.response_code, ResponseCode::NotAuth);
        // the unsigned TSIG RR carries BADKEY
        let tsig = reply.additionals.last().expect("TSIG RR present");
        match &tsig.rdata {
            RData::TSIG(tsig) => {
                assert_eq!(tsig.error, TsigRcode::BADKEY as u16);
                assert!(tsig.mac.is_empty());
            }
            other => panic!("unexpected rdata {:?}", other),
        }
    }

    #[test]
    fn axfr_streams_the_zone_over_tcp() {
        let setup = test_setup();
        let q = DNSQuestion::new("example.com", QType::AXFR, None).unwrap();
        let response = run_query(&setup, q, true);

        let messages = match response {
            QueryResponse::Stream(messages) => messages,
            other => panic!("expected a stream, got {:?}", other),
        };
        assert!(!messages.is_empty());

        let mut all_answers = Vec::new();
        for message in &messages {
            let parsed = parse_message(message).unwrap();
            assert_eq!(parsed.header.flags.response_code, ResponseCode::NoError);
            all_answers.extend(parsed.answers);
        }

        // SOA first and last, the whole zone in between
        assert!(all_answers.first().unwrap().rtype == QType::SOA);
        assert!(all_answers.last().unwrap().rtype == QType::SOA);
        let zone = sample_zone();
        assert_eq!(all_answers.len(), zone.record_count() + 1);
    }

    #[test]
    fn axfr_from_unlisted_source_is_refused() {
        let setup = test_setup();
        let ctx = QueryContext {
            config: &setup.0,
            zones: &setup.1,
            keys: &setup.2,
            stats: &setup.3,
            now: 0,
        };
        let mut writer = MessageWriter::new(512);
        writer
            .write_question(&DNSQuestion::new("example.com", QType::AXFR, None).unwrap())
            .unwrap();
        let packet = writer.finish();
        let reply = parse_single(answer_query(
            &ctx,
            "192.0.2.99:5300".parse().unwrap(),
            &packet,
            true,
        ));
        assert_eq!(reply.header.flags.response_code, ResponseCode::Refused);
    }

    #[test]
    fn notify_for_slave_zone_is_acked() {
        let (mut config, zones, keys, stats) = test_setup();
        // make example.com a slave zone allowing NOTIFY from localhost
        config.zones[0].request_xfr =
            crate::acl::Acl::from_specs(&["192.0.2.53".to_string()]).unwrap();
        config.zones[0].allow_notify =
            crate::acl::Acl::from_specs(&["127.0.0.1".to_string()]).unwrap();

        let ctx = QueryContext {
            config: &config,
            zones: &zones,
            keys: &keys,
            stats: &stats,
            now: 0,
        };

        let mut writer = MessageWriter::new(512);
        writer.header.id = 42;
        writer.header.flags.op_code = OpCode::Notify;
        writer.header.flags.authoritative_answer = true;
        writer
            .write_question(&DNSQuestion::new("example.com", QType::SOA, None).unwrap())
            .unwrap();
        let packet = writer.finish();

        match answer_query(&ctx, "127.0.0.1:5300".parse().unwrap(), &packet, false) {
            QueryResponse::Notify { reply, zone } => {
                assert_eq!(zone, dn("example.com"));
                let parsed = parse_message(&reply).unwrap();
                assert_eq!(parsed.header.id, 42);
                assert_eq!(parsed.header.flags.packet_type, PacketType::Response);
                assert_eq!(parsed.header.flags.op_code, OpCode::Notify);
            }
            other => panic!("expected a NOTIFY ack, got {:?}", other),
        }
    }

    #[test]
    fn truncated_header_is_parsed_not_panicked() {
        let setup = test_setup();
        let ctx = QueryContext {
            config: &setup.0,
            zones: &setup.1,
            keys: &setup.2,
            stats: &setup.3,
            now: 0,
        };
        // a header claiming a question that is not there
        let mut header = DNSPacketHeader::default();
        header.qd_count = 1;
        let mut packet = Vec::new();
        header.to_network_bytes(&mut packet).unwrap();
        let response = answer_query(&ctx, "127.0.0.1:5300".parse().unwrap(), &packet, false);
        let reply = parse_single(response);
        assert_eq!(reply.header.flags.response_code, ResponseCode::FormErr);

        // and the raw FORMERR parses too
        let mut cursor = std::io::Cursor::new(&packet[..]);
        let mut reparsed = DNSPacketHeader::default();
        reparsed.from_network_bytes(&mut cursor).unwrap();
    }
}
