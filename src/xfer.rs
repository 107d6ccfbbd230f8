//! The AXFR client: probe the master's SOA serial over TCP, and when it is
//! ahead of ours pull the whole zone and commit it to a master file
//! atomically. Each configured master is tried in turn until one works.
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use log::{info, warn};
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::dname::DomainName;
use crate::error::{DNSError, DNSResult};
use crate::rfc1035::{
    DNSMessage, DNSQuestion, OpCode, PacketType, QClass, QType, RRType, ResourceRecord,
    ResponseCode, MAX_TCP_MESSAGE_LEN, QHEADER_SIZE,
};
use crate::tsig::{TsigKey, TsigState};
use crate::util::serial_gt;
use crate::wire::{parse_message, MessageWriter};
use crate::zonefile::ZoneFileWriter;

/// Number of seconds to wait when receiving no data from the remote server.
pub const MAX_WAITING_TIME: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XferOutcome {
    // the master's serial is not ahead of ours, nothing written
    UpToDate,
    // the zone was transferred and committed
    Transferred { serial: u32 },
}

#[derive(Debug, Clone)]
pub struct XferOptions {
    pub zone: DomainName,
    pub masters: Vec<SocketAddr>,
    // the serial we already hold; None forces a first transfer
    pub last_serial: Option<u32>,
    pub tsig_key: Option<TsigKey>,
    pub output: PathBuf,
}

/// Try each master in turn; the first one that answers decides.
pub async fn transfer_zone(options: &XferOptions, now: u64) -> DNSResult<XferOutcome> {
    for master in &options.masters {
        match try_master(options, *master, now).await {
            Ok(outcome) => return Ok(outcome),
            Err(e) => {
                warn!("transfer of {} from {} failed: {:?}", options.zone, master, e);
            }
        }
    }
    Err(DNSError::Xfer(
        "cannot contact an authoritative server, zone NOT transferred".to_string(),
    ))
}

async fn try_master(
    options: &XferOptions,
    master: SocketAddr,
    now: u64,
) -> DNSResult<XferOutcome> {
    let mut stream = timeout(MAX_WAITING_TIME, TcpStream::connect(master)).await??;

    let remote_serial = check_serial(&mut stream, options, now).await?;
    match options.last_serial {
        Some(last) if !serial_gt(remote_serial, last) => {
            info!(
                "zone {} is up to date (serial {}, remote {})",
                options.zone, last, remote_serial
            );
            return Ok(XferOutcome::UpToDate);
        }
        _ => {}
    }

    // pull into a temporary file, commit by rename only on success
    let tmp_path = options.output.with_extension("tmp");
    let result = axfr(&mut stream, options, &tmp_path, master, now).await;

    match result {
        Ok(serial) => {
            std::fs::rename(&tmp_path, &options.output)?;
            info!(
                "zone {} transferred from {} with serial {}",
                options.zone, master, serial
            );
            Ok(XferOutcome::Transferred { serial })
        }
        Err(e) => {
            let _ = std::fs::remove_file(&tmp_path);
            Err(e)
        }
    }
}

/// Build a query for the zone: random id, AA set, one question, optional
/// TSIG. Returns the packet, its id and the signing state.
fn init_query(
    options: &XferOptions,
    qtype: QType,
    now: u64,
) -> DNSResult<(Vec<u8>, u16, Option<TsigState>)> {
    let query_id = rand::thread_rng().gen::<u16>();

    let mut writer = MessageWriter::new(MAX_TCP_MESSAGE_LEN);
    writer.header.id = query_id;
    writer.header.flags.packet_type = PacketType::Query;
    writer.header.flags.op_code = OpCode::Query;
    writer.header.flags.authoritative_answer = true;
    let question = DNSQuestion {
        name: options.zone.clone(),
        rtype: RRType::from(qtype),
        class: QClass::IN,
    };
    writer
        .write_question(&question)
        .map_err(|_| DNSError::new("query does not fit a message"))?;
    let mut packet = writer.finish();

    let state = match &options.tsig_key {
        Some(key) => {
            let mut state = TsigState::new(key);
            state.sign_query(&mut packet, now)?;
            Some(state)
        }
        None => None,
    };

    Ok((packet, query_id, state))
}

// 2-octet length prefix framing in both directions
async fn send_query(stream: &mut TcpStream, packet: &[u8]) -> DNSResult<()> {
    stream.write_all(&(packet.len() as u16).to_be_bytes()).await?;
    stream.write_all(packet).await?;
    Ok(())
}

async fn receive_response(stream: &mut TcpStream) -> DNSResult<Vec<u8>> {
    let mut size = [0u8; 2];
    timeout(MAX_WAITING_TIME, stream.read_exact(&mut size)).await??;
    let size = u16::from_be_bytes(size) as usize;

    let mut packet = vec![0u8; size];
    timeout(MAX_WAITING_TIME, stream.read_exact(&mut packet)).await??;
    log::debug!("received buffer: {}", crate::format_buffer!("X", &packet));
    Ok(packet)
}

// the header checks every response must pass
fn check_response_header(packet: &[u8], message: &DNSMessage, query_id: u16) -> DNSResult<()> {
    if packet.len() <= QHEADER_SIZE {
        return Err(DNSError::Xfer(format!(
            "response size ({}) is too small",
            packet.len()
        )));
    }
    if message.header.flags.packet_type != PacketType::Response {
        return Err(DNSError::Xfer("response is not a response".to_string()));
    }
    if message.header.id != query_id {
        return Err(DNSError::Xfer(format!(
            "bad response id ({}), expected ({})",
            message.header.id, query_id
        )));
    }
    if message.header.flags.response_code != ResponseCode::NoError {
        return Err(DNSError::Xfer(format!(
            "error response {}",
            message.header.flags.response_code as u16
        )));
    }
    Ok(())
}

/// Query the server for the zone serial and validate the answer, returning
/// the remote serial.
async fn check_serial(
    stream: &mut TcpStream,
    options: &XferOptions,
    now: u64,
) -> DNSResult<u32> {
    let (packet, query_id, mut tsig) = init_query(options, QType::SOA, now)?;
    send_query(stream, &packet).await?;

    let response = receive_response(stream).await?;
    let message = parse_message(&response)
        .map_err(|e| DNSError::Xfer(format!("bad RR in response: {:?}", e)))?;

    check_response_header(&response, &message, query_id)?;
    if message.header.flags.truncated {
        return Err(DNSError::Xfer("response is truncated".to_string()));
    }
    if message.header.qd_count != 1 {
        return Err(DNSError::Xfer(
            "question section count not equal to 1".to_string(),
        ));
    }
    if message.header.an_count == 0 {
        return Err(DNSError::Xfer("answer section is empty".to_string()));
    }

    // the echoed question must be ours
    match message.questions.first() {
        Some(question)
            if question.name == options.zone
                && question.rtype == QType::SOA
                && question.class == QClass::IN => {}
        _ => return Err(DNSError::Xfer("response does not match query".to_string())),
    }

    if let Some(state) = tsig.as_mut() {
        state.verify_stream(&response, now)?;
    }

    // find the SOA record in the response
    for record in &message.answers {
        if record.name == options.zone && record.rtype == QType::SOA {
            if let crate::rdata::RData::SOA(soa) = &record.rdata {
                return Ok(soa.serial);
            }
        }
    }
    Err(DNSError::Xfer("SOA not found in answer".to_string()))
}

/// Receive and parse the AXFR response stream into the output file.
/// Returns the transferred serial.
async fn axfr(
    stream: &mut TcpStream,
    options: &XferOptions,
    tmp_path: &PathBuf,
    master: SocketAddr,
    now: u64,
) -> DNSResult<u32> {
    let (packet, query_id, mut tsig) = init_query(options, QType::AXFR, now)?;
    info!("send AXFR query to {} for {}", master, options.zone);
    send_query(stream, &packet).await?;

    let file = std::fs::File::create(tmp_path)?;
    let mut writer = ZoneFileWriter::new(std::io::BufWriter::new(file));
    writer.write_transfer_header(
        &options.zone,
        options.last_serial,
        &master.to_string(),
        now,
        options.tsig_key.as_ref().map(|k| &k.name),
    )?;

    let mut first_soa: Option<ResourceRecord> = None;
    let mut serial = 0u32;
    let mut rr_count = 0usize;
    let mut packets_received = 0usize;
    let mut bytes_received = 0usize;
    let mut done = false;

    while !done {
        let response = receive_response(stream).await?;
        packets_received += 1;
        bytes_received += 2 + response.len();

        let message = parse_message(&response)
            .map_err(|e| DNSError::Xfer(format!("bad RR in answer section: {:?}", e)))?;
        check_response_header(&response, &message, query_id)?;
        if message.header.qd_count > 1 {
            return Err(DNSError::Xfer(
                "question section count greater than 1".to_string(),
            ));
        }
        if message.header.an_count == 0 {
            return Err(DNSError::Xfer("answer section is empty".to_string()));
        }

        if let Some(state) = tsig.as_mut() {
            state.verify_stream(&response, now)?;
        }

        for record in message.answers {
            match &first_soa {
                None => {
                    // the stream must open with the zone's SOA
                    if record.rtype != QType::SOA || record.class != QClass::IN {
                        return Err(DNSError::Xfer(format!(
                            "first RR must be the SOA record, but is a {} record",
                            record.rtype
                        )));
                    }
                    if let crate::rdata::RData::SOA(soa) = &record.rdata {
                        serial = soa.serial;
                    }
                    writer.write_rr(&record)?;
                    rr_count += 1;
                    first_soa = Some(record);
                }
                Some(opening) => {
                    if record.rtype == QType::SOA && record.class == QClass::IN {
                        // the closing SOA must repeat the opening one byte
                        // for byte: owner, TTL and RDATA all have to agree
                        if record.name != opening.name
                            || record.ttl != opening.ttl
                            || record.rdata != opening.rdata
                        {
                            return Err(DNSError::Xfer(
                                "closing SOA does not match the first".to_string(),
                            ));
                        }
                        done = true;
                        break;
                    }
                    writer.write_rr(&record)?;
                    rr_count += 1;
                }
            }
        }
    }

    // make the temp file durable before the caller renames it into place
    let mut inner = writer.into_inner();
    inner.flush()?;
    inner.get_ref().sync_all()?;

    info!(
        "received {} RRs in {} bytes (using {} response packets)",
        rr_count, bytes_received, packets_received
    );
    Ok(serial)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{answer_query, QueryContext, QueryResponse};
    use crate::server::stats::ServerStats;
    use crate::tsig::KeyStore;
    use crate::wire::Section;
    use crate::zone::tests::{a_rr, dn, sample_zone};
    use crate::zonedb::ZoneSet;
    use crate::zonefile::parse_zone_text;
    use tokio::net::TcpListener;

    // a scripted master: serves the sample zone through the real query
    // machine over one TCP connection
    async fn fake_master() -> (SocketAddr, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let mut config = crate::config::Config::default();
            let mut zone_config = crate::config::ZoneConfig::new(dn("example.com"));
            zone_config.provide_xfr =
                crate::acl::Acl::from_specs(&["127.0.0.1".to_string()]).unwrap();
            config.zones.push(zone_config);
            let mut zones = ZoneSet::new();
            zones.insert(sample_zone());
            let keys = KeyStore::default();
            let stats = ServerStats::default();

            let (mut stream, peer) = listener.accept().await.unwrap();
            loop {
                let mut size = [0u8; 2];
                if stream.read_exact(&mut size).await.is_err() {
                    return;
                }
                let mut packet = vec![0u8; u16::from_be_bytes(size) as usize];
                stream.read_exact(&mut packet).await.unwrap();

                let ctx = QueryContext {
                    config: &config,
                    zones: &zones,
                    keys: &keys,
                    stats: &stats,
                    now: 0,
                };
                match answer_query(&ctx, peer, &packet, true) {
                    QueryResponse::Single(reply) => {
                        stream
                            .write_all(&(reply.len() as u16).to_be_bytes())
                            .await
                            .unwrap();
                        stream.write_all(&reply).await.unwrap();
                    }
                    QueryResponse::Stream(messages) => {
                        for reply in messages {
                            stream
                                .write_all(&(reply.len() as u16).to_be_bytes())
                                .await
                                .unwrap();
                            stream.write_all(&reply).await.unwrap();
                        }
                    }
                    _ => return,
                }
            }
        });

        (addr, handle)
    }

    fn output_path(tag: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("authdns-xfer-{}-{}.zone", std::process::id(), tag));
        path
    }

    #[tokio::test]
    async fn up_to_date_zone_writes_nothing() {
        let (addr, _server) = fake_master().await;
        let output = output_path("uptodate");

        let options = XferOptions {
            zone: dn("example.com"),
            masters: vec![addr],
            last_serial: Some(2024010101),
            tsig_key: None,
            output: output.clone(),
        };
        let outcome = transfer_zone(&options, 0).await.unwrap();
        assert_eq!(outcome, XferOutcome::UpToDate);
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn stale_zone_is_transferred_and_committed() {
        let (addr, _server) = fake_master().await;
        let output = output_path("transfer");

        let options = XferOptions {
            zone: dn("example.com"),
            masters: vec![addr],
            last_serial: Some(2024010100),
            tsig_key: None,
            output: output.clone(),
        };
        let outcome = transfer_zone(&options, 0).await.unwrap();
        assert_eq!(
            outcome,
            XferOutcome::Transferred {
                serial: 2024010101
            }
        );

        // the committed file parses back into the full zone
        let text = std::fs::read_to_string(&output).unwrap();
        assert!(text.starts_with("; authdns version"));
        let records = parse_zone_text(&text, &dn(".")).unwrap();
        let rebuilt = crate::zone::Zone::from_records(dn("example.com"), records).unwrap();
        assert_eq!(rebuilt.serial(), 2024010101);
        assert_eq!(rebuilt.record_count(), sample_zone().record_count());

        // no stray temp file
        assert!(!output.with_extension("tmp").exists());
        std::fs::remove_file(&output).unwrap();
    }

    #[tokio::test]
    async fn first_transfer_ignores_missing_serial() {
        let (addr, _server) = fake_master().await;
        let output = output_path("first");

        let options = XferOptions {
            zone: dn("example.com"),
            masters: vec![addr],
            last_serial: None,
            tsig_key: None,
            output: output.clone(),
        };
        let outcome = transfer_zone(&options, 0).await.unwrap();
        assert!(matches!(outcome, XferOutcome::Transferred { .. }));
        std::fs::remove_file(&output).unwrap();
    }

    // a master whose AXFR stream closes with a SOA that is not a
    // byte-for-byte repeat of the opening one
    async fn bad_closing_master() -> (SocketAddr, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let zone = sample_zone();
            let (mut stream, _) = listener.accept().await.unwrap();
            loop {
                let mut size = [0u8; 2];
                if stream.read_exact(&mut size).await.is_err() {
                    return;
                }
                let mut packet = vec![0u8; u16::from_be_bytes(size) as usize];
                stream.read_exact(&mut packet).await.unwrap();
                let query = parse_message(&packet).unwrap();
                let question = query.questions[0].clone();

                let mut writer = MessageWriter::new(MAX_TCP_MESSAGE_LEN);
                writer.header.id = query.header.id;
                writer.header.flags.packet_type = PacketType::Response;
                writer.header.flags.authoritative_answer = true;
                writer.write_question(&question).unwrap();

                if question.rtype == QType::AXFR {
                    writer.write_rr(Section::Answer, &zone.soa).unwrap();
                    writer
                        .write_rr(Section::Answer, &a_rr("www.example.com", [192, 0, 2, 10]))
                        .unwrap();
                    let mut closing = zone.soa.clone();
                    closing.ttl += 1;
                    writer.write_rr(Section::Answer, &closing).unwrap();
                } else {
                    writer.write_rr(Section::Answer, &zone.soa).unwrap();
                }
                let reply = writer.finish();
                stream
                    .write_all(&(reply.len() as u16).to_be_bytes())
                    .await
                    .unwrap();
                stream.write_all(&reply).await.unwrap();
            }
        });

        (addr, handle)
    }

    #[tokio::test]
    async fn mismatched_closing_soa_aborts_the_transfer() {
        let (addr, _server) = bad_closing_master().await;
        let output = output_path("badsoa");

        let options = XferOptions {
            zone: dn("example.com"),
            masters: vec![addr],
            last_serial: None,
            tsig_key: None,
            output: output.clone(),
        };
        assert!(transfer_zone(&options, 0).await.is_err());

        // nothing committed and the temp file is cleaned up
        assert!(!output.exists());
        assert!(!output.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn unreachable_master_fails_cleanly() {
        let options = XferOptions {
            zone: dn("example.com"),
            // a listener that immediately closes
            masters: vec!["127.0.0.1:1".parse().unwrap()],
            last_serial: None,
            tsig_key: None,
            output: output_path("unreachable"),
        };
        assert!(transfer_zone(&options, 0).await.is_err());
    }
}
