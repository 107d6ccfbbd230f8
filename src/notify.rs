//! Sending NOTIFY (RFC1996) to a list of servers over UDP, retransmitting
//! on a fixed interval until an acknowledgement arrives or the retry budget
//! is spent.
use std::net::SocketAddr;
use std::time::Duration;

use log::{info, warn};
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::dname::DomainName;
use crate::error::DNSResult;
use crate::rfc1035::{
    DNSQuestion, OpCode, PacketType, QClass, QType, RRType, ResponseCode, MAX_UDP_PACKET_SIZE,
};
use crate::tsig::{TsigKey, TsigState};
use crate::wire::{parse_message, MessageWriter};

// retransmit every 5 seconds, give up after 20: four transmissions to a
// silent peer
pub const NOTIFY_RETRY_INTERVAL: Duration = Duration::from_secs(5);
pub const NOTIFY_BUDGET: Duration = Duration::from_secs(20);

// the id does not need to be random, the exchange is request/ack
const NOTIFY_ID: u16 = 42;

#[derive(Debug, Clone)]
pub struct NotifyOptions {
    pub zone: DomainName,
    pub targets: Vec<SocketAddr>,
    pub tsig_key: Option<TsigKey>,
}

/// The NOTIFY packet: OPCODE=NOTIFY, AA, one SOA question for the zone.
pub fn build_notify(zone: &DomainName, tsig_key: Option<&TsigKey>, now: u64) -> DNSResult<Vec<u8>> {
    let mut writer = MessageWriter::new(MAX_UDP_PACKET_SIZE);
    writer.header.id = NOTIFY_ID;
    writer.header.flags.packet_type = PacketType::Query;
    writer.header.flags.op_code = OpCode::Notify;
    writer.header.flags.authoritative_answer = true;
    let question = DNSQuestion {
        name: zone.clone(),
        rtype: RRType::from(QType::SOA),
        class: QClass::IN,
    };
    writer
        .write_question(&question)
        .map_err(|_| crate::error::DNSError::new("NOTIFY does not fit a message"))?;
    let mut packet = writer.finish();

    if let Some(key) = tsig_key {
        let mut state = TsigState::new(key);
        state.sign_query(&mut packet, now)?;
        info!("TSIG signed query with key {}", key.name);
    }

    Ok(packet)
}

// a valid acknowledgement mirrors id and opcode with QR and AA set
fn is_valid_ack(packet: &[u8]) -> Result<(), String> {
    let message = match parse_message(packet) {
        Ok(message) => message,
        Err(e) => return Err(format!("unparseable reply: {:?}", e)),
    };
    if message.header.id != NOTIFY_ID {
        return Err(format!("reply id {} does not match", message.header.id));
    }
    if message.header.flags.packet_type != PacketType::Response {
        return Err("reply is not a response".to_string());
    }
    if message.header.flags.op_code != OpCode::Notify {
        return Err("reply opcode is not NOTIFY".to_string());
    }
    if !message.header.flags.authoritative_answer {
        return Err("reply lacks AA".to_string());
    }
    if message.header.flags.response_code != ResponseCode::NoError {
        return Err(format!(
            "error response {}",
            message.header.flags.response_code as u16
        ));
    }
    Ok(())
}

/// Send the NOTIFY to one host, waiting for its ack and retransmitting on
/// timeout. Returns whether the ack arrived. A malformed or negative ack is
/// logged but not retried.
pub async fn notify_host(
    socket: &UdpSocket,
    target: SocketAddr,
    packet: &[u8],
    zone: &DomainName,
    interval: Duration,
    budget: Duration,
) -> DNSResult<bool> {
    let attempts = (budget.as_millis() / interval.as_millis().max(1)).max(1) as u32;
    let mut buf = [0u8; MAX_UDP_PACKET_SIZE];

    for _ in 0..attempts {
        if let Err(e) = socket.send_to(packet, target).await {
            warn!("send to {} failed: {}", target, e);
            return Ok(false);
        }

        match timeout(interval, socket.recv_from(&mut buf)).await {
            Err(_) => {
                // timeout: retransmit on the next loop
                warn!(
                    "timeout ({} s) expired, retry notify to {}",
                    interval.as_secs(),
                    target
                );
            }
            Ok(Err(e)) => {
                warn!("recv {} failed: {}", target, e);
                return Ok(false);
            }
            Ok(Ok((received, from))) => {
                if from != target {
                    // stray datagram, go around again
                    continue;
                }
                match is_valid_ack(&buf[..received]) {
                    Ok(()) => return Ok(true),
                    Err(reason) => {
                        warn!("bad reply from {}: {}", target, reason);
                        return Ok(false);
                    }
                }
            }
        }
    }

    warn!("no acknowledgement from {} for zone {}", target, zone);
    Ok(false)
}

/// NOTIFY every target; returns how many acknowledged.
pub async fn notify_zone(options: &NotifyOptions, now: u64) -> DNSResult<usize> {
    let packet = build_notify(&options.zone, options.tsig_key.as_ref(), now)?;
    let mut acked = 0usize;

    for target in &options.targets {
        let bind: SocketAddr = if target.is_ipv4() {
            "0.0.0.0:0".parse().expect("literal address")
        } else {
            "[::]:0".parse().expect("literal address")
        };
        let socket = UdpSocket::bind(bind).await?;
        if notify_host(
            &socket,
            *target,
            &packet,
            &options.zone,
            NOTIFY_RETRY_INTERVAL,
            NOTIFY_BUDGET,
        )
        .await?
        {
            acked += 1;
        }
    }

    Ok(acked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dname::DomainName;
    use crate::wire::parse_message;

    fn dn(s: &str) -> DomainName {
        DomainName::try_from(s).unwrap()
    }

    #[test]
    fn notify_packet_shape() {
        let packet = build_notify(&dn("example.com"), None, 0).unwrap();
        let message = parse_message(&packet).unwrap();
        assert_eq!(message.header.id, 42);
        assert_eq!(message.header.flags.op_code, OpCode::Notify);
        assert!(message.header.flags.authoritative_answer);
        assert_eq!(message.header.qd_count, 1);
        assert!(message.questions[0].rtype == QType::SOA);
        assert_eq!(message.questions[0].name, dn("example.com"));
    }

    #[tokio::test]
    async fn silent_peer_gets_exactly_four_retransmissions() {
        // scaled-down schedule with the same 4:1 shape as 5s/20s
        let interval = Duration::from_millis(50);
        let budget = Duration::from_millis(200);

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let packet = build_notify(&dn("t."), None, 0).unwrap();
        let acked = notify_host(&socket, peer_addr, &packet, &dn("t."), interval, budget)
            .await
            .unwrap();
        assert!(!acked);

        // drain what the peer saw
        let mut count = 0;
        let mut buf = [0u8; 512];
        while timeout(Duration::from_millis(100), peer.recv_from(&mut buf))
            .await
            .is_ok()
        {
            count += 1;
        }
        assert_eq!(count, 4);
    }

    #[tokio::test]
    async fn ack_stops_the_retries() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();

        // the peer acknowledges the first datagram with a mirrored header
        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (received, from) = peer.recv_from(&mut buf).await.unwrap();
            let mut reply = buf[..received].to_vec();
            reply[2] |= 0x80; // QR
            peer.send_to(&reply, from).await.unwrap();
            // count anything else that arrives
            let mut extra = 0;
            while timeout(Duration::from_millis(100), peer.recv_from(&mut buf))
                .await
                .is_ok()
            {
                extra += 1;
            }
            extra
        });

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let packet = build_notify(&dn("t."), None, 0).unwrap();
        let acked = notify_host(
            &socket,
            peer_addr,
            &packet,
            &dn("t."),
            Duration::from_millis(50),
            Duration::from_millis(200),
        )
        .await
        .unwrap();
        assert!(acked);
        assert_eq!(responder.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn negative_ack_is_not_retried() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (received, from) = peer.recv_from(&mut buf).await.unwrap();
            let mut reply = buf[..received].to_vec();
            reply[2] |= 0x80; // QR
            reply[3] |= 0x05; // REFUSED
            peer.send_to(&reply, from).await.unwrap();
            let mut extra = 0;
            while timeout(Duration::from_millis(100), peer.recv_from(&mut buf))
                .await
                .is_ok()
            {
                extra += 1;
            }
            extra
        });

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let packet = build_notify(&dn("t."), None, 0).unwrap();
        let acked = notify_host(
            &socket,
            peer_addr,
            &packet,
            &dn("t."),
            Duration::from_millis(50),
            Duration::from_millis(200),
        )
        .await
        .unwrap();
        assert!(!acked);
        // a bad ack ends the exchange, no retransmission storm
        assert_eq!(responder.await.unwrap(), 0);
    }
}
