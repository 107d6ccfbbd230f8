//! The per-worker event loops: UDP datagrams answered in place, TCP
//! connections framed with the 2-octet length prefix, both feeding NOTIFY
//! receipts back to the refresh scheduler.
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;

use crate::dname::DomainName;
use crate::query::{answer_query, QueryContext, QueryResponse};
use crate::rfc1035::{EDNS_MAX_MESSAGE_LEN, MAX_TCP_MESSAGE_LEN};

use super::stats::now_secs;
use super::ServerContext;

// idle TCP connections are cut after this long
pub const TCP_TIMEOUT: Duration = Duration::from_secs(120);

pub async fn udp_worker(
    ctx: Arc<ServerContext>,
    socket: UdpSocket,
    refresh_tx: mpsc::Sender<DomainName>,
) {
    let mut buf = vec![0u8; EDNS_MAX_MESSAGE_LEN];

    loop {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!("udp receive failed: {}", e);
                continue;
            }
        };

        if src.is_ipv4() {
            ctx.stats.qudp.fetch_add(1, Ordering::Relaxed);
        } else {
            ctx.stats.qudp6.fetch_add(1, Ordering::Relaxed);
        }

        // grab the current zone snapshot; a reload mid-answer does not
        // affect us
        let zones = ctx.zones.read().await.clone();
        let qctx = QueryContext {
            config: &ctx.config,
            zones: &zones,
            keys: &ctx.keys,
            stats: &ctx.stats,
            now: now_secs(),
        };

        match answer_query(&qctx, src, &buf[..len], false) {
            QueryResponse::Single(reply) => {
                if let Err(e) = socket.send_to(&reply, src).await {
                    debug!("udp send to {} failed: {}", src, e);
                    ctx.stats.txerr.fetch_add(1, Ordering::Relaxed);
                }
            }
            QueryResponse::Notify { reply, zone } => {
                if let Err(e) = socket.send_to(&reply, src).await {
                    debug!("udp send to {} failed: {}", src, e);
                    ctx.stats.txerr.fetch_add(1, Ordering::Relaxed);
                }
                let _ = refresh_tx.send(zone).await;
            }
            // transfers never stream over UDP
            QueryResponse::Stream(_) => {
                ctx.stats.txerr.fetch_add(1, Ordering::Relaxed);
            }
            QueryResponse::Drop => {}
        }
    }
}

pub async fn tcp_worker(
    ctx: Arc<ServerContext>,
    listener: TcpListener,
    refresh_tx: mpsc::Sender<DomainName>,
    tcp_slots: Arc<Semaphore>,
) {
    loop {
        let (stream, src) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("tcp accept failed: {}", e);
                continue;
            }
        };

        // over the concurrent connection budget: drop on the floor
        let permit = match tcp_slots.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                ctx.stats.dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };

        if src.is_ipv4() {
            ctx.stats.ctcp.fetch_add(1, Ordering::Relaxed);
        } else {
            ctx.stats.ctcp6.fetch_add(1, Ordering::Relaxed);
        }

        let ctx = ctx.clone();
        let refresh_tx = refresh_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_tcp(&ctx, stream, src, refresh_tx).await {
                debug!("tcp connection from {} closed: {:?}", src, e);
            }
            drop(permit);
        });
    }
}

// one connection: length-prefixed queries answered strictly in order
async fn handle_tcp(
    ctx: &Arc<ServerContext>,
    mut stream: TcpStream,
    src: SocketAddr,
    refresh_tx: mpsc::Sender<DomainName>,
) -> crate::error::DNSResult<()> {
    loop {
        let mut size = [0u8; 2];
        match timeout(TCP_TIMEOUT, stream.read_exact(&mut size)).await {
            Err(_) => return Err(crate::error::DNSError::Timeout),
            // clean EOF between frames ends the connection
            Ok(Err(_)) => return Ok(()),
            Ok(Ok(_)) => {}
        }
        let size = u16::from_be_bytes(size) as usize;
        if size == 0 || size > MAX_TCP_MESSAGE_LEN {
            return Ok(());
        }

        let mut packet = vec![0u8; size];
        timeout(TCP_TIMEOUT, stream.read_exact(&mut packet)).await??;

        let zones = ctx.zones.read().await.clone();
        let qctx = QueryContext {
            config: &ctx.config,
            zones: &zones,
            keys: &ctx.keys,
            stats: &ctx.stats,
            now: now_secs(),
        };

        match answer_query(&qctx, src, &packet, true) {
            QueryResponse::Single(reply) => {
                write_frame(&mut stream, &reply).await?;
            }
            QueryResponse::Stream(messages) => {
                for reply in messages {
                    write_frame(&mut stream, &reply).await?;
                }
            }
            QueryResponse::Notify { reply, zone } => {
                write_frame(&mut stream, &reply).await?;
                let _ = refresh_tx.send(zone).await;
            }
            QueryResponse::Drop => return Ok(()),
        }
    }
}

async fn write_frame(stream: &mut TcpStream, reply: &[u8]) -> crate::error::DNSResult<()> {
    stream.write_all(&(reply.len() as u16).to_be_bytes()).await?;
    stream.write_all(reply).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::rfc1035::{DNSQuestion, PacketType, QType, ResponseCode};
    use crate::server::stats::ServerStats;
    use crate::tsig::KeyStore;
    use crate::wire::{parse_message, MessageWriter};
    use crate::zone::tests::sample_zone;
    use crate::zonedb::ZoneSet;
    use tokio::sync::RwLock;

    fn test_context() -> Arc<ServerContext> {
        let mut zones = ZoneSet::new();
        zones.insert(sample_zone());
        Arc::new(ServerContext {
            config: Config::default(),
            zones: RwLock::new(Arc::new(zones)),
            keys: KeyStore::default(),
            stats: ServerStats::default(),
        })
    }

    fn soa_query() -> Vec<u8> {
        let mut writer = MessageWriter::new(512);
        writer.header.id = 7;
        writer.header.flags.packet_type = PacketType::Query;
        writer
            .write_question(&DNSQuestion::new("example.com", QType::SOA, None).unwrap())
            .unwrap();
        writer.finish()
    }

    #[tokio::test]
    async fn udp_worker_answers() {
        let ctx = test_context();
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let (tx, _rx) = mpsc::channel(4);
        tokio::spawn(udp_worker(ctx, server, tx));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(&soa_query(), addr).await.unwrap();
        let mut buf = [0u8; 512];
        let (len, _) = timeout(Duration::from_secs(5), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();

        let reply = parse_message(&buf[..len]).unwrap();
        assert_eq!(reply.header.id, 7);
        assert_eq!(reply.header.flags.response_code, ResponseCode::NoError);
        assert_eq!(reply.header.an_count, 1);
    }

    #[tokio::test]
    async fn tcp_worker_answers_framed() {
        let ctx = test_context();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, _rx) = mpsc::channel(4);
        let slots = Arc::new(Semaphore::new(4));
        tokio::spawn(tcp_worker(ctx, listener, tx, slots));

        let mut client = TcpStream::connect(addr).await.unwrap();
        let query = soa_query();
        client
            .write_all(&(query.len() as u16).to_be_bytes())
            .await
            .unwrap();
        client.write_all(&query).await.unwrap();

        let mut size = [0u8; 2];
        timeout(Duration::from_secs(5), client.read_exact(&mut size))
            .await
            .unwrap()
            .unwrap();
        let mut reply = vec![0u8; u16::from_be_bytes(size) as usize];
        client.read_exact(&mut reply).await.unwrap();

        let reply = parse_message(&reply).unwrap();
        assert_eq!(reply.header.id, 7);
        assert_eq!(reply.header.an_count, 1);

        // two queries on one connection answer in order
        client
            .write_all(&(query.len() as u16).to_be_bytes())
            .await
            .unwrap();
        client.write_all(&query).await.unwrap();
        timeout(Duration::from_secs(5), client.read_exact(&mut size))
            .await
            .unwrap()
            .unwrap();
    }
}
