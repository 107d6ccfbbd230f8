//! Server lifecycle: bind the listening sockets, load zones, drop
//! privileges, run the workers, react to signals, refresh slave zones.
//!
//! The daemon state lives in one explicit `ServerContext` passed by
//! reference (behind an `Arc`) to every task; workers see the zone set
//! through a read lock whose content is swapped wholesale on reload, so
//! queries in flight keep the snapshot they started with.
use std::net::SocketAddr;
use std::sync::Arc;

use log::{error, info, warn};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::sync::{mpsc, RwLock, Semaphore};

use crate::config::Config;
use crate::dname::DomainName;
use crate::error::{DNSError, DNSResult};
use crate::tsig::KeyStore;
use crate::udb::Udb;
use crate::xfer::{transfer_zone, XferOptions, XferOutcome};
use crate::zone::Zone;
use crate::zonedb::ZoneSet;
use crate::zonefile::parse_zone_file;

pub mod stats;
pub mod worker;

use stats::{now_secs, ServerStats};

/// The daemon state every task works against.
pub struct ServerContext {
    pub config: Config,
    pub zones: RwLock<Arc<ZoneSet>>,
    pub keys: KeyStore,
    pub stats: ServerStats,
}

/// Entry point for `serve`: builds the runtime with one scheduler thread
/// per configured server and runs until a shutdown signal. Returns the
/// process exit code.
pub fn run_server(config: Config) -> DNSResult<i32> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server_count.max(1))
        .enable_all()
        .build()?;
    runtime.block_on(serve(config))
}

async fn serve(config: Config) -> DNSResult<i32> {
    let zones = load_zones(&config)?;
    info!("loaded {} zones", zones.len());
    let keys = config.key_store()?;

    let ctx = Arc::new(ServerContext {
        zones: RwLock::new(Arc::new(zones)),
        keys,
        stats: ServerStats::default(),
        config,
    });

    let pidfile = ctx.config.pidfile.clone();
    if let Some(path) = &pidfile {
        // ASCII decimal plus newline
        std::fs::write(path, format!("{}\n", std::process::id()))?;
    }

    #[cfg(unix)]
    drop_privileges(&ctx.config)?;

    // the refresh channel: NOTIFY receipts and timers funnel into the
    // scheduler owned by this supervisor task
    let (refresh_tx, refresh_rx) = mpsc::channel::<DomainName>(64);

    let tcp_slots = Arc::new(Semaphore::new(
        ctx.config.tcp_count.max(1) * ctx.config.server_count.max(1),
    ));

    // each worker owns its own reuseport socket pair per address, so the
    // kernel spreads the load without any contention between them
    let addresses = listen_addresses(&ctx.config);
    for _ in 0..ctx.config.server_count.max(1) {
        for addr in &addresses {
            let udp = tokio::net::UdpSocket::from_std(bind_udp(*addr)?)?;
            tokio::spawn(worker::udp_worker(ctx.clone(), udp, refresh_tx.clone()));

            let tcp = tokio::net::TcpListener::from_std(bind_tcp(*addr)?)?;
            tokio::spawn(worker::tcp_worker(
                ctx.clone(),
                tcp,
                refresh_tx.clone(),
                tcp_slots.clone(),
            ));
        }
    }
    info!(
        "listening on {:?} with {} servers",
        addresses, ctx.config.server_count
    );

    tokio::spawn(refresh_scheduler(ctx.clone(), refresh_rx));
    for zone_config in &ctx.config.zones {
        if zone_config.is_slave() {
            tokio::spawn(refresh_timer(
                ctx.clone(),
                zone_config.name.clone(),
                refresh_tx.clone(),
            ));
        }
    }

    if ctx.config.statistics_interval > 0 {
        let stats_ctx = ctx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
                stats_ctx.config.statistics_interval,
            ));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                stats_ctx.stats.dump();
            }
        });
    }

    let code = signal_loop(&ctx).await;

    if let Some(path) = &pidfile {
        let _ = std::fs::remove_file(path);
    }
    Ok(code)
}

//------------------------------------------------------------------------
// signals
//------------------------------------------------------------------------
#[cfg(unix)]
async fn signal_loop(ctx: &Arc<ServerContext>) -> i32 {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!("cannot install signal handler: {}", e);
            return 1;
        }
    };
    let mut int = signal(SignalKind::interrupt()).expect("signal handler");
    let mut hup = signal(SignalKind::hangup()).expect("signal handler");
    let mut usr1 = signal(SignalKind::user_defined1()).expect("signal handler");

    loop {
        tokio::select! {
            _ = term.recv() => {
                // graceful shutdown with final statistics
                info!("shutting down");
                ctx.stats.dump();
                return 0;
            }
            _ = int.recv() => {
                // silent shutdown
                return 0;
            }
            _ = hup.recv() => {
                info!("reloading zones");
                match load_zones(&ctx.config) {
                    Ok(new_zones) => {
                        *ctx.zones.write().await = Arc::new(new_zones);
                        info!("reload done");
                    }
                    Err(e) => {
                        // keep serving the old generation
                        error!("reload failed, keeping old zones: {:?}", e);
                    }
                }
            }
            _ = usr1.recv() => {
                ctx.stats.dump();
            }
        }
    }
}

#[cfg(not(unix))]
async fn signal_loop(ctx: &Arc<ServerContext>) -> i32 {
    let _ = tokio::signal::ctrl_c().await;
    ctx.stats.dump();
    0
}

//------------------------------------------------------------------------
// sockets
//------------------------------------------------------------------------
fn listen_addresses(config: &Config) -> Vec<SocketAddr> {
    let mut addresses = Vec::new();

    if config.ip_addresses.is_empty() {
        if !config.ip6_only {
            addresses.push(SocketAddr::new("0.0.0.0".parse().unwrap(), config.port));
        }
        if !config.ip4_only {
            addresses.push(SocketAddr::new("::".parse().unwrap(), config.port));
        }
        return addresses;
    }

    for spec in &config.ip_addresses {
        match spec.parse::<std::net::IpAddr>() {
            Ok(ip) => {
                if config.ip4_only && ip.is_ipv6() || config.ip6_only && ip.is_ipv4() {
                    continue;
                }
                addresses.push(SocketAddr::new(ip, config.port));
            }
            Err(_) => warn!("cannot parse address '{}'", spec),
        }
    }
    addresses
}

// every worker binds its own socket: reuseport makes the kernel do the
// per-datagram load balancing
fn bind_udp(addr: SocketAddr) -> DNSResult<std::net::UdpSocket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    if addr.is_ipv6() {
        socket.set_only_v6(true)?;
    }
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

fn bind_tcp(addr: SocketAddr) -> DNSResult<std::net::TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    if addr.is_ipv6() {
        socket.set_only_v6(true)?;
    }
    socket.bind(&addr.into())?;
    socket.listen(128)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

//------------------------------------------------------------------------
// zones
//------------------------------------------------------------------------

/// Load every configured zone: the persistent database first, then master
/// files, with a file whose serial is ahead refreshing the database copy.
pub fn load_zones(config: &Config) -> DNSResult<ZoneSet> {
    let mut set = ZoneSet::new();

    let mut udb = match &config.database {
        Some(path) if path.exists() => Some(Udb::open(path)?),
        Some(path) => Some(Udb::create(path)?),
        None => None,
    };

    if let Some(db) = udb.as_mut() {
        for zone in db.load_zones()? {
            info!("zone {} loaded from database (serial {})", zone.apex, zone.serial());
            set.insert(zone);
        }
    }

    for zone_config in &config.zones {
        let path = match &zone_config.zonefile {
            Some(file) => match &config.zonesdir {
                Some(dir) => dir.join(file),
                None => file.clone(),
            },
            None => continue,
        };
        if !path.exists() {
            if set.get(&zone_config.name).is_none() {
                warn!("zone {} has no data yet", zone_config.name);
            }
            continue;
        }

        let records = parse_zone_file(&path, &zone_config.name)?;
        let zone = Zone::from_records(zone_config.name.clone(), records)?;

        let stale = match set.get(&zone_config.name) {
            Some(current) => crate::util::serial_gt(zone.serial(), current.serial()),
            None => true,
        };
        if stale {
            if let Some(db) = udb.as_mut() {
                db.write_zone(&zone)?;
            }
            info!(
                "zone {} loaded from {} (serial {})",
                zone.apex,
                path.display(),
                zone.serial()
            );
            set.insert(zone);
        }
    }

    Ok(set)
}

//------------------------------------------------------------------------
// slave zone refresh
//------------------------------------------------------------------------

// wakes the scheduler whenever the zone's SOA refresh interval elapses
async fn refresh_timer(
    ctx: Arc<ServerContext>,
    zone_name: DomainName,
    refresh_tx: mpsc::Sender<DomainName>,
) {
    loop {
        let interval = {
            let zones = ctx.zones.read().await;
            zones
                .get(&zone_name)
                .and_then(|z| z.soa_rdata().map(|soa| soa.refresh))
                .unwrap_or(3600)
        };
        tokio::time::sleep(std::time::Duration::from_secs(interval.max(60) as u64)).await;
        if refresh_tx.send(zone_name.clone()).await.is_err() {
            return;
        }
    }
}

// the xfrd: one task owned by the supervisor, serializing all transfers
async fn refresh_scheduler(ctx: Arc<ServerContext>, mut refresh_rx: mpsc::Receiver<DomainName>) {
    while let Some(zone_name) = refresh_rx.recv().await {
        if let Err(e) = refresh_zone(&ctx, &zone_name).await {
            warn!("refresh of {} failed: {:?}", zone_name, e);
        }
    }
}

async fn refresh_zone(ctx: &Arc<ServerContext>, zone_name: &DomainName) -> DNSResult<()> {
    let zone_config = ctx
        .config
        .zone(zone_name)
        .ok_or_else(|| DNSError::Xfer(format!("no configuration for zone {}", zone_name)))?;
    if !zone_config.is_slave() {
        return Err(DNSError::Xfer(format!("zone {} has no masters", zone_name)));
    }

    let masters: Vec<SocketAddr> = zone_config
        .request_xfr
        .addresses()
        .into_iter()
        .map(|(ip, port)| {
            SocketAddr::new(ip, if port == 0 { crate::rfc1035::DEFAULT_PORT } else { port })
        })
        .collect();

    // the key named by the master ACL signs our requests
    let tsig_key = zone_config
        .request_xfr
        .entries
        .iter()
        .find_map(|e| e.key_name.as_ref())
        .and_then(|name| ctx.keys.find(name))
        .cloned();

    let output = match &zone_config.zonefile {
        Some(file) => match &ctx.config.zonesdir {
            Some(dir) => dir.join(file),
            None => file.clone(),
        },
        None => {
            return Err(DNSError::Xfer(format!(
                "zone {} has no zone file to transfer into",
                zone_name
            )))
        }
    };

    let last_serial = {
        let zones = ctx.zones.read().await;
        zones.get(zone_name).map(|z| z.serial())
    };

    let options = XferOptions {
        zone: zone_name.clone(),
        masters,
        last_serial,
        tsig_key,
        output: output.clone(),
    };

    match transfer_zone(&options, now_secs()).await? {
        XferOutcome::UpToDate => Ok(()),
        XferOutcome::Transferred { serial } => {
            // bring the new zone in: parse, persist, swap atomically
            let records = parse_zone_file(&output, zone_name)?;
            let zone = Zone::from_records(zone_name.clone(), records)?;

            if let Some(path) = &ctx.config.database {
                let mut db = Udb::open(path)?;
                db.write_zone(&zone)?;
            }

            let mut updated = (**ctx.zones.read().await).clone();
            updated.insert(zone);
            *ctx.zones.write().await = Arc::new(updated);
            info!("zone {} updated to serial {}", zone_name, serial);
            Ok(())
        }
    }
}

//------------------------------------------------------------------------
// privileges
//------------------------------------------------------------------------
#[cfg(unix)]
fn drop_privileges(config: &Config) -> DNSResult<()> {
    use std::ffi::CString;

    if let Some(chroot) = &config.chroot {
        let dir = CString::new(chroot.to_string_lossy().as_bytes())
            .map_err(|_| DNSError::new("bad chroot path"))?;
        // chroot then chdir so relative paths stay sane
        if unsafe { libc::chroot(dir.as_ptr()) } != 0 {
            return Err(DNSError::Io(std::io::Error::last_os_error()));
        }
        std::env::set_current_dir("/")?;
        info!("chrooted to {}", chroot.display());
    }

    if let Some(username) = &config.username {
        let (uid, gid) = resolve_user(username)?;
        if unsafe { libc::setgid(gid) } != 0 {
            return Err(DNSError::Io(std::io::Error::last_os_error()));
        }
        if unsafe { libc::setuid(uid) } != 0 {
            return Err(DNSError::Io(std::io::Error::last_os_error()));
        }
        info!("dropped privileges to {}", username);
    }

    Ok(())
}

// "user", "uid" or "uid.gid", like the original -u option
#[cfg(unix)]
fn resolve_user(username: &str) -> DNSResult<(libc::uid_t, libc::gid_t)> {
    use std::ffi::CString;

    if let Some(first) = username.chars().next() {
        if first.is_ascii_digit() {
            let mut parts = username.splitn(2, '.');
            let uid = parts
                .next()
                .and_then(|p| p.parse::<libc::uid_t>().ok())
                .ok_or_else(|| DNSError::DNS(format!("bad user '{}'", username)))?;
            let gid = match parts.next() {
                Some(part) => part
                    .parse::<libc::gid_t>()
                    .map_err(|_| DNSError::DNS(format!("bad user '{}'", username)))?,
                None => uid as libc::gid_t,
            };
            return Ok((uid, gid));
        }
    }

    let name = CString::new(username.as_bytes())
        .map_err(|_| DNSError::DNS(format!("bad user '{}'", username)))?;
    let pwd = unsafe { libc::getpwnam(name.as_ptr()) };
    if pwd.is_null() {
        return Err(DNSError::DNS(format!("user '{}' does not exist", username)));
    }
    let pwd = unsafe { &*pwd };
    Ok((pwd.pw_uid, pwd.pw_gid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_listen_addresses() {
        let mut config = Config::default();
        config.port = 5300;
        let addrs = listen_addresses(&config);
        assert_eq!(addrs.len(), 2);
        assert!(addrs.iter().all(|a| a.port() == 5300));

        config.ip4_only = true;
        let addrs = listen_addresses(&config);
        assert_eq!(addrs.len(), 1);
        assert!(addrs[0].is_ipv4());
    }

    #[test]
    fn explicit_listen_addresses() {
        let mut config = Config::default();
        config.ip_addresses = vec!["127.0.0.1".to_string(), "::1".to_string()];
        config.ip6_only = true;
        let addrs = listen_addresses(&config);
        assert_eq!(addrs.len(), 1);
        assert!(addrs[0].is_ipv6());
    }

    #[test]
    fn reuseport_binds_twice() {
        // two sockets on the same address must coexist, that is the whole
        // worker model
        let addr: SocketAddr = "127.0.0.1:15353".parse().unwrap();
        let first = bind_udp(addr).unwrap();
        let second = bind_udp(addr);
        #[cfg(unix)]
        assert!(second.is_ok());
        drop(first);
        let _ = second;
    }
}
