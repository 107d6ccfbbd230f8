//! Manage command line arguments here.
use clap::{App, Arg, ArgMatches};
use std::path::PathBuf;

use authdns::config::{Config, KeyConfig, ZoneConfig};
use authdns::dname::DomainName;
use authdns::error::{DNSError, DNSResult};
use authdns::rfc1035::DEFAULT_PORT;
use authdns::tsig::TsigKey;

/// What the user asked for.
#[derive(Debug)]
pub enum Command {
    Serve(Box<Config>),
    Xfer(XferArgs),
    Notify(NotifyArgs),
}

#[derive(Debug)]
pub struct XferArgs {
    pub zone: DomainName,
    pub file: PathBuf,
    pub port: u16,
    pub last_serial: Option<u32>,
    pub tsig_key: Option<TsigKey>,
    pub servers: Vec<String>,
}

#[derive(Debug)]
pub struct NotifyArgs {
    pub zone: DomainName,
    pub port: u16,
    pub tsig_key: Option<TsigKey>,
    pub servers: Vec<String>,
}

/// This structure holds the command line arguments.
#[derive(Debug)]
pub struct CliOptions {
    pub command: Command,
    pub debug: bool,
    pub logfile: Option<PathBuf>,
}

impl CliOptions {
    pub fn options() -> DNSResult<Self> {
        let matches = App::new("authnsd")
            .version("0.1")
            .about("Authoritative name server daemon and zone maintenance tools")
            .arg(
                Arg::new("debug")
                    .short('d')
                    .long("debug")
                    .global(true)
                    .long_help("Debug mode: verbose logging, no daemon behavior")
                    .takes_value(false),
            )
            .arg(
                Arg::new("logfile")
                    .short('l')
                    .long("logfile")
                    .global(true)
                    .long_help("Append log messages to this file instead of stderr")
                    .takes_value(true),
            )
            .subcommand(
                App::new("serve")
                    .about("Serve the configured zones")
                    .arg(Arg::new("ip4-only").short('4').takes_value(false))
                    .arg(Arg::new("ip6-only").short('6').takes_value(false))
                    .arg(
                        Arg::new("address")
                            .short('a')
                            .long("address")
                            .multiple_occurrences(true)
                            .long_help("Listen on this IP address (may be given more than once)")
                            .takes_value(true),
                    )
                    .arg(
                        Arg::new("port")
                            .short('p')
                            .long("port")
                            .takes_value(true)
                            .long_help("Port to listen on"),
                    )
                    .arg(
                        Arg::new("server-count")
                            .short('N')
                            .long("server-count")
                            .takes_value(true)
                            .long_help("The number of servers to start"),
                    )
                    .arg(
                        Arg::new("tcp-count")
                            .short('n')
                            .long("tcp-count")
                            .takes_value(true)
                            .long_help("The maximum number of TCP connections per server"),
                    )
                    .arg(
                        Arg::new("identity")
                            .short('i')
                            .long("identity")
                            .takes_value(true)
                            .long_help("The identity when queried for id.server CHAOS TXT"),
                    )
                    .arg(
                        Arg::new("database")
                            .short('f')
                            .long("database")
                            .takes_value(true)
                            .long_help("The zone database file to use"),
                    )
                    .arg(
                        Arg::new("zonesdir")
                            .long("zonesdir")
                            .takes_value(true)
                            .long_help("Directory holding the zone master files"),
                    )
                    .arg(
                        Arg::new("pidfile")
                            .short('P')
                            .long("pidfile")
                            .takes_value(true)
                            .long_help("The PID file to write"),
                    )
                    .arg(
                        Arg::new("statistics")
                            .short('s')
                            .long("statistics")
                            .takes_value(true)
                            .long_help("Dump statistics every this many seconds"),
                    )
                    .arg(
                        Arg::new("chroot")
                            .short('t')
                            .long("chroot")
                            .takes_value(true)
                            .long_help("Change root to this directory on startup"),
                    )
                    .arg(
                        Arg::new("user")
                            .short('u')
                            .long("user")
                            .takes_value(true)
                            .long_help("Change effective uid to this user"),
                    )
                    .arg(
                        Arg::new("zone")
                            .short('z')
                            .long("zone")
                            .multiple_occurrences(true)
                            .takes_value(true)
                            .long_help("A zone as name:zonefile (may be given more than once)"),
                    )
                    .arg(
                        Arg::new("key")
                            .short('y')
                            .long("key")
                            .multiple_occurrences(true)
                            .takes_value(true)
                            .long_help("A TSIG key as name:algorithm:secret_base64"),
                    )
                    .arg(
                        Arg::new("allow-notify")
                            .long("allow-notify")
                            .multiple_occurrences(true)
                            .takes_value(true)
                            .long_help("zone:acl-spec allowed to NOTIFY us"),
                    )
                    .arg(
                        Arg::new("request-xfr")
                            .long("request-xfr")
                            .multiple_occurrences(true)
                            .takes_value(true)
                            .long_help("zone:acl-spec naming a master to pull the zone from"),
                    )
                    .arg(
                        Arg::new("provide-xfr")
                            .long("provide-xfr")
                            .multiple_occurrences(true)
                            .takes_value(true)
                            .long_help("zone:acl-spec allowed to AXFR the zone from us"),
                    )
                    .arg(
                        Arg::new("notify")
                            .long("notify")
                            .multiple_occurrences(true)
                            .takes_value(true)
                            .long_help("zone:acl-spec of a slave we NOTIFY on zone changes"),
                    ),
            )
            .subcommand(
                App::new("xfer")
                    .about("AXFR client: transfer a zone into a master file")
                    .arg(Arg::new("ip4-only").short('4').takes_value(false))
                    .arg(Arg::new("ip6-only").short('6').takes_value(false))
                    .arg(
                        Arg::new("file")
                            .short('f')
                            .long("file")
                            .required(true)
                            .long_help("Output zone file name")
                            .takes_value(true),
                    )
                    .arg(
                        Arg::new("port")
                            .short('p')
                            .long("port")
                            .long_help("The port to connect to")
                            .takes_value(true),
                    )
                    .arg(
                        Arg::new("serial")
                            .short('s')
                            .long("serial")
                            .long_help("The current zone serial")
                            .takes_value(true),
                    )
                    .arg(
                        Arg::new("key")
                            .short('y')
                            .long("key")
                            .long_help("TSIG key as name:secret_base64 or name:algorithm:secret_base64")
                            .takes_value(true),
                    )
                    .arg(
                        Arg::new("zone")
                            .short('z')
                            .long("zone")
                            .required(true)
                            .long_help("The name of the zone to transfer")
                            .takes_value(true),
                    )
                    .arg(
                        Arg::new("server")
                            .required(true)
                            .multiple_values(true)
                            .long_help("The name or IP address of the master server"),
                    ),
            )
            .subcommand(
                App::new("notify")
                    .about("Send NOTIFY messages to a list of servers")
                    .arg(Arg::new("ip4-only").short('4').takes_value(false))
                    .arg(Arg::new("ip6-only").short('6').takes_value(false))
                    .arg(
                        Arg::new("port")
                            .short('p')
                            .long("port")
                            .long_help("The port to send to")
                            .takes_value(true),
                    )
                    .arg(
                        Arg::new("key")
                            .short('y')
                            .long("key")
                            .long_help("TSIG key as name:secret_base64")
                            .takes_value(true),
                    )
                    .arg(
                        Arg::new("zone")
                            .short('z')
                            .long("zone")
                            .required(true)
                            .long_help("The zone that changed")
                            .takes_value(true),
                    )
                    .arg(
                        Arg::new("server")
                            .required(true)
                            .multiple_values(true)
                            .long_help("The slaves to notify"),
                    ),
            )
            .get_matches();

        let debug = matches.is_present("debug");
        let logfile = matches.value_of("logfile").map(PathBuf::from);

        let command = match matches.subcommand() {
            Some(("serve", sub)) => Command::Serve(Box::new(serve_config(sub, debug, &logfile)?)),
            Some(("xfer", sub)) => Command::Xfer(xfer_args(sub)?),
            Some(("notify", sub)) => Command::Notify(notify_args(sub)?),
            _ => {
                return Err(DNSError::new(
                    "a command is required: serve, xfer or notify",
                ))
            }
        };

        Ok(CliOptions {
            command,
            debug,
            logfile,
        })
    }
}

fn parse_port(matches: &ArgMatches) -> DNSResult<u16> {
    match matches.value_of("port") {
        None => Ok(DEFAULT_PORT),
        Some(value) => value
            .parse::<u16>()
            .map_err(|_| DNSError::new("port argument must be numeric")),
    }
}

// "zone:rest" pairs used by the per-zone options
fn split_zone_spec(spec: &str) -> DNSResult<(DomainName, &str)> {
    let (zone, rest) = spec
        .split_once(':')
        .ok_or_else(|| DNSError::DNS(format!("expected zone:value, got '{}'", spec)))?;
    Ok((DomainName::try_from(zone)?, rest))
}

fn serve_config(
    matches: &ArgMatches,
    debug: bool,
    logfile: &Option<PathBuf>,
) -> DNSResult<Config> {
    let mut config = Config::default();
    config.debug_mode = debug;
    config.logfile = logfile.clone();
    config.ip4_only = matches.is_present("ip4-only");
    config.ip6_only = matches.is_present("ip6-only");
    config.port = parse_port(matches)?;

    if let Some(values) = matches.values_of("address") {
        config.ip_addresses = values.map(String::from).collect();
    }
    if let Some(value) = matches.value_of("server-count") {
        config.server_count = value
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| DNSError::new("number of servers must be greater than zero"))?;
    }
    if let Some(value) = matches.value_of("tcp-count") {
        config.tcp_count = value
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                DNSError::new("number of concurrent TCP connections must be greater than zero")
            })?;
    }
    if let Some(value) = matches.value_of("identity") {
        config.identity = value.to_string();
    } else {
        config.identity = hostname();
    }
    config.database = matches.value_of("database").map(PathBuf::from);
    config.zonesdir = matches.value_of("zonesdir").map(PathBuf::from);
    config.pidfile = matches.value_of("pidfile").map(PathBuf::from);
    config.chroot = matches.value_of("chroot").map(PathBuf::from);
    config.username = matches.value_of("user").map(String::from);
    if let Some(value) = matches.value_of("statistics") {
        config.statistics_interval = value
            .parse::<u64>()
            .map_err(|_| DNSError::new("statistics interval must be numeric"))?;
    }

    if let Some(values) = matches.values_of("zone") {
        for spec in values {
            let (name, file) = split_zone_spec(spec)?;
            let mut zone = ZoneConfig::new(name);
            zone.zonefile = Some(PathBuf::from(file));
            config.zones.push(zone);
        }
    }

    if let Some(values) = matches.values_of("key") {
        for spec in values {
            let mut parts = spec.splitn(3, ':');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(name), Some(algorithm), Some(secret)) => config.keys.push(KeyConfig {
                    name: name.to_string(),
                    algorithm: algorithm.to_string(),
                    secret: secret.to_string(),
                }),
                _ => return Err(DNSError::DNS(format!("bad key syntax {}", spec))),
            }
        }
    }

    // the per-zone ACL options all share the zone:spec shape
    for (option, pick) in [
        ("allow-notify", 0usize),
        ("request-xfr", 1),
        ("provide-xfr", 2),
        ("notify", 3),
    ] {
        if let Some(values) = matches.values_of(option) {
            for spec in values {
                let (name, acl_spec) = split_zone_spec(spec)?;
                let zone = config
                    .zones
                    .iter_mut()
                    .find(|z| z.name == name)
                    .ok_or_else(|| DNSError::DNS(format!("unknown zone in '{}'", spec)))?;
                let acl = match pick {
                    0 => &mut zone.allow_notify,
                    1 => &mut zone.request_xfr,
                    2 => &mut zone.provide_xfr,
                    _ => &mut zone.notify,
                };
                acl.entries.push(authdns::acl::AclEntry::from_spec(acl_spec)?);
            }
        }
    }

    Ok(config)
}

fn xfer_args(matches: &ArgMatches) -> DNSResult<XferArgs> {
    Ok(XferArgs {
        zone: DomainName::try_from(matches.value_of("zone").unwrap())?,
        file: PathBuf::from(matches.value_of("file").unwrap()),
        port: parse_port(matches)?,
        last_serial: match matches.value_of("serial") {
            None => None,
            Some(value) => Some(
                value
                    .parse::<u32>()
                    .map_err(|_| DNSError::DNS(format!("bad serial '{}'", value)))?,
            ),
        },
        tsig_key: matches
            .value_of("key")
            .map(TsigKey::from_spec)
            .transpose()?,
        servers: matches
            .values_of("server")
            .map(|v| v.map(String::from).collect())
            .unwrap_or_default(),
    })
}

fn notify_args(matches: &ArgMatches) -> DNSResult<NotifyArgs> {
    Ok(NotifyArgs {
        zone: DomainName::try_from(matches.value_of("zone").unwrap())?,
        port: parse_port(matches)?,
        tsig_key: matches
            .value_of("key")
            .map(TsigKey::from_spec)
            .transpose()?,
        servers: matches
            .values_of("server")
            .map(|v| v.map(String::from).collect())
            .unwrap_or_default(),
    })
}

// default identity, like gethostname(2) at daemon startup
fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}
