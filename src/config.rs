//! The configuration record the server core consumes. Parsing a config
//! file is a collaborator's job; the binary builds this from its command
//! line, tests build it literally.
use std::path::PathBuf;

use crate::acl::Acl;
use crate::dname::DomainName;
use crate::error::DNSResult;
use crate::tsig::{KeyStore, TsigKey};

#[derive(Debug, Clone)]
pub struct Config {
    // listening
    pub ip_addresses: Vec<String>,
    pub ip4_only: bool,
    pub ip6_only: bool,
    pub port: u16,

    // process model
    pub server_count: usize,
    pub tcp_count: usize,
    pub debug_mode: bool,

    // identity served for CH TXT id.server/hostname.bind queries
    pub identity: String,

    // paths
    pub database: Option<PathBuf>,
    pub zonesdir: Option<PathBuf>,
    pub pidfile: Option<PathBuf>,
    pub logfile: Option<PathBuf>,
    pub xfrdfile: Option<PathBuf>,
    pub difffile: Option<PathBuf>,

    // privilege dropping
    pub chroot: Option<PathBuf>,
    pub username: Option<String>,

    // seconds between periodic statistics dumps, 0 disables them
    pub statistics_interval: u64,

    pub zones: Vec<ZoneConfig>,
    pub keys: Vec<KeyConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ip_addresses: Vec::new(),
            ip4_only: false,
            ip6_only: false,
            port: crate::rfc1035::DEFAULT_PORT,
            server_count: 1,
            tcp_count: 10,
            debug_mode: false,
            identity: String::new(),
            database: None,
            zonesdir: None,
            pidfile: None,
            logfile: None,
            xfrdfile: None,
            difffile: None,
            chroot: None,
            username: None,
            statistics_interval: 0,
            zones: Vec::new(),
            keys: Vec::new(),
        }
    }
}

impl Config {
    pub fn zone(&self, apex: &DomainName) -> Option<&ZoneConfig> {
        self.zones.iter().find(|z| z.name == *apex)
    }

    /// All configured TSIG keys as a lookup store.
    pub fn key_store(&self) -> DNSResult<KeyStore> {
        let mut store = KeyStore::default();
        for key in &self.keys {
            store.add(TsigKey::from_spec(&format!(
                "{}:{}:{}",
                key.name, key.algorithm, key.secret
            ))?);
        }
        Ok(store)
    }
}

/// Per-zone options: where the data lives and who may do what.
#[derive(Debug, Clone)]
pub struct ZoneConfig {
    pub name: DomainName,
    pub zonefile: Option<PathBuf>,
    // who may NOTIFY us into refreshing this zone
    pub allow_notify: Acl,
    // the masters we pull the zone from (slave zones)
    pub request_xfr: Acl,
    // the slaves we push NOTIFY to (master zones)
    pub notify: Acl,
    // who may AXFR the zone from us
    pub provide_xfr: Acl,
}

impl ZoneConfig {
    pub fn new(name: DomainName) -> Self {
        ZoneConfig {
            name,
            zonefile: None,
            allow_notify: Acl::default(),
            request_xfr: Acl::default(),
            notify: Acl::default(),
            provide_xfr: Acl::default(),
        }
    }

    /// A zone with configured masters is a slave zone.
    pub fn is_slave(&self) -> bool {
        !self.request_xfr.is_empty()
    }
}

/// One `key:` block: name, algorithm mnemonic, base64 secret.
#[derive(Debug, Clone)]
pub struct KeyConfig {
    pub name: String,
    pub algorithm: String,
    pub secret: String,
}
