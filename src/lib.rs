//! An authoritative DNS name server: wire codec, in-memory and persistent
//! zone databases, TSIG, zone transfers, NOTIFY and the serving loop.
//!
//! The `authnsd` binary wires the pieces together; everything here is also
//! usable as a library, which is how the tests drive whole query/transfer
//! exchanges without sockets.

pub mod error;

#[macro_use]
pub mod macros;

pub mod acl;
pub mod config;
pub mod dname;
pub mod edns;
pub mod network_order;
pub mod notify;
pub mod query;
pub mod rdata;
pub mod rfc1035;
pub mod server;
pub mod tsig;
pub mod udb;
pub mod util;
pub mod wire;
pub mod xfer;
pub mod zone;
pub mod zonedb;
pub mod zonefile;
