//! A dedicated error for everything which can fail in the server: I/O, DNS
//! packet inconsistencies, TSIG verification, zone transfers, database
//! corruption, etc.
use std::io;
use std::str;

use crate::rfc1035::TsigRcode;

#[derive(Debug)]
pub enum DNSError {
    Io(io::Error),
    FromUtf8(std::string::FromUtf8Error),
    Utf8(str::Utf8Error),
    AddrParse(std::net::AddrParseError),
    LoggerError(log::SetLoggerError),
    DNS(String),
    DNSInternalError(InternalError),
    // TSIG verification failed with the embedded extended rcode
    Tsig(TsigRcode),
    // zone transfer aborted: malformed stream, SOA mismatch, bad peer
    Xfer(String),
    // zone master file could not be parsed
    ZoneFile(String),
    // persistent database corruption or format mismatch
    Udb(String),
    // a peer did not answer within the allotted time
    Timeout,
}

#[derive(Debug)]
pub enum InternalError {
    DnsDomainNameTooLong,
    DnsLabelTooLong,
    EmptyDomainName,
    // compression pointer chain too deep or looping
    PointerLoop,
    // compression pointer pointing forward in the message
    ForwardPointer,
    BufferTooShort,
    RdataLengthMismatch,
    UnknownRRClass,
    CnameChainTooLong,
}

impl DNSError {
    // Helper function to create a new DNS error from a string
    pub fn new(s: &str) -> Self {
        DNSError::DNS(String::from(s))
    }
}

/// A specific custom `Result` for all functions
pub type DNSResult<T> = Result<T, DNSError>;

// All conversions from internal errors to DNSError
impl From<io::Error> for DNSError {
    fn from(err: io::Error) -> Self {
        DNSError::Io(err)
    }
}

impl From<String> for DNSError {
    fn from(err: String) -> Self {
        DNSError::DNS(err)
    }
}

impl From<std::string::FromUtf8Error> for DNSError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        DNSError::FromUtf8(err)
    }
}

impl From<str::Utf8Error> for DNSError {
    fn from(err: str::Utf8Error) -> Self {
        DNSError::Utf8(err)
    }
}

impl From<std::net::AddrParseError> for DNSError {
    fn from(err: std::net::AddrParseError) -> Self {
        DNSError::AddrParse(err)
    }
}

impl From<log::SetLoggerError> for DNSError {
    fn from(err: log::SetLoggerError) -> Self {
        DNSError::LoggerError(err)
    }
}

impl From<InternalError> for DNSError {
    fn from(err: InternalError) -> Self {
        DNSError::DNSInternalError(err)
    }
}

impl From<tokio::time::error::Elapsed> for DNSError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        DNSError::Timeout
    }
}
