//! The two traits every wire-visible structure implements: serialization
//! into a network-order buffer and deserialization from a received message.
//! Reading goes through a `Cursor` so that domain-name decompression can
//! reach back into the whole message.
use std::io::Cursor;

use crate::error::DNSResult;

pub trait ToNetworkOrder {
    // copy structure data to a network-order buffer, returning the number
    // of bytes written
    fn to_network_bytes(&self, buffer: &mut Vec<u8>) -> std::io::Result<usize>;
}

pub trait FromNetworkOrder {
    // copy from a network-order buffer to a structure
    fn from_network_bytes(&mut self, buffer: &mut Cursor<&[u8]>) -> DNSResult<()>;
}

pub mod dns;
pub mod primitive;
