//! ToNetworkOrder/FromNetworkOrder for the primitive building blocks.
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Result};
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::DNSResult;
use crate::network_order::{FromNetworkOrder, ToNetworkOrder};

impl ToNetworkOrder for u8 {
    /// ```
    /// use authdns::network_order::ToNetworkOrder;
    ///
    /// let mut buffer: Vec<u8> = Vec::new();
    /// assert!(255_u8.to_network_bytes(&mut buffer).is_ok());
    /// assert_eq!(buffer, &[0xFF]);
    /// ```
    fn to_network_bytes(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        buffer.write_u8(*self)?;
        Ok(1)
    }
}

impl FromNetworkOrder for u8 {
    /// ```
    /// use std::io::Cursor;
    /// use authdns::network_order::FromNetworkOrder;
    ///
    /// let b = vec![0xFF];
    /// let mut buffer = Cursor::new(b.as_slice());
    /// let mut v = 0u8;
    /// assert!(v.from_network_bytes(&mut buffer).is_ok());
    /// assert_eq!(v, 255);
    /// ```
    fn from_network_bytes(&mut self, buffer: &mut Cursor<&[u8]>) -> DNSResult<()> {
        *self = buffer.read_u8()?;
        Ok(())
    }
}

impl ToNetworkOrder for u16 {
    /// ```
    /// use authdns::network_order::ToNetworkOrder;
    ///
    /// let mut buffer: Vec<u8> = Vec::new();
    /// assert!(0x1234_u16.to_network_bytes(&mut buffer).is_ok());
    /// assert_eq!(buffer, &[0x12, 0x34]);
    /// ```
    fn to_network_bytes(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        buffer.write_u16::<BigEndian>(*self)?;
        Ok(2)
    }
}

impl FromNetworkOrder for u16 {
    /// ```
    /// use std::io::Cursor;
    /// use authdns::network_order::FromNetworkOrder;
    ///
    /// let b = vec![0x12, 0x34];
    /// let mut buffer = Cursor::new(b.as_slice());
    /// let mut v = 0u16;
    /// assert!(v.from_network_bytes(&mut buffer).is_ok());
    /// assert_eq!(v, 0x1234);
    /// ```
    fn from_network_bytes(&mut self, buffer: &mut Cursor<&[u8]>) -> DNSResult<()> {
        *self = buffer.read_u16::<BigEndian>()?;
        Ok(())
    }
}

impl ToNetworkOrder for u32 {
    /// ```
    /// use authdns::network_order::ToNetworkOrder;
    ///
    /// let mut buffer: Vec<u8> = Vec::new();
    /// assert!(0x12345678_u32.to_network_bytes(&mut buffer).is_ok());
    /// assert_eq!(buffer, &[0x12, 0x34, 0x56, 0x78]);
    /// ```
    fn to_network_bytes(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        buffer.write_u32::<BigEndian>(*self)?;
        Ok(4)
    }
}

impl FromNetworkOrder for u32 {
    /// ```
    /// use std::io::Cursor;
    /// use authdns::network_order::FromNetworkOrder;
    ///
    /// let b = vec![0x12, 0x34, 0x56, 0x78];
    /// let mut buffer = Cursor::new(b.as_slice());
    /// let mut v = 0u32;
    /// assert!(v.from_network_bytes(&mut buffer).is_ok());
    /// assert_eq!(v, 0x12345678);
    /// ```
    fn from_network_bytes(&mut self, buffer: &mut Cursor<&[u8]>) -> DNSResult<()> {
        *self = buffer.read_u32::<BigEndian>()?;
        Ok(())
    }
}

impl ToNetworkOrder for Ipv4Addr {
    fn to_network_bytes(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        buffer.extend_from_slice(&self.octets());
        Ok(4)
    }
}

impl FromNetworkOrder for Ipv4Addr {
    fn from_network_bytes(&mut self, buffer: &mut Cursor<&[u8]>) -> DNSResult<()> {
        let mut octets = [0u8; 4];
        std::io::Read::read_exact(buffer, &mut octets)?;
        *self = Ipv4Addr::from(octets);
        Ok(())
    }
}

impl ToNetworkOrder for Ipv6Addr {
    fn to_network_bytes(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        buffer.extend_from_slice(&self.octets());
        Ok(16)
    }
}

impl FromNetworkOrder for Ipv6Addr {
    fn from_network_bytes(&mut self, buffer: &mut Cursor<&[u8]>) -> DNSResult<()> {
        let mut octets = [0u8; 16];
        std::io::Read::read_exact(buffer, &mut octets)?;
        *self = Ipv6Addr::from(octets);
        Ok(())
    }
}

impl<T: ToNetworkOrder, const N: usize> ToNetworkOrder for [T; N] {
    /// ```
    /// use authdns::network_order::ToNetworkOrder;
    ///
    /// let mut buffer: Vec<u8> = Vec::new();
    /// assert_eq!([0xFFFF_u16; 10].to_network_bytes(&mut buffer).unwrap(), 20);
    /// assert_eq!(buffer, &[0xFF; 20]);
    /// ```
    fn to_network_bytes(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        let mut length = 0usize;
        for x in self {
            length += x.to_network_bytes(buffer)?;
        }
        Ok(length)
    }
}

impl<T: FromNetworkOrder, const N: usize> FromNetworkOrder for [T; N] {
    /// ```
    /// use std::io::Cursor;
    /// use authdns::network_order::FromNetworkOrder;
    ///
    /// let b = vec![0x12, 0x34, 0x56, 0x78];
    /// let mut buffer = Cursor::new(b.as_slice());
    /// let mut v = [0u16; 2];
    /// assert!(v.from_network_bytes(&mut buffer).is_ok());
    /// assert_eq!(v, [0x1234_u16, 0x5678]);
    /// ```
    fn from_network_bytes(&mut self, buffer: &mut Cursor<&[u8]>) -> DNSResult<()> {
        for x in self {
            x.from_network_bytes(buffer)?;
        }
        Ok(())
    }
}

impl<T: ToNetworkOrder> ToNetworkOrder for Vec<T> {
    /// ```
    /// use authdns::network_order::ToNetworkOrder;
    ///
    /// let mut buffer: Vec<u8> = Vec::new();
    /// let v = vec![[0xFFFF_u16; 3], [0xFFFF; 3], [0xFFFF; 3]];
    /// assert_eq!(v.to_network_bytes(&mut buffer).unwrap(), 18);
    /// assert_eq!(&buffer, &[0xFF; 18]);
    /// ```
    fn to_network_bytes(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        let mut length = 0usize;

        // copy data for each element
        for item in self {
            length += item.to_network_bytes(buffer)?;
        }

        Ok(length)
    }
}

impl<T: ToNetworkOrder> ToNetworkOrder for Option<T> {
    /// ```
    /// use authdns::network_order::ToNetworkOrder;
    ///
    /// let mut buffer: Vec<u8> = Vec::new();
    /// assert_eq!(Some(0xFF_u8).to_network_bytes(&mut buffer).unwrap(), 1);
    /// assert_eq!(buffer, &[0xFF]);
    ///
    /// let mut buffer: Vec<u8> = Vec::new();
    /// let r: Option<u8> = None;
    /// assert_eq!(r.to_network_bytes(&mut buffer).unwrap(), 0);
    /// assert!(buffer.is_empty());
    /// ```
    fn to_network_bytes(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        match self {
            None => Ok(0),
            Some(value) => value.to_network_bytes(buffer),
        }
    }
}

impl<T: FromNetworkOrder> FromNetworkOrder for Option<T> {
    fn from_network_bytes(&mut self, buffer: &mut Cursor<&[u8]>) -> DNSResult<()> {
        match self {
            None => Ok(()),
            Some(value) => value.from_network_bytes(buffer),
        }
    }
}
