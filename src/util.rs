//! Module for some utility functions, including debug
//!
use std::char;
use std::io::Cursor;

use crate::error::{DNSError, DNSResult};

// The first two bits set mark a compression pointer as explained in the RFC1035
pub fn is_pointer(x: u8) -> bool {
    x >= 192
}

// A domain name is null terminated or terminated by a pointer
pub fn is_sentinel(x: u8) -> bool {
    x == 0 || is_pointer(x)
}

// Convert an hexdump sample (as pasted from wireshark/tcpdump: an offset
// column followed by hex byte columns) into the raw byte vector. Used by
// tests to embed captured packets.
pub fn get_sample_slice(dump: &str) -> Vec<u8> {
    let mut v = Vec::new();

    for line in dump.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        // first column is the offset, skip it
        for hex in line.split_whitespace().skip(1) {
            if let Ok(byte) = u8::from_str_radix(hex, 16) {
                v.push(byte);
            }
        }
    }

    v
}

// Parse a TTL or period value: either a plain number of seconds or a
// concatenation of values with s/m/h/d/w suffixes, e.g. "1h30m".
pub fn parse_ttl(s: &str) -> DNSResult<u32> {
    if s.is_empty() {
        return Err(DNSError::new("empty TTL value"));
    }
    let mut total = 0u64;
    let mut current = 0u64;
    let mut seen_digit = false;

    for c in s.chars() {
        match c {
            '0'..='9' => {
                current = current * 10 + (c as u64 - '0' as u64);
                seen_digit = true;
            }
            's' | 'S' | 'm' | 'M' | 'h' | 'H' | 'd' | 'D' | 'w' | 'W' => {
                if !seen_digit {
                    return Err(DNSError::DNS(format!("bad TTL value '{}'", s)));
                }
                let factor = match c.to_ascii_lowercase() {
                    's' => 1,
                    'm' => 60,
                    'h' => 3600,
                    'd' => 86400,
                    _ => 604800,
                };
                total += current * factor;
                current = 0;
                seen_digit = false;
            }
            _ => return Err(DNSError::DNS(format!("bad TTL value '{}'", s))),
        }
    }
    // trailing bare number counts as seconds
    total += current;

    u32::try_from(total).map_err(|_| DNSError::DNS(format!("TTL value '{}' too large", s)))
}

/// Serial arithmetic comparison per RFC1982: true when `a` is a later
/// serial than `b`, wrap-around included.
pub fn serial_gt(a: u32, b: u32) -> bool {
    let distance = a.wrapping_sub(b);
    distance != 0 && distance < 0x8000_0000
}

// Debug utility
pub fn pretty_cursor<'a>(buffer: &Cursor<&'a [u8]>) {
    let reference = buffer.get_ref();

    eprintln!("position={}", buffer.position());

    let mut i = 0usize;
    eprint!("index:");
    for _ in *reference {
        eprint!("{:02} ", i);
        i += 1;
    }
    eprintln!();

    eprint!("byte :");
    for x in *reference {
        eprint!("{:02X} ", x);
    }
    eprintln!();

    eprint!("ascii:");
    for x in *reference {
        let c = char::from_u32(*x as u32).unwrap();
        if c.is_ascii_alphanumeric() {
            eprint!("{:>2} ", c);
        } else {
            eprint!("   ");
        }
    }
    eprintln!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_slice() {
        const SAMPLE: &'static str = r#"
0000   76 86 81 a0 00 01
0006   00 08
"#;
        assert_eq!(
            get_sample_slice(SAMPLE),
            &[0x76, 0x86, 0x81, 0xa0, 0x00, 0x01, 0x00, 0x08]
        );
    }

    #[test]
    fn pointer_byte() {
        assert!(is_pointer(0xC0));
        assert!(!is_pointer(0x3F));
        assert!(is_sentinel(0));
    }

    #[test]
    fn ttl_values() {
        assert_eq!(parse_ttl("3600").unwrap(), 3600);
        assert_eq!(parse_ttl("1h30m").unwrap(), 5400);
        assert_eq!(parse_ttl("2w").unwrap(), 1209600);
        assert!(parse_ttl("m").is_err());
        assert!(parse_ttl("12x").is_err());
    }

    #[test]
    fn serial_arithmetic() {
        assert!(serial_gt(2, 1));
        assert!(!serial_gt(1, 2));
        assert!(!serial_gt(5, 5));
        // wrap-around: 1 is newer than 0xFFFFFFFF
        assert!(serial_gt(1, 0xFFFF_FFFF));
        assert!(!serial_gt(0xFFFF_FFFF, 1));
    }
}
