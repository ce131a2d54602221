//! Bind address parsing.
//!
//! Two forms are accepted:
//!
//! - `"A.B.C.D:PORT"`: numeric IPv4 octets (0..=255) and a numeric port
//! - `"PORT"`: every interface (`0.0.0.0`) on that port
//!
//! Anything else (hostnames, IPv6, signs, whitespace, trailing bytes) is
//! rejected before any socket is created.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::str::FromStr;

use pollserve_core::{ServeError, ServeResult};

pub fn parse_bind_address(input: &str) -> ServeResult<SocketAddrV4> {
    let invalid = || ServeError::InvalidAddress(input.to_string());

    match input.split_once(':') {
        Some((host, port)) => {
            let ip = parse_ipv4(host).ok_or_else(invalid)?;
            let port = parse_decimal::<u16>(port).ok_or_else(invalid)?;
            Ok(SocketAddrV4::new(ip, port))
        }
        None => {
            let port = parse_decimal::<u16>(input).ok_or_else(invalid)?;
            Ok(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))
        }
    }
}

/// Digits only; range is enforced by `T`.
fn parse_decimal<T: FromStr>(s: &str) -> Option<T> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn parse_ipv4(s: &str) -> Option<Ipv4Addr> {
    let mut octets = [0u8; 4];
    let mut parts = s.split('.');
    for octet in &mut octets {
        *octet = parse_decimal(parts.next()?)?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(Ipv4Addr::from(octets))
}
