//! Local network helpers: own address detection and /24 prefix handling.

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::str::FromStr;

use ipnet::Ipv4Net;

use crate::error::ScoutError;

/// Prefix used when the local address cannot be determined.
pub const FALLBACK_PREFIX: SubnetPrefix = SubnetPrefix([192, 168, 1]);

// ── IP address ────────────────────────────────────────────────────────────────

/// Detect the machine's primary outbound IPv4 address by making a dummy UDP
/// connection (no packets actually sent).
///
/// Returns `None` for loopback, unspecified, or IPv6 results.
pub fn local_ipv4() -> Option<Ipv4Addr> {
    let ip = (|| -> io::Result<IpAddr> {
        let sock = UdpSocket::bind("0.0.0.0:0")?;
        sock.connect("8.8.8.8:80")?;
        Ok(sock.local_addr()?.ip())
    })()
    .ok()?;
    match ip {
        IpAddr::V4(v4) if !v4.is_loopback() && !v4.is_unspecified() => Some(v4),
        _ => None,
    }
}

// ── Subnet prefix ─────────────────────────────────────────────────────────────

/// First three octets of a /24 network, e.g. `192.168.1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubnetPrefix(pub [u8; 3]);

impl SubnetPrefix {
    /// Prefix of the /24 that contains `ip`.
    pub fn of(ip: Ipv4Addr) -> Self {
        let [a, b, c, _] = ip.octets();
        SubnetPrefix([a, b, c])
    }

    /// Prefix of the local machine's network, or [`FALLBACK_PREFIX`].
    pub fn detect() -> Self {
        local_ipv4().map(Self::of).unwrap_or(FALLBACK_PREFIX)
    }

    /// Parse `input`, falling back to the detected local prefix when the
    /// input is empty or malformed.
    pub fn parse_or_detect(input: &str) -> Self {
        input.parse().unwrap_or_else(|_| Self::detect())
    }

    /// Address of host `n` inside this /24.
    pub fn host(&self, n: u8) -> Ipv4Addr {
        let [a, b, c] = self.0;
        Ipv4Addr::new(a, b, c, n)
    }

    /// The 254 usable host addresses, `.1` through `.254`.
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        (1..=254u8).map(move |n| self.host(n))
    }
}

impl fmt::Display for SubnetPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.0;
        write!(f, "{a}.{b}.{c}")
    }
}

impl FromStr for SubnetPrefix {
    type Err = ScoutError;

    /// Accepts `a.b.c`, `a.b.c.d` and `a.b.c.d/nn` with `nn >= 24`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let bad = || ScoutError::Config(format!("invalid subnet prefix: {s:?}"));

        if s.contains('/') {
            let net: Ipv4Net = s.parse().map_err(|_| bad())?;
            if net.prefix_len() < 24 {
                return Err(bad());
            }
            return Ok(Self::of(net.network()));
        }

        let parts: Vec<&str> = s.split('.').collect();
        match parts.len() {
            3 => {
                let mut octets = [0u8; 3];
                for (slot, part) in octets.iter_mut().zip(&parts) {
                    *slot = part.parse().map_err(|_| bad())?;
                }
                Ok(SubnetPrefix(octets))
            }
            4 => s.parse::<Ipv4Addr>().map(Self::of).map_err(|_| bad()),
            _ => Err(bad()),
        }
    }
}
