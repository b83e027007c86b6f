//! Dial destinations.
//!
//! # Strategic Purpose
//! `Destination` is the address handed to every dialer in the stack. It keeps a
//! domain name unresolved until a resolving layer (or a detour) decides how to
//! reach it, and it is never mutated once built: resolution produces a new
//! literal-address `Destination` via [`Destination::with_ip`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

/// Endpoint of an outbound dial: a domain name or a literal address, plus a port.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Destination {
    /// Domain name (not yet resolved).
    Domain(String, u16),
    /// IPv4/IPv6 socket address.
    Socket(SocketAddr),
}

impl Destination {
    /// Create from domain and port.
    #[inline]
    pub fn domain(host: impl Into<String>, port: u16) -> Self {
        Self::Domain(host.into(), port)
    }

    /// Create from socket address.
    #[inline]
    pub fn socket(addr: SocketAddr) -> Self {
        Self::Socket(addr)
    }

    /// Create from IP and port.
    #[inline]
    pub fn ip(ip: IpAddr, port: u16) -> Self {
        Self::Socket(SocketAddr::new(ip, port))
    }

    /// Get the port.
    #[inline]
    pub fn port(&self) -> u16 {
        match self {
            Self::Domain(_, port) => *port,
            Self::Socket(addr) => addr.port(),
        }
    }

    /// Get the host as a string (domain or IP).
    #[inline]
    pub fn host(&self) -> String {
        match self {
            Self::Domain(domain, _) => domain.clone(),
            Self::Socket(addr) => addr.ip().to_string(),
        }
    }

    /// Domain name, if this destination still needs resolution.
    #[inline]
    pub fn domain_name(&self) -> Option<&str> {
        match self {
            Self::Domain(domain, _) => Some(domain),
            Self::Socket(_) => None,
        }
    }

    /// Literal socket address, if any.
    #[inline]
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Domain(..) => None,
            Self::Socket(addr) => Some(*addr),
        }
    }

    /// Check if this is a domain (needs resolution).
    #[inline]
    pub fn is_domain(&self) -> bool {
        matches!(self, Self::Domain(..))
    }

    /// Check if this is a literal address.
    #[inline]
    pub fn is_ip(&self) -> bool {
        matches!(self, Self::Socket(..))
    }

    /// Same port, resolved to `ip`.
    #[inline]
    pub fn with_ip(&self, ip: IpAddr) -> Self {
        Self::ip(ip, self.port())
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Domain(host, port) => write!(f, "{}:{}", host, port),
            Self::Socket(addr) => write!(f, "{}", addr),
        }
    }
}

impl From<SocketAddr> for Destination {
    fn from(addr: SocketAddr) -> Self {
        Self::Socket(addr)
    }
}

impl From<(String, u16)> for Destination {
    fn from((host, port): (String, u16)) -> Self {
        Self::from((host.as_str(), port))
    }
}

impl From<(&str, u16)> for Destination {
    /// Literal IPs are recognized so `("127.0.0.1", 80)` never needs resolution.
    fn from((host, port): (&str, u16)) -> Self {
        let trimmed = host.trim_start_matches('[').trim_end_matches(']');
        match trimmed.parse::<IpAddr>() {
            Ok(ip) => Self::ip(ip, port),
            Err(_) => Self::Domain(host.to_string(), port),
        }
    }
}

/// Error returned when parsing a `host:port` string fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid destination {0:?}: expected host:port")]
pub struct ParseDestinationError(String);

impl FromStr for Destination {
    type Err = ParseDestinationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(Self::Socket(addr));
        }
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ParseDestinationError(s.to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| ParseDestinationError(s.to_string()))?;
        if host.is_empty() {
            return Err(ParseDestinationError(s.to_string()));
        }
        Ok(Self::from((host, port)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_display() {
        let domain = Destination::domain("example.com", 443);
        assert_eq!(domain.to_string(), "example.com:443");

        let socket = Destination::ip("127.0.0.1".parse().unwrap(), 8080);
        assert_eq!(socket.to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn literal_hosts_are_not_domains() {
        assert!(Destination::from(("127.0.0.1", 80)).is_ip());
        assert!(Destination::from(("[::1]", 80)).is_ip());
        assert!(Destination::from(("example.com", 80)).is_domain());
    }

    #[test]
    fn parse_host_port() {
        let d: Destination = "example.com:443".parse().unwrap();
        assert_eq!(d, Destination::domain("example.com", 443));
        let d: Destination = "[::1]:53".parse().unwrap();
        assert_eq!(d.socket_addr(), Some("[::1]:53".parse().unwrap()));
        assert!("example.com".parse::<Destination>().is_err());
        assert!(":80".parse::<Destination>().is_err());
    }

    #[test]
    fn with_ip_keeps_port() {
        let d = Destination::domain("example.com", 8443);
        let r = d.with_ip("10.0.0.1".parse().unwrap());
        assert_eq!(r.to_string(), "10.0.0.1:8443");
        assert_eq!(d.domain_name(), Some("example.com"));
    }
}
