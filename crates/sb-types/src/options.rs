//! Dialer and TLS fragment options (Go parity: option.DialerOptions, option.TLSFragmentOptions).
//! 拨号器与 TLS 分片配置。
//!
//! Field names follow the sing-box JSON schema; durations are humantime strings
//! such as `"300ms"` or `"5s"`.

use crate::network::{DomainStrategy, InterfaceType, NetworkStrategy};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

/// Fallback delay used when the configured one is zero (Go: N.DefaultFallbackDelay).
pub const DEFAULT_FALLBACK_DELAY: Duration = Duration::from_millis(300);

/// TCP connect timeout (Go: C.TCPConnectTimeout).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// TLS fragment fallback delay (Go: C.TLSFragmentFallbackDelay).
pub const DEFAULT_TLS_FRAGMENT_FALLBACK_DELAY: Duration = Duration::from_millis(500);

/// Options consumed by the dialer factory.
///
/// Immutable once handed to the factory; the factory only reads it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialerOptions {
    /// Tag of an outbound to dial through. Empty means none.
    pub detour: String,
    /// Tag of the DNS server used to resolve domain destinations. Empty means
    /// the ambient DNS router decides.
    pub domain_resolver: String,
    pub domain_strategy: DomainStrategy,
    /// Delay before a competing attempt starts. Zero selects [`DEFAULT_FALLBACK_DELAY`].
    #[serde(with = "humantime_serde")]
    pub fallback_delay: Duration,
    pub tcp_fast_open: bool,
    /// Set internally for WireGuard listeners; never read from config.
    #[serde(skip)]
    pub is_wireguard_listener: bool,

    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inet4_bind_address: Option<Ipv4Addr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inet6_bind_address: Option<Ipv6Addr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_strategy: Option<NetworkStrategy>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub network_type: Vec<InterfaceType>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fallback_network_type: Vec<InterfaceType>,
}

impl DialerOptions {
    /// Configured fallback delay, or the default when zero.
    pub fn fallback_delay(&self) -> Duration {
        if self.fallback_delay.is_zero() {
            DEFAULT_FALLBACK_DELAY
        } else {
            self.fallback_delay
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn has_detour(&self) -> bool {
        !self.detour.is_empty()
    }

    pub fn has_domain_resolver(&self) -> bool {
        !self.domain_resolver.is_empty()
    }
}

/// TLS ClientHello fragmentation switches (route action `tls_fragment` / `tls_record_fragment`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsFragmentOptions {
    /// Split the ClientHello into separately transmitted TCP segments.
    pub fragment: bool,
    /// Split the ClientHello into multiple TLS records in one write.
    pub record_fragment: bool,
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub fragment_fallback_delay: Option<Duration>,
}

impl TlsFragmentOptions {
    pub fn enabled(&self) -> bool {
        self.fragment || self.record_fragment
    }

    pub fn fallback_delay(&self) -> Duration {
        self.fragment_fallback_delay
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_TLS_FRAGMENT_FALLBACK_DELAY)
    }
}
