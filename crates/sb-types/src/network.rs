//! Network policy enums shared by the dialer stack
//! (Go parity: constant/dns.go, constant/network.go).
//! 拨号器共享的网络策略枚举。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Address family preference applied when a domain is resolved.
/// 域名解析时的地址族策略。
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainStrategy {
    /// Keep the resolver's order.
    #[default]
    #[serde(alias = "")]
    AsIs,
    /// IPv4 addresses first, IPv6 after.
    #[serde(alias = "prefer_v4")]
    PreferIpv4,
    /// IPv6 addresses first, IPv4 after.
    #[serde(alias = "prefer_v6")]
    PreferIpv6,
    /// Only IPv4 addresses.
    #[serde(alias = "use_ipv4", alias = "v4_only")]
    Ipv4Only,
    /// Only IPv6 addresses.
    #[serde(alias = "use_ipv6", alias = "v6_only")]
    Ipv6Only,
}

impl DomainStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AsIs => "as_is",
            Self::PreferIpv4 => "prefer_ipv4",
            Self::PreferIpv6 => "prefer_ipv6",
            Self::Ipv4Only => "ipv4_only",
            Self::Ipv6Only => "ipv6_only",
        }
    }

    /// Reorder or filter resolved addresses in place.
    ///
    /// Sorting is stable, so the resolver's order is kept within a family.
    pub fn apply(&self, addrs: &mut Vec<IpAddr>) {
        match self {
            Self::AsIs => {}
            Self::PreferIpv4 => addrs.sort_by_key(|a| if a.is_ipv4() { 0 } else { 1 }),
            Self::PreferIpv6 => addrs.sort_by_key(|a| if a.is_ipv6() { 0 } else { 1 }),
            Self::Ipv4Only => addrs.retain(|a| a.is_ipv4()),
            Self::Ipv6Only => addrs.retain(|a| a.is_ipv6()),
        }
    }
}

impl fmt::Display for DomainStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How local interfaces are used when dialing.
/// 本地网络接口的使用策略。
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkStrategy {
    /// Dial through the default route only.
    #[default]
    Default,
    /// Race every interface of the primary types at once.
    Hybrid,
    /// Race the primary types; bring in the fallback types after the fallback delay.
    Fallback,
}

impl NetworkStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Hybrid => "hybrid",
            Self::Fallback => "fallback",
        }
    }
}

impl fmt::Display for NetworkStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a local network interface.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceType {
    Wifi,
    Cellular,
    Ethernet,
    Other,
}

impl InterfaceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wifi => "wifi",
            Self::Cellular => "cellular",
            Self::Ethernet => "ethernet",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
