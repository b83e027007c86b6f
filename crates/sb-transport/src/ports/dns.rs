//! DNS ports consumed by the resolving dialer (Go parity: adapter.DNSRouter,
//! adapter.DNSTransportManager).
//! DNS 路由与传输注册表接口。

use anyhow::Result;
use async_trait::async_trait;
use sb_types::DomainStrategy;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

/// A configured DNS server, identified by its tag.
pub trait DnsTransport: Send + Sync + fmt::Debug {
    fn tag(&self) -> &str;

    /// Transport kind for logging (`udp`, `https`, `local`, ...).
    fn transport_type(&self) -> &str;
}

/// Lookup of DNS servers by tag.
pub trait DnsTransportManager: Send + Sync {
    fn transport(&self, tag: &str) -> Option<Arc<dyn DnsTransport>>;
}

/// Per-lookup parameters handed to the router.
#[derive(Debug, Clone, Default)]
pub struct LookupOptions {
    /// Address family policy the router should apply.
    pub strategy: DomainStrategy,
    /// Explicit server to query; `None` lets the router pick.
    pub transport: Option<Arc<dyn DnsTransport>>,
}

/// DNS Router interface (query side only).
/// DNS 路由接口（仅查询部分）。
#[async_trait]
pub trait DnsRouter: Send + Sync {
    /// Candidate addresses for `domain`, in dial order.
    async fn lookup(&self, domain: &str, options: &LookupOptions) -> Result<Vec<IpAddr>>;

    /// Get router name for logging.
    fn name(&self) -> &str {
        "dns_router"
    }
}

/// Router backed by the operating system resolver.
///
/// Used for direct dials when no router was injected; ignores
/// `LookupOptions::transport` and applies the domain strategy itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDnsRouter;

#[async_trait]
impl DnsRouter for SystemDnsRouter {
    async fn lookup(&self, domain: &str, options: &LookupOptions) -> Result<Vec<IpAddr>> {
        let mut addrs: Vec<IpAddr> = Vec::new();
        for addr in tokio::net::lookup_host((domain, 0)).await? {
            if !addrs.contains(&addr.ip()) {
                addrs.push(addr.ip());
            }
        }
        options.strategy.apply(&mut addrs);
        if addrs.is_empty() {
            anyhow::bail!("no {} addresses for {domain}", options.strategy);
        }
        Ok(addrs)
    }

    fn name(&self) -> &str {
        "system"
    }
}
