//! Default dialer: plain tokio sockets through the default route or a chosen
//! local interface.
//! 默认拨号器：基于 tokio 套接字，经默认路由或指定本地接口拨号。

use crate::dialer::{DialContext, DialError, Dialer, IoStream, PacketConn};
use crate::parallel::{
    race_staggered, race_tiers, NetworkPolicy, ParallelInterfaceDialer, ParallelNetworkDialer,
};
use crate::ports::{InterfaceFinder, NetworkInterface};
use async_trait::async_trait;
use sb_types::{Destination, DialerOptions, NetworkStrategy};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{lookup_host, TcpSocket, TcpStream, UdpSocket};
use tracing::debug;

/// Dialer over the platform socket API.
///
/// Domain destinations reaching it unresolved go through the system resolver
/// and are attempted in order. With a `network_strategy` configured, plain
/// dials take the parallel-interface path.
#[derive(Clone)]
pub struct DefaultDialer {
    inet4_bind: Option<Ipv4Addr>,
    inet6_bind: Option<Ipv6Addr>,
    connect_timeout: Duration,
    tcp_fast_open: bool,
    policy: Option<NetworkPolicy>,
    interfaces: Option<Arc<dyn InterfaceFinder>>,
}

impl std::fmt::Debug for DefaultDialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultDialer")
            .field("inet4_bind", &self.inet4_bind)
            .field("inet6_bind", &self.inet6_bind)
            .field("connect_timeout", &self.connect_timeout)
            .field("tcp_fast_open", &self.tcp_fast_open)
            .field("policy", &self.policy)
            .field("interfaces", &self.interfaces.is_some())
            .finish()
    }
}

/// One interface-bound connection attempt.
#[derive(Debug, Clone)]
struct InterfaceAttempt {
    interface: String,
    bind: IpAddr,
    target: IpAddr,
}

impl DefaultDialer {
    pub fn new(options: &DialerOptions) -> Self {
        Self {
            inet4_bind: options.inet4_bind_address,
            inet6_bind: options.inet6_bind_address,
            connect_timeout: options.connect_timeout(),
            tcp_fast_open: options.tcp_fast_open,
            policy: NetworkPolicy::from_options(options),
            interfaces: None,
        }
    }

    /// Interface discovery used by the parallel paths. Without one, every
    /// strategy degrades to the default route.
    #[must_use]
    pub fn with_interface_finder(mut self, finder: Arc<dyn InterfaceFinder>) -> Self {
        self.interfaces = Some(finder);
        self
    }

    pub fn tcp_fast_open(&self) -> bool {
        self.tcp_fast_open
    }

    fn bind_for(&self, target: IpAddr) -> Option<IpAddr> {
        match target {
            IpAddr::V4(_) => self.inet4_bind.map(IpAddr::V4),
            IpAddr::V6(_) => self.inet6_bind.map(IpAddr::V6),
        }
    }

    fn udp_bind_for(&self, target: IpAddr) -> SocketAddr {
        let ip = self.bind_for(target).unwrap_or(match target {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        });
        SocketAddr::new(ip, 0)
    }

    /// Literal address, or the system resolver's answers for a domain.
    async fn system_addresses(
        &self,
        ctx: &DialContext,
        destination: &Destination,
    ) -> Result<Vec<IpAddr>, DialError> {
        match destination {
            Destination::Socket(addr) => Ok(vec![addr.ip()]),
            Destination::Domain(domain, port) => {
                let addrs = ctx
                    .run(async {
                        lookup_host((domain.as_str(), *port))
                            .await
                            .map_err(|e| DialError::resolve(domain.as_str(), e))
                    })
                    .await?;
                let mut ips: Vec<IpAddr> = Vec::new();
                for addr in addrs {
                    if !ips.contains(&addr.ip()) {
                        ips.push(addr.ip());
                    }
                }
                if ips.is_empty() {
                    return Err(DialError::resolve(domain.as_str(), "no addresses"));
                }
                Ok(ips)
            }
        }
    }

    /// Split usable interfaces into primary and fallback attempt tiers.
    fn interface_tiers(
        &self,
        addresses: &[IpAddr],
        policy: &NetworkPolicy,
    ) -> (Vec<InterfaceAttempt>, Vec<InterfaceAttempt>) {
        let Some(finder) = &self.interfaces else {
            return (Vec::new(), Vec::new());
        };
        let attempt = |iface: &NetworkInterface| {
            addresses.iter().find_map(|target| {
                iface.address_for(*target).map(|bind| InterfaceAttempt {
                    interface: iface.name.clone(),
                    bind,
                    target: *target,
                })
            })
        };
        let mut primary = Vec::new();
        let mut fallback = Vec::new();
        for iface in finder.interfaces() {
            let in_primary = policy.interface_types.is_empty()
                || policy.interface_types.contains(&iface.interface_type);
            let in_fallback = policy.fallback_interface_types.is_empty()
                || policy.fallback_interface_types.contains(&iface.interface_type);
            if in_primary {
                primary.extend(attempt(&iface));
            } else if in_fallback {
                fallback.extend(attempt(&iface));
            }
        }
        (primary, fallback)
    }
}

/// Connect one TCP socket, optionally bound to a local address.
async fn connect_tcp(
    target: SocketAddr,
    bind: Option<IpAddr>,
    connect_timeout: Duration,
) -> Result<TcpStream, DialError> {
    let socket = match target {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    if let Some(ip) = bind {
        socket.bind(SocketAddr::new(ip, 0))?;
    }
    let stream = tokio::time::timeout(connect_timeout, socket.connect(target)).await??;
    Ok(stream)
}

#[async_trait]
impl Dialer for DefaultDialer {
    async fn dial_stream(
        &self,
        ctx: &DialContext,
        destination: &Destination,
    ) -> Result<IoStream, DialError> {
        if let Some(policy) = self
            .policy
            .as_ref()
            .filter(|p| p.strategy != NetworkStrategy::Default)
        {
            return self.dial_parallel_interface(ctx, destination, policy).await;
        }
        let addresses = self.system_addresses(ctx, destination).await?;
        let mut last_err = None;
        for ip in addresses {
            let target = SocketAddr::new(ip, destination.port());
            match ctx
                .run(connect_tcp(target, self.bind_for(ip), self.connect_timeout))
                .await
            {
                Ok(stream) => {
                    debug!(%destination, %target, "connected");
                    return Ok(Box::new(stream));
                }
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => {
                    debug!(%destination, %target, error = %err, "connect failed");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| DialError::Other("no addresses to dial".into())))
    }

    async fn listen_packet(
        &self,
        ctx: &DialContext,
        destination: &Destination,
    ) -> Result<Box<dyn PacketConn>, DialError> {
        if let Some(policy) = self
            .policy
            .as_ref()
            .filter(|p| p.strategy != NetworkStrategy::Default)
        {
            let (conn, _) = self
                .listen_serial_interface_packet(ctx, destination, policy)
                .await?;
            return Ok(conn);
        }
        let addresses = self.system_addresses(ctx, destination).await?;
        let Some(&family) = addresses.first() else {
            return Err(DialError::Other("no addresses to listen for".into()));
        };
        let socket = UdpSocket::bind(self.udp_bind_for(family)).await?;
        Ok(Box::new(socket))
    }
}

#[async_trait]
impl ParallelInterfaceDialer for DefaultDialer {
    async fn dial_parallel_interface(
        &self,
        ctx: &DialContext,
        destination: &Destination,
        policy: &NetworkPolicy,
    ) -> Result<IoStream, DialError> {
        let addresses = self.system_addresses(ctx, destination).await?;
        self.dial_parallel_network(ctx, destination, &addresses, policy)
            .await
    }

    async fn listen_serial_interface_packet(
        &self,
        ctx: &DialContext,
        destination: &Destination,
        policy: &NetworkPolicy,
    ) -> Result<(Box<dyn PacketConn>, SocketAddr), DialError> {
        let addresses = self.system_addresses(ctx, destination).await?;
        self.listen_serial_network_packet(ctx, destination, &addresses, policy)
            .await
    }
}

#[async_trait]
impl ParallelNetworkDialer for DefaultDialer {
    async fn dial_parallel_network(
        &self,
        ctx: &DialContext,
        destination: &Destination,
        addresses: &[IpAddr],
        policy: &NetworkPolicy,
    ) -> Result<IoStream, DialError> {
        let port = destination.port();
        let timeout = self.connect_timeout;
        let (primary, fallback) = match policy.strategy {
            NetworkStrategy::Default => (Vec::new(), Vec::new()),
            _ => self.interface_tiers(addresses, policy),
        };

        if primary.is_empty() && fallback.is_empty() {
            let targets: Vec<(SocketAddr, Option<IpAddr>)> = addresses
                .iter()
                .map(|ip| (SocketAddr::new(*ip, port), self.bind_for(*ip)))
                .collect();
            let stream = race_staggered(ctx, targets, policy.fallback_delay, |(target, bind), ctx| {
                async move { ctx.run(connect_tcp(target, bind, timeout)).await }
            })
            .await?;
            debug!(%destination, "connected via default route");
            return Ok(Box::new(stream));
        }

        let attempt = move |a: InterfaceAttempt, ctx: DialContext| async move {
            let target = SocketAddr::new(a.target, port);
            let stream = ctx.run(connect_tcp(target, Some(a.bind), timeout)).await?;
            debug!(interface = %a.interface, %target, "interface attempt connected");
            Ok::<_, DialError>(stream)
        };
        let stream = match policy.strategy {
            NetworkStrategy::Hybrid => {
                let all = primary.into_iter().chain(fallback).collect();
                race_tiers(ctx, all, Vec::new(), policy.fallback_delay, attempt).await?
            }
            _ => race_tiers(ctx, primary, fallback, policy.fallback_delay, attempt).await?,
        };
        Ok(Box::new(stream))
    }

    async fn listen_serial_network_packet(
        &self,
        ctx: &DialContext,
        _destination: &Destination,
        addresses: &[IpAddr],
        policy: &NetworkPolicy,
    ) -> Result<(Box<dyn PacketConn>, SocketAddr), DialError> {
        let Some(first) = addresses.first().copied() else {
            return Err(DialError::Other("no addresses to listen for".into()));
        };
        let (primary, fallback) = match policy.strategy {
            NetworkStrategy::Default => (Vec::new(), Vec::new()),
            _ => self.interface_tiers(addresses, policy),
        };
        let mut last_err = None;
        for a in primary.into_iter().chain(fallback) {
            if ctx.is_cancelled() {
                return Err(ctx.done().await);
            }
            match UdpSocket::bind(SocketAddr::new(a.bind, 0)).await {
                Ok(socket) => {
                    let local = socket.local_addr()?;
                    debug!(interface = %a.interface, %local, "packet socket bound");
                    return Ok((Box::new(socket), local));
                }
                Err(err) => {
                    debug!(interface = %a.interface, error = %err, "bind failed");
                    last_err = Some(DialError::from(err));
                }
            }
        }
        if let Some(err) = last_err {
            return Err(err);
        }
        let socket = UdpSocket::bind(self.udp_bind_for(first)).await?;
        let local = socket.local_addr()?;
        Ok((Box::new(socket), local))
    }
}
