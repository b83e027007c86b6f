//! Resolving dialer (Go parity: dialer.resolveDialer).
//! 解析拨号器：对域名目标先经 DNS 路由解析，再按回退延迟竞速拨号。

use crate::dialer::{DialContext, DialError, Dialer, IoStream, PacketConn};
use crate::parallel::{
    race_staggered, NetworkPolicy, ParallelInterfaceDialer, ParallelNetworkDialer,
};
use crate::ports::{DnsRouter, DnsTransport, LookupOptions};
use async_trait::async_trait;
use sb_types::{Destination, DomainStrategy, DEFAULT_FALLBACK_DELAY};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Wraps a dialer and resolves domain destinations through a [`DnsRouter`].
///
/// Literal addresses go straight to the wrapped dialer. With address racing
/// enabled, candidates are raced with the fallback delay as stagger;
/// otherwise they are tried strictly in order.
pub struct ResolveDialer<D: ?Sized> {
    dialer: Arc<D>,
    router: Arc<dyn DnsRouter>,
    parallel: bool,
    transport: Option<Arc<dyn DnsTransport>>,
    strategy: DomainStrategy,
    fallback_delay: Duration,
}

impl<D: ?Sized> ResolveDialer<D> {
    pub fn new(
        dialer: Arc<D>,
        router: Arc<dyn DnsRouter>,
        parallel: bool,
        transport: Option<Arc<dyn DnsTransport>>,
        strategy: DomainStrategy,
        fallback_delay: Duration,
    ) -> Self {
        let fallback_delay = if fallback_delay.is_zero() {
            DEFAULT_FALLBACK_DELAY
        } else {
            fallback_delay
        };
        Self {
            dialer,
            router,
            parallel,
            transport,
            strategy,
            fallback_delay,
        }
    }

    pub fn inner(&self) -> &Arc<D> {
        &self.dialer
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    pub fn transport(&self) -> Option<&Arc<dyn DnsTransport>> {
        self.transport.as_ref()
    }

    async fn lookup(&self, ctx: &DialContext, domain: &str) -> Result<Vec<IpAddr>, DialError> {
        let options = LookupOptions {
            strategy: self.strategy,
            transport: self.transport.clone(),
        };
        let addresses = ctx
            .run(async {
                self.router
                    .lookup(domain, &options)
                    .await
                    .map_err(|e| DialError::resolve(domain, e))
            })
            .await?;
        if addresses.is_empty() {
            return Err(DialError::resolve(domain, "no addresses"));
        }
        debug!(
            domain,
            router = self.router.name(),
            transport = self.transport.as_ref().map(|t| t.tag()),
            count = addresses.len(),
            "resolved"
        );
        Ok(addresses)
    }
}

impl<D: ?Sized> std::fmt::Debug for ResolveDialer<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolveDialer")
            .field("router", &self.router.name())
            .field("parallel", &self.parallel)
            .field("transport", &self.transport)
            .field("strategy", &self.strategy)
            .field("fallback_delay", &self.fallback_delay)
            .finish()
    }
}

#[async_trait]
impl<D> Dialer for ResolveDialer<D>
where
    D: Dialer + ?Sized + 'static,
{
    async fn dial_stream(
        &self,
        ctx: &DialContext,
        destination: &Destination,
    ) -> Result<IoStream, DialError> {
        let Some(domain) = destination.domain_name() else {
            return self.dialer.dial_stream(ctx, destination).await;
        };
        let addresses = self.lookup(ctx, domain).await?;
        let targets: Vec<Destination> = addresses
            .into_iter()
            .map(|ip| destination.with_ip(ip))
            .collect();

        if self.parallel && targets.len() > 1 {
            let dialer = self.dialer.clone();
            return race_staggered(ctx, targets, self.fallback_delay, move |target, ctx| {
                let dialer = dialer.clone();
                async move { dialer.dial_stream(&ctx, &target).await }
            })
            .await;
        }

        let mut last_err = None;
        for target in targets {
            match self.dialer.dial_stream(ctx, &target).await {
                Ok(stream) => return Ok(stream),
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => {
                    debug!(%destination, %target, error = %err, "candidate failed");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| DialError::resolve(domain, "no addresses")))
    }

    async fn listen_packet(
        &self,
        ctx: &DialContext,
        destination: &Destination,
    ) -> Result<Box<dyn PacketConn>, DialError> {
        let Some(domain) = destination.domain_name() else {
            return self.dialer.listen_packet(ctx, destination).await;
        };
        let addresses = self.lookup(ctx, domain).await?;
        let mut last_err = None;
        for ip in addresses {
            match self.dialer.listen_packet(ctx, &destination.with_ip(ip)).await {
                Ok(conn) => return Ok(conn),
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| DialError::resolve(domain, "no addresses")))
    }
}

#[async_trait]
impl<D> ParallelInterfaceDialer for ResolveDialer<D>
where
    D: Dialer + ParallelNetworkDialer + ?Sized + 'static,
{
    async fn dial_parallel_interface(
        &self,
        ctx: &DialContext,
        destination: &Destination,
        policy: &NetworkPolicy,
    ) -> Result<IoStream, DialError> {
        let addresses = match destination {
            Destination::Socket(addr) => vec![addr.ip()],
            Destination::Domain(domain, _) => self.lookup(ctx, domain).await?,
        };
        self.dialer
            .dial_parallel_network(ctx, destination, &addresses, policy)
            .await
    }

    async fn listen_serial_interface_packet(
        &self,
        ctx: &DialContext,
        destination: &Destination,
        policy: &NetworkPolicy,
    ) -> Result<(Box<dyn PacketConn>, SocketAddr), DialError> {
        let addresses = match destination {
            Destination::Socket(addr) => vec![addr.ip()],
            Destination::Domain(domain, _) => self.lookup(ctx, domain).await?,
        };
        self.dialer
            .listen_serial_network_packet(ctx, destination, &addresses, policy)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::default::DefaultDialer;
    use sb_types::{DialerOptions, ErrorClass};
    use std::sync::Mutex;
    use tokio::net::TcpListener;

    struct StaticRouter(Vec<IpAddr>);

    #[async_trait]
    impl DnsRouter for StaticRouter {
        async fn lookup(
            &self,
            _domain: &str,
            _options: &LookupOptions,
        ) -> anyhow::Result<Vec<IpAddr>> {
            Ok(self.0.clone())
        }
    }

    /// Records every destination it is asked to dial and refuses them all.
    #[derive(Default)]
    struct Refusing(Mutex<Vec<Destination>>);

    #[async_trait]
    impl Dialer for Refusing {
        async fn dial_stream(
            &self,
            _ctx: &DialContext,
            destination: &Destination,
        ) -> Result<IoStream, DialError> {
            self.0.lock().unwrap().push(destination.clone());
            Err(std::io::Error::from(std::io::ErrorKind::ConnectionRefused).into())
        }

        async fn listen_packet(
            &self,
            _ctx: &DialContext,
            _destination: &Destination,
        ) -> Result<Box<dyn PacketConn>, DialError> {
            Err(DialError::NotSupported)
        }
    }

    fn resolve_dialer(
        inner: Arc<Refusing>,
        addrs: Vec<IpAddr>,
        parallel: bool,
    ) -> ResolveDialer<Refusing> {
        ResolveDialer::new(
            inner,
            Arc::new(StaticRouter(addrs)),
            parallel,
            None,
            DomainStrategy::AsIs,
            Duration::ZERO,
        )
    }

    #[tokio::test]
    async fn literal_address_skips_resolution() {
        let inner = Arc::new(Refusing::default());
        let dialer = resolve_dialer(inner.clone(), vec![], true);
        let dest: Destination = "192.0.2.1:443".parse().unwrap();
        assert!(dialer.dial_stream(&DialContext::new(), &dest).await.is_err());
        assert_eq!(*inner.0.lock().unwrap(), vec![dest]);
    }

    #[tokio::test]
    async fn empty_answer_is_resolution_error() {
        let dialer = resolve_dialer(Arc::new(Refusing::default()), vec![], false);
        let err = dialer
            .dial_stream(&DialContext::new(), &Destination::domain("example.com", 443))
            .await
            .err()
            .unwrap();
        assert_eq!(err.class(), ErrorClass::Dns);
    }

    #[tokio::test]
    async fn serial_dial_tries_every_candidate_in_order() {
        let inner = Arc::new(Refusing::default());
        let a: IpAddr = "192.0.2.1".parse().unwrap();
        let b: IpAddr = "192.0.2.2".parse().unwrap();
        let dialer = resolve_dialer(inner.clone(), vec![a, b], false);
        let err = dialer
            .dial_stream(&DialContext::new(), &Destination::domain("example.com", 443))
            .await
            .err()
            .unwrap();
        assert_eq!(err.class(), ErrorClass::Io);
        assert_eq!(
            *inner.0.lock().unwrap(),
            vec![Destination::ip(a, 443), Destination::ip(b, 443)]
        );
    }

    #[test]
    fn zero_fallback_delay_uses_default() {
        let dialer = resolve_dialer(Arc::new(Refusing::default()), vec![], true);
        assert_eq!(dialer.fallback_delay, DEFAULT_FALLBACK_DELAY);
        assert!(dialer.is_parallel());
    }

    #[tokio::test]
    async fn resolved_candidates_reach_parallel_network_dialer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dest = Destination::domain("loopback.test", listener.local_addr().unwrap().port());
        let dialer = ResolveDialer::new(
            Arc::new(DefaultDialer::new(&DialerOptions::default())),
            Arc::new(StaticRouter(vec!["127.0.0.1".parse().unwrap()])),
            true,
            None,
            DomainStrategy::AsIs,
            Duration::ZERO,
        );
        let ctx = DialContext::new();
        let policy = NetworkPolicy::default_route(DEFAULT_FALLBACK_DELAY);

        let (stream, accepted) = tokio::join!(
            dialer.dial_parallel_interface(&ctx, &dest, &policy),
            listener.accept()
        );
        stream.unwrap();
        accepted.unwrap();

        let (_, local) = dialer
            .listen_serial_interface_packet(&ctx, &dest, &policy)
            .await
            .unwrap();
        assert!(local.ip().is_ipv4());
        let conn = dialer.listen_packet(&ctx, &dest).await.unwrap();
        assert!(conn.local_addr().unwrap().is_ipv4());
    }
}
