//! Dialer factory (Go parity: dialer.New / dialer.NewDirect).
//! 拨号器工厂：根据配置组合默认、detour、解析与并行拨号器。
//!
//! Composition rules:
//!
//! | options | routed (`compose`) | direct (`compose_direct`) |
//! |---|---|---|
//! | WireGuard listener | default dialer | default dialer |
//! | `detour` set | detour dialer, resolved only with `domain_resolver` | config error |
//! | domain destination | resolving dialer when a DNS router is present | always resolving |
//!
//! Address racing is enabled only without detour and without TCP fast open.

use crate::default::DefaultDialer;
use crate::detour::DetourDialer;
use crate::dialer::{DialError, Dialer};
use crate::parallel::ParallelInterfaceDialer;
use crate::ports::{
    Deprecation, DeprecationReporter, DnsRouter, DnsTransport, DnsTransportManager,
    InterfaceFinder, LogDeprecationReporter, OutboundRegistry, SystemDnsRouter,
};
use crate::resolve::ResolveDialer;
use sb_types::DialerOptions;
use std::sync::Arc;
use tracing::debug;

/// Builds dialers from [`DialerOptions`] using explicitly injected
/// collaborators. Every collaborator is optional; a missing one degrades or
/// fails as documented on each entry point.
#[derive(Clone)]
pub struct DialerFactory {
    outbounds: Option<Arc<dyn OutboundRegistry>>,
    dns_router: Option<Arc<dyn DnsRouter>>,
    dns_transports: Option<Arc<dyn DnsTransportManager>>,
    deprecation: Arc<dyn DeprecationReporter>,
    interfaces: Option<Arc<dyn InterfaceFinder>>,
}

impl Default for DialerFactory {
    fn default() -> Self {
        Self {
            outbounds: None,
            dns_router: None,
            dns_transports: None,
            deprecation: LogDeprecationReporter::global(),
            interfaces: None,
        }
    }
}

impl DialerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_outbounds(mut self, outbounds: Arc<dyn OutboundRegistry>) -> Self {
        self.outbounds = Some(outbounds);
        self
    }

    #[must_use]
    pub fn with_dns_router(mut self, router: Arc<dyn DnsRouter>) -> Self {
        self.dns_router = Some(router);
        self
    }

    #[must_use]
    pub fn with_dns_transports(mut self, transports: Arc<dyn DnsTransportManager>) -> Self {
        self.dns_transports = Some(transports);
        self
    }

    #[must_use]
    pub fn with_deprecation_reporter(mut self, reporter: Arc<dyn DeprecationReporter>) -> Self {
        self.deprecation = reporter;
        self
    }

    #[must_use]
    pub fn with_interface_finder(mut self, finder: Arc<dyn InterfaceFinder>) -> Self {
        self.interfaces = Some(finder);
        self
    }

    /// Dialer for a routed context, where something downstream may still see
    /// the domain name.
    ///
    /// Fails with a configuration error when a detour is requested without an
    /// outbound registry or for an unknown tag, and when `domain_resolver`
    /// names an unknown DNS server. Without a DNS router the dialer is
    /// returned unwrapped and resolution is left to whoever receives the
    /// connection.
    pub fn compose(
        &self,
        options: &DialerOptions,
        destination_is_domain: bool,
    ) -> Result<Arc<dyn Dialer>, DialError> {
        if options.is_wireguard_listener {
            return Ok(Arc::new(self.default_dialer(options)));
        }
        let dialer: Arc<dyn Dialer> = if options.has_detour() {
            let outbounds = self
                .outbounds
                .as_ref()
                .ok_or_else(|| DialError::config("missing outbound manager"))?;
            Arc::new(DetourDialer::new(outbounds.as_ref(), &options.detour)?)
        } else {
            Arc::new(self.default_dialer(options))
        };

        if destination_is_domain && !options.has_detour() && !options.has_domain_resolver() {
            self.deprecation.report(Deprecation::MissingDomainResolver);
        }

        let wants_resolve =
            (!options.has_detour() && destination_is_domain) || options.has_domain_resolver();
        if !wants_resolve {
            return Ok(dialer);
        }
        let Some(router) = self.dns_router.clone() else {
            debug!(detour = %options.detour, "no DNS router, deferring resolution");
            return Ok(dialer);
        };
        let transport = self.resolver_transport(options)?;
        let parallel = !options.has_detour() && !options.tcp_fast_open;
        debug!(
            detour = %options.detour,
            domain_resolver = %options.domain_resolver,
            parallel,
            "wrapping dialer with resolver"
        );
        Ok(Arc::new(ResolveDialer::new(
            dialer,
            router,
            parallel,
            transport,
            options.domain_strategy,
            options.fallback_delay(),
        )))
    }

    /// Dialer for a direct context, with no router downstream: destinations
    /// are always resolved locally and address racing is always on.
    ///
    /// A detour is a configuration error here. Without an injected DNS router
    /// the system resolver is used.
    pub fn compose_direct(
        &self,
        options: &DialerOptions,
    ) -> Result<Arc<dyn ParallelInterfaceDialer>, DialError> {
        if options.has_detour() {
            return Err(DialError::config(
                "`detour` is not supported in direct context",
            ));
        }
        if options.is_wireguard_listener {
            return Ok(Arc::new(self.default_dialer(options)));
        }
        let dialer = Arc::new(self.default_dialer(options));
        let transport = self.resolver_transport(options)?;
        let router = self
            .dns_router
            .clone()
            .unwrap_or_else(|| Arc::new(SystemDnsRouter) as Arc<dyn DnsRouter>);
        Ok(Arc::new(ResolveDialer::new(
            dialer,
            router,
            true,
            transport,
            options.domain_strategy,
            options.fallback_delay(),
        )))
    }

    fn default_dialer(&self, options: &DialerOptions) -> DefaultDialer {
        let dialer = DefaultDialer::new(options);
        match &self.interfaces {
            Some(finder) => dialer.with_interface_finder(finder.clone()),
            None => dialer,
        }
    }

    /// DNS server named by `domain_resolver`, if any.
    fn resolver_transport(
        &self,
        options: &DialerOptions,
    ) -> Result<Option<Arc<dyn DnsTransport>>, DialError> {
        if !options.has_domain_resolver() {
            return Ok(None);
        }
        self.dns_transports
            .as_ref()
            .and_then(|m| m.transport(&options.domain_resolver))
            .map(Some)
            .ok_or_else(|| {
                DialError::config(format!("DNS server not found: {}", options.domain_resolver))
            })
    }
}

impl std::fmt::Debug for DialerFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialerFactory")
            .field("outbounds", &self.outbounds.is_some())
            .field("dns_router", &self.dns_router.as_ref().map(|r| r.name()))
            .field("dns_transports", &self.dns_transports.is_some())
            .field("interfaces", &self.interfaces.is_some())
            .finish()
    }
}
