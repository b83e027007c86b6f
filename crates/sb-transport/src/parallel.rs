//! Parallel interface / network dialing and the racing orchestration behind it.
//! 并行接口/网络拨号，以及“首个成功者获胜”的竞速调度。
//!
//! Every race follows one pattern: each attempt runs as its own task in a
//! [`JoinSet`] under a child [`DialContext`]; the first success wins, the
//! race context is cancelled and the remaining tasks are aborted and joined
//! before the winner is returned. Only the last failure is surfaced when every
//! attempt fails.

use crate::dialer::{DialContext, DialError, Dialer, IoStream, PacketConn};
use async_trait::async_trait;
use sb_types::{Destination, DialerOptions, InterfaceType, NetworkStrategy};
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace};

/// Interface selection for one parallel dial: strategy, primary and fallback
/// interface-type tiers, and the delay before the fallback tier starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkPolicy {
    pub strategy: NetworkStrategy,
    pub interface_types: Vec<InterfaceType>,
    pub fallback_interface_types: Vec<InterfaceType>,
    pub fallback_delay: Duration,
}

impl NetworkPolicy {
    /// Policy configured in `options`, if any `network_strategy` is set.
    pub fn from_options(options: &DialerOptions) -> Option<Self> {
        options.network_strategy.map(|strategy| Self {
            strategy,
            interface_types: options.network_type.clone(),
            fallback_interface_types: options.fallback_network_type.clone(),
            fallback_delay: options.fallback_delay(),
        })
    }

    /// Default-route only policy.
    pub fn default_route(fallback_delay: Duration) -> Self {
        Self {
            strategy: NetworkStrategy::Default,
            interface_types: Vec::new(),
            fallback_interface_types: Vec::new(),
            fallback_delay,
        }
    }
}

/// Dialer able to race a destination across local interfaces.
#[async_trait]
pub trait ParallelInterfaceDialer: Dialer {
    /// Stream dial racing the primary interface tier, then the fallback tier.
    async fn dial_parallel_interface(
        &self,
        ctx: &DialContext,
        destination: &Destination,
        policy: &NetworkPolicy,
    ) -> Result<IoStream, DialError>;

    /// Datagram socket bound through the first usable interface, tried
    /// serially in tier order. Returns the local address actually bound.
    async fn listen_serial_interface_packet(
        &self,
        ctx: &DialContext,
        destination: &Destination,
        policy: &NetworkPolicy,
    ) -> Result<(Box<dyn PacketConn>, SocketAddr), DialError>;
}

/// Dialer able to race pre-resolved destination addresses across local
/// interfaces.
#[async_trait]
pub trait ParallelNetworkDialer: Send + Sync {
    async fn dial_parallel_network(
        &self,
        ctx: &DialContext,
        destination: &Destination,
        addresses: &[IpAddr],
        policy: &NetworkPolicy,
    ) -> Result<IoStream, DialError>;

    async fn listen_serial_network_packet(
        &self,
        ctx: &DialContext,
        destination: &Destination,
        addresses: &[IpAddr],
        policy: &NetworkPolicy,
    ) -> Result<(Box<dyn PacketConn>, SocketAddr), DialError>;
}

/// Staggered race (address fallback).
///
/// The first candidate starts at once; each further candidate starts when
/// `delay` has passed since the previous start, or as soon as a running
/// attempt fails. The first success wins.
pub async fn race_staggered<A, T, F, Fut>(
    ctx: &DialContext,
    candidates: Vec<A>,
    delay: Duration,
    attempt: F,
) -> Result<T, DialError>
where
    F: Fn(A, DialContext) -> Fut,
    Fut: Future<Output = Result<T, DialError>> + Send + 'static,
    T: Send + 'static,
{
    let race = ctx.child();
    let mut set = JoinSet::new();
    let mut pending = candidates.into_iter().peekable();
    let mut last_err: Option<DialError> = None;
    let mut next_start = Instant::now();

    loop {
        if set.is_empty() {
            match pending.next() {
                Some(candidate) => {
                    set.spawn(attempt(candidate, race.child()));
                    next_start = Instant::now() + delay;
                }
                None => break,
            }
        }
        let more = pending.peek().is_some();
        tokio::select! {
            biased;
            err = ctx.done() => {
                race.cancel();
                set.shutdown().await;
                return Err(err);
            }
            joined = set.join_next() => match joined {
                Some(Ok(Ok(value))) => {
                    race.cancel();
                    set.shutdown().await;
                    return Ok(value);
                }
                Some(Ok(Err(err))) => {
                    trace!(error = %err, "race attempt failed");
                    last_err = Some(err);
                    if let Some(candidate) = pending.next() {
                        set.spawn(attempt(candidate, race.child()));
                        next_start = Instant::now() + delay;
                    }
                }
                Some(Err(join_err)) => {
                    last_err = Some(DialError::Other(join_err.to_string()));
                }
                None => {}
            },
            _ = sleep_until(next_start), if more => {
                if let Some(candidate) = pending.next() {
                    debug!(?delay, "starting next race attempt after fallback delay");
                    set.spawn(attempt(candidate, race.child()));
                    next_start = Instant::now() + delay;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| DialError::Other("no candidates to dial".into())))
}

/// Tiered race (interface fallback).
///
/// Every primary attempt starts at once. The fallback tier starts when
/// `delay` passes without a primary success, or immediately once the primary
/// tier is exhausted or empty. It never starts if a primary attempt wins.
pub async fn race_tiers<A, T, F, Fut>(
    ctx: &DialContext,
    primary: Vec<A>,
    fallback: Vec<A>,
    delay: Duration,
    attempt: F,
) -> Result<T, DialError>
where
    F: Fn(A, DialContext) -> Fut,
    Fut: Future<Output = Result<T, DialError>> + Send + 'static,
    T: Send + 'static,
{
    let race = ctx.child();
    let mut set = JoinSet::new();
    for candidate in primary {
        set.spawn(attempt(candidate, race.child()));
    }
    let mut fallback = Some(fallback).filter(|f| !f.is_empty());
    let fallback_at = Instant::now() + delay;
    let mut last_err: Option<DialError> = None;

    loop {
        if set.is_empty() {
            match fallback.take() {
                Some(tier) => {
                    debug!("primary tier exhausted, starting fallback tier");
                    for candidate in tier {
                        set.spawn(attempt(candidate, race.child()));
                    }
                }
                None => break,
            }
        }
        let waiting = fallback.is_some();
        tokio::select! {
            biased;
            err = ctx.done() => {
                race.cancel();
                set.shutdown().await;
                return Err(err);
            }
            joined = set.join_next() => match joined {
                Some(Ok(Ok(value))) => {
                    race.cancel();
                    set.shutdown().await;
                    return Ok(value);
                }
                Some(Ok(Err(err))) => {
                    trace!(error = %err, "tier attempt failed");
                    last_err = Some(err);
                }
                Some(Err(join_err)) => {
                    last_err = Some(DialError::Other(join_err.to_string()));
                }
                None => {}
            },
            _ = sleep_until(fallback_at), if waiting => {
                if let Some(tier) = fallback.take() {
                    debug!(?delay, "starting fallback tier after fallback delay");
                    for candidate in tier {
                        set.spawn(attempt(candidate, race.child()));
                    }
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| DialError::Other("no interfaces to dial".into())))
}
