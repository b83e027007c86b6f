//! # sb-transport: Outbound Dialer Stack / 出站拨号栈
//!
//! This crate builds outbound connections: directly, through a named detour,
//! with domain resolution through a DNS router, racing resolved addresses or
//! local interfaces, and optionally fragmenting the TLS ClientHello written on
//! the resulting stream.
//!
//! 这个 crate 负责建立出站连接：直连、经由 detour、通过 DNS 路由解析域名、
//! 在多个地址或本地接口之间竞速，并可对连接上的 TLS ClientHello 进行分片。
//!
//! ## Modules / 模块
//! - `dialer`: `Dialer` capability trait, `DialContext`, `DialError`, `IoStream`
//! - `default` / `detour` / `resolve`: the composable dialers
//! - `parallel`: parallel interface/network contracts and racing helpers
//! - `factory`: `DialerFactory`, composition from `DialerOptions`
//! - `ports`: collaborator contracts (outbound registry, DNS, interfaces)
//! - `tls_fragment` / `coalescing`: ClientHello fragmenting stream decorator
//!
//! ## Design Philosophy / 设计理念
//! - **boring clarity**: each wrapper does one thing / 每个包装器只做一件事
//! - **explicit dependencies**: registries are injected, never ambient / 显式注入依赖

pub mod coalescing;
pub mod default;
pub mod detour;
pub mod dialer;
pub mod factory;
pub mod parallel;
pub mod ports;
pub mod resolve;
pub mod tls_fragment;

pub use coalescing::CoalescingControl;
pub use default::DefaultDialer;
pub use detour::DetourDialer;
pub use dialer::{AsyncReadWrite, DialContext, DialError, Dialer, IoStream, PacketConn};
pub use factory::DialerFactory;
pub use parallel::{
    race_staggered, race_tiers, NetworkPolicy, ParallelInterfaceDialer, ParallelNetworkDialer,
};
pub use resolve::ResolveDialer;
pub use tls_fragment::{FragmentConn, FragmentMode};
