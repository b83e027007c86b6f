//! # 网络拨号器抽象模块
//!
//! 该模块定义了出站连接的核心抽象，包括：
//! - `DialError`: 拨号过程中可能出现的错误类型
//! - `Dialer` trait: 打开流连接或数据报套接字的能力接口
//! - `DialContext`: 贯穿一次拨号的取消令牌与截止时间
//! - `IoStream` / `PacketConn`: 统一的流与数据报类型
//!
//! Every wrapping dialer in this crate (`DetourDialer`, `ResolveDialer`, the
//! parallel dialers) implements [`Dialer`] and delegates to another one.

use crate::coalescing::CoalescingControl;
use async_trait::async_trait;
use sb_types::{Destination, ErrorClass};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// 拨号过程中可能出现的错误类型
///
/// Variants line up with the failure kinds callers act on: configuration
/// mistakes are fatal, resolution and I/O failures may be retried by higher
/// layers, cancellation aborts immediately.
#[derive(Debug, Error)]
pub enum DialError {
    /// IO 错误：底层网络 IO 操作失败（包括单个候选地址的连接失败）
    #[error("io: {0}")]
    Io(#[from] io::Error),

    /// 配置错误：缺失的出站、未知的解析器、直连场景中的 detour 等
    #[error("{0}")]
    Config(String),

    /// 解析错误：DNS 路由未返回可用地址
    #[error("resolve {domain}: {message}")]
    Resolve { domain: String, message: String },

    /// 取消错误：上下文被取消或截止时间已过
    #[error("{0}")]
    Cancelled(&'static str),

    /// 不支持的操作：当前拨号器不支持请求的操作
    #[error("not supported")]
    NotSupported,

    /// 其他错误
    #[error("other: {0}")]
    Other(String),
}

impl DialError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn resolve(domain: impl Into<String>, message: impl ToString) -> Self {
        Self::Resolve {
            domain: domain.into(),
            message: message.to_string(),
        }
    }

    /// Shared classification used in log fields and retry decisions.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Io(_) => ErrorClass::Io,
            Self::Config(_) => ErrorClass::Config,
            Self::Resolve { .. } => ErrorClass::Dns,
            Self::Cancelled(_) => ErrorClass::Cancelled,
            Self::NotSupported => ErrorClass::Unsupported,
            Self::Other(_) => ErrorClass::Internal,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// 将 tokio 超时错误转换为 `TimedOut` IO 错误
///
/// A connect timeout is a failure of one candidate, not a cancellation of the
/// whole dial, so racing and serial loops move on to the next address.
impl From<tokio::time::error::Elapsed> for DialError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        DialError::Io(io::Error::new(io::ErrorKind::TimedOut, "connect timeout"))
    }
}

/// 异步读写 trait
///
/// Implemented explicitly (no blanket impl) so a stream can advertise optional
/// socket capabilities such as [`CoalescingControl`] without downcasting.
pub trait AsyncReadWrite: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send {
    /// Nagle toggle and send-queue inspection, when the stream is backed by a
    /// TCP socket that exposes them.
    fn coalescing_control(&self) -> Option<&dyn CoalescingControl> {
        None
    }
}

impl AsyncReadWrite for TcpStream {
    fn coalescing_control(&self) -> Option<&dyn CoalescingControl> {
        Some(self)
    }
}

impl AsyncReadWrite for tokio::io::DuplexStream {}

impl<T: AsyncReadWrite + ?Sized> AsyncReadWrite for Box<T> {
    fn coalescing_control(&self) -> Option<&dyn CoalescingControl> {
        (**self).coalescing_control()
    }
}

/// Boxed, thread-safe byte stream with a static lifetime
pub type IoStream = Box<dyn AsyncReadWrite + 'static>;

/// 数据报套接字抽象
#[async_trait]
pub trait PacketConn: Send + Sync {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl PacketConn for UdpSocket {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, target).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}

/// 拨号上下文：取消令牌 + 可选截止时间
///
/// Cloning shares the token. [`DialContext::child`] derives a context whose
/// cancellation does not propagate upward, used to cancel losing race attempts.
#[derive(Debug, Clone, Default)]
pub struct DialContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl DialContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context driven by an externally owned token.
    pub fn with_token(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// Tighten the deadline to `now + timeout` (never loosens an earlier one).
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once the context is cancelled or its deadline passes,
    /// yielding the matching error.
    pub async fn done(&self) -> DialError {
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => DialError::Cancelled("context cancelled"),
            _ = deadline => DialError::Cancelled("deadline exceeded"),
        }
    }

    /// Run `fut` unless the context finishes first.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, DialError>
    where
        F: Future<Output = Result<T, DialError>>,
    {
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            res = fut => res,
        }
    }
}

/// 出站拨号能力接口
///
/// ## 使用示例
/// ```rust,no_run
/// use sb_transport::{DefaultDialer, DialContext, Dialer};
/// use sb_types::{DialerOptions, Destination};
///
/// async fn example() -> Result<(), Box<dyn std::error::Error>> {
///     let dialer = DefaultDialer::new(&DialerOptions::default());
///     let dest: Destination = "127.0.0.1:80".parse()?;
///     let stream = dialer.dial_stream(&DialContext::new(), &dest).await?;
///     // 使用 stream 进行通信...
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait Dialer: Send + Sync {
    /// 建立到目标的流连接
    async fn dial_stream(
        &self,
        ctx: &DialContext,
        destination: &Destination,
    ) -> Result<IoStream, DialError>;

    /// 打开用于与目标通信的数据报套接字
    async fn listen_packet(
        &self,
        ctx: &DialContext,
        destination: &Destination,
    ) -> Result<Box<dyn PacketConn>, DialError>;
}

#[async_trait]
impl<D> Dialer for Box<D>
where
    D: Dialer + ?Sized,
{
    async fn dial_stream(
        &self,
        ctx: &DialContext,
        destination: &Destination,
    ) -> Result<IoStream, DialError> {
        (**self).dial_stream(ctx, destination).await
    }

    async fn listen_packet(
        &self,
        ctx: &DialContext,
        destination: &Destination,
    ) -> Result<Box<dyn PacketConn>, DialError> {
        (**self).listen_packet(ctx, destination).await
    }
}

#[async_trait]
impl<D> Dialer for Arc<D>
where
    D: Dialer + ?Sized,
{
    async fn dial_stream(
        &self,
        ctx: &DialContext,
        destination: &Destination,
    ) -> Result<IoStream, DialError> {
        (**self).dial_stream(ctx, destination).await
    }

    async fn listen_packet(
        &self,
        ctx: &DialContext,
        destination: &Destination,
    ) -> Result<Box<dyn PacketConn>, DialError> {
        (**self).listen_packet(ctx, destination).await
    }
}
