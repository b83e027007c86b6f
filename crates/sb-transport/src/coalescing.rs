//! Small-write coalescing control (Nagle) and send-queue inspection.
//! 小包合并（Nagle）控制与发送队列查询。
//!
//! Segment pacing needs two things from the socket under a stream: turning
//! coalescing off so each partial write leaves as its own segment, and a way
//! to tell when a written segment has been acknowledged by the peer.

use std::io;
use tokio::net::TcpStream;

/// Optional socket capability discovered through
/// [`AsyncReadWrite::coalescing_control`](crate::AsyncReadWrite::coalescing_control).
pub trait CoalescingControl: Send + Sync {
    /// Whether coalescing is currently disabled (`TCP_NODELAY` set).
    fn nodelay(&self) -> io::Result<bool>;

    fn set_nodelay(&self, nodelay: bool) -> io::Result<()>;

    /// Data written but not yet acknowledged by the peer: segments on Linux,
    /// bytes on Apple platforms. Only zero versus non-zero is meaningful.
    ///
    /// `Ok(None)` when the platform offers no way to ask; callers then fall
    /// back to a plain delay.
    fn unacked(&self) -> io::Result<Option<u32>>;
}

impl CoalescingControl for TcpStream {
    fn nodelay(&self) -> io::Result<bool> {
        TcpStream::nodelay(self)
    }

    fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        TcpStream::set_nodelay(self, nodelay)
    }

    fn unacked(&self) -> io::Result<Option<u32>> {
        unacked(self)
    }
}

#[cfg(target_os = "linux")]
fn unacked(stream: &TcpStream) -> io::Result<Option<u32>> {
    use std::os::unix::io::AsRawFd;

    let mut info: libc::tcp_info = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::tcp_info>() as libc::socklen_t;
    // SAFETY: getsockopt writes at most `len` bytes into a properly sized tcp_info.
    let ret = unsafe {
        libc::getsockopt(
            stream.as_raw_fd(),
            libc::IPPROTO_TCP,
            libc::TCP_INFO,
            &mut info as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(Some(info.tcpi_unacked))
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
fn unacked(stream: &TcpStream) -> io::Result<Option<u32>> {
    use std::os::unix::io::AsRawFd;

    let mut value: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    // SAFETY: SO_NWRITE reports a single c_int.
    let ret = unsafe {
        libc::getsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_NWRITE,
            &mut value as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(Some(value.max(0) as u32))
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "ios")))]
fn unacked(_stream: &TcpStream) -> io::Result<Option<u32>> {
    Ok(None)
}
