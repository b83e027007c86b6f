//! TLS ClientHello fragmenting connection (Go parity: common/tlsfragment.Conn).
//! TLS ClientHello 分片连接装饰器。
//!
//! [`FragmentConn`] rewrites the first write on a stream, and only that one.
//! When the write carries a ClientHello with a server name, the buffer is cut
//! inside the labels of the name (see [`FragmentPlan`]) and emitted either:
//!
//! - as several TLS records in one write (record mode), or
//! - as separate writes, each followed by a wait for the peer to acknowledge
//!   it or for the fallback delay to pass (segment mode). Coalescing is turned
//!   off for the duration when the stream exposes [`CoalescingControl`].
//!
//! Every later write, and all reads, pass through untouched. The first-write
//! flag is consumed even when fragmentation fails.

use crate::coalescing::CoalescingControl;
use crate::dialer::{AsyncReadWrite, IoStream};
use sb_common::tlsfrag::{index_server_name, FragmentPlan, SplitRandom, ThreadRandom};
use sb_types::TlsFragmentOptions;
use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{Instant, Sleep};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{debug, trace};

/// Poll interval for the unacknowledged-data check.
const ACK_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How the first write is fragmented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentMode {
    /// Re-frame the ClientHello as several TLS records, written at once.
    Record,
    /// Write each fragment separately, pacing on acknowledgment.
    Segment,
}

/// Stream decorator fragmenting the first write (the TLS ClientHello).
pub struct FragmentConn<S> {
    inner: S,
    mode: FragmentMode,
    fallback_delay: Duration,
    cancel: CancellationToken,
    rng: Box<dyn SplitRandom + Send>,
    state: FirstWrite,
}

enum FirstWrite {
    NotStarted,
    InFlight(Box<InFlight>),
    Done,
}

struct InFlight {
    chunks: VecDeque<Chunk>,
    written: usize,
    stage: Stage,
    total: usize,
    /// Coalescing state to put back once the write is over.
    restore_nodelay: Option<bool>,
}

struct Chunk {
    data: Vec<u8>,
    /// Wait for acknowledgment after this chunk.
    pace: bool,
}

enum Stage {
    Writing,
    Flushing,
    Waiting(AckWait),
}

/// Wait until the peer acknowledged everything written, the deadline passes,
/// or the connection's token is cancelled. None of these is an error.
struct AckWait {
    deadline: Instant,
    sleep: Pin<Box<Sleep>>,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl AckWait {
    fn new(fallback_delay: Duration, cancel: &CancellationToken) -> Self {
        let deadline = Instant::now() + fallback_delay;
        Self {
            deadline,
            sleep: Box::pin(tokio::time::sleep_until(deadline)),
            cancelled: Box::pin(cancel.clone().cancelled_owned()),
        }
    }

    fn poll_wait(
        &mut self,
        cx: &mut Context<'_>,
        control: Option<&dyn CoalescingControl>,
    ) -> Poll<io::Result<()>> {
        if self.cancelled.as_mut().poll(cx).is_ready() {
            trace!("ack wait cancelled");
            return Poll::Ready(Ok(()));
        }
        loop {
            let now = Instant::now();
            if now >= self.deadline {
                trace!("ack wait reached fallback delay");
                return Poll::Ready(Ok(()));
            }
            let next = match control.map(|c| c.unacked()).transpose()?.flatten() {
                Some(0) => return Poll::Ready(Ok(())),
                Some(_) => (now + ACK_POLL_INTERVAL).min(self.deadline),
                None => self.deadline,
            };
            self.sleep.as_mut().reset(next);
            ready!(self.sleep.as_mut().poll(cx));
        }
    }
}

impl<S> FragmentConn<S>
where
    S: AsyncReadWrite,
{
    pub fn new(
        inner: S,
        mode: FragmentMode,
        fallback_delay: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner,
            mode,
            fallback_delay,
            cancel,
            rng: Box::new(ThreadRandom),
            state: FirstWrite::NotStarted,
        }
    }

    /// Replace the split offset source.
    #[must_use]
    pub fn with_random(mut self, rng: impl SplitRandom + Send + 'static) -> Self {
        self.rng = Box::new(rng);
        self
    }

    pub fn mode(&self) -> FragmentMode {
        self.mode
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Reads never need this decorator.
    pub fn reader_replaceable(&self) -> bool {
        true
    }

    /// Writes can bypass this decorator once the first write has completed.
    pub fn writer_replaceable(&self) -> bool {
        matches!(self.state, FirstWrite::Done)
    }

    /// Prepare the first write. `None` means send `buf` as is.
    fn start(&mut self, buf: &[u8]) -> io::Result<Option<Box<InFlight>>> {
        let Some(server_name) = index_server_name(buf) else {
            trace!(len = buf.len(), "first write carries no server name");
            return Ok(None);
        };
        let plan = FragmentPlan::compute(&server_name, self.rng.as_mut());
        if plan.is_empty() {
            trace!(server_name = %server_name.name, "no label to split");
            return Ok(None);
        }
        debug!(
            server_name = %server_name.name,
            mode = ?self.mode,
            fragments = plan.fragment_count(),
            "fragmenting ClientHello"
        );

        let (chunks, restore_nodelay) = match self.mode {
            FragmentMode::Record => {
                let chunk = Chunk {
                    data: plan.frame_records(buf),
                    pace: false,
                };
                (VecDeque::from([chunk]), None)
            }
            FragmentMode::Segment => {
                let restore = match self.inner.coalescing_control() {
                    Some(control) => {
                        let previous = control.nodelay()?;
                        control.set_nodelay(true)?;
                        Some(previous)
                    }
                    None => None,
                };
                let fragments = plan.fragments(buf);
                let last = fragments.len() - 1;
                let chunks = fragments
                    .into_iter()
                    .enumerate()
                    .map(|(i, data)| Chunk {
                        data: data.to_vec(),
                        pace: i != last,
                    })
                    .collect();
                (chunks, restore)
            }
        };
        Ok(Some(Box::new(InFlight {
            chunks,
            written: 0,
            stage: Stage::Writing,
            total: buf.len(),
            restore_nodelay,
        })))
    }

    fn finish(&mut self, flight: &InFlight, result: io::Result<usize>) -> io::Result<usize> {
        let Some(previous) = flight.restore_nodelay else {
            return result;
        };
        let Some(control) = self.inner.coalescing_control() else {
            return result;
        };
        match result {
            Ok(n) => control.set_nodelay(previous).map(|_| n),
            Err(err) => {
                let _ = control.set_nodelay(previous);
                Err(err)
            }
        }
    }
}

/// Push every chunk out, waiting after paced ones.
fn drive<S: AsyncReadWrite>(
    inner: &mut S,
    flight: &mut InFlight,
    fallback_delay: Duration,
    cancel: &CancellationToken,
    cx: &mut Context<'_>,
) -> Poll<io::Result<usize>> {
    loop {
        let Some(chunk) = flight.chunks.front() else {
            return Poll::Ready(Ok(flight.total));
        };
        match &mut flight.stage {
            Stage::Writing => {
                if flight.written < chunk.data.len() {
                    let pending = &chunk.data[flight.written..];
                    let n = ready!(Pin::new(&mut *inner).poll_write(cx, pending))?;
                    if n == 0 {
                        return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
                    }
                    flight.written += n;
                    continue;
                }
                if chunk.pace {
                    flight.stage = Stage::Flushing;
                } else {
                    flight.chunks.pop_front();
                    flight.written = 0;
                }
            }
            Stage::Flushing => {
                ready!(Pin::new(&mut *inner).poll_flush(cx))?;
                flight.stage = Stage::Waiting(AckWait::new(fallback_delay, cancel));
            }
            Stage::Waiting(wait) => {
                ready!(wait.poll_wait(cx, inner.coalescing_control()))?;
                flight.chunks.pop_front();
                flight.written = 0;
                flight.stage = Stage::Writing;
            }
        }
    }
}

impl FragmentConn<IoStream> {
    /// Wrap `conn` as configured by `options`; returns it untouched when
    /// fragmentation is off. Record mode wins when both switches are set.
    pub fn wrap(
        conn: IoStream,
        options: &TlsFragmentOptions,
        cancel: CancellationToken,
    ) -> IoStream {
        if !options.enabled() {
            return conn;
        }
        let mode = if options.record_fragment {
            FragmentMode::Record
        } else {
            FragmentMode::Segment
        };
        Box::new(FragmentConn::new(conn, mode, options.fallback_delay(), cancel))
    }
}

impl<S: AsyncReadWrite> AsyncRead for FragmentConn<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl<S: AsyncReadWrite> AsyncWrite for FragmentConn<S> {
    /// While the first write is in flight, a pending call must be repeated
    /// with the same buffer (as `write_all` does); the rewritten bytes are
    /// tracked internally.
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                FirstWrite::Done => return Pin::new(&mut this.inner).poll_write(cx, buf),
                FirstWrite::NotStarted => match this.start(buf) {
                    Ok(Some(flight)) => this.state = FirstWrite::InFlight(flight),
                    Ok(None) => this.state = FirstWrite::Done,
                    Err(err) => {
                        this.state = FirstWrite::Done;
                        return Poll::Ready(Err(err));
                    }
                },
                FirstWrite::InFlight(flight) => {
                    debug_assert_eq!(
                        buf.len(),
                        flight.total,
                        "first write resumed with a different buffer"
                    );
                    let result = ready!(drive(
                        &mut this.inner,
                        flight,
                        this.fallback_delay,
                        &this.cancel,
                        cx
                    ));
                    let FirstWrite::InFlight(flight) =
                        std::mem::replace(&mut this.state, FirstWrite::Done)
                    else {
                        return Poll::Ready(result);
                    };
                    return Poll::Ready(this.finish(&flight, result));
                }
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl<S: AsyncReadWrite> AsyncReadWrite for FragmentConn<S> {
    fn coalescing_control(&self) -> Option<&dyn CoalescingControl> {
        self.inner.coalescing_control()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::io::AsyncWriteExt;

    const HELLO_PREFIX: [u8; 3] = [0x16, 0x03, 0x01];

    fn client_hello(sni: &str) -> Vec<u8> {
        let name = sni.as_bytes();
        let mut ext = vec![0x00, 0x00];
        ext.extend_from_slice(&((name.len() + 5) as u16).to_be_bytes());
        ext.extend_from_slice(&((name.len() + 3) as u16).to_be_bytes());
        ext.push(0x00);
        ext.extend_from_slice(&(name.len() as u16).to_be_bytes());
        ext.extend_from_slice(name);

        let mut body = vec![0x03, 0x03];
        body.extend_from_slice(&[0x42; 32]);
        body.push(0x00);
        body.extend_from_slice(&[0x00, 0x02, 0x13, 0x01, 0x01, 0x00]);
        body.extend_from_slice(&(ext.len() as u16).to_be_bytes());
        body.extend_from_slice(&ext);

        let mut hello = HELLO_PREFIX.to_vec();
        hello.extend_from_slice(&((body.len() + 4) as u16).to_be_bytes());
        hello.push(0x01);
        hello.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
        hello.extend_from_slice(&body);
        hello
    }

    struct FirstByte;

    impl SplitRandom for FirstByte {
        fn interior_offset(&mut self, _label_len: usize) -> usize {
            1
        }
    }

    #[derive(Default)]
    struct FakeControl {
        nodelay_calls: Mutex<Vec<bool>>,
        unacked: AtomicU32,
    }

    impl CoalescingControl for FakeControl {
        fn nodelay(&self) -> io::Result<bool> {
            Ok(false)
        }

        fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
            self.nodelay_calls.lock().unwrap().push(nodelay);
            Ok(())
        }

        fn unacked(&self) -> io::Result<Option<u32>> {
            Ok(Some(self.unacked.load(Ordering::SeqCst)))
        }
    }

    /// Records every write call separately.
    #[derive(Default)]
    struct Recorder {
        writes: Vec<Vec<u8>>,
        fail_writes: bool,
        control: Option<FakeControl>,
    }

    impl AsyncRead for Recorder {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncWrite for Recorder {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            let this = self.get_mut();
            if this.fail_writes {
                return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
            }
            this.writes.push(buf.to_vec());
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncReadWrite for Recorder {
        fn coalescing_control(&self) -> Option<&dyn CoalescingControl> {
            self.control.as_ref().map(|c| c as &dyn CoalescingControl)
        }
    }

    fn conn(recorder: Recorder, mode: FragmentMode) -> FragmentConn<Recorder> {
        FragmentConn::new(
            recorder,
            mode,
            Duration::from_millis(500),
            CancellationToken::new(),
        )
        .with_random(FirstByte)
    }

    #[tokio::test]
    async fn record_mode_emits_one_framed_write() {
        let hello = client_hello("www.example.com");
        let mut conn = conn(Recorder::default(), FragmentMode::Record);
        let n = conn.write(&hello).await.unwrap();
        assert_eq!(n, hello.len());

        let writes = &conn.get_ref().writes;
        assert_eq!(writes.len(), 1);
        let mut body = Vec::new();
        let mut records = 0;
        let mut rest = writes[0].as_slice();
        while !rest.is_empty() {
            assert_eq!(rest[..3], HELLO_PREFIX);
            let len = u16::from_be_bytes([rest[3], rest[4]]) as usize;
            body.extend_from_slice(&rest[5..5 + len]);
            rest = &rest[5 + len..];
            records += 1;
        }
        assert_eq!(records, 3);
        assert_eq!(body, hello[5..]);
        assert!(conn.writer_replaceable());
    }

    #[tokio::test(start_paused = true)]
    async fn segment_mode_paces_all_but_last_fragment() {
        let hello = client_hello("www.example.com");
        let mut conn = conn(Recorder::default(), FragmentMode::Segment);
        let start = Instant::now();
        let n = conn.write(&hello).await.unwrap();
        assert_eq!(n, hello.len());

        let writes = &conn.get_ref().writes;
        assert_eq!(writes.len(), 3);
        assert_eq!(writes.concat(), hello);
        // No ack signal available: each paced fragment waits the full delay.
        assert_eq!(start.elapsed(), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn acknowledged_fragments_do_not_wait() {
        let hello = client_hello("www.example.com");
        let recorder = Recorder {
            control: Some(FakeControl::default()),
            ..Default::default()
        };
        let mut conn = conn(recorder, FragmentMode::Segment);
        let start = Instant::now();
        conn.write_all(&hello).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);

        let recorder = conn.get_ref();
        assert_eq!(recorder.writes.len(), 3);
        let calls = recorder.control.as_ref().unwrap().nodelay_calls.lock().unwrap();
        assert_eq!(*calls, vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn unacknowledged_fragments_wait_for_fallback_delay() {
        let hello = client_hello("example.com");
        let control = FakeControl::default();
        control.unacked.store(1, Ordering::SeqCst);
        let recorder = Recorder {
            control: Some(control),
            ..Default::default()
        };
        let mut conn = conn(recorder, FragmentMode::Segment);
        let start = Instant::now();
        conn.write_all(&hello).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(500));
        assert_eq!(conn.get_ref().writes.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_ends_wait_without_error() {
        let hello = client_hello("www.example.com");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut conn = FragmentConn::new(
            Recorder::default(),
            FragmentMode::Segment,
            Duration::from_secs(10),
            cancel,
        );
        let start = Instant::now();
        conn.write_all(&hello).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(conn.get_ref().writes.len(), 3);
    }

    #[cfg(debug_assertions)]
    #[tokio::test(start_paused = true)]
    #[should_panic(expected = "first write resumed with a different buffer")]
    async fn abandoned_first_write_rejects_other_buffer() {
        let hello = client_hello("www.example.com");
        let mut conn = conn(Recorder::default(), FragmentMode::Segment);
        let pending = tokio::time::timeout(Duration::from_millis(100), conn.write(&hello)).await;
        assert!(pending.is_err());
        let _ = conn.write(b"GET / HTTP/1.1\r\n\r\n").await;
    }

    #[tokio::test]
    async fn later_writes_pass_through() {
        let hello = client_hello("www.example.com");
        let mut conn = conn(Recorder::default(), FragmentMode::Record);
        conn.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        assert!(conn.writer_replaceable());
        conn.write_all(&hello).await.unwrap();

        let writes = &conn.get_ref().writes;
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[1], hello);
    }

    #[tokio::test]
    async fn failed_first_write_is_not_retried() {
        let hello = client_hello("www.example.com");
        let recorder = Recorder {
            fail_writes: true,
            control: Some(FakeControl::default()),
            ..Default::default()
        };
        let mut conn = conn(recorder, FragmentMode::Segment);
        let err = conn.write(&hello).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert!(conn.writer_replaceable());
        let calls = conn.get_ref().control.as_ref().unwrap().nodelay_calls.lock().unwrap().clone();
        assert_eq!(calls, vec![true, false]);

        conn.get_mut().fail_writes = false;
        conn.write_all(&hello).await.unwrap();
        assert_eq!(conn.get_ref().writes, vec![hello]);
    }

    #[tokio::test]
    async fn bare_suffix_is_sent_whole() {
        let hello = client_hello("co.uk");
        let mut conn = conn(Recorder::default(), FragmentMode::Segment);
        conn.write_all(&hello).await.unwrap();
        assert_eq!(conn.get_ref().writes, vec![hello]);
    }

    #[test]
    fn disabled_options_leave_stream_unwrapped() {
        let (a, _b) = tokio::io::duplex(64);
        let stream: IoStream = Box::new(a);
        let wrapped =
            FragmentConn::wrap(stream, &TlsFragmentOptions::default(), CancellationToken::new());
        assert!(wrapped.coalescing_control().is_none());
    }

    #[test]
    fn reads_are_always_replaceable() {
        let conn = conn(Recorder::default(), FragmentMode::Record);
        assert!(conn.reader_replaceable());
        assert!(!conn.writer_replaceable());
        assert_eq!(conn.mode(), FragmentMode::Record);
    }
}
