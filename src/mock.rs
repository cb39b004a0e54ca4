//! 测试用的协作者
//!
//! 这些类型记录会话对外部组件做过的每一次调用，供单元测试断言。

// 并非每个测试配置都会用到全部协作者
#![allow(dead_code)]

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::client::transport::{Channel, Connect, Wire};
use crate::client::EstablishPromise;
use crate::rt::{Sleep, Timer};
use crate::SessionProtocol;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ===== Channel =====

#[derive(Clone)]
pub(crate) struct MockChannel {
    inner: Arc<ChannelState>,
}

struct ChannelState {
    open: AtomicBool,
    closes: AtomicUsize,
    addr: SocketAddr,
    wire: MockWire,
    #[cfg(feature = "http2")]
    frames: Mutex<Option<MockFrameSink>>,
}

impl MockChannel {
    pub(crate) fn new() -> MockChannel {
        MockChannel {
            inner: Arc::new(ChannelState {
                open: AtomicBool::new(true),
                closes: AtomicUsize::new(0),
                addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
                wire: MockWire::new(),
                #[cfg(feature = "http2")]
                frames: Mutex::new(None),
            }),
        }
    }

    /// 给连接装上一个 HTTP/2 处理器。
    #[cfg(feature = "http2")]
    pub(crate) fn with_http2(self) -> MockChannel {
        *lock(&self.inner.frames) = Some(MockFrameSink::new());
        self
    }

    pub(crate) fn close_count(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn mock_wire(&self) -> MockWire {
        self.inner.wire.clone()
    }

    #[cfg(feature = "http2")]
    pub(crate) fn frame_sink(&self) -> Option<MockFrameSink> {
        lock(&self.inner.frames).clone()
    }
}

impl Channel for MockChannel {
    fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.inner.open.store(false, Ordering::SeqCst);
        self.inner.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn remote_addr(&self) -> SocketAddr {
        self.inner.addr
    }

    fn wire(&self) -> Box<dyn Wire> {
        Box::new(self.inner.wire.clone())
    }

    #[cfg(feature = "http2")]
    fn http2(&self) -> Option<Box<dyn crate::proto::h2::FrameSink>> {
        lock(&self.inner.frames)
            .clone()
            .map(|sink| Box::new(sink) as Box<dyn crate::proto::h2::FrameSink>)
    }
}

// ===== Wire =====

#[derive(Clone)]
pub(crate) struct MockWire {
    inner: Arc<Mutex<WireState>>,
}

#[derive(Default)]
struct WireState {
    written: Vec<u8>,
    shutdown: bool,
}

impl MockWire {
    pub(crate) fn new() -> MockWire {
        MockWire {
            inner: Arc::new(Mutex::new(WireState::default())),
        }
    }

    pub(crate) fn written_string(&self) -> String {
        String::from_utf8_lossy(&lock(&self.inner).written).into_owned()
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        lock(&self.inner).shutdown
    }

    /// 之后的写入都会失败。
    pub(crate) fn shutdown_now(&self) {
        lock(&self.inner).shutdown = true;
    }
}

impl Wire for MockWire {
    fn write(&mut self, buf: Bytes) -> io::Result<()> {
        let mut state = lock(&self.inner);
        if state.shutdown {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        state.written.extend_from_slice(&buf);
        Ok(())
    }

    fn shutdown(&mut self) {
        lock(&self.inner).shutdown = true;
    }
}

// ===== Connect =====

#[derive(Clone)]
pub(crate) struct MockConnector {
    calls: Arc<Mutex<Vec<(SocketAddr, SessionProtocol, EstablishPromise)>>>,
}

impl MockConnector {
    pub(crate) fn new() -> MockConnector {
        MockConnector {
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn calls(&self) -> Vec<(SocketAddr, SessionProtocol, EstablishPromise)> {
        lock(&self.calls).clone()
    }
}

impl Connect for MockConnector {
    fn connect(&self, addr: SocketAddr, protocol: SessionProtocol, promise: EstablishPromise) {
        lock(&self.calls).push((addr, protocol, promise));
    }
}

// ===== Timer =====

/// 一个手动推进的虚拟时钟。
#[derive(Clone)]
pub(crate) struct MockTimer {
    inner: Arc<Mutex<TimerState>>,
    created: Arc<AtomicUsize>,
    dropped: Arc<AtomicUsize>,
}

struct TimerState {
    now: Instant,
    sleeps: Vec<Weak<SleepState>>,
}

struct SleepState {
    deadline: Instant,
    fired: AtomicBool,
    waker: Mutex<Option<Waker>>,
}

impl SleepState {
    fn fire(&self) {
        self.fired.store(true, Ordering::SeqCst);
        if let Some(waker) = lock(&self.waker).take() {
            waker.wake();
        }
    }
}

impl MockTimer {
    pub(crate) fn new() -> MockTimer {
        MockTimer {
            inner: Arc::new(Mutex::new(TimerState {
                now: Instant::now(),
                sleeps: Vec::new(),
            })),
            created: Arc::new(AtomicUsize::new(0)),
            dropped: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 推进时钟，触发所有到期的 sleep。
    pub(crate) fn advance(&self, dur: Duration) {
        let mut state = lock(&self.inner);
        state.now += dur;
        let now = state.now;
        state.sleeps.retain(|weak| match weak.upgrade() {
            Some(sleep) if sleep.deadline <= now => {
                sleep.fire();
                false
            }
            Some(_) => true,
            None => false,
        });
    }

    /// 立即触发所有 sleep。
    pub(crate) fn fire_all(&self) {
        let sleeps = std::mem::take(&mut lock(&self.inner).sleeps);
        for sleep in sleeps.iter().filter_map(Weak::upgrade) {
            sleep.fire();
        }
    }

    /// 创建过的 sleep 数量。
    pub(crate) fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// 被 drop（取消或完成后释放）的 sleep 数量。
    pub(crate) fn dropped(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }
}

impl Timer for MockTimer {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Sleep>> {
        let deadline = self.now() + duration;
        self.sleep_until(deadline)
    }

    fn sleep_until(&self, deadline: Instant) -> Pin<Box<dyn Sleep>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let mut state = lock(&self.inner);
        let sleep = Arc::new(SleepState {
            deadline,
            fired: AtomicBool::new(deadline <= state.now),
            waker: Mutex::new(None),
        });
        state.sleeps.push(Arc::downgrade(&sleep));
        Box::pin(MockSleep {
            state: sleep,
            dropped: self.dropped.clone(),
        })
    }

    fn now(&self) -> Instant {
        lock(&self.inner).now
    }
}

struct MockSleep {
    state: Arc<SleepState>,
    dropped: Arc<AtomicUsize>,
}

impl Future for MockSleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.state.fired.load(Ordering::SeqCst) {
            return Poll::Ready(());
        }
        *lock(&self.state.waker) = Some(cx.waker().clone());
        if self.state.fired.load(Ordering::SeqCst) {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

impl Sleep for MockSleep {}

impl Drop for MockSleep {
    fn drop(&mut self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

// ===== HTTP/2 frames =====

cfg_http2! {
    /// 写出的一个 HTTP/2 帧。
    #[derive(Debug)]
    pub(crate) enum Frame {
        Headers {
            stream_id: u32,
            head: http::request::Parts,
            end_stream: bool,
        },
        Data {
            stream_id: u32,
            data: Bytes,
            end_stream: bool,
        },
        Trailers {
            stream_id: u32,
            trailers: http::HeaderMap,
        },
        Reset {
            stream_id: u32,
            reason: h2::Reason,
        },
    }

    impl Frame {
        pub(crate) fn stream_id(&self) -> u32 {
            match *self {
                Frame::Headers { stream_id, .. }
                | Frame::Data { stream_id, .. }
                | Frame::Trailers { stream_id, .. }
                | Frame::Reset { stream_id, .. } => stream_id,
            }
        }
    }

    #[derive(Clone)]
    pub(crate) struct MockFrameSink {
        inner: Arc<Mutex<FrameState>>,
    }

    #[derive(Default)]
    struct FrameState {
        frames: Vec<Frame>,
        fail: Option<h2::Reason>,
    }

    impl MockFrameSink {
        pub(crate) fn new() -> MockFrameSink {
            MockFrameSink {
                inner: Arc::new(Mutex::new(FrameState::default())),
            }
        }

        /// 取走目前写出的所有帧。
        pub(crate) fn frames(&self) -> Vec<Frame> {
            std::mem::take(&mut lock(&self.inner).frames)
        }

        /// 之后的发送都以 `reason` 失败。
        pub(crate) fn fail_with(&self, reason: h2::Reason) {
            lock(&self.inner).fail = Some(reason);
        }

        fn push(&self, frame: Frame) -> Result<(), h2::Error> {
            let mut state = lock(&self.inner);
            if let Some(reason) = state.fail {
                return Err(reason.into());
            }
            state.frames.push(frame);
            Ok(())
        }
    }

    impl crate::proto::h2::FrameSink for MockFrameSink {
        fn send_headers(
            &mut self,
            stream_id: u32,
            head: http::request::Parts,
            end_stream: bool,
        ) -> Result<(), h2::Error> {
            self.push(Frame::Headers {
                stream_id,
                head,
                end_stream,
            })
        }

        fn send_data(
            &mut self,
            stream_id: u32,
            data: Bytes,
            end_stream: bool,
        ) -> Result<(), h2::Error> {
            self.push(Frame::Data {
                stream_id,
                data,
                end_stream,
            })
        }

        fn send_trailers(
            &mut self,
            stream_id: u32,
            trailers: http::HeaderMap,
        ) -> Result<(), h2::Error> {
            self.push(Frame::Trailers {
                stream_id,
                trailers,
            })
        }

        fn send_reset(&mut self, stream_id: u32, reason: h2::Reason) {
            let _ = self.push(Frame::Reset { stream_id, reason });
        }
    }
}
