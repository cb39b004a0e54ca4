//! 每连接的会话状态机
//!
//! 一个 [`Session`] 从连接打开开始，经历协议协商，直到连接关闭：
//!
//! ```text
//! Negotiating ──resolved──▶ Established(protocol) ──closed──▶ Closed
//!      │                                                        ▲
//!      └──────────────failed / timeout / closed─────────────────┘
//! ```
//!
//! 协商完成时，会话根据协议选出一对编码器和响应跟踪器，并用一个
//! [`SessionHandle`] 完成建立 promise；之后调用者通过句柄派发请求。
//! 连接关闭时，所有未完成的响应以"会话已关闭"失败；如果之前收到过
//! HTTP/2 升级失败的信号，则改为以 HTTP/1.1 明文向同一地址重连，
//! 并把同一个建立 promise 交给新的连接尝试。
//!
//! `Session` 的所有方法都只在连接的执行上下文（[`Connection`](super::conn::Connection)
//! future）中被调用，因此可以直接使用 `&mut self`；跨线程可见的状态放在
//! [`Shared`] 中。

mod builder;
mod handle;

pub use self::builder::Builder;
pub use self::handle::{Dispatched, SessionHandle};
pub(crate) use self::handle::Shared;

use std::fmt;
#[allow(unused_imports)] // in the prelude since Rust 1.80; kept for MSRV 1.70
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use http::Request;

use super::conn::WeakEventSender;
use super::dispatch::{RequestOptions, ResponseSink};
use super::promise::EstablishPromise;
use super::responses::{Binding, PendingResponses, ResponsePart, ResponseTracker};
use super::transport::{Channel, Connect, Message};
use super::writer::{PendingWrite, RequestWriter, Unwritten};
use crate::body::RequestBody;
use crate::common::hex_dump;
use crate::common::time::Time;
use crate::proto::Encoder;
use crate::rt::Sleep;
use crate::SessionProtocol;

/// 一个连接上最多派发的请求数。
///
/// 达到这个数量后，连接会在所有响应结束后关闭。HTTP/2 的流 ID
/// `(seq << 1) - 1` 因此始终落在 31 位之内。
pub const MAX_DISPATCHES: u32 = 1 << 29;

/// 默认的协议协商超时。
pub const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) struct Session {
    shared: Arc<Shared>,
    events: WeakEventSender,
    channel: Arc<dyn Channel>,
    connector: Arc<dyn Connect>,
    promise: EstablishPromise,
    time: Time,
    // 协商超时，取消即 drop
    timeout: Option<Pin<Box<dyn Sleep>>>,
    // 当前为哪个响应超时时刻计时
    response_timer: Option<(Instant, Pin<Box<dyn Sleep>>)>,
    dispatched: u32,
    max_dispatches: u32,
    state: State,
    transport_closed: bool,
}

enum State {
    Negotiating,
    Established {
        writer: RequestWriter,
        tracker: Box<dyn ResponseTracker>,
    },
    Closed,
}

pub(crate) struct Config {
    pub(crate) time: Time,
    pub(crate) negotiation_timeout: Option<Duration>,
    pub(crate) max_dispatches: u32,
}

impl Session {
    pub(crate) fn new(
        config: Config,
        channel: Arc<dyn Channel>,
        connector: Arc<dyn Connect>,
        promise: EstablishPromise,
        events: WeakEventSender,
    ) -> Session {
        let timeout = config
            .negotiation_timeout
            .map(|dur| config.time.sleep(dur));
        let shared = Arc::new(Shared::new());
        shared.active.store(channel.is_open(), Ordering::Release);

        Session {
            shared,
            events,
            channel,
            connector,
            promise,
            time: config.time,
            timeout,
            response_timer: None,
            dispatched: 0,
            max_dispatches: config.max_dispatches,
            state: State::Negotiating,
            transport_closed: false,
        }
    }

    /// 协商出的协议，协商完成之前为 `None`。
    pub(crate) fn protocol(&self) -> Option<SessionProtocol> {
        self.shared.protocol.get().copied()
    }

    pub(crate) fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    pub(crate) fn has_unfinished_responses(&self) -> bool {
        match self.state {
            State::Established { ref tracker, .. } => tracker.has_outstanding(),
            _ => false,
        }
    }

    pub(crate) fn on_active(&mut self) {
        self.shared.active.store(true, Ordering::Release);
    }

    pub(crate) fn deactivate(&mut self) {
        self.shared.active.store(false, Ordering::Release);
    }

    pub(crate) fn mark_needs_fallback_retry(&mut self) {
        debug!("http2 upgrade failed, will retry with h1c after close");
        self.shared.needs_fallback.store(true, Ordering::Release);
    }

    fn cancel_timeout(&mut self) {
        if self.timeout.take().is_some() {
            trace!("negotiation timeout canceled");
        }
    }

    fn handle(&self) -> Option<SessionHandle> {
        self.events
            .upgrade()
            .map(|events| SessionHandle::new(self.shared.clone(), events))
    }

    /// 协议协商完成。
    pub(crate) fn on_protocol_resolved(&mut self, protocol: SessionProtocol) {
        if !matches!(self.state, State::Negotiating) {
            warn!(
                "ignoring session protocol {} resolved after negotiation",
                protocol
            );
            return;
        }
        self.cancel_timeout();

        let (encoder, binding) = match self.wire_protocol(protocol) {
            Ok(pair) => pair,
            Err(err) => return self.on_negotiation_failed(err),
        };
        let _ = self.shared.protocol.set(protocol);
        let multiplex = matches!(binding, Binding::Http2);
        self.state = State::Established {
            writer: RequestWriter::new(encoder, self.time.clone(), multiplex),
            tracker: Box::new(PendingResponses::new(binding, self.channel.clone())),
        };
        debug!("session established with {}", protocol);

        let settled = match self.handle() {
            Some(handle) => self.promise.try_success(handle),
            None => false,
        };
        if !settled {
            // 建立已经失败过（例如超时），或者等待方已经放弃
            debug!("session is no longer wanted, closing connection");
            self.channel.close();
        }
    }

    fn wire_protocol(
        &self,
        protocol: SessionProtocol,
    ) -> crate::Result<(Box<dyn Encoder>, Binding)> {
        match protocol {
            #[cfg(feature = "http1")]
            SessionProtocol::H1 | SessionProtocol::H1C => Ok((
                Box::new(crate::proto::h1::Http1Encoder::new(self.channel.wire())),
                Binding::Http1,
            )),
            #[cfg(feature = "http2")]
            SessionProtocol::H2 | SessionProtocol::H2C => match self.channel.http2() {
                Some(frames) => Ok((
                    Box::new(crate::proto::h2::Http2Encoder::new(frames)),
                    Binding::Http2,
                )),
                None => Err(crate::Error::negotiation(
                    "connection has no active http2 handler",
                )),
            },
            #[allow(unreachable_patterns)]
            other => Err(crate::Error::negotiation(format!(
                "session protocol {} is not enabled",
                other
            ))),
        }
    }

    /// 协议协商失败。
    pub(crate) fn on_negotiation_failed(&mut self, err: crate::Error) {
        self.cancel_timeout();
        debug!("session negotiation failed: {}", err);
        self.promise.try_failure(err);
        self.channel.close();
        self.enter_closed();
    }

    /// 协商超时。
    pub(crate) fn on_negotiation_timeout(&mut self) {
        self.timeout = None;
        debug!("session negotiation timed out, closing connection");
        self.promise
            .try_failure(crate::Error::new_negotiation_timeout());
        self.channel.close();
    }

    /// 派发一个请求。
    ///
    /// 会话已经建立时，请求被分配下一个序号、登记到响应跟踪器并排进写队列。
    /// 返回 `false` 表示会话不能再承载新的请求：协商尚未完成、会话已经关闭、
    /// 或者这个请求用掉了最后一个序号。除最后一种情况外，`sink` 会立即以
    /// "会话已关闭"失败。
    pub(crate) fn dispatch(
        &mut self,
        options: RequestOptions,
        request: Request<RequestBody>,
        sink: ResponseSink,
    ) -> bool {
        let (writer, tracker) = match self.state {
            State::Established {
                ref mut writer,
                ref mut tracker,
            } if self.dispatched < self.max_dispatches && !tracker.is_closing() => {
                (writer, tracker)
            }
            _ => {
                trace!("dispatch rejected, session is not usable");
                sink.send(Err(crate::Error::new_closed_session()));
                return false;
            }
        };

        self.dispatched += 1;
        let seq = self.dispatched;

        let deadline = match options.get_response_timeout() {
            Some(dur) if !self.time.is_empty() => Some(self.time.now() + dur),
            Some(_) => {
                debug!("response timeout ignored for seq={}, no timer set", seq);
                None
            }
            None => None,
        };
        let tracked = tracker.register(seq, sink, &options, deadline);
        writer.enqueue(PendingWrite {
            seq,
            tracked,
            request,
            write_timeout: options.get_write_timeout(),
        });
        trace!("dispatched seq={}", seq);

        if seq >= self.max_dispatches {
            debug!("reached {} dispatches, closing after drain", seq);
            tracker.close_after_drain();
            self.deactivate();
            return false;
        }
        true
    }

    /// 连接关闭。
    pub(crate) fn on_transport_closed(&mut self) {
        if self.transport_closed {
            return;
        }
        self.transport_closed = true;
        self.shared.active.store(false, Ordering::Release);
        self.cancel_timeout();
        self.response_timer = None;

        let state = std::mem::replace(&mut self.state, State::Closed);
        let mut tracker = match state {
            State::Established { writer, tracker } => {
                if !writer.is_idle() {
                    debug!("abandoning unwritten requests: {:?}", writer);
                }
                Some(tracker)
            }
            State::Negotiating | State::Closed => None,
        };

        if self.shared.needs_fallback.load(Ordering::Acquire) {
            debug_assert!(
                tracker.as_ref().map_or(true, |t| !t.has_outstanding()),
                "falling back with unfinished responses"
            );
            if let Some(ref mut tracker) = tracker {
                tracker.fail_all(crate::Error::new_closed_session);
            }
            let addr = self.channel.remote_addr();
            debug!("retrying {} with {}", addr, SessionProtocol::H1C);
            self.connector
                .connect(addr, SessionProtocol::H1C, self.promise.clone());
        } else {
            if let Some(ref mut tracker) = tracker {
                tracker.fail_all(crate::Error::new_closed_session);
            }
            // 连接在协商完成前就关闭时，建立在这里失败
            self.promise
                .try_failure(crate::Error::new_closed_session());
        }
        self.publish();
    }

    /// 处理一条入站的原始消息。
    ///
    /// 会话层只预期 HTTP/2 SETTINGS，其他消息都会导致连接被拆除。
    pub(crate) fn on_inbound(&mut self, msg: Message) -> crate::Result<()> {
        let type_info = match msg {
            Message::Http2Settings => {
                trace!("received http2 settings");
                return Ok(());
            }
            Message::Bytes(bytes) => format!(
                "{} bytes, hex dump: {}",
                bytes.len(),
                hex_dump(&bytes)
            ),
            Message::Other(other) => format!("{:?}", other),
        };

        let err = crate::Error::new_protocol_violation(format!(
            "unexpected message type: {}",
            type_info
        ));
        warn!("tearing down connection: {}", type_info);
        self.channel.close();
        Err(err)
    }

    /// 处理一个解码好的响应部分。
    pub(crate) fn on_response(
        &mut self,
        stream_id: Option<u32>,
        part: ResponsePart,
    ) -> crate::Result<()> {
        let res = match self.state {
            State::Established {
                ref mut tracker, ..
            } => tracker.on_response(stream_id, part),
            State::Negotiating => Err(crate::Error::new_protocol_violation(
                "received a response before negotiation",
            )),
            State::Closed => {
                trace!("discarding response part on closed session");
                Ok(())
            }
        };
        if let Err(ref err) = res {
            debug!("response protocol violation: {}", err);
            self.channel.close();
        }
        res
    }

    /// 处理传输层报告的错误。
    ///
    /// 关闭过程中常见的竞态错误被视为正常情况；其余错误会被返回。
    pub(crate) fn on_transport_error(&mut self, err: io::Error) -> Option<crate::Error> {
        let unexpected = !is_benign(&err);
        if unexpected {
            warn!(
                "unexpected transport error (protocol={:?}): {}",
                self.protocol(),
                err
            );
        } else {
            trace!("transport error while closing: {}", err);
        }
        if self.channel.is_open() {
            self.channel.close();
        }
        if unexpected {
            Some(crate::Error::new_io(err))
        } else {
            None
        }
    }

    /// 推进写队列。
    ///
    /// 响应跟踪器放弃的请求先停止写出；没有写出的请求再交回给跟踪器。
    pub(crate) fn poll_writes(&mut self, cx: &mut Context<'_>) {
        if let State::Established {
            ref mut writer,
            ref mut tracker,
        } = self.state
        {
            loop {
                for abandoned in tracker.take_abandoned() {
                    writer.abandon(abandoned.seq, abandoned.reset);
                }
                let polled = writer.poll_write(cx, &|tracked| tracker.is_canceled(tracked));
                match polled {
                    Poll::Ready(Some(Unwritten::Failed { tracked, error })) => {
                        tracker.fail(tracked, error)
                    }
                    Poll::Ready(Some(Unwritten::Canceled(tracked))) => tracker.forget(tracked),
                    Poll::Ready(None) | Poll::Pending => break,
                }
            }
            // 写失败可能让跟踪器放弃更多请求
            for abandoned in tracker.take_abandoned() {
                writer.abandon(abandoned.seq, abandoned.reset);
            }
        }
    }

    /// 推进协商超时和响应超时。
    pub(crate) fn poll_timers(&mut self, cx: &mut Context<'_>) {
        if let Some(ref mut timeout) = self.timeout {
            if timeout.as_mut().poll(cx).is_ready() {
                self.on_negotiation_timeout();
            }
        }

        let tracker = match self.state {
            State::Established {
                ref mut tracker, ..
            } => tracker,
            _ => return,
        };
        loop {
            let next = match tracker.next_deadline() {
                Some(next) => next,
                None => {
                    self.response_timer = None;
                    return;
                }
            };
            match self.response_timer {
                Some((at, _)) if at == next => {}
                Some((ref mut at, ref mut sleep)) => {
                    self.time.reset(sleep, next);
                    *at = next;
                }
                None => self.response_timer = Some((next, self.time.sleep_until(next))),
            }
            let ready = match self.response_timer {
                Some((_, ref mut sleep)) => sleep.as_mut().poll(cx).is_ready(),
                None => false,
            };
            if !ready {
                return;
            }
            self.response_timer = None;
            tracker.expire(self.time.now().max(next));
        }
    }

    /// 把未完成响应的状态同步给句柄。
    pub(crate) fn publish(&self) {
        if let State::Established { ref tracker, .. } = self.state {
            if tracker.is_closing() {
                self.shared.active.store(false, Ordering::Release);
            }
        }
        self.shared
            .unfinished
            .store(self.has_unfinished_responses(), Ordering::Release);
    }

    fn enter_closed(&mut self) {
        if let State::Established { mut tracker, .. } =
            std::mem::replace(&mut self.state, State::Closed)
        {
            tracker.fail_all(crate::Error::new_closed_session);
        }
        self.response_timer = None;
    }

    #[cfg(test)]
    pub(crate) fn dispatched(&self) -> u32 {
        self.dispatched
    }

    #[cfg(test)]
    pub(crate) fn has_negotiation_timeout(&self) -> bool {
        self.timeout.is_some()
    }
}

/// 关闭过程中传输层常见的、无需记录的错误。
fn is_benign(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            State::Negotiating => "Negotiating",
            State::Established { .. } => "Established",
            State::Closed => "Closed",
        };
        f.debug_struct("Session")
            .field("state", &state)
            .field("protocol", &self.protocol())
            .field("active", &self.is_active())
            .field("dispatched", &self.dispatched)
            .finish()
    }
}
