//! 连接的执行上下文
//!
//! 传输层、协商组件和会话句柄都不直接修改会话，而是向连接的事件队列投递 [`Event`]。
//! [`Connection`] future 是会话唯一的执行上下文：每次被 poll 时，它按顺序处理队列中的事件，
//! 然后推进协商超时、响应超时和请求写入。
//!
//! 收到 [`Event::Closed`]，或者所有 [`EventSender`] 都被丢弃之后，`Connection` 结束。
//! 它的输出是导致连接拆除的第一个意外错误（协议违规或传输错误），正常关闭时为 `Ok(())`。

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::mpsc;

use super::dispatch::Envelope;
use super::responses::ResponsePart;
use super::session::Session;
use super::transport::Message;
use crate::SessionProtocol;

// 一次 poll 最多处理的事件数，之后让出执行器
const MAX_EVENTS_PER_POLL: usize = 16;

/// 投递给连接执行上下文的事件。
pub enum Event {
    /// 底层传输已经打开。
    Active,
    /// 协议协商完成。
    Negotiated(SessionProtocol),
    /// 协议协商失败，应当使用 [`Error::negotiation`](crate::Error::negotiation) 构造。
    NegotiationFailed(crate::Error),
    /// 来自 [`SessionHandle::dispatch`](super::SessionHandle::dispatch) 的一次派发。
    Dispatch(Envelope),
    /// 解码器解析出的一个响应部分。HTTP/2 带流 ID，HTTP/1 为 `None`。
    Response {
        /// HTTP/2 流 ID
        stream_id: Option<u32>,
        /// 响应部分
        part: ResponsePart,
    },
    /// 没有被任何解码器消费的入站消息。
    Inbound(Message),
    /// HTTP/2 升级被拒绝，连接关闭后应当以 HTTP/1.1 明文重连。
    UpgradeFailed,
    /// 传输层错误。
    Error(io::Error),
    /// 底层传输已经关闭。
    Closed,
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Active => f.write_str("Active"),
            Event::Negotiated(protocol) => f.debug_tuple("Negotiated").field(protocol).finish(),
            Event::NegotiationFailed(err) => {
                f.debug_tuple("NegotiationFailed").field(err).finish()
            }
            Event::Dispatch(envelope) => f.debug_tuple("Dispatch").field(envelope).finish(),
            Event::Response { stream_id, part } => f
                .debug_struct("Response")
                .field("stream_id", stream_id)
                .field("part", part)
                .finish(),
            Event::Inbound(msg) => f.debug_tuple("Inbound").field(msg).finish(),
            Event::UpgradeFailed => f.write_str("UpgradeFailed"),
            Event::Error(err) => f.debug_tuple("Error").field(err).finish(),
            Event::Closed => f.write_str("Closed"),
        }
    }
}

/// 向连接投递事件的发送端，可以被克隆并发送到任意线程。
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSender {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Event>) -> EventSender {
        EventSender { tx }
    }

    /// 投递一个事件。返回 `false` 表示连接已经结束，事件被丢弃。
    pub fn send(&self, event: Event) -> bool {
        match self.tx.send(event) {
            Ok(()) => true,
            Err(_dropped) => {
                trace!("connection is gone, dropping {:?}", _dropped.0);
                false
            }
        }
    }

    /// 连接是否已经结束。
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub(crate) fn downgrade(&self) -> WeakEventSender {
        WeakEventSender {
            tx: self.tx.downgrade(),
        }
    }
}

impl fmt::Debug for EventSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSender").finish()
    }
}

/// 不会让事件队列保持打开的发送端，会话自己持有它来创建句柄。
pub(crate) struct WeakEventSender {
    tx: mpsc::WeakUnboundedSender<Event>,
}

impl WeakEventSender {
    pub(crate) fn upgrade(&self) -> Option<EventSender> {
        self.tx.upgrade().map(EventSender::new)
    }
}

/// 驱动一个会话的 future。
///
/// 需要被 spawn 到执行器上；它结束时会话已经关闭。
#[must_use = "futures do nothing unless polled"]
pub struct Connection {
    session: Session,
    events: mpsc::UnboundedReceiver<Event>,
    error: Option<crate::Error>,
    done: bool,
}

impl Connection {
    pub(crate) fn new(session: Session, events: mpsc::UnboundedReceiver<Event>) -> Connection {
        Connection {
            session,
            events,
            error: None,
            done: false,
        }
    }

    /// 处理一个事件，返回连接是否已经关闭。
    fn on_event(&mut self, event: Event) -> bool {
        let _span = trace_span!("session_event");
        match event {
            Event::Active => self.session.on_active(),
            Event::Negotiated(protocol) => self.session.on_protocol_resolved(protocol),
            Event::NegotiationFailed(err) => self.session.on_negotiation_failed(err),
            Event::Dispatch(envelope) => {
                if let Some(dispatch) = envelope.take() {
                    let accepted =
                        self.session
                            .dispatch(dispatch.options, dispatch.request, dispatch.sink);
                    // 调用方可能没有等待派发结果
                    let _ = dispatch.accepted.send(accepted);
                }
            }
            Event::Response { stream_id, part } => {
                if let Err(err) = self.session.on_response(stream_id, part) {
                    self.record(err);
                }
            }
            Event::Inbound(msg) => {
                if let Err(err) = self.session.on_inbound(msg) {
                    self.record(err);
                }
            }
            Event::UpgradeFailed => self.session.mark_needs_fallback_retry(),
            Event::Error(err) => {
                if let Some(err) = self.session.on_transport_error(err) {
                    self.record(err);
                }
            }
            Event::Closed => {
                self.session.on_transport_closed();
                return true;
            }
        }
        false
    }

    fn record(&mut self, err: crate::Error) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn finish(&mut self) -> Poll<crate::Result<()>> {
        self.done = true;
        // 剩下的事件（例如排队中的派发）随接收端一起被丢弃
        self.events.close();
        while let Ok(event) = self.events.try_recv() {
            drop(event);
        }
        match self.error.take() {
            Some(err) => Poll::Ready(Err(err)),
            None => Poll::Ready(Ok(())),
        }
    }

    #[cfg(test)]
    pub(crate) fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }
}

impl Future for Connection {
    type Output = crate::Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(Ok(()));
        }

        let mut drained = false;
        for _ in 0..MAX_EVENTS_PER_POLL {
            match this.events.poll_recv(cx) {
                Poll::Ready(Some(event)) => {
                    if this.on_event(event) {
                        return this.finish();
                    }
                }
                Poll::Ready(None) => {
                    debug!("all event senders dropped, treating as closed");
                    this.session.on_transport_closed();
                    return this.finish();
                }
                Poll::Pending => {
                    drained = true;
                    break;
                }
            }
        }
        if !drained {
            // 可能还有事件没处理完，让出执行器后再继续
            cx.waker().wake_by_ref();
        }

        this.session.poll_timers(cx);
        this.session.poll_writes(cx);
        this.session.publish();
        Poll::Pending
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("session", &self.session)
            .finish()
    }
}
