use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use http::Request;
use tokio::sync::oneshot;

use crate::body::RequestBody;
use crate::client::conn::{Event, EventSender};
use crate::client::dispatch::{Dispatch, Envelope, RequestOptions, ResponseSink};
use crate::SessionProtocol;

/// 会话与它的句柄之间共享的状态。
///
/// 这些字段可以从任意线程读取，但只有连接的执行上下文会写入 `protocol`。
pub(crate) struct Shared {
    pub(super) active: AtomicBool,
    pub(super) needs_fallback: AtomicBool,
    pub(super) unfinished: AtomicBool,
    pub(super) protocol: OnceLock<SessionProtocol>,
}

impl Shared {
    pub(super) fn new() -> Shared {
        Shared {
            active: AtomicBool::new(false),
            needs_fallback: AtomicBool::new(false),
            unfinished: AtomicBool::new(false),
            protocol: OnceLock::new(),
        }
    }
}

/// 一个已建立会话的句柄。
///
/// 可以被克隆并发送到任意线程。派发的请求会按调用顺序排进连接的事件队列，
/// 由连接的执行上下文依次处理。
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
    events: EventSender,
}

impl SessionHandle {
    pub(super) fn new(shared: Arc<Shared>, events: EventSender) -> SessionHandle {
        SessionHandle { shared, events }
    }

    /// 协商出的会话协议，协商完成之前为 `None`。
    pub fn protocol(&self) -> Option<SessionProtocol> {
        self.shared.protocol.get().copied()
    }

    /// 会话当前是否可以接收新的请求。
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    /// 是否还有请求在等待响应。
    ///
    /// 这是连接执行上下文最近一次处理完事件后的快照。
    pub fn has_unfinished_responses(&self) -> bool {
        self.shared.unfinished.load(Ordering::Acquire)
    }

    /// 让连接池不再把这个会话交给新的请求，已有的请求不受影响。
    pub fn deactivate(&self) {
        self.shared.active.store(false, Ordering::Release);
    }

    /// 标记 HTTP/2 升级失败：连接关闭后以 HTTP/1.1 明文重连，而不是让建立失败。
    pub fn mark_needs_fallback_retry(&self) {
        self.shared.needs_fallback.store(true, Ordering::Release);
    }

    /// 在这个会话上派发一个请求。
    ///
    /// 响应（或错误）会交付到 `sink`。返回的 future 给出派发结果：
    /// `false` 表示会话已经不能再承载新的请求，调用方应当另找一个连接。
    /// 即使返回 `false`，`sink` 也一定会收到一个结果。
    pub fn dispatch(
        &self,
        options: RequestOptions,
        request: Request<RequestBody>,
        sink: ResponseSink,
    ) -> Dispatched {
        let (accepted, rx) = oneshot::channel();
        let envelope = Envelope::new(Dispatch {
            options,
            request,
            sink,
            accepted,
        });
        // 连接已经结束时，信封随发送失败一起被丢弃，并在 drop 时通知调用方
        self.events.send(Event::Dispatch(envelope));
        Dispatched { rx }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("protocol", &self.protocol())
            .field("active", &self.is_active())
            .finish()
    }
}

/// [`SessionHandle::dispatch`] 返回的 future，给出请求是否被会话接受。
#[must_use = "futures do nothing unless polled"]
#[derive(Debug)]
pub struct Dispatched {
    rx: oneshot::Receiver<bool>,
}

impl Future for Dispatched {
    type Output = bool;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<bool> {
        Pin::new(&mut self.rx).poll(cx).map(|res| res.unwrap_or(false))
    }
}
