//! 请求派发相关的类型：调用选项、响应回调与派发信封
//!
//! - [`RequestOptions`]：调用方为单个请求给出的写超时、响应超时和最大响应长度；
//! - [`ResponseSink`] / [`ResponseFuture`]：基于 `oneshot` 的响应回调。
//!   响应跟踪器通过 sink 交付完整的响应或错误，调用方 await future；
//! - `Envelope`：从任意线程投递到连接执行上下文的一次派发。
//!
//! sink 和信封都保证调用方不会永远挂起：
//! 在没有给出结果的情况下被 drop 时，会自动交付一个错误。

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_core::ready;
use http::{Request, Response};
use tokio::sync::oneshot;

use crate::body::RequestBody;

/// 默认最大响应长度（10 MiB）。
pub const DEFAULT_MAX_RESPONSE_LENGTH: u64 = 10 * 1024 * 1024;

/// 单次请求的调用选项。
///
/// 这些值在派发时交给请求写入器（写超时）和响应跟踪器（响应超时、最大长度）。
/// 超时需要会话配置了定时器才会生效。
#[derive(Clone, Debug)]
pub struct RequestOptions {
    write_timeout: Option<Duration>,
    response_timeout: Option<Duration>,
    max_response_length: u64,
}

impl RequestOptions {
    /// 没有超时、最大响应长度为 [`DEFAULT_MAX_RESPONSE_LENGTH`] 的选项。
    pub fn new() -> RequestOptions {
        RequestOptions {
            write_timeout: None,
            response_timeout: None,
            max_response_length: DEFAULT_MAX_RESPONSE_LENGTH,
        }
    }

    /// 设置写完整个请求（头部、请求体和 trailers）的最长时间。
    pub fn write_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.write_timeout = timeout.into();
        self
    }

    /// 设置从派发开始到收到完整响应的最长时间。
    pub fn response_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.response_timeout = timeout.into();
        self
    }

    /// 设置允许的最大响应体长度，`0` 表示不限制。
    pub fn max_response_length(mut self, max: u64) -> Self {
        self.max_response_length = max;
        self
    }

    pub(crate) fn get_write_timeout(&self) -> Option<Duration> {
        self.write_timeout
    }

    pub(crate) fn get_response_timeout(&self) -> Option<Duration> {
        self.response_timeout
    }

    pub(crate) fn get_max_response_length(&self) -> u64 {
        self.max_response_length
    }
}

impl Default for RequestOptions {
    fn default() -> RequestOptions {
        RequestOptions::new()
    }
}

/// 创建一对响应回调（sink）与等待响应的 future。
pub fn response_channel() -> (ResponseSink, ResponseFuture) {
    let (tx, rx) = oneshot::channel();
    (ResponseSink { tx: Some(tx) }, ResponseFuture { rx })
}

/// 响应回调：响应跟踪器通过它交付一次结果。
///
/// 内部使用 `Option` 包装，是为了在 drop 时能 `take()` 出来发送错误。
pub struct ResponseSink {
    tx: Option<oneshot::Sender<crate::Result<Response<Bytes>>>>,
}

impl ResponseSink {
    /// 调用方是否已经放弃等待（drop 了 [`ResponseFuture`]）。
    pub fn is_canceled(&self) -> bool {
        match self.tx {
            Some(ref tx) => tx.is_closed(),
            None => true,
        }
    }

    /// 交付结果，消费 sink。
    pub(crate) fn send(mut self, val: crate::Result<Response<Bytes>>) {
        if let Some(tx) = self.tx.take() {
            // 调用方可能已经放弃等待
            let _ = tx.send(val);
        }
    }
}

impl Drop for ResponseSink {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(dispatch_gone()));
        }
    }
}

impl std::fmt::Debug for ResponseSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseSink").finish()
    }
}

#[cold]
fn dispatch_gone() -> crate::Error {
    crate::Error::new_user_dispatch_gone().with(if std::thread::panicking() {
        "user code panicked"
    } else {
        "response dropped without a result"
    })
}

/// 等待响应的 future。
#[must_use = "futures do nothing unless polled"]
#[derive(Debug)]
pub struct ResponseFuture {
    rx: oneshot::Receiver<crate::Result<Response<Bytes>>>,
}

impl Future for ResponseFuture {
    type Output = crate::Result<Response<Bytes>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match ready!(Pin::new(&mut self.rx).poll(cx)) {
            Ok(res) => Poll::Ready(res),
            // ResponseSink 的 Drop 总会先发送错误，这里只是兜底
            Err(_) => Poll::Ready(Err(dispatch_gone())),
        }
    }
}

/// 一次跨线程派发：调用选项、请求、响应回调，外加一个回报"会话是否仍可用"的通道。
///
/// 只能通过 [`SessionHandle::dispatch`](crate::client::SessionHandle::dispatch) 创建。
pub struct Envelope(Option<Dispatch>);

pub(crate) struct Dispatch {
    pub(crate) options: RequestOptions,
    pub(crate) request: Request<RequestBody>,
    pub(crate) sink: ResponseSink,
    pub(crate) accepted: oneshot::Sender<bool>,
}

impl Envelope {
    pub(crate) fn new(dispatch: Dispatch) -> Envelope {
        Envelope(Some(dispatch))
    }

    pub(crate) fn take(mut self) -> Option<Dispatch> {
        self.0.take()
    }
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut d = f.debug_struct("Envelope");
        if let Some(ref dispatch) = self.0 {
            d.field("method", dispatch.request.method())
                .field("uri", dispatch.request.uri());
        }
        d.finish()
    }
}

/// 信封在没有被执行上下文处理的情况下被丢弃（例如连接任务已经结束），
/// 说明会话已经关闭：通知调用方。
impl Drop for Envelope {
    fn drop(&mut self) {
        if let Some(dispatch) = self.0.take() {
            dispatch.sink.send(Err(crate::Error::new_closed_session()));
            let _ = dispatch.accepted.send(false);
        }
    }
}
