//! 会话层错误与结果类型模块
//!
//! 本模块定义了 crate 的核心错误类型 [`Error`]。会话层所有可能发生的错误
//! （协议协商失败、会话关闭、协议违规、传输层 I/O 错误、超时、请求体写入错误等）
//! 都被统一封装在 `Error` 类型中。
//!
//! ## 设计理念
//!
//! - **不透明错误**：`Error` 使用 `Box<ErrorImpl>` 包装内部实现，
//!   栈上只占一个指针宽度，同时隐藏内部结构。
//! - **错误链**：通过 `std::error::Error::source()` 暴露底层原因。
//! - **分类判断**：调用者通过 `is_*` 系列方法判断错误类别，
//!   内部的 `Kind` 枚举只在 crate 内可见。

use std::error::Error as StdError;
use std::fmt;

/// 会话层方法常用的 Result 类型别名。
pub type Result<T> = std::result::Result<T, Error>;

/// 类型擦除的错误原因。
type Cause = Box<dyn StdError + Send + Sync>;

/// 表示会话层处理过程中可能发生的错误。
///
/// # 格式化
///
/// `Display` 只打印当前层级的错误描述，不包含 source 链。
/// 要打印完整信息，请遍历 `Error::source()`。
///
/// 错误消息的具体措辞是未指定的，**不要依赖它**。
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<Cause>,
}

/// 错误的内部分类。
#[derive(Debug)]
pub(super) enum Kind {
    /// 无法与对端就会话协议达成一致（ALPN 不匹配、升级被拒绝、协商超时）。
    Negotiation,
    /// 会话已关闭（或尚未建立）。
    ClosedSession,
    /// 收到了不属于会话层的入站消息。
    ProtocolViolation,
    /// 操作被取消。
    Canceled,
    /// 底层传输的 I/O 错误。
    Io,
    /// 向连接写入请求时出错。
    BodyWrite,
    /// 响应体超过了调用者允许的最大长度。
    TooLarge,
    /// 在响应超时时间内没有收到完整的响应。
    ResponseTimeout,
    /// 在写超时时间内没有写完请求。
    WriteTimeout,
    /// 调用者侧的错误。
    User(User),
    /// HTTP/2 流被重置或连接级错误。
    #[cfg(feature = "http2")]
    Http2,
}

#[derive(Debug)]
pub(super) enum User {
    /// 调用者提供的请求体流返回了错误。
    Body,
    /// 连接任务在没有给出结果的情况下丢弃了回调。
    DispatchGone,
}

/// 哨兵类型，作为超时类错误的 cause，供 `Error::is_timeout` 识别。
#[derive(Debug)]
pub(super) struct TimedOut;

impl Error {
    /// 是否是协议协商失败。
    pub fn is_negotiation(&self) -> bool {
        matches!(self.inner.kind, Kind::Negotiation)
    }

    /// 是否是"会话已关闭"错误。
    ///
    /// 连接关闭时所有未完成的响应、以及在协商完成前调用 dispatch 的调用者，
    /// 都会收到这一类错误。
    pub fn is_closed(&self) -> bool {
        matches!(self.inner.kind, Kind::ClosedSession)
    }

    /// 是否是协议违规（收到了会话层不认识的入站消息）。
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self.inner.kind, Kind::ProtocolViolation)
    }

    /// 是否是取消错误。
    pub fn is_canceled(&self) -> bool {
        matches!(self.inner.kind, Kind::Canceled)
    }

    /// 是否来自底层传输的 I/O 错误。
    pub fn is_io(&self) -> bool {
        matches!(self.inner.kind, Kind::Io)
    }

    /// 是否是写请求（头部或请求体）时发生的错误。
    pub fn is_body_write(&self) -> bool {
        matches!(self.inner.kind, Kind::BodyWrite | Kind::WriteTimeout)
    }

    /// 是否是调用者侧的错误（请求体流出错、调度任务消失）。
    pub fn is_user(&self) -> bool {
        matches!(self.inner.kind, Kind::User(_))
    }

    /// 响应体是否超过了允许的最大长度。
    pub fn is_too_large(&self) -> bool {
        matches!(self.inner.kind, Kind::TooLarge)
    }

    /// 是否由超时引起（协商超时、写超时或响应超时）。
    pub fn is_timeout(&self) -> bool {
        if matches!(self.inner.kind, Kind::ResponseTimeout | Kind::WriteTimeout) {
            return true;
        }
        self.find_source::<TimedOut>().is_some()
    }

    /// 构造一个协议协商失败错误。
    ///
    /// 负责 ALPN 或 HTTP/2 升级的外部组件用它来生成
    /// [`Event::NegotiationFailed`](crate::client::conn::Event::NegotiationFailed) 事件。
    pub fn negotiation<C: Into<Cause>>(cause: C) -> Error {
        Error::new(Kind::Negotiation).with(cause)
    }

    pub(super) fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(ErrorImpl { kind, cause: None }),
        }
    }

    pub(super) fn with<C: Into<Cause>>(mut self, cause: C) -> Error {
        self.inner.cause = Some(cause.into());
        self
    }

    /// 沿 source 链查找指定类型的错误原因。
    pub(crate) fn find_source<E: StdError + 'static>(&self) -> Option<&E> {
        let mut cause = self.source();
        while let Some(err) = cause {
            if let Some(typed) = err.downcast_ref() {
                return Some(typed);
            }
            cause = err.source();
        }

        None
    }

    /// 取出链上携带的 HTTP/2 错误码，找不到时返回 `INTERNAL_ERROR`。
    #[cfg(feature = "http2")]
    pub fn h2_reason(&self) -> h2::Reason {
        self.find_source::<h2::Error>()
            .and_then(|h2_err| h2_err.reason())
            .unwrap_or(h2::Reason::INTERNAL_ERROR)
    }

    pub(super) fn new_negotiation_timeout() -> Error {
        Error::new(Kind::Negotiation).with(TimedOut)
    }

    pub(super) fn new_closed_session() -> Error {
        Error::new(Kind::ClosedSession)
    }

    pub(super) fn new_protocol_violation<C: Into<Cause>>(cause: C) -> Error {
        Error::new(Kind::ProtocolViolation).with(cause)
    }

    pub(super) fn new_canceled() -> Error {
        Error::new(Kind::Canceled)
    }

    pub(super) fn new_io(cause: std::io::Error) -> Error {
        Error::new(Kind::Io).with(cause)
    }

    pub(super) fn new_body_write<E: Into<Cause>>(cause: E) -> Error {
        Error::new(Kind::BodyWrite).with(cause)
    }

    pub(super) fn new_too_large() -> Error {
        Error::new(Kind::TooLarge)
    }

    pub(super) fn new_response_timeout() -> Error {
        Error::new(Kind::ResponseTimeout).with(TimedOut)
    }

    pub(super) fn new_write_timeout() -> Error {
        Error::new(Kind::WriteTimeout).with(TimedOut)
    }

    fn new_user(user: User) -> Error {
        Error::new(Kind::User(user))
    }

    pub(super) fn new_user_body<E: Into<Cause>>(cause: E) -> Error {
        Error::new_user(User::Body).with(cause)
    }

    pub(super) fn new_user_dispatch_gone() -> Error {
        Error::new_user(User::DispatchGone)
    }

    #[cfg(feature = "http2")]
    pub(super) fn new_h2(cause: ::h2::Error) -> Error {
        if !cause.is_io() {
            return Error::new(Kind::Http2).with(cause);
        }
        match cause.into_io() {
            Some(io) => Error::new_io(io),
            None => Error::new(Kind::Http2),
        }
    }

    fn description(&self) -> &str {
        match self.inner.kind {
            Kind::Negotiation => "session protocol negotiation failed",
            Kind::ClosedSession => "session closed",
            Kind::ProtocolViolation => "received unexpected message from connection",
            Kind::Canceled => "operation was canceled",
            Kind::Io => "connection error",
            Kind::BodyWrite => "error writing a request to connection",
            Kind::TooLarge => "response content exceeds the maximum length",
            Kind::ResponseTimeout => "response timed out",
            Kind::WriteTimeout => "request write timed out",
            Kind::User(User::Body) => "error from user's Body stream",
            Kind::User(User::DispatchGone) => "dispatch task is gone",
            #[cfg(feature = "http2")]
            Kind::Http2 => "http2 error",
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("hyper_session::Error");
        f.field(&self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            f.field(cause);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_ref()
            .map(|cause| &**cause as &(dyn StdError + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::new_io(err)
    }
}

impl fmt::Display for TimedOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("operation timed out")
    }
}

impl StdError for TimedOut {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    fn assert_send_sync<T: Send + Sync + 'static>() {}

    #[test]
    fn error_satisfies_send_sync() {
        assert_send_sync::<Error>()
    }

    #[test]
    fn error_size_of() {
        assert_eq!(mem::size_of::<Error>(), mem::size_of::<usize>());
    }

    #[test]
    fn negotiation_timeout_is_timeout() {
        let err = Error::new_negotiation_timeout();
        assert!(err.is_negotiation());
        assert!(err.is_timeout());
        assert!(!err.is_closed());
    }

    #[test]
    fn negotiation_keeps_cause() {
        let err = Error::negotiation("alpn mismatch");
        assert!(err.is_negotiation());
        assert!(!err.is_timeout());
        assert_eq!(err.source().map(|e| e.to_string()), Some("alpn mismatch".into()));
    }

    #[test]
    fn write_timeout_is_body_write() {
        let err = Error::new_write_timeout();
        assert!(err.is_body_write());
        assert!(err.is_timeout());
    }

    #[test]
    fn io_error_converts() {
        let err: Error = std::io::Error::from(std::io::ErrorKind::BrokenPipe).into();
        assert!(err.is_io());
        assert!(err.find_source::<std::io::Error>().is_some());
    }

    #[cfg(feature = "http2")]
    #[test]
    fn h2_reason_unknown() {
        let closed = Error::new_closed_session();
        assert_eq!(closed.h2_reason(), h2::Reason::INTERNAL_ERROR);
    }

    #[cfg(feature = "http2")]
    #[test]
    fn h2_reason_one_level() {
        let reset = Error::new_h2(h2::Error::from(h2::Reason::REFUSED_STREAM));
        assert_eq!(reset.h2_reason(), h2::Reason::REFUSED_STREAM);
    }

    #[cfg(feature = "http2")]
    #[test]
    fn h2_reason_nested() {
        let recvd = Error::new_h2(h2::Error::from(h2::Reason::HTTP_1_1_REQUIRED));
        let body_err = Error::new_user_body(recvd);
        assert_eq!(body_err.h2_reason(), h2::Reason::HTTP_1_1_REQUIRED);
    }
}
