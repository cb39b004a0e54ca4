use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::{Config, Session, DEFAULT_NEGOTIATION_TIMEOUT, MAX_DISPATCHES};
use crate::client::conn::{Connection, EventSender};
use crate::client::promise::EstablishPromise;
use crate::client::transport::{Channel, Connect};
use crate::common::time::{Dur, Time};
use crate::rt::Timer;

/// 会话的配置构建器。
///
/// 配置好之后，每个新连接调用一次 [`connect`](Builder::connect)，得到投递事件的
/// [`EventSender`] 与驱动会话的 [`Connection`] future。
///
/// **注意**：协商超时需要定时器。默认超时在没有定时器时会被跳过；
/// 显式配置了超时却没有定时器，则会在 `connect` 时 panic。
#[derive(Clone)]
pub struct Builder {
    timer: Time,
    negotiation_timeout: Dur,
    max_dispatches: u32,
}

impl Builder {
    /// 使用默认配置创建构建器。
    pub fn new() -> Builder {
        Builder {
            timer: Time::Empty,
            negotiation_timeout: Dur::Default(Some(DEFAULT_NEGOTIATION_TIMEOUT)),
            max_dispatches: MAX_DISPATCHES,
        }
    }

    /// 设置用于协商超时和请求超时的定时器。
    pub fn timer<M>(&mut self, timer: M) -> &mut Builder
    where
        M: Timer + Send + Sync + 'static,
    {
        self.timer = Time::Timer(Arc::new(timer));
        self
    }

    /// 设置协议协商超时，`None` 表示不限制。
    ///
    /// 默认为 10 秒。
    pub fn negotiation_timeout(&mut self, timeout: impl Into<Option<Duration>>) -> &mut Builder {
        self.negotiation_timeout = Dur::Configured(timeout.into());
        self
    }

    /// 设置一个连接上最多派发的请求数，达到之后连接在所有响应结束后关闭。
    ///
    /// 默认且最大为 [`MAX_DISPATCHES`]。
    ///
    /// # Panics
    ///
    /// `max` 为 0 或超过 [`MAX_DISPATCHES`] 时 panic。
    pub fn max_dispatches(&mut self, max: u32) -> &mut Builder {
        assert!(
            max > 0 && max <= MAX_DISPATCHES,
            "max_dispatches must be in 1..={}",
            MAX_DISPATCHES
        );
        self.max_dispatches = max;
        self
    }

    /// 为一个刚打开的连接创建会话。
    ///
    /// `promise` 会在协商完成时以 [`SessionHandle`](super::SessionHandle) 完成，
    /// 或者以错误失败。`connector` 只在 HTTP/2 升级失败后的重连中使用。
    ///
    /// 返回的 `EventSender` 交给传输层，用来投递连接事件；
    /// 返回的 `Connection` 需要被 spawn 到执行器上。
    pub fn connect(
        &self,
        channel: Arc<dyn Channel>,
        connector: Arc<dyn Connect>,
        promise: EstablishPromise,
    ) -> (EventSender, Connection) {
        let negotiation_timeout = self
            .timer
            .check(self.negotiation_timeout, "negotiation_timeout");
        let (tx, rx) = mpsc::unbounded_channel();
        let events = EventSender::new(tx);

        trace!("session connecting to {}", channel.remote_addr());
        let session = Session::new(
            Config {
                time: self.timer.clone(),
                negotiation_timeout,
                max_dispatches: self.max_dispatches,
            },
            channel,
            connector,
            promise,
            events.downgrade(),
        );
        (events, Connection::new(session, rx))
    }
}

impl Default for Builder {
    fn default() -> Builder {
        Builder::new()
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("negotiation_timeout", &self.negotiation_timeout)
            .field("max_dispatches", &self.max_dispatches)
            .finish()
    }
}
