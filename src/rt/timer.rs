//! 定时器 trait 模块
//!
//! 会话层自身只有一个内在的超时：协议协商超时。除此之外，
//! 每个请求的写超时和响应超时也通过同一套抽象来计时。
//! 这些 trait 使计时独立于具体的异步运行时实现：
//!
//! - [`Timer`]：创建定时 Future 的能力
//! - [`Sleep`]：由定时器返回的 Future，在指定时间后完成
//!
//! 取消一个定时器就是 drop 对应的 [`Sleep`]；被 drop 的 `Sleep` 不会再产生任何效果。
//! crate 自带了一个基于 tokio 的实现 [`TokioTimer`](super::TokioTimer)。

use std::{
    future::Future,
    pin::Pin,
    time::{Duration, Instant},
};

/// 定时器：创建在指定时间后完成的 [`Sleep`]。
pub trait Timer {
    /// 返回一个在 `duration` 之后完成的 future。
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Sleep>>;

    /// 返回一个在 `deadline` 时刻完成的 future。
    fn sleep_until(&self, deadline: Instant) -> Pin<Box<dyn Sleep>>;

    /// 返回当前时间。
    ///
    /// 默认实现返回 `Instant::now()`，测试用的定时器可以覆盖它来控制时间。
    fn now(&self) -> Instant {
        Instant::now()
    }

    /// 将 `sleep` 重置为在 `new_deadline` 时完成。
    fn reset(&self, sleep: &mut Pin<Box<dyn Sleep>>, new_deadline: Instant) {
        *sleep = self.sleep_until(new_deadline);
    }
}

/// 由 [`Timer`] 返回的 future。
pub trait Sleep: Send + Sync + Future<Output = ()> {}
