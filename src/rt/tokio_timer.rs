//! 基于 tokio 的 [`Timer`] 实现。

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::{Duration, Instant},
};

use pin_project_lite::pin_project;

use super::{Sleep, Timer};

/// 使用 `tokio::time` 计时的 [`Timer`]。
///
/// 必须在 tokio 运行时内使用（并且运行时启用了 time 驱动）。
#[derive(Clone, Debug, Default)]
pub struct TokioTimer;

impl TokioTimer {
    /// 创建一个新的 `TokioTimer`。
    pub fn new() -> TokioTimer {
        TokioTimer
    }
}

impl Timer for TokioTimer {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Sleep>> {
        Box::pin(TokioSleep {
            inner: ::tokio::time::sleep(duration),
        })
    }

    fn sleep_until(&self, deadline: Instant) -> Pin<Box<dyn Sleep>> {
        Box::pin(TokioSleep {
            inner: ::tokio::time::sleep_until(deadline.into()),
        })
    }

    // tokio 的时钟可能被暂停（test-util），因此以它为准。
    fn now(&self) -> Instant {
        ::tokio::time::Instant::now().into_std()
    }
}

pin_project! {
    struct TokioSleep {
        #[pin]
        inner: ::tokio::time::Sleep,
    }
}

impl Future for TokioSleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.project().inner.poll(cx)
    }
}

impl Sleep for TokioSleep {}
