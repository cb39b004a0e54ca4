//! 会话建立结果的一次性 promise
//!
//! 一个连接尝试的结果（成功得到 [`SessionHandle`]，或者失败得到错误）
//! 只能被写入一次，但可能有多条路径同时争抢写入：协商完成、协商失败、
//! 协商超时、连接提前关闭。这里用原子的 compare-and-set 守住唯一一次写入，
//! 失败的一方静默返回 `false`，从不 panic。
//!
//! 回退重连时，同一个 [`EstablishPromise`] 会被交给新的连接尝试，
//! 因此它可以被克隆，并在多个会话之间共享。

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures_core::ready;
use tokio::sync::oneshot;

use super::session::SessionHandle;

type Outcome = crate::Result<SessionHandle>;

/// 创建一对建立 promise（写入端）与 [`Establishing`]（等待端）。
pub fn establish() -> (EstablishPromise, Establishing) {
    let (tx, rx) = oneshot::channel();
    let promise = EstablishPromise {
        inner: Arc::new(Inner {
            settled: AtomicBool::new(false),
            tx: Mutex::new(Some(tx)),
        }),
    };
    (promise, Establishing { rx })
}

/// 会话建立结果的写入端。
///
/// 所有 `try_*` 方法都容忍"已经写入过"，此时返回 `false`。
#[derive(Clone)]
pub struct EstablishPromise {
    inner: Arc<Inner>,
}

struct Inner {
    settled: AtomicBool,
    tx: Mutex<Option<oneshot::Sender<Outcome>>>,
}

impl EstablishPromise {
    /// 以成功结果写入 promise。
    ///
    /// 返回 `false` 表示结果已经被写入过，或者等待方已经放弃等待；
    /// 调用者此时应当拆除这个刚刚就绪、却已经没有人需要的连接。
    pub fn try_success(&self, handle: SessionHandle) -> bool {
        self.try_settle(Ok(handle))
    }

    /// 以失败结果写入 promise。
    pub fn try_failure(&self, err: crate::Error) -> bool {
        self.try_settle(Err(err))
    }

    /// 结果是否已经被写入。
    pub fn is_settled(&self) -> bool {
        self.inner.settled.load(Ordering::Acquire)
    }

    /// 两个 promise 是否指向同一个结果槽。
    pub fn same_promise(&self, other: &EstablishPromise) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn try_settle(&self, outcome: Outcome) -> bool {
        if self
            .inner
            .settled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            trace!("establish promise already settled");
            return false;
        }

        // 只有赢得 CAS 的一方会走到这里，锁只用于把 Sender 取出来。
        let tx = self
            .inner
            .tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match tx {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }
}

impl std::fmt::Debug for EstablishPromise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EstablishPromise")
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// 等待会话建立结果的 future。
///
/// drop 它即表示放弃等待：之后才就绪的连接会被直接关闭。
#[must_use = "futures do nothing unless polled"]
#[derive(Debug)]
pub struct Establishing {
    rx: oneshot::Receiver<Outcome>,
}

impl Future for Establishing {
    type Output = crate::Result<SessionHandle>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match ready!(Pin::new(&mut self.rx).poll(cx)) {
            Ok(outcome) => Poll::Ready(outcome),
            // 所有写入端都在没有给出结果的情况下被丢弃了
            Err(_) => Poll::Ready(Err(
                crate::Error::new_canceled().with("session promise dropped")
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::establish;

    #[tokio::test]
    async fn settles_exactly_once() {
        let (promise, establishing) = establish();
        let racer = promise.clone();

        assert!(promise.try_failure(crate::Error::new_negotiation_timeout()));
        assert!(!racer.try_failure(crate::Error::new_closed_session()));
        assert!(racer.is_settled());

        let err = establishing.await.expect_err("failed");
        assert!(err.is_negotiation());
        assert!(err.is_timeout());
    }

    #[test]
    fn racing_threads_settle_once() {
        let (promise, _establishing) = establish();
        let winners: usize = (0..8)
            .map(|_| {
                let promise = promise.clone();
                std::thread::spawn(move || {
                    promise.try_failure(crate::Error::new_closed_session()) as usize
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|t| t.join().expect("thread"))
            .sum();
        assert_eq!(winners, 1);
    }

    #[test]
    fn dropped_waiter_reports_unsettled_delivery() {
        let (promise, establishing) = establish();
        drop(establishing);
        assert!(!promise.try_failure(crate::Error::new_closed_session()));
        assert!(promise.is_settled());
    }

    #[tokio::test]
    async fn dropped_promise_cancels_waiter() {
        let (promise, establishing) = establish();
        drop(promise);
        let err = establishing.await.expect_err("canceled");
        assert!(err.is_canceled());
    }

    #[test]
    fn clones_share_the_slot() {
        let (a, _rx) = establish();
        let (b, _rx2) = establish();
        assert!(a.same_promise(&a.clone()));
        assert!(!a.same_promise(&b));
    }
}
