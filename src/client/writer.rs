//! 请求写入器
//!
//! 把被接受的请求按派发顺序写到编码器上。写入完全在连接的执行上下文中进行：
//! 连接 future 每次被 poll 都会推进 [`RequestWriter::poll_write`]，
//! 后者写出头部、每个请求体数据帧、trailers 和结束标记，
//! 请求体尚未就绪时返回 `Pending`，由请求体负责在就绪时唤醒任务。
//!
//! HTTP/1 的请求必须整个写完才能开始下一个；HTTP/2 的请求按派发顺序写出头部，
//! 之后各个流的请求体互不等待，帧在连接上交错。
//!
//! 没有写出的请求会被交回给调用方（会话），由响应跟踪器结束对应的响应。

use std::collections::VecDeque;
use std::fmt;
#[allow(unused_imports)] // in the prelude since Rust 1.80; kept for MSRV 1.70
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_core::ready;
use http::Request;
use http_body::Body;

use super::responses::Tracked;
use crate::body::RequestBody;
use crate::common::time::Time;
use crate::proto::Encoder;
use crate::rt::Sleep;

/// 一个排队等待写出的请求。
pub(crate) struct PendingWrite {
    pub(crate) seq: u32,
    pub(crate) tracked: Tracked,
    pub(crate) request: Request<RequestBody>,
    pub(crate) write_timeout: Option<Duration>,
}

/// 一个没有完整写出的请求。
#[derive(Debug)]
pub(crate) enum Unwritten {
    /// 写失败，流已经被重置。
    Failed {
        tracked: Tracked,
        error: crate::Error,
    },
    /// 调用者在头部写出之前就放弃了，请求被跳过。
    Canceled(Tracked),
}

/// 正在写请求体的请求。
struct InFlight {
    seq: u32,
    tracked: Tracked,
    body: RequestBody,
    timeout: Option<Pin<Box<dyn Sleep>>>,
}

pub(crate) struct RequestWriter {
    encoder: Box<dyn Encoder>,
    queue: VecDeque<PendingWrite>,
    // 按头部写出的顺序排列；HTTP/1 最多只有一个
    active: Vec<InFlight>,
    multiplex: bool,
    time: Time,
}

impl RequestWriter {
    pub(crate) fn new(encoder: Box<dyn Encoder>, time: Time, multiplex: bool) -> RequestWriter {
        RequestWriter {
            encoder,
            queue: VecDeque::new(),
            active: Vec::new(),
            multiplex,
            time,
        }
    }

    pub(crate) fn enqueue(&mut self, write: PendingWrite) {
        self.queue.push_back(write);
    }

    /// 是否所有请求都已写完。
    pub(crate) fn is_idle(&self) -> bool {
        self.active.is_empty() && self.queue.is_empty()
    }

    /// 停止写出一个请求。
    ///
    /// 还在排队的请求直接丢弃；头部已经写出的请求停止写请求体，
    /// `reset` 为 `true` 时同时重置这个流。
    pub(crate) fn abandon(&mut self, seq: u32, reset: bool) {
        if let Some(pos) = self.queue.iter().position(|w| w.seq == seq) {
            trace!("dropping queued request seq={}", seq);
            self.queue.remove(pos);
            return;
        }
        if let Some(pos) = self.active.iter().position(|w| w.seq == seq) {
            trace!("abandoning request body seq={}", seq);
            self.active.remove(pos);
        }
        if reset {
            self.encoder.write_reset(seq);
        }
    }

    /// 推进写入。
    ///
    /// - `Ready(Some(unwritten))`：一个请求没有写出，调用方应当继续 poll；
    /// - `Ready(None)`：队列已经写空；
    /// - `Pending`：正在等待请求体或写超时。
    ///
    /// `is_canceled` 在写出头部之前检查调用者是否还在等待。
    pub(crate) fn poll_write(
        &mut self,
        cx: &mut Context<'_>,
        is_canceled: &dyn Fn(Tracked) -> bool,
    ) -> Poll<Option<Unwritten>> {
        loop {
            while !self.queue.is_empty() && (self.multiplex || self.active.is_empty()) {
                let next = match self.queue.pop_front() {
                    Some(next) => next,
                    None => break,
                };
                if is_canceled(next.tracked) {
                    trace!("skipping canceled request seq={}", next.seq);
                    return Poll::Ready(Some(Unwritten::Canceled(next.tracked)));
                }
                if let Some(unwritten) = self.start(next) {
                    return Poll::Ready(Some(unwritten));
                }
            }
            if self.active.is_empty() {
                return Poll::Ready(None);
            }

            let mut finished = false;
            let mut i = 0;
            while i < self.active.len() {
                match poll_body(&mut *self.encoder, &mut self.active[i], cx) {
                    Poll::Pending => i += 1,
                    Poll::Ready(res) => {
                        self.active.remove(i);
                        finished = true;
                        if let Err(unwritten) = res {
                            return Poll::Ready(Some(unwritten));
                        }
                    }
                }
            }
            if !finished {
                return Poll::Pending;
            }
            // 有请求写完了，HTTP/1 可以开始下一个
        }
    }

    fn start(&mut self, write: PendingWrite) -> Option<Unwritten> {
        let PendingWrite {
            seq,
            tracked,
            request,
            write_timeout,
        } = write;
        let (head, body) = request.into_parts();
        let end_stream = body.is_end_stream();

        if let Err(error) = self.encoder.write_headers(seq, head, end_stream) {
            self.encoder.write_reset(seq);
            return Some(Unwritten::Failed { tracked, error });
        }
        if end_stream {
            trace!("request seq={} written", seq);
            return None;
        }

        let timeout = match write_timeout {
            Some(dur) if !self.time.is_empty() => Some(self.time.sleep(dur)),
            Some(_) => {
                debug!("write timeout ignored for seq={}, no timer set", seq);
                None
            }
            None => None,
        };
        self.active.push(InFlight {
            seq,
            tracked,
            body,
            timeout,
        });
        None
    }
}

/// 推进一个请求的请求体，请求写完或失败时返回 `Ready`。
fn poll_body(
    encoder: &mut dyn Encoder,
    inflight: &mut InFlight,
    cx: &mut Context<'_>,
) -> Poll<Result<(), Unwritten>> {
    let seq = inflight.seq;
    let tracked = inflight.tracked;
    let fail = |encoder: &mut dyn Encoder, error: crate::Error| -> Poll<Result<(), Unwritten>> {
        encoder.write_reset(seq);
        Poll::Ready(Err(Unwritten::Failed { tracked, error }))
    };

    if let Some(ref mut timeout) = inflight.timeout {
        if timeout.as_mut().poll(cx).is_ready() {
            debug!("request seq={} write timed out", seq);
            return fail(encoder, crate::Error::new_write_timeout());
        }
    }

    loop {
        let frame = match ready!(Pin::new(&mut inflight.body).poll_frame(cx)) {
            Some(Ok(frame)) => frame,
            Some(Err(err)) => {
                debug!("request seq={} body error: {}", seq, err);
                return fail(encoder, crate::Error::new_user_body(err));
            }
            None => {
                // 请求体结束时没有带上结束标记（例如最后一帧之后才知道结束）
                return match encoder.write_data(seq, Bytes::new(), true) {
                    Ok(()) => Poll::Ready(Ok(())),
                    Err(err) => fail(encoder, err),
                };
            }
        };

        match frame.into_data() {
            Ok(data) => {
                let end_stream = inflight.body.is_end_stream();
                if let Err(err) = encoder.write_data(seq, data, end_stream) {
                    return fail(encoder, err);
                }
                if end_stream {
                    trace!("request seq={} written", seq);
                    return Poll::Ready(Ok(()));
                }
            }
            Err(frame) => {
                if let Ok(trailers) = frame.into_trailers() {
                    return match encoder.write_trailers(seq, trailers) {
                        Ok(()) => Poll::Ready(Ok(())),
                        Err(err) => fail(encoder, err),
                    };
                }
                // 其他未知类型的帧
            }
        }
    }
}

impl fmt::Debug for RequestWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestWriter")
            .field("queued", &self.queue.len())
            .field("writing", &self.active.iter().map(|w| w.seq).collect::<Vec<_>>())
            .field("multiplex", &self.multiplex)
            .finish()
    }
}

#[cfg(all(test, feature = "http1"))]
mod tests {
    use super::*;
    use crate::body;
    use crate::client::responses::Tracked;
    use crate::mock::{MockTimer, MockWire};
    use crate::proto::h1::Http1Encoder;
    use futures_util::stream;
    use http_body_util::StreamBody;
    use std::sync::Arc;

    fn write(seq: u32, request: Request<RequestBody>, timeout: Option<Duration>) -> PendingWrite {
        PendingWrite {
            seq,
            tracked: Tracked(seq),
            request,
            write_timeout: timeout,
        }
    }

    fn writer(wire: &MockWire, time: Time) -> RequestWriter {
        RequestWriter::new(
            Box::new(Http1Encoder::new(Box::new(wire.clone()))),
            time,
            false,
        )
    }

    fn waiting(_: Tracked) -> bool {
        false
    }

    fn pending_body() -> RequestBody {
        let pending = stream::pending::<Result<http_body::Frame<Bytes>, body::BoxError>>();
        body::boxed(StreamBody::new(pending))
    }

    #[test]
    fn writes_queue_in_order() {
        let wire = MockWire::new();
        let mut w = writer(&wire, Time::Empty);

        let r1 = Request::get("/1").header("host", "h").body(body::empty()).unwrap();
        let r2 = Request::post("/2")
            .header("host", "h")
            .header("content-length", "2")
            .body(body::full("hi"))
            .unwrap();
        w.enqueue(write(1, r1, None));
        w.enqueue(write(2, r2, None));

        let mut cx = Context::from_waker(futures_util::task::noop_waker_ref());
        assert!(matches!(w.poll_write(&mut cx, &waiting), Poll::Ready(None)));
        assert!(w.is_idle());
        assert_eq!(
            wire.written_string(),
            "GET /1 HTTP/1.1\r\nhost: h\r\n\r\n\
             POST /2 HTTP/1.1\r\nhost: h\r\ncontent-length: 2\r\n\r\nhi"
        );
    }

    #[test]
    fn body_error_fails_request() {
        let wire = MockWire::new();
        let mut w = writer(&wire, Time::Empty);

        let frames = stream::iter(vec![Err::<http_body::Frame<Bytes>, body::BoxError>(
            "boom".into(),
        )]);
        let req = Request::post("/")
            .header("host", "h")
            .body(body::boxed(StreamBody::new(frames)))
            .unwrap();
        w.enqueue(write(1, req, None));

        let mut cx = Context::from_waker(futures_util::task::noop_waker_ref());
        match w.poll_write(&mut cx, &waiting) {
            Poll::Ready(Some(Unwritten::Failed { tracked, error })) => {
                assert_eq!(tracked, Tracked(1));
                assert!(error.is_user());
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(wire.is_shutdown());
    }

    #[test]
    fn write_timeout_resets_stream() {
        let wire = MockWire::new();
        let timer = MockTimer::new();
        let mut w = writer(&wire, Time::Timer(Arc::new(timer.clone())));

        // 一个永远不结束的请求体
        let req = Request::post("/")
            .header("host", "h")
            .body(pending_body())
            .unwrap();
        w.enqueue(write(1, req, Some(Duration::from_secs(1))));

        let mut cx = Context::from_waker(futures_util::task::noop_waker_ref());
        assert!(w.poll_write(&mut cx, &waiting).is_pending());

        timer.fire_all();
        match w.poll_write(&mut cx, &waiting) {
            Poll::Ready(Some(Unwritten::Failed { error, .. })) => assert!(error.is_timeout()),
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(wire.is_shutdown());
    }

    #[test]
    fn write_timeout_without_timer_is_ignored() {
        let wire = MockWire::new();
        let mut w = writer(&wire, Time::Empty);

        let req = Request::post("/")
            .header("host", "h")
            .body(pending_body())
            .unwrap();
        w.enqueue(write(1, req, Some(Duration::from_secs(1))));

        let mut cx = Context::from_waker(futures_util::task::noop_waker_ref());
        assert!(w.poll_write(&mut cx, &waiting).is_pending());
        assert!(!w.is_idle());
    }

    #[test]
    fn http1_waits_for_previous_body() {
        let wire = MockWire::new();
        let mut w = writer(&wire, Time::Empty);

        let upload = Request::post("/up")
            .header("host", "h")
            .body(pending_body())
            .unwrap();
        let next = Request::get("/next").header("host", "h").body(body::empty()).unwrap();
        w.enqueue(write(1, upload, None));
        w.enqueue(write(2, next, None));

        let mut cx = Context::from_waker(futures_util::task::noop_waker_ref());
        assert!(w.poll_write(&mut cx, &waiting).is_pending());
        assert!(!wire.written_string().contains("/next"));
    }

    #[test]
    fn canceled_request_is_skipped() {
        let wire = MockWire::new();
        let mut w = writer(&wire, Time::Empty);

        let gone = Request::get("/gone").header("host", "h").body(body::empty()).unwrap();
        let kept = Request::get("/kept").header("host", "h").body(body::empty()).unwrap();
        w.enqueue(write(1, gone, None));
        w.enqueue(write(2, kept, None));

        let canceled = |tracked: Tracked| tracked == Tracked(1);
        let mut cx = Context::from_waker(futures_util::task::noop_waker_ref());
        match w.poll_write(&mut cx, &canceled) {
            Poll::Ready(Some(Unwritten::Canceled(tracked))) => assert_eq!(tracked, Tracked(1)),
            other => panic!("expected skip, got {:?}", other),
        }
        assert!(matches!(w.poll_write(&mut cx, &canceled), Poll::Ready(None)));
        let written = wire.written_string();
        assert!(!written.contains("/gone"), "{}", written);
        assert!(written.starts_with("GET /kept"), "{}", written);
    }

    #[test]
    fn abandon_drops_queued_request() {
        let wire = MockWire::new();
        let mut w = writer(&wire, Time::Empty);

        let upload = Request::post("/up")
            .header("host", "h")
            .body(pending_body())
            .unwrap();
        let next = Request::get("/next").header("host", "h").body(body::empty()).unwrap();
        w.enqueue(write(1, upload, None));
        w.enqueue(write(2, next, None));

        let mut cx = Context::from_waker(futures_util::task::noop_waker_ref());
        assert!(w.poll_write(&mut cx, &waiting).is_pending());

        w.abandon(1, false);
        w.abandon(2, false);
        assert!(w.is_idle());
        assert!(matches!(w.poll_write(&mut cx, &waiting), Poll::Ready(None)));
        assert!(!wire.written_string().contains("/next"));
    }

    #[cfg(feature = "http2")]
    mod http2 {
        use super::*;
        use crate::mock::{Frame, MockFrameSink};
        use crate::proto::h2::Http2Encoder;

        fn writer(sink: &MockFrameSink) -> RequestWriter {
            RequestWriter::new(
                Box::new(Http2Encoder::new(Box::new(sink.clone()))),
                Time::Empty,
                true,
            )
        }

        /// 一个请求体迟迟不就绪的流不会挡住后面的流
        #[test]
        fn streams_do_not_wait_for_each_other() {
            let sink = MockFrameSink::new();
            let mut w = writer(&sink);

            let upload = Request::post("http://h/up").body(pending_body()).unwrap();
            let next = Request::get("http://h/next").body(body::empty()).unwrap();
            w.enqueue(write(1, upload, None));
            w.enqueue(write(2, next, None));

            let mut cx = Context::from_waker(futures_util::task::noop_waker_ref());
            assert!(w.poll_write(&mut cx, &waiting).is_pending());

            let ids: Vec<u32> = sink.frames().iter().map(Frame::stream_id).collect();
            assert_eq!(ids, vec![1, 3]);
            assert!(!w.is_idle());
        }

        #[test]
        fn bodies_interleave() {
            let sink = MockFrameSink::new();
            let mut w = writer(&sink);

            let a = Request::post("http://h/a").body(body::full("aaaa")).unwrap();
            let b = Request::post("http://h/b").body(pending_body()).unwrap();
            let c = Request::post("http://h/c").body(body::full("cc")).unwrap();
            w.enqueue(write(1, b, None));
            w.enqueue(write(2, a, None));
            w.enqueue(write(3, c, None));

            let mut cx = Context::from_waker(futures_util::task::noop_waker_ref());
            assert!(w.poll_write(&mut cx, &waiting).is_pending());

            let data: Vec<u32> = sink
                .frames()
                .iter()
                .filter(|frame| matches!(frame, Frame::Data { .. }))
                .map(Frame::stream_id)
                .collect();
            assert_eq!(data, vec![3, 5]);
        }

        #[test]
        fn abandon_resets_started_stream() {
            let sink = MockFrameSink::new();
            let mut w = writer(&sink);

            let upload = Request::post("http://h/up").body(pending_body()).unwrap();
            w.enqueue(write(1, upload, None));

            let mut cx = Context::from_waker(futures_util::task::noop_waker_ref());
            assert!(w.poll_write(&mut cx, &waiting).is_pending());
            sink.frames();

            w.abandon(1, true);
            assert!(w.is_idle());
            match sink.frames().as_slice() {
                [Frame::Reset { stream_id: 1, reason }] => {
                    assert_eq!(*reason, h2::Reason::CANCEL)
                }
                other => panic!("expected reset, got {:?}", other),
            }
        }
    }
}
