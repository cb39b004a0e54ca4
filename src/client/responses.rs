//! 未完成响应的跟踪
//!
//! 每个被接受的派发都会以它的序号登记一个待完成的响应。入站的响应部分
//! （头部、数据、trailers、结束）由外部解码器解析好，以 [`ResponsePart`] 的形式
//! 经由会话交给跟踪器，跟踪器再把它们关联回对应的调用者：
//!
//! - HTTP/1：入站部分不带标识，永远属于最早的那个未完成响应；
//! - HTTP/2：入站部分带着流 ID，通过 `(id + 1) >> 1` 换算回序号。
//!
//! 响应体在这里聚合为 `Bytes`，完整之后作为 `http::Response<Bytes>` 交付。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use http::{response, HeaderMap, Response, StatusCode};

use super::dispatch::{RequestOptions, ResponseSink};
use super::transport::Channel;

/// 一个解码后的入站响应部分。
#[derive(Debug)]
pub enum ResponsePart {
    /// 响应头部。HTTP/1 的 1xx 信息性响应（101 除外）会被跳过。
    Head(response::Parts),
    /// 一段响应体数据。
    Data(Bytes),
    /// 响应 trailers。
    Trailers(HeaderMap),
    /// 响应结束。
    End,
    /// 对端重置了这个流。
    #[cfg(feature = "http2")]
    Reset(h2::Reason),
}

/// 响应的 trailers，完整响应交付时放在 `Response::extensions` 中。
#[derive(Clone, Debug)]
pub struct ResponseTrailers(pub HeaderMap);

/// 登记响应时返回的凭据，之后可以凭它单独让这个响应失败。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Tracked(pub(crate) u32);

/// 跟踪器已经放弃的请求，写入器应当停止写出它。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Abandoned {
    pub(crate) seq: u32,
    /// 是否需要向对端重置这个流
    pub(crate) reset: bool,
}

/// 响应跟踪器的契约。
pub(crate) trait ResponseTracker: Send {
    /// 以序号 `seq` 登记一个待完成的响应。
    fn register(
        &mut self,
        seq: u32,
        sink: ResponseSink,
        options: &RequestOptions,
        deadline: Option<Instant>,
    ) -> Tracked;

    /// 是否还有未完成的响应。
    fn has_outstanding(&self) -> bool;

    /// 跟踪器是否已经不能再接受新的请求。
    fn is_closing(&self) -> bool;

    /// 等待这个响应的调用者是否已经放弃。
    fn is_canceled(&self, tracked: Tracked) -> bool;

    /// 让所有未完成的响应以 `cause()` 失败。
    fn fail_all(&mut self, cause: fn() -> crate::Error);

    /// 让单个响应失败。响应已经完成时什么也不做。
    fn fail(&mut self, tracked: Tracked, err: crate::Error);

    /// 撤销一个还没有写出任何字节的请求的登记。
    fn forget(&mut self, tracked: Tracked);

    /// 所有未完成的响应结束后关闭连接。
    fn close_after_drain(&mut self);

    /// 处理一个入站响应部分。返回错误表示对端违反了协议。
    fn on_response(&mut self, stream_id: Option<u32>, part: ResponsePart) -> crate::Result<()>;

    /// 最早的响应超时时刻。
    fn next_deadline(&self) -> Option<Instant>;

    /// 让所有在 `now` 之前超时的响应失败。
    fn expire(&mut self, now: Instant);

    /// 取走自上次调用以来被放弃的请求。
    fn take_abandoned(&mut self) -> Vec<Abandoned>;
}

/// 入站部分与响应之间的关联方式。
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum Binding {
    Http1,
    #[cfg(feature = "http2")]
    Http2,
}

/// crate 自带的跟踪器，两个协议族共用。
pub(crate) struct PendingResponses {
    binding: Binding,
    channel: Arc<dyn Channel>,
    // 按序号排序，HTTP/1 的"最早的未完成响应"就是第一个
    pending: BTreeMap<u32, Pending>,
    close_after_drain: bool,
    // HTTP/1 流水线上有响应被提前放弃，之后的入站字节无法再对齐
    desynced: bool,
    abandoned: Vec<Abandoned>,
}

struct Pending {
    sink: ResponseSink,
    head: Option<response::Parts>,
    body: BytesMut,
    trailers: Option<HeaderMap>,
    max_length: u64,
    deadline: Option<Instant>,
}

impl PendingResponses {
    pub(crate) fn new(binding: Binding, channel: Arc<dyn Channel>) -> PendingResponses {
        PendingResponses {
            binding,
            channel,
            pending: BTreeMap::new(),
            close_after_drain: false,
            desynced: false,
            abandoned: Vec::new(),
        }
    }

    #[cfg_attr(not(feature = "http2"), allow(unused_variables))]
    fn seq_for(&self, stream_id: Option<u32>) -> crate::Result<Option<u32>> {
        match self.binding {
            Binding::Http1 => match self.pending.keys().next() {
                Some(seq) => Ok(Some(*seq)),
                None => Err(crate::Error::new_protocol_violation(
                    "received a response with no outstanding request",
                )),
            },
            #[cfg(feature = "http2")]
            Binding::Http2 => {
                let id = stream_id.ok_or_else(|| {
                    crate::Error::new_protocol_violation("http2 response part without a stream id")
                })?;
                let seq = crate::proto::seq_of_stream(id).ok_or_else(|| {
                    crate::Error::new_protocol_violation("response on a server-initiated stream")
                })?;
                // 已经失败（超时、过大、写失败）的流上仍可能有帧到达，直接丢弃
                if self.pending.contains_key(&seq) {
                    Ok(Some(seq))
                } else {
                    trace!("discarding response part for finished stream {}", id);
                    Ok(None)
                }
            }
        }
    }

    fn finish(&mut self, seq: u32, result: crate::Result<Response<Bytes>>) {
        if let Some(pending) = self.pending.remove(&seq) {
            pending.sink.send(result);
        }
        self.maybe_close();
    }

    /// 提前放弃一个响应。
    fn abandon(&mut self, seq: u32, err: crate::Error) {
        let pending = match self.pending.remove(&seq) {
            Some(pending) => pending,
            None => return,
        };
        pending.sink.send(Err(err));
        self.after_abandon(&[seq]);
    }

    /// HTTP/2 上重置被放弃的流；HTTP/1 上这些响应剩下的字节仍会到达，
    /// 流水线从此失去对齐，其余响应全部失败并关闭连接。
    fn after_abandon(&mut self, seqs: &[u32]) {
        match self.binding {
            Binding::Http1 => {
                self.abandoned
                    .extend(seqs.iter().map(|&seq| Abandoned { seq, reset: false }));
                self.desync();
            }
            #[cfg(feature = "http2")]
            Binding::Http2 => {
                self.abandoned
                    .extend(seqs.iter().map(|&seq| Abandoned { seq, reset: true }));
                self.maybe_close();
            }
        }
    }

    fn desync(&mut self) {
        if self.desynced {
            return;
        }
        debug!("http1 pipeline lost sync, closing connection");
        self.desynced = true;
        for (seq, pending) in std::mem::take(&mut self.pending) {
            self.abandoned.push(Abandoned { seq, reset: false });
            pending.sink.send(Err(crate::Error::new_closed_session()));
        }
        self.channel.close();
    }

    fn maybe_close(&self) {
        if self.close_after_drain && self.pending.is_empty() {
            debug!("drained all responses, closing connection");
            self.channel.close();
        }
    }
}

impl ResponseTracker for PendingResponses {
    fn register(
        &mut self,
        seq: u32,
        sink: ResponseSink,
        options: &RequestOptions,
        deadline: Option<Instant>,
    ) -> Tracked {
        debug_assert!(
            !self.pending.contains_key(&seq),
            "sequence number registered twice"
        );
        self.pending.insert(
            seq,
            Pending {
                sink,
                head: None,
                body: BytesMut::new(),
                trailers: None,
                max_length: options.get_max_response_length(),
                deadline,
            },
        );
        Tracked(seq)
    }

    fn has_outstanding(&self) -> bool {
        !self.pending.is_empty()
    }

    fn is_closing(&self) -> bool {
        self.desynced
    }

    fn is_canceled(&self, tracked: Tracked) -> bool {
        self.pending
            .get(&tracked.0)
            .map_or(true, |pending| pending.sink.is_canceled())
    }

    fn fail_all(&mut self, cause: fn() -> crate::Error) {
        if !self.pending.is_empty() {
            debug!("failing {} unfinished responses", self.pending.len());
        }
        for (_, pending) in std::mem::take(&mut self.pending) {
            pending.sink.send(Err(cause()));
        }
    }

    fn fail(&mut self, tracked: Tracked, err: crate::Error) {
        // 写失败时写入器已经重置了这个流
        match self.binding {
            Binding::Http1 => self.abandon(tracked.0, err),
            #[cfg(feature = "http2")]
            Binding::Http2 => self.finish(tracked.0, Err(err)),
        }
    }

    fn forget(&mut self, tracked: Tracked) {
        trace!("request seq={} canceled before write", tracked.0);
        self.finish(tracked.0, Err(crate::Error::new_canceled()));
    }

    fn close_after_drain(&mut self) {
        self.close_after_drain = true;
        self.maybe_close();
    }

    fn on_response(&mut self, stream_id: Option<u32>, part: ResponsePart) -> crate::Result<()> {
        if self.desynced {
            trace!("discarding response part on desynced pipeline");
            return Ok(());
        }
        let seq = match self.seq_for(stream_id)? {
            Some(seq) => seq,
            None => return Ok(()),
        };
        let pending = match self.pending.get_mut(&seq) {
            Some(pending) => pending,
            None => return Ok(()),
        };

        match part {
            ResponsePart::Head(head) => {
                if head.status.is_informational() && head.status != StatusCode::SWITCHING_PROTOCOLS
                {
                    trace!("skipping informational response {}", head.status);
                    return Ok(());
                }
                if pending.head.is_some() {
                    return Err(crate::Error::new_protocol_violation(
                        "received a second response head",
                    ));
                }
                pending.head = Some(head);
            }
            ResponsePart::Data(data) => {
                if pending.head.is_none() {
                    return Err(crate::Error::new_protocol_violation(
                        "received response data before the head",
                    ));
                }
                let len = pending.body.len() as u64 + data.len() as u64;
                if pending.max_length != 0 && len > pending.max_length {
                    debug!(
                        "response seq={} exceeded max length {}",
                        seq, pending.max_length
                    );
                    self.abandon(seq, crate::Error::new_too_large());
                    return Ok(());
                }
                pending.body.extend_from_slice(&data);
            }
            ResponsePart::Trailers(trailers) => {
                if pending.head.is_none() {
                    return Err(crate::Error::new_protocol_violation(
                        "received response trailers before the head",
                    ));
                }
                pending.trailers = Some(trailers);
            }
            ResponsePart::End => {
                let head = match pending.head.take() {
                    Some(head) => head,
                    None => {
                        return Err(crate::Error::new_protocol_violation(
                            "response ended before the head",
                        ))
                    }
                };
                let body = std::mem::take(&mut pending.body).freeze();
                let mut res = Response::from_parts(head, body);
                if let Some(trailers) = pending.trailers.take() {
                    res.extensions_mut().insert(ResponseTrailers(trailers));
                }
                trace!("response seq={} complete", seq);
                self.finish(seq, Ok(res));
            }
            #[cfg(feature = "http2")]
            ResponsePart::Reset(reason) => {
                debug!("response seq={} reset by peer: {:?}", seq, reason);
                // 对端已经关闭了这个流，只需停止写出
                self.abandoned.push(Abandoned { seq, reset: false });
                self.finish(seq, Err(crate::Error::new_h2(h2::Error::from(reason))));
            }
        }
        Ok(())
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().filter_map(|p| p.deadline).min()
    }

    fn expire(&mut self, now: Instant) {
        let expired: Vec<u32> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline.map_or(false, |d| d <= now))
            .map(|(seq, _)| *seq)
            .collect();
        if expired.is_empty() {
            return;
        }

        // 先让所有超时的响应以超时失败，HTTP/1 的拆除只影响其余响应
        for seq in &expired {
            debug!("response seq={} timed out", seq);
            if let Some(pending) = self.pending.remove(seq) {
                pending.sink.send(Err(crate::Error::new_response_timeout()));
            }
        }
        self.after_abandon(&expired);
    }

    fn take_abandoned(&mut self) -> Vec<Abandoned> {
        std::mem::take(&mut self.abandoned)
    }
}

impl std::fmt::Debug for PendingResponses {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResponses")
            .field("binding", &self.binding)
            .field("pending", &self.pending.len())
            .field("close_after_drain", &self.close_after_drain)
            .field("desynced", &self.desynced)
            .finish()
    }
}
