//! HTTP/2 请求编码器
//!
//! 会话层不实现 HTTP/2 的帧格式和 HPACK：这些由连接上活跃的 HTTP/2 处理器负责，
//! 它通过 [`FrameSink`] 向会话层暴露"按流写帧"的能力。
//! [`Http2Encoder`] 在其上完成两件事：
//!
//! - 把请求序号映射为客户端发起的奇数流 ID；
//! - 根据 RFC 9110 第 7.6.1 节移除 HTTP/2 中不允许出现的连接级头部。

use bytes::Bytes;
use http::header::{HeaderName, CONNECTION, TE, TRANSFER_ENCODING, UPGRADE};
use http::request::Parts;
use http::HeaderMap;

use crate::proto::{stream_id, Encoder};

/// 活跃的 HTTP/2 连接处理器提供的帧写出端。
///
/// 每个方法对应一种出站帧，`stream_id` 由编码器分配。
/// 返回的 `h2::Error` 会被包装为会话层的 [`Error`](crate::Error)。
pub trait FrameSink: Send {
    /// 发送 HEADERS 帧，`end_stream` 时同时带上 END_STREAM 标志。
    fn send_headers(&mut self, stream_id: u32, head: Parts, end_stream: bool)
        -> Result<(), h2::Error>;

    /// 发送 DATA 帧。
    fn send_data(&mut self, stream_id: u32, data: Bytes, end_stream: bool)
        -> Result<(), h2::Error>;

    /// 以 HEADERS 帧发送 trailers 并结束流。
    fn send_trailers(&mut self, stream_id: u32, trailers: HeaderMap) -> Result<(), h2::Error>;

    /// 发送 RST_STREAM 帧。
    fn send_reset(&mut self, stream_id: u32, reason: h2::Reason);
}

/// HTTP/2 编码器。
pub struct Http2Encoder {
    frames: Box<dyn FrameSink>,
}

impl Http2Encoder {
    pub(crate) fn new(frames: Box<dyn FrameSink>) -> Http2Encoder {
        Http2Encoder { frames }
    }
}

impl Encoder for Http2Encoder {
    fn write_headers(&mut self, seq: u32, mut head: Parts, end_stream: bool) -> crate::Result<()> {
        let id = stream_id(seq);
        trace!("h2 encode head stream={} {} {}", id, head.method, head.uri);

        strip_connection_headers(&mut head.headers);
        head.version = http::Version::HTTP_2;
        self.frames
            .send_headers(id, head, end_stream)
            .map_err(crate::Error::new_h2)
    }

    fn write_data(&mut self, seq: u32, data: Bytes, end_stream: bool) -> crate::Result<()> {
        self.frames
            .send_data(stream_id(seq), data, end_stream)
            .map_err(crate::Error::new_h2)
    }

    fn write_trailers(&mut self, seq: u32, mut trailers: HeaderMap) -> crate::Result<()> {
        strip_connection_headers(&mut trailers);
        self.frames
            .send_trailers(stream_id(seq), trailers)
            .map_err(crate::Error::new_h2)
    }

    fn write_reset(&mut self, seq: u32) {
        let id = stream_id(seq);
        debug!("h2 stream={} abandoned, sending RST_STREAM", id);
        self.frames.send_reset(id, h2::Reason::CANCEL);
    }
}

impl std::fmt::Debug for Http2Encoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Http2Encoder").finish()
    }
}

// RFC 9110 第 7.6.1 节定义的连接级头部列表
//
// TE 头部在 HTTP/2 请求中只有值为 "trailers" 时才被允许，因此单独处理。
static CONNECTION_HEADERS: [HeaderName; 4] = [
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    TRANSFER_ENCODING,
    UPGRADE,
];

/// 从请求头部中移除 HTTP/2 不允许的连接级头部。
fn strip_connection_headers(headers: &mut HeaderMap) {
    for header in &CONNECTION_HEADERS {
        if headers.remove(header).is_some() {
            warn!("Connection header illegal in HTTP/2: {}", header.as_str());
        }
    }

    if headers
        .get(TE)
        .map_or(false, |te_header| te_header != "trailers")
    {
        warn!("TE headers not set to \"trailers\" are illegal in HTTP/2 requests");
        headers.remove(TE);
    }

    if let Some(header) = headers.remove(CONNECTION) {
        warn!(
            "Connection header illegal in HTTP/2: {}",
            CONNECTION.as_str()
        );

        // Connection 头部里列出的其他头部同样只属于这个连接，一并移除。
        // 值不是合法的可见 ASCII 时无从解析，只移除 Connection 本身。
        if let Ok(header_contents) = header.to_str() {
            for name in header_contents.split(',') {
                let name = name.trim();
                headers.remove(name);
            }
        }
    }
}
