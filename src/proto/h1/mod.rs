//! HTTP/1.1 请求编码器
//!
//! 把请求序列化为 HTTP/1.1 报文，写到传输层的 [`Wire`] 上：
//!
//! - 请求行固定为 `METHOD path HTTP/1.1`；
//! - 缺少 `host` 时用 URI 的 authority 补上；
//! - 请求体的分帧：调用者给了 `content-length` 就原样写出，否则使用 chunked；
//!   请求在头部就结束时不添加任何分帧头部；
//! - trailers 写在最后一个 chunk 之后，非 chunked 请求无法携带 trailers。
//!
//! HTTP/1 没有流重置，放弃写了一半的请求只能关闭写方向。

use std::fmt::Write as _;

use bytes::{BufMut, Bytes, BytesMut};
use http::header::{HeaderValue, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use http::request::Parts;
use http::HeaderMap;

use crate::client::transport::Wire;
use crate::proto::Encoder;

// 头部缓冲区的初始容量
const INIT_HEAD_CAPACITY: usize = 512;

/// HTTP/1.1 编码器。
///
/// 请求按序号顺序一个接一个写出（流水线），因此只需要记住当前请求的分帧方式。
pub struct Http1Encoder {
    wire: Box<dyn Wire>,
    kind: Kind,
}

/// 当前请求体的分帧方式。
#[derive(Debug, Clone, Copy, PartialEq)]
enum Kind {
    /// 按 content-length 原样写出（或者请求根本没有请求体）
    Length,
    /// `transfer-encoding: chunked`
    Chunked,
}

impl Http1Encoder {
    pub(crate) fn new(wire: Box<dyn Wire>) -> Http1Encoder {
        Http1Encoder {
            wire,
            kind: Kind::Length,
        }
    }

    fn write(&mut self, buf: Bytes) -> crate::Result<()> {
        self.wire.write(buf).map_err(crate::Error::new_body_write)
    }
}

impl Encoder for Http1Encoder {
    fn write_headers(&mut self, seq: u32, mut head: Parts, end_stream: bool) -> crate::Result<()> {
        trace!("h1 encode head seq={} {} {}", seq, head.method, head.uri);

        if !head.headers.contains_key(HOST) {
            if let Some(authority) = head.uri.authority() {
                let host = HeaderValue::from_str(authority.as_str())
                    .map_err(crate::Error::new_body_write)?;
                head.headers.insert(HOST, host);
            }
        }

        self.kind = if end_stream || head.headers.contains_key(CONTENT_LENGTH) {
            Kind::Length
        } else {
            if head.headers.remove(TRANSFER_ENCODING).is_some() {
                debug!("replacing user transfer-encoding with chunked");
            }
            head.headers
                .insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
            Kind::Chunked
        };

        let mut dst = BytesMut::with_capacity(INIT_HEAD_CAPACITY);
        dst.put_slice(head.method.as_str().as_bytes());
        dst.put_u8(b' ');
        match head.uri.path_and_query() {
            Some(path) => dst.put_slice(path.as_str().as_bytes()),
            None => dst.put_u8(b'/'),
        }
        dst.put_slice(b" HTTP/1.1\r\n");
        write_header_block(&mut dst, &head.headers);
        dst.put_slice(b"\r\n");

        self.write(dst.freeze())
    }

    fn write_data(&mut self, seq: u32, data: Bytes, end_stream: bool) -> crate::Result<()> {
        trace!(
            "h1 encode data seq={} len={} end={}",
            seq,
            data.len(),
            end_stream
        );
        match self.kind {
            Kind::Length => {
                if !data.is_empty() {
                    self.write(data)?;
                }
                Ok(())
            }
            Kind::Chunked => {
                if !data.is_empty() {
                    let mut size = BytesMut::with_capacity(12);
                    // BytesMut 实现了 fmt::Write，写入不会失败
                    let _ = write!(size, "{:X}\r\n", data.len());
                    self.write(size.freeze())?;
                    self.write(data)?;
                    self.write(Bytes::from_static(b"\r\n"))?;
                }
                if end_stream {
                    self.write(Bytes::from_static(b"0\r\n\r\n"))?;
                }
                Ok(())
            }
        }
    }

    fn write_trailers(&mut self, seq: u32, trailers: HeaderMap) -> crate::Result<()> {
        match self.kind {
            Kind::Length => {
                debug!("h1 seq={} is not chunked, dropping trailers", seq);
                Ok(())
            }
            Kind::Chunked => {
                let mut dst = BytesMut::with_capacity(INIT_HEAD_CAPACITY);
                dst.put_slice(b"0\r\n");
                write_header_block(&mut dst, &trailers);
                dst.put_slice(b"\r\n");
                self.write(dst.freeze())
            }
        }
    }

    fn write_reset(&mut self, seq: u32) {
        debug!("h1 seq={} abandoned mid-write, shutting down wire", seq);
        self.wire.shutdown();
    }
}

impl std::fmt::Debug for Http1Encoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Http1Encoder")
            .field("kind", &self.kind)
            .finish()
    }
}

fn write_header_block(dst: &mut BytesMut, headers: &HeaderMap) {
    for (name, value) in headers {
        dst.put_slice(name.as_str().as_bytes());
        dst.put_slice(b": ");
        dst.put_slice(value.as_bytes());
        dst.put_slice(b"\r\n");
    }
}
