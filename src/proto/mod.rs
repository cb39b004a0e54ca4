//! 请求的出站编码器
//!
//! 会话层把一个逻辑请求拆成头部、请求体数据帧和 trailers 交给 [`Encoder`]，
//! 编码器再把它们转成线上的写操作。HTTP/1.1 (`h1`) 和 HTTP/2 (`h2`)
//! 各自提供一个实现，由协商出的协议决定使用哪一个。
//!
//! 每个写操作都带着请求的序号 `seq`（从 1 开始、严格递增）：
//! HTTP/1 按序号即流水线顺序写出，HTTP/2 则把序号映射为客户端发起的奇数流 ID。

use bytes::Bytes;
use http::request::Parts;
use http::HeaderMap;

cfg_http1! {
    pub mod h1;
}

cfg_http2! {
    pub mod h2;
}

/// 一个连接的出站请求编码器。
///
/// 只会在连接的执行上下文中被调用，同一时刻只有一个请求在写。
pub trait Encoder: Send {
    /// 写出请求头部。`end_stream` 为 `true` 表示这个请求没有请求体。
    fn write_headers(&mut self, seq: u32, head: Parts, end_stream: bool) -> crate::Result<()>;

    /// 写出一段请求体数据。`end_stream` 为 `true` 表示这是最后一段。
    fn write_data(&mut self, seq: u32, data: Bytes, end_stream: bool) -> crate::Result<()>;

    /// 写出 trailers，同时结束请求。
    fn write_trailers(&mut self, seq: u32, trailers: HeaderMap) -> crate::Result<()>;

    /// 放弃一个写了一半的请求。
    fn write_reset(&mut self, seq: u32);
}

/// HTTP/2 客户端发起的流 ID：`(seq << 1) - 1`，即 1, 3, 5, ...
pub(crate) fn stream_id(seq: u32) -> u32 {
    debug_assert!(seq > 0, "sequence numbers start at 1");
    (seq << 1) - 1
}

/// [`stream_id`] 的逆映射。偶数 ID 属于服务端推送，不对应任何请求。
pub(crate) fn seq_of_stream(stream_id: u32) -> Option<u32> {
    if stream_id % 2 == 1 {
        // 等价于 (id + 1) >> 1，但不会在 u32::MAX 上溢出
        Some((stream_id >> 1) + 1)
    } else {
        None
    }
}
