//! 会话层与外部协作者之间的边界
//!
//! 会话层既不实现字节传输，也不实现 HTTP 线格式的帧编解码和头部压缩，
//! 更不负责连接池。这里定义的 trait 描述了它对这些外部组件的全部要求：
//!
//! - [`Channel`]：一个物理连接（传输层通道），可以查询、关闭，
//!   并提供 HTTP/1 的原始写出端 [`Wire`] 与 HTTP/2 的帧写出端；
//! - [`Connect`]：连接工厂，只在 HTTP/2 升级失败后回退到 HTTP/1.1 明文时使用；
//! - [`Message`]：到达会话层的原始入站消息。

use std::fmt;
use std::io;
use std::net::SocketAddr;

use bytes::Bytes;

use super::promise::EstablishPromise;
use crate::SessionProtocol;

/// 一个物理连接。
///
/// 由唯一的会话独占，直到连接被拆除。所有方法都可能在连接的执行上下文中被调用，
/// 因此实现必须是 `Send + Sync` 的。`close` 必须是幂等的；
/// 关闭完成后，传输层负责向会话投递 [`Event::Closed`](super::conn::Event::Closed)。
pub trait Channel: Send + Sync + 'static {
    /// 底层传输当前是否处于打开状态。
    fn is_open(&self) -> bool;

    /// 请求关闭底层传输。
    fn close(&self);

    /// 对端地址，回退重连时会连接到同一地址。
    fn remote_addr(&self) -> SocketAddr;

    /// 原始字节写出端，HTTP/1 编码器把序列化好的请求写到这里。
    fn wire(&self) -> Box<dyn Wire>;

    /// 当前活跃的 HTTP/2 连接处理器提供的帧写出端。
    ///
    /// 只有在协商出 HTTP/2 后才会被调用；返回 `None` 表示连接上并没有
    /// HTTP/2 处理器，会话会把这当作协商失败。
    #[cfg(feature = "http2")]
    fn http2(&self) -> Option<Box<dyn crate::proto::h2::FrameSink>> {
        None
    }
}

/// 传输层的出站字节写出端。
///
/// `write` 只是把数据追加进传输层的出站缓冲区，不等待数据真正发出。
pub trait Wire: Send {
    /// 追加一段要发送的字节。
    fn write(&mut self, buf: Bytes) -> io::Result<()>;

    /// 关闭写方向。HTTP/1 没有流重置，放弃一个写了一半的请求只能关闭连接。
    fn shutdown(&mut self);
}

/// 连接工厂。
///
/// 无状态、可被任意会话共享。会话只在一种情况下使用它：HTTP/2 升级失败后，
/// 以强制的 [`SessionProtocol::H1C`] 向同一地址发起一个全新的连接尝试，
/// 并把原来的建立 promise 交给新连接，原调用者对此无感知。
pub trait Connect: Send + Sync + 'static {
    /// 发起一次新的连接尝试，结果写入 `promise`。
    fn connect(&self, addr: SocketAddr, protocol: SessionProtocol, promise: EstablishPromise);
}

/// 到达会话层的原始入站消息。
///
/// 解码后的响应部分经由 [`Event::Response`](super::conn::Event::Response) 交给响应跟踪器，
/// 不会以 `Message` 的形式出现。会话层只认识 HTTP/2 的 SETTINGS 帧，
/// 其他任何消息都是协议违规。
pub enum Message {
    /// HTTP/2 SETTINGS 帧，预期之内，直接忽略。
    Http2Settings,
    /// 没有被任何解码器消费掉的原始字节。
    Bytes(Bytes),
    /// 其他任意消息。
    Other(Box<dyn fmt::Debug + Send>),
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Http2Settings => f.write_str("Http2Settings"),
            Message::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Message::Other(other) => f.debug_tuple("Other").field(other).finish(),
        }
    }
}
