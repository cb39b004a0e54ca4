use std::fmt;

/// 协商出的会话协议。
///
/// 一个连接在协商完成后只会对应其中一个取值，并且不会再改变。
/// `H1`/`H1C` 共用 HTTP/1 编码器，`H2`/`H2C` 共用 HTTP/2 编码器，
/// 带 `C` 后缀的是明文（cleartext）变体。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionProtocol {
    /// HTTP/1.1 over TLS
    H1,
    /// HTTP/1.1 明文
    H1C,
    /// HTTP/2 over TLS（ALPN `h2`）
    H2,
    /// HTTP/2 明文（升级或 prior knowledge）
    H2C,
}

impl SessionProtocol {
    /// 是否运行在 TLS 之上。
    pub fn is_tls(self) -> bool {
        matches!(self, SessionProtocol::H1 | SessionProtocol::H2)
    }

    /// 是否支持在同一连接上多路复用多个请求。
    pub fn is_multiplex(self) -> bool {
        matches!(self, SessionProtocol::H2 | SessionProtocol::H2C)
    }

    /// 对应的 HTTP 版本。
    pub fn version(self) -> http::Version {
        if self.is_multiplex() {
            http::Version::HTTP_2
        } else {
            http::Version::HTTP_11
        }
    }

    /// 协议的简短名称，例如 `"h2c"`。
    pub fn as_str(self) -> &'static str {
        match self {
            SessionProtocol::H1 => "h1",
            SessionProtocol::H1C => "h1c",
            SessionProtocol::H2 => "h2",
            SessionProtocol::H2C => "h2c",
        }
    }
}

impl fmt::Display for SessionProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
