//! crate 内部共享的小工具。

pub(crate) mod time;

use std::fmt::Write as _;

/// 把字节渲染为小写十六进制串，用于协议违规时的诊断信息。
pub(crate) fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}
