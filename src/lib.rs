// 以下 lint 属性控制编译器的警告行为，确保代码质量：
#![deny(missing_docs)]                                           // 所有公共 API 必须有文档注释
#![deny(missing_debug_implementations)]                          // 所有公共类型必须实现 Debug trait
#![cfg_attr(test, deny(rust_2018_idioms))]                       // 测试时要求使用 Rust 2018 惯用写法
#![cfg_attr(all(test, feature = "full"), deny(unreachable_pub))] // 测试+full 模式下，禁止不可达的 pub 声明
#![cfg_attr(all(test, feature = "full"), deny(warnings))]        // 测试+full 模式下，将所有警告视为错误
#![cfg_attr(docsrs, feature(doc_cfg))]                           // docs.rs 构建时启用 doc_cfg feature

//! # hyper-session
//!
//! The per-connection session layer of an HTTP client.
//!
//! A session owns one network connection from protocol negotiation
//! (HTTP/1.1 or HTTP/2, cleartext or TLS) until it closes. It multiplexes
//! logical requests onto the connection's outbound encoder and correlates
//! inbound response parts back to the caller waiting for them.
//!
//! ## "Low-level"
//!
//! This crate does not move bytes, parse HTTP frames or pick connections.
//! The transport, the wire codecs and the connection pool live elsewhere and
//! talk to the session through the traits in [`client::transport`] and the
//! [`client::Event`] queue.
//!
//! ```text
//! transport ──Event──▶ Connection ──▶ Session ──▶ Encoder ──▶ transport
//!                                        │
//!                                        └──▶ PendingResponses ──▶ callers
//! ```
//!
//! # Optional Features
//!
//! - `http1`: Enables the HTTP/1.1 encoder. Enabled by default.
//! - `http2`: Enables the HTTP/2 encoder. Enabled by default.
//! - `tracing`: Enables debug logging through the `tracing` crate.
//! - `full`: Enables all of the above.
//!
//! # Stability
//!
//! - Downcasting error types from `Error::source()` is not considered stable.
//! - The wording of error messages is not considered stable.

// 隐藏地重新导出 http crate，供下游实现传输层时使用同一版本。
#[doc(hidden)]
pub use http;

pub use crate::error::{Error, Result};
pub use crate::protocol::SessionProtocol;

// `#[macro_use]` 使得 cfg 模块中定义的宏（cfg_feature!、cfg_http1! 等）
// 在整个 crate 中可用。此模块必须最先声明，因为后续模块依赖这些宏。
#[macro_use]
mod cfg;

// `#[macro_use]` 使得 trace 模块中定义的日志宏（trace!、debug! 等）
// 在整个 crate 中可用。
#[macro_use]
mod trace;

pub mod body;
pub mod client;
mod common;
mod error;
#[cfg(test)]
mod mock;
mod protocol;
pub mod proto;
pub mod rt;
