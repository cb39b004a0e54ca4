//! HTTP 客户端的每连接会话层
//!
//! 本模块管理一个网络连接从协议协商到关闭的整个生命周期：
//! 在连接上复用调用者派发的逻辑请求，把入站的响应部分关联回等待它们的调用者。
//! 连接的选择、连接池与重试策略都不在本模块范围内。
//!
//! ## 子模块结构
//!
//! - [`session`]：会话状态机、会话句柄与配置构建器；
//! - [`conn`]：连接的执行上下文，即事件队列与驱动会话的 `Connection` future；
//! - [`transport`]：会话层对传输层、HTTP/2 处理器和连接工厂的要求；
//! - `dispatch`：调用选项、响应回调与跨线程派发；
//! - `promise`：会话建立结果的一次性 promise；
//! - `responses`：未完成响应的跟踪；
//! - `writer`：把请求按顺序写到编码器上。
//!
//! ## 使用流程
//!
//! 1. 用 [`establish`] 创建建立 promise；
//! 2. 连接打开后调用 [`Builder::connect`]，把得到的 [`EventSender`] 交给传输层，
//!    并 spawn 得到的 [`Connection`]；
//! 3. 传输层投递 [`Event::Active`]、[`Event::Negotiated`] 等事件；
//! 4. 等待 [`Establishing`] 得到 [`SessionHandle`]，通过它派发请求。

pub mod conn;
mod dispatch;
mod promise;
mod responses;
pub mod session;
pub mod transport;
mod writer;

pub use self::conn::{Connection, Event, EventSender};
pub use self::dispatch::{
    response_channel, Envelope, RequestOptions, ResponseFuture, ResponseSink,
    DEFAULT_MAX_RESPONSE_LENGTH,
};
pub use self::promise::{establish, EstablishPromise, Establishing};
pub use self::responses::{ResponsePart, ResponseTrailers};
pub use self::session::{Builder, Dispatched, SessionHandle, MAX_DISPATCHES};
