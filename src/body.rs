//! 请求体类型
//!
//! 会话层不关心请求体从哪里来，只要求它实现 [`http_body::Body`]。
//! 为了让不同来源的请求能排进同一个写队列，请求体统一被装箱为 [`RequestBody`]。

use std::error::Error as StdError;

use bytes::Bytes;
use http_body::Body;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};

/// 类型擦除的请求体错误。
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// 装箱后的请求体，可能是流式的。
pub type RequestBody = UnsyncBoxBody<Bytes, BoxError>;

/// 把任意请求体装箱为 [`RequestBody`]。
pub fn boxed<B>(body: B) -> RequestBody
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    body.map_err(Into::into).boxed_unsync()
}

/// 空请求体。
pub fn empty() -> RequestBody {
    boxed(Empty::<Bytes>::new())
}

/// 一次性给出全部内容的请求体。
pub fn full<D: Into<Bytes>>(data: D) -> RequestBody {
    boxed(Full::new(data.into()))
}
