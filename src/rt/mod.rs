//! 运行时组件
//!
//! 会话层不绑定具体的异步运行时。与时间相关的一切都通过本模块的
//! [`Timer`] / [`Sleep`] trait 完成，使用者通过
//! [`Builder::timer`](crate::client::session::Builder::timer) 注入实现。
//!
//! 如果使用 tokio，可以直接使用 [`TokioTimer`]。

mod timer;
mod tokio_timer;

pub use self::timer::{Sleep, Timer};
pub use self::tokio_timer::TokioTimer;
