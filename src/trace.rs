//! 日志追踪（tracing）宏模块
//!
//! 本模块对 `tracing` crate 的日志宏和 span 宏进行了条件包装：
//!
//! 1. 当 `tracing` feature 启用时，宏会展开为实际的 `tracing::*` 调用
//! 2. 当 `tracing` feature 未启用时，宏展开为空操作（零成本）
//!
//! 通过 `#[macro_use]` 在 `lib.rs` 中紧接着 `cfg` 模块之后被引入，
//! 整个 crate 都可以直接使用 `trace!`、`debug!`、`warn!` 等宏。
//! 会话状态机的每一次状态迁移、每一次派发和每一次关闭都会经由这些宏记录下来，
//! 而日志最终写到哪里（sink）由使用者安装的 subscriber 决定。

// 为了完整性，即使某些宏当前未被使用，也保留全部封装。
#![allow(unused_macros)]

/// `debug!`：调试级别日志宏
macro_rules! debug {
    ($($arg:tt)+) => {
        #[cfg(feature = "tracing")]
        {
            tracing::debug!($($arg)+);
        }
    }
}

/// `debug_span!`：调试级别 span 创建宏
///
/// 创建一个调试级别的 span 并立即进入，返回的 guard 被 drop 时退出 span。
/// 整个宏体包裹在块 `{ }` 中，tracing 未启用时展开为 `()`。
macro_rules! debug_span {
    ($($arg:tt)*) => {
        {
            #[cfg(feature = "tracing")]
            {
                let _span = tracing::debug_span!($($arg)+);
                _span.entered()
            }
        }
    }
}

/// `error!`：错误级别日志宏
macro_rules! error {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        {
            tracing::error!($($arg)+);
        }
    }
}

/// `info!`：信息级别日志宏
macro_rules! info {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        {
            tracing::info!($($arg)+);
        }
    }
}

/// `trace!`：追踪级别日志宏
///
/// 最细粒度的日志级别，用于记录会话层内部的每一个步骤。
macro_rules! trace {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        {
            tracing::trace!($($arg)+);
        }
    }
}

/// `trace_span!`：追踪级别 span 创建宏
macro_rules! trace_span {
    ($($arg:tt)*) => {
        {
            #[cfg(feature = "tracing")]
            {
                let _span = tracing::trace_span!($($arg)+);
                _span.entered()
            }
        }
    }
}

/// `warn!`：警告级别日志宏
///
/// 用于记录潜在的问题，例如意外的事件或被丢弃的握手结果。
macro_rules! warn {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        {
            tracing::warn!($($arg)+);
        }
    }
}
