//! 条件编译辅助宏模块
//!
//! 本模块提供了一组声明宏，用于简化基于 Cargo feature 的条件编译。
//! 会话层按协议族拆分为 `http1` 和 `http2` 两个 feature，
//! 编码器与对应的测试都通过这里的宏挂到各自的 feature 之下。
//!
//! 本模块必须在 `lib.rs` 中最先以 `#[macro_use]` 声明，
//! 这样其后的所有模块都可以直接使用这些宏。

/// 对一组 item 统一附加 `#[cfg(...)]` 与 docs.rs 的 `doc(cfg(...))` 标注。
///
/// 用法：
///
/// ```ignore
/// cfg_feature! {
///     #![feature = "http2"]
///
///     pub mod h2;
/// }
/// ```
macro_rules! cfg_feature {
    (
        #![$meta:meta]
        $($item:item)*
    ) => {
        $(
            #[cfg($meta)]
            #[cfg_attr(docsrs, doc(cfg($meta)))]
            $item
        )*
    }
}

/// 仅在启用 `http1` feature 时编译其中的 item。
macro_rules! cfg_http1 {
    ($($item:item)*) => {
        cfg_feature! {
            #![feature = "http1"]
            $($item)*
        }
    }
}

/// 仅在启用 `http2` feature 时编译其中的 item。
macro_rules! cfg_http2 {
    ($($item:item)*) => {
        cfg_feature! {
            #![feature = "http2"]
            $($item)*
        }
    }
}
