//! 定义了库中所有可能的错误类型。
//! Defines all possible error types in the library.
//!
//! 连接管理器的核心操作本身是不会失败的；错误只出现在构造边界上。
//! The core connection manager operations are infallible; errors only surface
//! at construction boundaries.

use thiserror::Error;

/// The primary error type for the connection manager library.
/// 连接管理器库的主要错误类型。
#[derive(Debug, Error)]
pub enum Error {
    /// A configuration value was rejected by [`Config::validate`](crate::config::Config::validate).
    /// 配置值被 [`Config::validate`](crate::config::Config::validate) 拒绝。
    #[error("Invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// The tokio event loop was requested outside of a tokio runtime.
    ///
    /// 在tokio运行时之外请求了tokio事件循环。
    #[error("No tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

/// A specialized `Result` type for this library.
/// 本库专用的 `Result` 类型。
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        use std::io::ErrorKind;
        match err {
            Error::InvalidConfig(reason) => std::io::Error::new(ErrorKind::InvalidInput, reason),
            Error::NoRuntime(e) => std::io::Error::other(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_maps_to_invalid_input() {
        let err: std::io::Error = Error::InvalidConfig("drain_quantum must be non-zero").into();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
        assert!(err.to_string().contains("drain_quantum"));
    }

    #[test]
    fn test_no_runtime_outside_tokio() {
        // 这里没有运行时
        // No runtime here
        let err = Error::from(tokio::runtime::Handle::try_current().unwrap_err());
        assert!(matches!(err, Error::NoRuntime(_)));
        let io: std::io::Error = err.into();
        assert_eq!(io.kind(), std::io::ErrorKind::Other);
    }
}
