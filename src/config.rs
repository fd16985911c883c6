//! 定义了连接管理器的可配置参数。
//! Defines configurable parameters for the connection manager.

use crate::error::{Error, Result};
use std::time::Duration;

/// A structure containing all configurable parameters for a connection manager.
///
/// 包含连接管理器所有可配置参数的结构体。
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Per-connection parameters.
    /// 每个连接的参数。
    pub connection: ConnectionConfig,

    /// Graceful and forced shutdown parameters.
    /// 优雅关闭和强制关闭的参数。
    pub shutdown: ShutdownConfig,
}

/// Per-connection parameters.
///
/// 每个连接的参数。
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// The maximum time a connection can be idle before its timeout fires.
    /// Every connection registered with the manager's timeout set uses this
    /// duration.
    ///
    /// 连接在其超时触发之前可以处于空闲状态的最长时间。
    /// 在管理器超时集合中注册的每个连接都使用此时长。
    pub idle_timeout: Duration,
}

/// Graceful and forced shutdown parameters.
///
/// 优雅关闭和强制关闭的参数。
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// The maximum number of connections visited by a single drain step.
    /// Bounds the time one loop turn spends on shutdown work.
    ///
    /// 单个排空步骤访问的最大连接数。限制了一次循环迭代在关闭工作上花费的时间。
    pub drain_quantum: usize,
    /// How many connections get their state dumped when all connections are
    /// dropped at once.
    ///
    /// 一次性丢弃所有连接时，转储状态的连接数量。
    pub max_conns_to_dump: usize,
    /// The verbosity passed to `dump_connection_state`.
    /// 传递给 `dump_connection_state` 的详细级别。
    pub dump_verbosity: u8,
}

impl Config {
    /// Checks the configuration for values the manager cannot work with.
    ///
    /// 检查配置中管理器无法使用的值。
    pub fn validate(&self) -> Result<()> {
        if self.connection.idle_timeout.is_zero() {
            return Err(Error::InvalidConfig("idle_timeout must be non-zero"));
        }
        if self.shutdown.drain_quantum == 0 {
            return Err(Error::InvalidConfig("drain_quantum must be non-zero"));
        }
        Ok(())
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(60),
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_quantum: 64,
            max_conns_to_dump: 2,
            dump_verbosity: 3,
        }
    }
}
