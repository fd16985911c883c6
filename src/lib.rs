#![deny(clippy::expect_used, clippy::unwrap_used)]

//! The root of the connection lifecycle manager library.
//! 连接生命周期管理库的根。
//!
//! A [`ConnectionManager`] lives on one event loop thread and tracks every
//! live connection of that thread: it registers and deregisters them, drives
//! their idle timeouts and runs a two-phase graceful shutdown that never
//! monopolizes the loop.
//!
//! 一个 [`ConnectionManager`] 运行在一个事件循环线程上，跟踪该线程的所有活动连接：
//! 注册与注销连接，驱动空闲超时，并执行一个不会独占事件循环的两阶段优雅关闭。

pub mod config;
pub mod connection;
pub mod error;
pub mod event_loop;
pub mod manager;
pub mod registry;
pub mod timeout;

mod testing;

pub use config::Config;
pub use connection::{ManagedConnection, ManagerLink, ManagerSlot};
pub use error::{Error, Result};
pub use event_loop::{EventLoop, LocalEventLoop, LoopTask};
pub use manager::{ConnectionManager, ConnectionManagerCallback, ShutdownPhase};
pub use registry::ConnectionKey;
pub use timeout::{ConnectionTimeouts, TimeoutStats};
