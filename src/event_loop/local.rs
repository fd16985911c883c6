//! 基于tokio `LocalSet` 的事件循环实现
//! Event loop implementation on top of a tokio `LocalSet`

use super::{EventLoop, LoopCallback, LoopTask};
use crate::error::Result;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::trace;

/// An [`EventLoop`] backed by the current tokio runtime.
///
/// Work is spawned with [`tokio::task::spawn_local`], so every method must be
/// called from inside a [`tokio::task::LocalSet`]. A task spawned by
/// `run_in_loop` runs on a later poll of the `LocalSet`, never inside the call.
///
/// 由当前tokio运行时支持的 [`EventLoop`]。
///
/// 工作通过 [`tokio::task::spawn_local`] 生成，因此所有方法都必须在
/// [`tokio::task::LocalSet`] 内部调用。
#[derive(Debug, Clone)]
pub struct LocalEventLoop {
    _private: (),
}

impl LocalEventLoop {
    /// Checks that a tokio runtime is current and returns the loop.
    /// 检查当前是否存在tokio运行时并返回事件循环。
    pub fn new() -> Result<Self> {
        Handle::try_current()?;
        Ok(Self { _private: () })
    }
}

impl EventLoop for LocalEventLoop {
    fn run_in_loop(&self, callback: LoopCallback) -> LoopTask {
        let (task, ticket) = LoopTask::pair();
        let join = tokio::task::spawn_local(async move {
            if ticket.claim() {
                callback();
            }
        });
        task.with_abort_handle(join.abort_handle())
    }

    fn run_after(&self, delay: Duration, callback: LoopCallback) -> LoopTask {
        trace!(delay_ms = delay.as_millis(), "Scheduling delayed loop task");
        let (task, ticket) = LoopTask::pair();
        let join = tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            if ticket.claim() {
                callback();
            }
        });
        task.with_abort_handle(join.abort_handle())
    }
}
