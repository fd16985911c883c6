//! 事件循环调度抽象
//! Event loop scheduling abstraction
//!
//! 连接管理器不会自己驱动任何I/O；它只需要两种能力：在下一次循环迭代中运行一个
//! 工作单元，以及在一段延迟之后运行一个工作单元。两者都必须可以取消。
//!
//! The connection manager never drives I/O itself; it only needs two
//! capabilities from the loop that owns it: run a unit of work on the next loop
//! turn, and run a unit of work after a delay. Both must be cancellable.

mod local;

pub use local::LocalEventLoop;

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;
use tokio::task::AbortHandle;

/// A unit of work handed to an [`EventLoop`].
/// 交给 [`EventLoop`] 的工作单元。
pub type LoopCallback = Box<dyn FnOnce() + 'static>;

/// The scheduling interface of a single-threaded event loop.
///
/// Implementations must never invoke the callback synchronously from inside
/// `run_in_loop` or `run_after`; callers rely on this while holding internal
/// borrows.
///
/// 单线程事件循环的调度接口。
///
/// 实现绝不能在 `run_in_loop` 或 `run_after` 内部同步调用回调；调用者在持有内部借用时依赖这一点。
pub trait EventLoop {
    /// Runs `callback` on the next turn of the loop.
    /// 在循环的下一次迭代中运行 `callback`。
    fn run_in_loop(&self, callback: LoopCallback) -> LoopTask;

    /// Runs `callback` once `delay` has elapsed.
    /// 在 `delay` 过去之后运行 `callback`。
    fn run_after(&self, delay: Duration, callback: LoopCallback) -> LoopTask;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    Pending,
    Running,
    Cancelled,
}

/// A cancellable handle to work scheduled on an [`EventLoop`].
///
/// 调度到 [`EventLoop`] 上的工作的可取消句柄。
pub struct LoopTask {
    state: Rc<Cell<TaskState>>,
    abort: Option<AbortHandle>,
}

/// The loop-side half of a [`LoopTask`]. The loop claims it right before
/// running the callback; a cancelled task cannot be claimed.
///
/// [`LoopTask`] 的循环端。循环在运行回调之前认领它；已取消的任务无法被认领。
pub struct LoopTicket {
    state: Rc<Cell<TaskState>>,
}

impl LoopTask {
    /// Creates a pending task and the ticket the loop uses to run it.
    /// 创建一个待处理任务以及循环用于运行它的票据。
    pub fn pair() -> (Self, LoopTicket) {
        let state = Rc::new(Cell::new(TaskState::Pending));
        let ticket = LoopTicket {
            state: state.clone(),
        };
        (Self { state, abort: None }, ticket)
    }

    /// Attaches a tokio abort handle so cancellation also frees the spawned task.
    /// 附加一个tokio中止句柄，使取消操作同时释放已生成的任务。
    pub fn with_abort_handle(mut self, abort: AbortHandle) -> Self {
        self.abort = Some(abort);
        self
    }

    /// Cancels the task. A cancelled task never runs. Cancelling a task that has
    /// already run, or cancelling twice, does nothing.
    ///
    /// 取消任务。已取消的任务永远不会运行。取消已运行的任务或重复取消不会产生任何效果。
    pub fn cancel(&self) {
        if self.state.get() == TaskState::Pending {
            self.state.set(TaskState::Cancelled);
            if let Some(abort) = &self.abort {
                abort.abort();
            }
        }
    }

    /// Returns `true` while the task has neither run nor been cancelled.
    /// 当任务既未运行也未被取消时返回 `true`。
    pub fn is_pending(&self) -> bool {
        self.state.get() == TaskState::Pending
    }
}

impl LoopTicket {
    /// Marks the task as running. Returns `false` if it was cancelled, in which
    /// case the callback must be skipped.
    ///
    /// 将任务标记为正在运行。如果任务已被取消则返回 `false`，此时必须跳过回调。
    pub fn claim(&self) -> bool {
        if self.state.get() == TaskState::Pending {
            self.state.set(TaskState::Running);
            true
        } else {
            false
        }
    }

    /// Returns `true` while the task can still be claimed.
    /// 当任务仍可被认领时返回 `true`。
    pub fn is_pending(&self) -> bool {
        self.state.get() == TaskState::Pending
    }
}

impl fmt::Debug for LoopTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopTask")
            .field("state", &self.state.get())
            .finish()
    }
}
