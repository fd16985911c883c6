//! 连接管理器 - 跟踪一个事件循环线程上的所有活动连接
//! Connection Manager - tracks every live connection of one event loop thread
//!
//! 管理器维护一个按插入顺序排列的连接注册表，驱动空闲超时，并执行两阶段的优雅关闭：
//! 先通知所有连接，然后逐步关闭空闲连接。每次循环迭代最多处理一个量子的连接。
//!
//! The manager keeps an insertion-ordered registry of connections, drives
//! their idle timeouts and runs the two-phase graceful shutdown: notify every
//! connection, then incrementally close the idle ones. Each loop turn handles
//! at most one quantum of connections.

mod callback;
mod shutdown;


pub use callback::ConnectionManagerCallback;
pub use shutdown::ShutdownPhase;

use crate::config::{Config, ShutdownConfig};
use crate::connection::{ManagedConnection, ManagerLink};
use crate::error::Result;
use crate::event_loop::{EventLoop, LoopTask};
use crate::registry::{ConnectionKey, Registry};
use crate::timeout::{ConnectionTimeouts, TimeoutStats};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{trace, warn};

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

/// Mutable manager state. Never borrowed across a call into a connection or
/// the callback.
struct ManagerState<C> {
    registry: Registry<Rc<C>>,
    /// Resume point of the drain pass. `None` is "end".
    idle_cursor: Option<ConnectionKey>,
    phase: ShutdownPhase,
    drain_task: Option<LoopTask>,
    grace_task: Option<LoopTask>,
    /// Bumped by every drain pass and every forced teardown. A pass that sees
    /// it change after calling into a connection was superseded.
    drain_epoch: u64,
}

impl<C> ManagerState<C> {
    /// Erases `key`, first moving the idle cursor off it.
    fn unlink(&mut self, key: ConnectionKey) -> Option<Rc<C>> {
        if self.idle_cursor == Some(key) {
            self.idle_cursor = self.registry.next(key);
        }
        self.registry.remove(key)
    }

    /// Stores the next drain step, cancelling the one it replaces.
    fn replace_drain_task(&mut self, task: Option<LoopTask>) {
        if let Some(previous) = std::mem::replace(&mut self.drain_task, task) {
            previous.cancel();
        }
    }

    fn cancel_loop_tasks(&mut self) {
        if let Some(task) = self.grace_task.take() {
            task.cancel();
        }
        if let Some(task) = self.drain_task.take() {
            task.cancel();
        }
    }
}

/// Tracks the live connections of one event loop thread.
///
/// Always handled through an `Rc`. The manager holds a `Weak` to itself: loop
/// tasks it schedules capture only that `Weak`, and long-running operations
/// upgrade it for their whole duration so that a callback dropping the last
/// outside reference cannot tear the manager down mid-operation.
///
/// 跟踪一个事件循环线程的活动连接。
///
/// 总是通过 `Rc` 使用。管理器持有一个指向自身的 `Weak`：它调度的循环任务只捕获这个 `Weak`，
/// 长时间运行的操作在整个执行期间将其升级，因此释放最后一个外部引用的回调无法在操作中途销毁管理器。
pub struct ConnectionManager<C: ManagedConnection> {
    this: Weak<Self>,
    id: u64,
    event_loop: Rc<dyn EventLoop>,
    timeouts: Rc<ConnectionTimeouts<C>>,
    callback: Option<Rc<dyn ConnectionManagerCallback<C>>>,
    shutdown_config: ShutdownConfig,
    state: RefCell<ManagerState<C>>,
}

impl<C: ManagedConnection> ConnectionManager<C> {
    /// Creates a manager bound to `event_loop`.
    ///
    /// 创建一个绑定到 `event_loop` 的管理器。
    pub fn new(
        event_loop: Rc<dyn EventLoop>,
        config: Config,
        callback: Option<Rc<dyn ConnectionManagerCallback<C>>>,
    ) -> Result<Rc<Self>> {
        config.validate()?;
        let timeouts = ConnectionTimeouts::new(event_loop.clone(), config.connection.idle_timeout);
        let manager = Rc::new_cyclic(|this| Self {
            this: this.clone(),
            id: NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed),
            event_loop,
            timeouts,
            callback,
            shutdown_config: config.shutdown,
            state: RefCell::new(ManagerState {
                registry: Registry::new(),
                idle_cursor: None,
                phase: ShutdownPhase::None,
                drain_task: None,
                grace_task: None,
                drain_epoch: 0,
            }),
        });
        trace!(manager_id = manager.id, "Created connection manager");
        Ok(manager)
    }

    /// Registers `connection`, optionally arming its idle timeout.
    ///
    /// Adding a connection this manager already tracks only re-arms the
    /// timeout. A connection tracked by another manager is first fully removed
    /// from it, notifications included, before it is inserted here.
    ///
    /// 注册 `connection`，并可选择设置其空闲超时。
    ///
    /// 添加一个已由本管理器跟踪的连接只会重新设置超时。由另一个管理器跟踪的连接会先从
    /// 原管理器中完全移除（包括通知），然后才插入这里。
    pub fn add_connection(&self, connection: &Rc<C>, arm_timeout: bool) {
        let Some(_guard) = self.this.upgrade() else {
            return;
        };
        let current = connection.manager_slot().manager();
        let already_managed = current
            .as_ref()
            .is_some_and(|manager| std::ptr::eq(Rc::as_ptr(manager), self));

        if !already_managed {
            if let Some(previous) = current {
                trace!(
                    manager_id = self.id,
                    previous_manager_id = previous.id,
                    "Transferring connection from another manager"
                );
                previous.remove_connection(connection);
            }

            let key = self.state.borrow_mut().registry.push_back(connection.clone());
            connection.manager_slot().set(ManagerLink {
                manager: self.this.clone(),
                key,
            });
            trace!(manager_id = self.id, %key, "Added connection");

            if let Some(callback) = &self.callback {
                callback.on_connection_added(self);
            }
        }

        if arm_timeout {
            self.schedule_timeout(connection);
        }
    }

    /// Deregisters `connection`. Does nothing if this manager does not track it.
    ///
    /// 注销 `connection`。如果本管理器没有跟踪它，则不执行任何操作。
    pub fn remove_connection(&self, connection: &C) {
        let Some(_guard) = self.this.upgrade() else {
            return;
        };
        let Some(key) = self.key_of(connection) else {
            return;
        };

        self.timeouts.cancel_timeout(key);
        connection.manager_slot().clear();
        let removed = self.state.borrow_mut().unlink(key);
        debug_assert!(removed.is_some(), "linked connection missing from registry");
        trace!(manager_id = self.id, %key, "Removed connection");

        if let Some(callback) = &self.callback {
            callback.on_connection_removed(self);
            if self.connection_count() == 0 {
                callback.on_empty(self);
            }
        }
        drop(removed);
    }

    /// Arms, or re-arms, the idle timeout of a connection this manager tracks.
    ///
    /// 设置或重新设置本管理器所跟踪连接的空闲超时。
    pub fn schedule_timeout(&self, connection: &C) {
        let Some(key) = self.key_of(connection) else {
            debug_assert!(false, "schedule_timeout on a connection of another manager");
            warn!(manager_id = self.id, "Ignoring timeout for unmanaged connection");
            return;
        };
        let weak = match self.state.borrow().registry.get(key) {
            Some(connection) => Rc::downgrade(connection),
            None => return,
        };
        self.timeouts.schedule_timeout(key, weak);
    }

    pub fn connection_count(&self) -> usize {
        self.state.borrow().registry.len()
    }

    /// Whether `connection` is registered with this manager.
    /// `connection` 是否已注册到本管理器。
    pub fn contains(&self, connection: &C) -> bool {
        self.key_of(connection).is_some()
    }

    /// A snapshot of the tracked connections, in registry order.
    /// 按注册表顺序排列的已跟踪连接快照。
    pub fn connections(&self) -> Vec<Rc<C>> {
        self.state
            .borrow()
            .registry
            .iter()
            .map(|(_, connection)| connection.clone())
            .collect()
    }

    /// Process-unique id, attached to every log record of this manager.
    /// 进程内唯一的ID，附加在本管理器的每条日志记录上。
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn default_timeout(&self) -> Duration {
        self.timeouts.default_timeout()
    }

    pub fn timeout_stats(&self) -> TimeoutStats {
        self.timeouts.stats()
    }

    /// Number of connections with a pending idle timeout.
    /// 具有待处理空闲超时的连接数量。
    pub fn pending_timeouts(&self) -> usize {
        self.timeouts.pending()
    }

    /// The registry key of `connection` if its back-reference points here.
    fn key_of(&self, connection: &C) -> Option<ConnectionKey> {
        let link = connection.manager_slot().link()?;
        if !link.points_to(&self.this) {
            return None;
        }
        let key = link.key();
        let state = self.state.borrow();
        match state.registry.get(key) {
            Some(member) if std::ptr::eq(Rc::as_ptr(member), connection) => Some(key),
            _ => {
                debug_assert!(false, "back-reference without registry membership");
                None
            }
        }
    }
}

impl<C: ManagedConnection> Drop for ConnectionManager<C> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.cancel_loop_tasks();
        while let Some((key, connection)) = state.registry.pop_front() {
            self.timeouts.cancel_timeout(key);
            connection.manager_slot().clear();
        }
    }
}

impl<C: ManagedConnection> fmt::Debug for ConnectionManager<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("ConnectionManager")
            .field("id", &self.id)
            .field("connections", &state.registry.len())
            .field("phase", &state.phase)
            .field("idle_cursor", &state.idle_cursor)
            .field("default_timeout", &self.timeouts.default_timeout())
            .finish()
    }
}
