//! 优雅关闭状态机与强制关闭
//! Graceful shutdown state machine and forced teardown

use super::ConnectionManager;
use crate::connection::ManagedConnection;
use crate::event_loop::LoopTask;
use crate::registry::ConnectionKey;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, trace};

/// Phase of the graceful shutdown of one manager.
///
/// `None -> Notify -> CloseIdle`. `CloseIdle` is terminal for the lifetime of
/// the manager.
///
/// 单个管理器的优雅关闭阶段。`CloseIdle` 在管理器的生命周期内是终态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownPhase {
    /// No shutdown in progress.
    /// 没有正在进行的关闭。
    #[default]
    None,
    /// Connections are being told that the server is going down.
    /// 正在通知连接服务器即将关闭。
    Notify,
    /// Connections are being closed as soon as they are idle.
    /// 连接在空闲后立即被关闭。
    CloseIdle,
}

impl<C: ManagedConnection> ConnectionManager<C> {
    /// Starts, or continues, the graceful shutdown.
    ///
    /// With a positive `idle_grace`, connections are first notified and the
    /// close-idle sweep is forced once the grace period elapses. With a zero
    /// grace, idle connections are closed right away. A drain step runs now in
    /// either case.
    ///
    /// 开始或继续优雅关闭。
    ///
    /// 如果 `idle_grace` 为正，则先通知连接，并在宽限期结束后强制执行关闭空闲连接的扫描。
    /// 如果宽限期为零，则立即关闭空闲连接。两种情况下都会立即运行一个排空步骤。
    pub fn initiate_graceful_shutdown(&self, idle_grace: Duration) {
        {
            let mut state = self.state.borrow_mut();
            if idle_grace > Duration::ZERO {
                if state.phase == ShutdownPhase::None {
                    state.phase = ShutdownPhase::Notify;
                }
                if let Some(previous) = state.grace_task.take() {
                    previous.cancel();
                }
                let this = self.this.clone();
                state.grace_task = Some(self.event_loop.run_after(
                    idle_grace,
                    Box::new(move || {
                        if let Some(manager) = this.upgrade() {
                            manager.idle_grace_expired();
                        }
                    }),
                ));
                trace!(
                    manager_id = self.id,
                    idle_grace_ms = idle_grace.as_millis(),
                    "Scheduling idle grace period"
                );
            } else {
                state.phase = ShutdownPhase::CloseIdle;
                trace!(manager_id = self.id, "Proceeding directly to closing idle connections");
            }
        }
        self.drain_all_connections();
    }

    /// The current shutdown phase.
    /// 当前的关闭阶段。
    pub fn shutdown_phase(&self) -> ShutdownPhase {
        self.state.borrow().phase
    }

    /// Runs one drain step: visits at most one quantum of connections starting
    /// at the idle cursor, then either reschedules itself on the next loop turn
    /// or finishes the sweep.
    ///
    /// 运行一个排空步骤：从空闲游标开始最多访问一个量子的连接，然后要么在下一次循环迭代中
    /// 重新调度自身，要么结束本次扫描。
    pub(crate) fn drain_all_connections(&self) {
        let Some(_guard) = self.this.upgrade() else {
            return;
        };

        let (mut cursor, epoch, pass_phase) = {
            let mut state = self.state.borrow_mut();
            state.replace_drain_task(None);
            state.drain_epoch += 1;
            let cursor = state.idle_cursor.or_else(|| state.registry.front());
            (cursor, state.drain_epoch, state.phase)
        };

        let quantum = self.shutdown_config.drain_quantum;
        let mut visited = 0;
        let mut num_cleared = 0usize;
        let mut num_kept = 0usize;

        while let Some(key) = cursor {
            if visited >= quantum {
                break;
            }
            let next = {
                let mut state = self.state.borrow_mut();
                match state.registry.get(key).cloned() {
                    Some(connection) => {
                        // 先推进游标，回调中的删除会将其继续推进
                        // Advance first; removals from inside the call move it further
                        state.idle_cursor = state.registry.next(key);
                        Some((connection, state.phase))
                    }
                    None => {
                        debug_assert!(false, "idle cursor designates a removed connection");
                        state.idle_cursor = None;
                        None
                    }
                }
            };
            let Some((connection, phase)) = next else {
                cursor = None;
                break;
            };
            visited += 1;

            match phase {
                ShutdownPhase::CloseIdle => {
                    if connection.is_busy() {
                        num_kept += 1;
                    } else {
                        num_cleared += 1;
                    }
                    connection.close_when_idle();
                }
                ShutdownPhase::None | ShutdownPhase::Notify => {
                    connection.notify_pending_shutdown();
                }
            }

            let state = self.state.borrow();
            if state.drain_epoch != epoch {
                // 回调重新进入了管理器；由较新的操作接管关闭状态
                // A callback re-entered the manager; the newer operation owns the shutdown state
                trace!(manager_id = self.id, visited, "Drain pass superseded");
                return;
            }
            cursor = state.idle_cursor;
        }

        if pass_phase == ShutdownPhase::CloseIdle {
            debug!(
                manager_id = self.id,
                num_cleared, num_kept, "Idle connections cleared, busy connections kept"
            );
        }

        let mut state = self.state.borrow_mut();
        if cursor.is_some() {
            let step = self.schedule_drain_step();
            state.replace_drain_task(Some(step));
            trace!(manager_id = self.id, visited, "Drain quantum exhausted, continuing next loop turn");
        } else if state.phase != ShutdownPhase::CloseIdle {
            state.phase = ShutdownPhase::CloseIdle;
            debug!(manager_id = self.id, "Notify sweep complete");
            // 宽限定时器负责完整的关闭空闲扫描；没有定时器时由下一次循环迭代负责
            // The grace timer runs the full close-idle sweep; without one, the next loop turn does
            if !state.grace_task.as_ref().is_some_and(|task| task.is_pending()) {
                let step = self.schedule_drain_step();
                state.replace_drain_task(Some(step));
            }
        } else {
            trace!(manager_id = self.id, "Close-idle sweep complete");
        }
    }

    fn schedule_drain_step(&self) -> LoopTask {
        let this = self.this.clone();
        self.event_loop.run_in_loop(Box::new(move || {
            if let Some(manager) = this.upgrade() {
                manager.drain_all_connections();
            }
        }))
    }

    /// The idle grace period elapsed: skip whatever is left of the notify sweep
    /// and run a full close-idle sweep from the start of the registry.
    fn idle_grace_expired(&self) {
        let Some(_guard) = self.this.upgrade() else {
            return;
        };
        {
            let mut state = self.state.borrow_mut();
            state.grace_task = None;
            state.phase = ShutdownPhase::CloseIdle;
            state.idle_cursor = None;
            state.replace_drain_task(None);
        }
        debug!(manager_id = self.id, "Idle grace period expired");
        self.drain_all_connections();
    }

    /// Drops every connection immediately, without waiting for in-flight work.
    ///
    /// Cancels the idle grace timer and any pending drain step first. The first
    /// few connections get their state dumped for diagnostics. `on_empty` fires
    /// once at the end, even if the manager was already empty.
    ///
    /// 立即丢弃所有连接，不等待正在处理的工作。
    ///
    /// 首先取消空闲宽限定时器和任何待处理的排空步骤。前几个连接会转储其状态以供诊断。
    /// 最后会触发一次 `on_empty`，即使管理器原本就是空的。
    pub fn drop_all_connections(&self) {
        let Some(_guard) = self.this.upgrade() else {
            return;
        };

        let count = {
            let mut state = self.state.borrow_mut();
            state.cancel_loop_tasks();
            state.drain_epoch += 1;
            state.registry.len()
        };
        debug!(manager_id = self.id, count, "Connections to drop");

        let mut dumped = 0;
        loop {
            let Some((key, connection)) = self.pop_front() else {
                break;
            };
            self.timeouts.cancel_timeout(key);
            connection.manager_slot().clear();
            if dumped < self.shutdown_config.max_conns_to_dump {
                dumped += 1;
                connection.dump_connection_state(self.shutdown_config.dump_verbosity);
            }
            connection.drop_connection();
        }

        {
            let mut state = self.state.borrow_mut();
            state.idle_cursor = None;
            state.replace_drain_task(None);
        }

        if let Some(callback) = &self.callback {
            callback.on_empty(self);
        }
    }

    /// Hard-drops up to `max` connections that are not busy, front to back.
    /// Each one goes through the regular removal path, notifications included.
    /// Returns how many were dropped.
    ///
    /// 从前到后强制丢弃最多 `max` 个不忙的连接。每个连接都经过常规的移除路径（包括通知）。
    /// 返回被丢弃的数量。
    pub fn drop_idle_connections(&self, max: usize) -> usize {
        let Some(_guard) = self.this.upgrade() else {
            return 0;
        };

        let candidates: Vec<Rc<C>> = self
            .connections()
            .into_iter()
            .filter(|connection| !connection.is_busy())
            .take(max)
            .collect();

        let mut dropped = 0;
        for connection in candidates {
            // 之前的回调可能已经移除或占用了它
            // An earlier callback may have removed it or made it busy
            if !self.contains(&connection) || connection.is_busy() {
                continue;
            }
            self.remove_connection(&connection);
            connection.drop_connection();
            dropped += 1;
        }
        debug!(manager_id = self.id, dropped, "Dropped idle connections");
        dropped
    }

    fn pop_front(&self) -> Option<(ConnectionKey, Rc<C>)> {
        let mut state = self.state.borrow_mut();
        let key = state.registry.front()?;
        state.unlink(key).map(|connection| (key, connection))
    }
}
