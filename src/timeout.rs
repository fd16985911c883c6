//! 连接空闲超时集合
//! Connection idle timeout set
//!
//! 集合中的所有超时使用同一个时长，因此按调度顺序排列也就是按到期时间排列。
//! 集合只在事件循环上保留一个唤醒任务，指向最早的到期时间。
//!
//! Every timeout in the set uses the same duration, so scheduling order is also
//! expiry order. The set keeps a single wake-up task on the event loop, armed
//! for the earliest deadline.

mod stats;

pub use stats::TimeoutStats;

use crate::connection::ManagedConnection;
use crate::event_loop::{EventLoop, LoopTask};
use crate::registry::ConnectionKey;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::{Rc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

type DeadlineSlot = (Instant, u64);

struct ScheduledTimeout<C> {
    slot: DeadlineSlot,
    connection: Weak<C>,
}

struct TimeoutQueue<C> {
    deadlines: BTreeMap<DeadlineSlot, ConnectionKey>,
    entries: HashMap<ConnectionKey, ScheduledTimeout<C>>,
    next_seq: u64,
    wakeup: Option<(Instant, LoopTask)>,
    stats: TimeoutStats,
}

impl<C> TimeoutQueue<C> {
    fn remove(&mut self, key: ConnectionKey) -> Option<ScheduledTimeout<C>> {
        let scheduled = self.entries.remove(&key)?;
        self.deadlines.remove(&scheduled.slot);
        Some(scheduled)
    }

    fn earliest(&self) -> Option<Instant> {
        self.deadlines.keys().next().map(|(deadline, _)| *deadline)
    }
}

/// A set of per-connection idle timeouts sharing one duration.
///
/// Connections are identified by their registry key; scheduling a key that is
/// already pending moves its deadline instead of adding a second entry.
///
/// 共享同一时长的每连接空闲超时集合。
///
/// 连接由其注册表键标识；调度一个已在等待中的键会移动其到期时间，而不是添加第二个条目。
pub struct ConnectionTimeouts<C: ManagedConnection> {
    this: Weak<Self>,
    event_loop: Rc<dyn EventLoop>,
    default_timeout: Duration,
    queue: RefCell<TimeoutQueue<C>>,
}

impl<C: ManagedConnection> ConnectionTimeouts<C> {
    /// Creates a timeout set on `event_loop` using `default_timeout` for every
    /// registration.
    ///
    /// 在 `event_loop` 上创建一个超时集合，每次注册都使用 `default_timeout`。
    pub fn new(event_loop: Rc<dyn EventLoop>, default_timeout: Duration) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            event_loop,
            default_timeout,
            queue: RefCell::new(TimeoutQueue {
                deadlines: BTreeMap::new(),
                entries: HashMap::new(),
                next_seq: 0,
                wakeup: None,
                stats: TimeoutStats::default(),
            }),
        })
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// (Re)arms the timeout of `key`, replacing any pending deadline.
    ///
    /// 为 `key` （重新）设置超时，替换任何待处理的到期时间。
    pub fn schedule_timeout(&self, key: ConnectionKey, connection: Weak<C>) {
        let deadline = Instant::now() + self.default_timeout;
        {
            let mut queue = self.queue.borrow_mut();
            let rescheduled = queue.remove(key).is_some();
            let slot = (deadline, queue.next_seq);
            queue.next_seq += 1;
            queue.deadlines.insert(slot, key);
            queue.entries.insert(key, ScheduledTimeout { slot, connection });
            queue.stats.scheduled += 1;
            trace!(%key, rescheduled, timeout_ms = self.default_timeout.as_millis(), "Scheduled connection timeout");
        }
        self.arm_wakeup();
    }

    /// Removes the pending timeout of `key`. Returns `false` if none was pending.
    ///
    /// 移除 `key` 的待处理超时。如果没有待处理的超时则返回 `false`。
    pub fn cancel_timeout(&self, key: ConnectionKey) -> bool {
        let mut queue = self.queue.borrow_mut();
        if queue.remove(key).is_none() {
            return false;
        }
        queue.stats.cancelled += 1;
        if queue.entries.is_empty() {
            if let Some((_, wakeup)) = queue.wakeup.take() {
                wakeup.cancel();
            }
        }
        trace!(%key, "Cancelled connection timeout");
        true
    }

    /// Fires every timeout whose deadline is at or before `now` and returns
    /// how many fired. Connections are called with no internal borrow held, so
    /// they may reschedule or cancel from inside `timeout_expired`.
    ///
    /// 触发所有到期时间不晚于 `now` 的超时，并返回触发的数量。
    /// 调用连接时不持有任何内部借用，因此连接可以在 `timeout_expired` 中重新调度或取消。
    pub fn process_expired(&self, now: Instant) -> usize {
        let expired: Vec<Weak<C>> = {
            let mut queue = self.queue.borrow_mut();
            let mut expired = Vec::new();
            loop {
                let Some((&slot, &key)) = queue.deadlines.first_key_value() else {
                    break;
                };
                if slot.0 > now {
                    break;
                }
                if let Some(scheduled) = queue.remove(key) {
                    expired.push(scheduled.connection);
                }
            }
            queue.stats.expired += expired.len() as u64;
            expired
        };

        let fired = expired.len();
        if fired > 0 {
            trace!(fired, "Connection timeouts expired");
        }
        for connection in expired.into_iter().filter_map(|weak| weak.upgrade()) {
            connection.timeout_expired();
        }

        self.arm_wakeup();
        fired
    }

    /// Number of pending timeouts.
    /// 待处理超时的数量。
    pub fn pending(&self) -> usize {
        self.queue.borrow().entries.len()
    }

    pub fn is_scheduled(&self, key: ConnectionKey) -> bool {
        self.queue.borrow().entries.contains_key(&key)
    }

    pub fn deadline(&self, key: ConnectionKey) -> Option<Instant> {
        self.queue.borrow().entries.get(&key).map(|s| s.slot.0)
    }

    pub fn stats(&self) -> TimeoutStats {
        self.queue.borrow().stats
    }

    /// Makes sure a wake-up is pending no later than the earliest deadline.
    fn arm_wakeup(&self) {
        let mut queue = self.queue.borrow_mut();
        let Some(earliest) = queue.earliest() else {
            if let Some((_, wakeup)) = queue.wakeup.take() {
                wakeup.cancel();
            }
            return;
        };

        if let Some((at, wakeup)) = &queue.wakeup {
            if wakeup.is_pending() && *at <= earliest {
                return;
            }
            wakeup.cancel();
        }

        let this = self.this.clone();
        let delay = earliest.saturating_duration_since(Instant::now());
        let wakeup = self.event_loop.run_after(
            delay,
            Box::new(move || {
                if let Some(timeouts) = this.upgrade() {
                    timeouts.queue.borrow_mut().wakeup = None;
                    timeouts.process_expired(Instant::now());
                }
            }),
        );
        queue.wakeup = Some((earliest, wakeup));
    }
}

impl<C: ManagedConnection> Drop for ConnectionTimeouts<C> {
    fn drop(&mut self) {
        if let Some((_, wakeup)) = self.queue.get_mut().wakeup.take() {
            wakeup.cancel();
        }
    }
}
