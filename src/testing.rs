//! 测试辅助工具模块
//! Test utilities module

#![cfg(test)]

use crate::connection::{ManagedConnection, ManagerSlot};
use crate::event_loop::{EventLoop, LoopCallback, LoopTask, LoopTicket};
use crate::manager::{ConnectionManager, ConnectionManagerCallback};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the manager (or the timeout set) asked a [`MockConnection`] to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnEvent {
    TimeoutExpired,
    NotifyPendingShutdown,
    CloseWhenIdle,
    Drop,
    Dump(u8),
}

type ConnHook = Rc<dyn Fn(&MockConnection)>;

/// A connection that records every call and behaves like a real one: idle
/// connections close (and remove themselves) when asked to, busy ones close
/// once their work is finished.
pub struct MockConnection {
    pub id: u32,
    slot: ManagerSlot<Self>,
    busy: Cell<bool>,
    close_requested: Cell<bool>,
    closed: Cell<bool>,
    events: RefCell<Vec<ConnEvent>>,
    on_notify: RefCell<Option<ConnHook>>,
}

impl MockConnection {
    pub fn new(id: u32) -> Rc<Self> {
        Rc::new(Self {
            id,
            slot: ManagerSlot::new(),
            busy: Cell::new(false),
            close_requested: Cell::new(false),
            closed: Cell::new(false),
            events: RefCell::new(Vec::new()),
            on_notify: RefCell::new(None),
        })
    }

    pub fn new_busy(id: u32) -> Rc<Self> {
        let conn = Self::new(id);
        conn.busy.set(true);
        conn
    }

    pub fn events(&self) -> Vec<ConnEvent> {
        self.events.borrow().clone()
    }

    pub fn count(&self, event: ConnEvent) -> usize {
        self.events.borrow().iter().filter(|e| **e == event).count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Runs `hook` every time the connection is notified of a pending shutdown.
    pub fn on_notify(&self, hook: impl Fn(&MockConnection) + 'static) {
        *self.on_notify.borrow_mut() = Some(Rc::new(hook));
    }

    /// The in-flight work completed; closes if a close was requested meanwhile.
    pub fn finish_work(&self) {
        self.busy.set(false);
        if self.close_requested.get() {
            self.close();
        }
    }

    fn record(&self, event: ConnEvent) {
        self.events.borrow_mut().push(event);
    }

    fn close(&self) {
        self.closed.set(true);
        if let Some(manager) = self.connection_manager() {
            manager.remove_connection(self);
        }
    }
}

impl ManagedConnection for MockConnection {
    fn is_busy(&self) -> bool {
        self.busy.get()
    }

    fn timeout_expired(&self) {
        self.record(ConnEvent::TimeoutExpired);
        self.close();
    }

    fn notify_pending_shutdown(&self) {
        self.record(ConnEvent::NotifyPendingShutdown);
        let hook = self.on_notify.borrow().clone();
        if let Some(hook) = hook {
            hook(self);
        }
    }

    fn close_when_idle(&self) {
        self.record(ConnEvent::CloseWhenIdle);
        self.close_requested.set(true);
        if !self.busy.get() {
            self.close();
        }
    }

    fn drop_connection(&self) {
        self.record(ConnEvent::Drop);
        self.close();
    }

    fn dump_connection_state(&self, verbosity: u8) {
        self.record(ConnEvent::Dump(verbosity));
    }

    fn manager_slot(&self) -> &ManagerSlot<Self> {
        &self.slot
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackEvent {
    Added(u64),
    Removed(u64),
    Empty(u64),
}

/// Records membership notifications, tagged with the manager id. Can own a
/// manager and release it from `on_empty`.
#[derive(Default)]
pub struct RecordingCallback {
    events: RefCell<Vec<CallbackEvent>>,
    owned: RefCell<Option<Rc<ConnectionManager<MockConnection>>>>,
}

impl RecordingCallback {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn events(&self) -> Vec<CallbackEvent> {
        self.events.borrow().clone()
    }

    pub fn count(&self, event: CallbackEvent) -> usize {
        self.events.borrow().iter().filter(|e| **e == event).count()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }

    /// Keeps `manager` alive until the next `on_empty`.
    pub fn own_until_empty(&self, manager: Rc<ConnectionManager<MockConnection>>) {
        *self.owned.borrow_mut() = Some(manager);
    }
}

impl ConnectionManagerCallback<MockConnection> for RecordingCallback {
    fn on_connection_added(&self, manager: &ConnectionManager<MockConnection>) {
        self.events.borrow_mut().push(CallbackEvent::Added(manager.id()));
    }

    fn on_connection_removed(&self, manager: &ConnectionManager<MockConnection>) {
        self.events.borrow_mut().push(CallbackEvent::Removed(manager.id()));
    }

    fn on_empty(&self, manager: &ConnectionManager<MockConnection>) {
        self.events.borrow_mut().push(CallbackEvent::Empty(manager.id()));
        let released = self.owned.borrow_mut().take();
        drop(released);
    }
}

/// A deterministic [`EventLoop`]: nothing runs until the test calls
/// [`run_turn`](Self::run_turn) or [`fire_delayed`](Self::fire_delayed).
#[derive(Default)]
pub struct ManualEventLoop {
    turn_queue: RefCell<VecDeque<(LoopTicket, LoopCallback)>>,
    delayed: RefCell<Vec<(Duration, LoopTicket, LoopCallback)>>,
}

impl ManualEventLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the tasks queued before this turn. Returns how many ran.
    pub fn run_turn(&self) -> usize {
        let batch: Vec<_> = self.turn_queue.borrow_mut().drain(..).collect();
        let mut ran = 0;
        for (ticket, callback) in batch {
            if ticket.claim() {
                callback();
                ran += 1;
            }
        }
        ran
    }

    /// Fires every delayed task regardless of its delay. Returns how many ran.
    pub fn fire_delayed(&self) -> usize {
        let batch: Vec<_> = self.delayed.borrow_mut().drain(..).collect();
        let mut ran = 0;
        for (_, ticket, callback) in batch {
            if ticket.claim() {
                callback();
                ran += 1;
            }
        }
        ran
    }

    pub fn pending_turn_tasks(&self) -> usize {
        self.turn_queue
            .borrow()
            .iter()
            .filter(|(ticket, _)| ticket.is_pending())
            .count()
    }

    pub fn pending_delayed(&self) -> usize {
        self.delayed
            .borrow()
            .iter()
            .filter(|(_, ticket, _)| ticket.is_pending())
            .count()
    }

    /// Delays of the delayed tasks that can still run.
    pub fn pending_delays(&self) -> Vec<Duration> {
        self.delayed
            .borrow()
            .iter()
            .filter(|(_, ticket, _)| ticket.is_pending())
            .map(|(delay, _, _)| *delay)
            .collect()
    }
}

impl EventLoop for ManualEventLoop {
    fn run_in_loop(&self, callback: LoopCallback) -> LoopTask {
        let (task, ticket) = LoopTask::pair();
        self.turn_queue.borrow_mut().push_back((ticket, callback));
        task
    }

    fn run_after(&self, delay: Duration, callback: LoopCallback) -> LoopTask {
        let (task, ticket) = LoopTask::pair();
        self.delayed.borrow_mut().push((delay, ticket, callback));
        task
    }
}

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Runs `f` with a debug-level subscriber and returns everything it logged.
pub fn capture_logs(f: impl FnOnce()) -> String {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    tracing::subscriber::with_default(subscriber, f);
    let bytes = buffer.0.lock().unwrap().clone();
    String::from_utf8_lossy(&bytes).into_owned()
}
