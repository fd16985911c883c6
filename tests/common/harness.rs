//! tests/common/harness.rs
use kestrel_connection_manager::{
    Config, ConnectionManager, ConnectionManagerCallback, EventLoop, LocalEventLoop,
    ManagedConnection, ManagerSlot,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Once;
use tracing::info;

/// Initializes tracing for tests, ensuring it's only done once.
pub fn init_tracing() {
    static TRACING_INIT: Once = Once::new();
    TRACING_INIT.call_once(|| {
        let filter = std::env::var("RUST_LOG")
            .unwrap_or_else(|_| "kestrel_connection_manager=debug".to_string());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .init();
    });
}

/// What a [`TestConnection`] was asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestEvent {
    TimeoutExpired,
    NotifyPendingShutdown,
    CloseWhenIdle,
    Drop,
    Dump(u8),
}

/// A connection built only on the public API. Closing removes it from its
/// manager, the way a real transport connection would.
pub struct TestConnection {
    pub id: usize,
    slot: ManagerSlot<Self>,
    busy: Cell<bool>,
    close_requested: Cell<bool>,
    closed: Cell<bool>,
    events: RefCell<Vec<TestEvent>>,
}

impl TestConnection {
    pub fn new(id: usize, busy: bool) -> Rc<Self> {
        Rc::new(Self {
            id,
            slot: ManagerSlot::new(),
            busy: Cell::new(busy),
            close_requested: Cell::new(false),
            closed: Cell::new(false),
            events: RefCell::new(Vec::new()),
        })
    }

    pub fn events(&self) -> Vec<TestEvent> {
        self.events.borrow().clone()
    }

    pub fn count(&self, event: TestEvent) -> usize {
        self.events.borrow().iter().filter(|e| **e == event).count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    pub fn finish_work(&self) {
        self.busy.set(false);
        if self.close_requested.get() {
            self.close();
        }
    }

    fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        if let Some(manager) = self.connection_manager() {
            manager.remove_connection(self);
        }
    }
}

impl ManagedConnection for TestConnection {
    fn is_busy(&self) -> bool {
        self.busy.get()
    }

    fn timeout_expired(&self) {
        self.events.borrow_mut().push(TestEvent::TimeoutExpired);
        self.close();
    }

    fn notify_pending_shutdown(&self) {
        self.events.borrow_mut().push(TestEvent::NotifyPendingShutdown);
    }

    fn close_when_idle(&self) {
        self.events.borrow_mut().push(TestEvent::CloseWhenIdle);
        self.close_requested.set(true);
        if !self.busy.get() {
            self.close();
        }
    }

    fn drop_connection(&self) {
        self.events.borrow_mut().push(TestEvent::Drop);
        self.close();
    }

    fn dump_connection_state(&self, verbosity: u8) {
        self.events.borrow_mut().push(TestEvent::Dump(verbosity));
        info!(id = self.id, busy = self.busy.get(), "Connection state");
    }

    fn manager_slot(&self) -> &ManagerSlot<Self> {
        &self.slot
    }
}

/// Counts membership notifications.
#[derive(Default)]
pub struct CountingCallback {
    pub added: Cell<usize>,
    pub removed: Cell<usize>,
    pub empty: Cell<usize>,
}

impl ConnectionManagerCallback<TestConnection> for CountingCallback {
    fn on_connection_added(&self, _manager: &ConnectionManager<TestConnection>) {
        self.added.set(self.added.get() + 1);
    }

    fn on_connection_removed(&self, _manager: &ConnectionManager<TestConnection>) {
        self.removed.set(self.removed.get() + 1);
    }

    fn on_empty(&self, _manager: &ConnectionManager<TestConnection>) {
        self.empty.set(self.empty.get() + 1);
    }
}

/// A manager on a [`LocalEventLoop`]. Must be called from inside a `LocalSet`.
pub fn local_manager(
    config: Config,
) -> (Rc<ConnectionManager<TestConnection>>, Rc<CountingCallback>) {
    init_tracing();
    let event_loop: Rc<dyn EventLoop> = Rc::new(LocalEventLoop::new().unwrap());
    let callback = Rc::new(CountingCallback::default());
    let as_callback: Rc<dyn ConnectionManagerCallback<TestConnection>> = callback.clone();
    let manager = ConnectionManager::new(event_loop, config, Some(as_callback)).unwrap();
    (manager, callback)
}

/// Yields to the `LocalSet` until `done` holds, at most `max_turns` times.
pub async fn run_turns_until(max_turns: usize, done: impl Fn() -> bool) -> bool {
    for _ in 0..max_turns {
        if done() {
            return true;
        }
        tokio::task::yield_now().await;
    }
    done()
}
