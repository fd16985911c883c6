//! 管理器成员变化回调
//! Manager membership change callback

use super::ConnectionManager;
use crate::connection::ManagedConnection;

/// A sink notified when the set of connections tracked by a manager changes.
///
/// Callbacks run synchronously on the loop thread. `on_empty` may drop the
/// last outside reference to the manager; the manager stays alive until the
/// operation that triggered the callback returns.
///
/// 当管理器跟踪的连接集合发生变化时接收通知。
///
/// 回调在循环线程上同步运行。`on_empty` 可以释放对管理器的最后一个外部引用；
/// 管理器会一直存活到触发回调的操作返回为止。
pub trait ConnectionManagerCallback<C: ManagedConnection> {
    /// A connection was registered with `manager`.
    /// 一个连接已注册到 `manager`。
    fn on_connection_added(&self, manager: &ConnectionManager<C>);

    /// A connection was removed from `manager`.
    /// 一个连接已从 `manager` 中移除。
    fn on_connection_removed(&self, manager: &ConnectionManager<C>);

    /// `manager` no longer tracks any connection.
    /// `manager` 不再跟踪任何连接。
    fn on_empty(&self, manager: &ConnectionManager<C>);
}
