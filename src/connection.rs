//! 受管理连接的能力接口
//! Capability interface of a managed connection
//!
//! 连接由外部组件（接收器、连接工厂）创建并拥有。管理器只记录一个指回自身的链接，
//! 并通过此 trait 向连接发出通知和关闭请求。
//!
//! Connections are created and owned by an external component (acceptor,
//! connection factory). The manager only records a link back to itself and
//! talks to the connection through this trait.

use crate::manager::ConnectionManager;
use crate::registry::ConnectionKey;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

/// The contract a connection must satisfy to be tracked by a
/// [`ConnectionManager`].
///
/// Every method may call back into the manager synchronously, for example to
/// remove itself from [`close_when_idle`](Self::close_when_idle).
///
/// 连接被 [`ConnectionManager`] 跟踪所必须满足的契约。
///
/// 每个方法都可以同步地回调管理器，例如在 [`close_when_idle`](Self::close_when_idle) 中移除自身。
pub trait ManagedConnection: Sized + 'static {
    /// Whether the connection has in-flight work.
    /// 连接是否有正在处理的工作。
    fn is_busy(&self) -> bool;

    /// The idle timeout registered with the manager's timeout set expired.
    /// 在管理器超时集合中注册的空闲超时已到期。
    fn timeout_expired(&self);

    /// The server is going down; the connection should tell its peer.
    /// 服务器即将关闭；连接应当通知其对端。
    fn notify_pending_shutdown(&self);

    /// Close now if idle, otherwise close as soon as the current work is done.
    /// 如果空闲则立即关闭，否则在当前工作完成后尽快关闭。
    fn close_when_idle(&self);

    /// Hard close, without waiting for in-flight work.
    /// 强制关闭，不等待正在处理的工作。
    fn drop_connection(&self);

    /// Writes the connection's internal state to the diagnostic log.
    /// 将连接的内部状态写入诊断日志。
    fn dump_connection_state(&self, verbosity: u8);

    /// The back-reference storage embedded in the connection.
    /// 嵌入在连接中的反向引用存储。
    fn manager_slot(&self) -> &ManagerSlot<Self>;

    /// The manager currently tracking this connection, if any.
    /// 当前跟踪此连接的管理器（如果有）。
    fn connection_manager(&self) -> Option<Rc<ConnectionManager<Self>>> {
        self.manager_slot().manager()
    }
}

/// The back-reference from a connection to the manager owning its registry
/// entry.
///
/// 从连接指向拥有其注册表条目的管理器的反向引用。
pub struct ManagerLink<C: ManagedConnection> {
    pub(crate) manager: Weak<ConnectionManager<C>>,
    pub(crate) key: ConnectionKey,
}

impl<C: ManagedConnection> Clone for ManagerLink<C> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            key: self.key,
        }
    }
}

impl<C: ManagedConnection> ManagerLink<C> {
    /// The connection's key in the manager's registry.
    /// 连接在管理器注册表中的键。
    pub fn key(&self) -> ConnectionKey {
        self.key
    }

    /// Whether this link points at `manager`.
    /// 此链接是否指向 `manager`。
    pub(crate) fn points_to(&self, manager: &Weak<ConnectionManager<C>>) -> bool {
        Weak::ptr_eq(&self.manager, manager)
    }
}

/// Storage for a [`ManagerLink`], embedded in every connection type.
///
/// Only the manager writes to it, which keeps "registered with manager M" and
/// "back-reference points to M" in lockstep.
///
/// 嵌入在每种连接类型中的 [`ManagerLink`] 存储。
///
/// 只有管理器会写入它，这使“已在管理器M中注册”与“反向引用指向M”始终保持一致。
pub struct ManagerSlot<C: ManagedConnection> {
    link: RefCell<Option<ManagerLink<C>>>,
}

impl<C: ManagedConnection> Default for ManagerSlot<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ManagedConnection> ManagerSlot<C> {
    pub fn new() -> Self {
        Self {
            link: RefCell::new(None),
        }
    }

    /// The current link. A link to a manager that no longer exists reads as
    /// `None`.
    ///
    /// 当前链接。指向已不存在的管理器的链接读作 `None`。
    pub fn link(&self) -> Option<ManagerLink<C>> {
        self.link
            .borrow()
            .as_ref()
            .filter(|link| link.manager.strong_count() > 0)
            .cloned()
    }

    /// The manager this connection is registered with.
    /// 此连接注册所在的管理器。
    pub fn manager(&self) -> Option<Rc<ConnectionManager<C>>> {
        self.link.borrow().as_ref()?.manager.upgrade()
    }

    pub fn is_managed(&self) -> bool {
        self.link().is_some()
    }

    pub(crate) fn set(&self, link: ManagerLink<C>) {
        *self.link.borrow_mut() = Some(link);
    }

    pub(crate) fn clear(&self) {
        self.link.borrow_mut().take();
    }
}

impl<C: ManagedConnection> fmt::Debug for ManagerSlot<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let link = self.link.borrow();
        f.debug_struct("ManagerSlot")
            .field("key", &link.as_ref().map(|l| l.key))
            .field("manager_alive", &link.as_ref().map(|l| l.manager.strong_count() > 0))
            .finish()
    }
}
