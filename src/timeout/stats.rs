//! 超时集合统计信息
//! Timeout set statistics

/// Counters kept by a [`ConnectionTimeouts`](super::ConnectionTimeouts) set.
///
/// [`ConnectionTimeouts`](super::ConnectionTimeouts) 集合维护的计数器。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeoutStats {
    /// Calls to `schedule_timeout`, re-arms included.
    /// `schedule_timeout` 的调用次数，包括重新设置。
    pub scheduled: u64,
    /// Pending timeouts removed before they expired.
    /// 在到期之前被移除的待处理超时。
    pub cancelled: u64,
    /// Timeouts that fired.
    /// 已触发的超时。
    pub expired: u64,
}
