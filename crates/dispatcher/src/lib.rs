//! Archivist调度核心
//!
//! 任务状态机、派发、心跳、孤儿任务回收、任务扩展、集群锁以及资产计数汇总。

pub mod cluster_lock;
pub mod counters;
pub mod dispatch_service;
pub mod expansion;
pub mod heartbeat;
pub mod job_service;
pub mod orphan_reaper;

#[cfg(test)]
pub mod test_utils;

pub use cluster_lock::{ClusterLockExecutor, ClusterLockExecutorConfig, LockHandle};
pub use counters::CounterAggregator;
pub use dispatch_service::{
    DispatchService, DispatchServiceConfig, DispatchServiceTrait, DispatchStats,
};
pub use expansion::TaskExpansion;
pub use heartbeat::HeartbeatHandler;
pub use job_service::{JobService, JobServiceConfig};
pub use orphan_reaper::{MaintenanceReport, MaintenanceService, OrphanReaper, OrphanReaperConfig};
