//! Archivist领域层
//!
//! 实体、仓储接口、事件以及外部协作方接口。不依赖具体存储或网络实现。

pub mod entities;
pub mod events;
pub mod ports;
pub mod repositories;

pub use entities::*;
pub use events::{DomainEvent, JobStateChangeEvent, SchedulerEvent, TaskStateChangeEvent};
pub use ports::{AnalystTransport, EventPublisher};
pub use repositories::{
    AnalystRepository, ClusterLockRepository, JobRepository, TaskErrorRepository, TaskRepository,
};
