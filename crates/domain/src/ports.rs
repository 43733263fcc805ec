//! 外部协作方接口

use async_trait::async_trait;
use uuid::Uuid;

use archivist_core::SchedulerResult;

use crate::entities::DispatchTask;
use crate::events::SchedulerEvent;

/// 事件发布
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: SchedulerEvent) -> SchedulerResult<()>;
}

/// 与Analyst通信
#[async_trait]
pub trait AnalystTransport: Send + Sync {
    /// 推送任务，返回错误表示投递失败
    async fn dispatch(&self, endpoint: &str, task: &DispatchTask) -> SchedulerResult<()>;

    /// 请求Analyst终止任务，尽力而为
    async fn kill_task(&self, endpoint: &str, task_id: Uuid, reason: &str) -> SchedulerResult<()>;
}
