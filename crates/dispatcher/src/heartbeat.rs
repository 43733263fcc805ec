use std::sync::Arc;

use tracing::debug;

use archivist_core::SchedulerResult;
use archivist_domain::entities::{Analyst, AnalystSpec};
use archivist_domain::repositories::{AnalystRepository, TaskRepository};

/// 处理Analyst心跳
///
/// 心跳刷新Analyst的资源信息，并为它报告的运行中任务续期。
/// 只有任务的持有者才能为任务续期。
pub struct HeartbeatHandler {
    analyst_repo: Arc<dyn AnalystRepository>,
    task_repo: Arc<dyn TaskRepository>,
}

impl HeartbeatHandler {
    pub fn new(analyst_repo: Arc<dyn AnalystRepository>, task_repo: Arc<dyn TaskRepository>) -> Self {
        Self {
            analyst_repo,
            task_repo,
        }
    }

    pub async fn handle_ping(&self, spec: &AnalystSpec) -> SchedulerResult<Analyst> {
        let analyst = self.analyst_repo.upsert(spec).await?;
        metrics::counter!("archivist.analyst.ping").increment(1);

        if let Some(task_id) = spec.task_id {
            if !self
                .task_repo
                .update_ping_time(task_id, &spec.endpoint)
                .await?
            {
                debug!(
                    "忽略 {} 对任务 {} 的心跳：任务不在该Analyst上运行",
                    spec.endpoint, task_id
                );
            }
        }

        Ok(analyst)
    }
}
