use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, error, warn};
use uuid::Uuid;

use archivist_core::{SchedulerError, SchedulerResult, TransportConfig};
use archivist_domain::entities::DispatchTask;
use archivist_domain::ports::AnalystTransport;

/// 通过HTTP与Analyst通信
///
/// - 派发：`POST {endpoint}/task`
/// - 终止：`DELETE {endpoint}/task/{task_id}`
pub struct HttpAnalystClient {
    http_client: reqwest::Client,
}

impl HttpAnalystClient {
    pub fn new(config: &TransportConfig) -> SchedulerResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .build()
            .map_err(|e| SchedulerError::Configuration(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self { http_client })
    }

    fn url(endpoint: &str, path: &str) -> String {
        format!("{}/{}", endpoint.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl AnalystTransport for HttpAnalystClient {
    async fn dispatch(&self, endpoint: &str, task: &DispatchTask) -> SchedulerResult<()> {
        let url = Self::url(endpoint, "task");

        match self.http_client.post(&url).json(task).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    debug!("任务 {} 已投递到 {}", task.task.id, endpoint);
                    Ok(())
                } else {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    warn!("Analyst {} 拒绝任务 {}: HTTP {} - {}", endpoint, task.task.id, status, body);
                    Err(SchedulerError::Transport(format!(
                        "派发任务失败: HTTP {status} - {body}"
                    )))
                }
            }
            Err(e) => {
                error!("连接Analyst {} 失败: {}", endpoint, e);
                Err(SchedulerError::Transport(format!("Analyst连接错误: {e}")))
            }
        }
    }

    async fn kill_task(&self, endpoint: &str, task_id: Uuid, reason: &str) -> SchedulerResult<()> {
        let url = Self::url(endpoint, &format!("task/{task_id}"));
        let body = json!({ "reason": reason });

        match self.http_client.delete(&url).json(&body).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    debug!("已请求Analyst {} 终止任务 {}", endpoint, task_id);
                    Ok(())
                } else {
                    let status = response.status();
                    warn!("终止任务 {} 失败: HTTP {}", task_id, status);
                    Err(SchedulerError::Transport(format!(
                        "终止任务失败: HTTP {status}"
                    )))
                }
            }
            Err(e) => {
                warn!("终止任务时连接Analyst {} 失败: {}", endpoint, e);
                Err(SchedulerError::Transport(format!("Analyst连接错误: {e}")))
            }
        }
    }
}
