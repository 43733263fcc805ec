use thiserror::Error;

/// 调度器错误类型定义
///
/// 状态竞争(CAS失败)不属于错误，由各操作返回`false`表示。
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SchedulerError {
    #[error("作业未找到: {id}")]
    JobNotFound { id: String },

    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("Analyst未找到: {id}")]
    AnalystNotFound { id: String },

    #[error("非法的状态转换: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("无效的作业定义: {0}")]
    InvalidJobSpec(String),

    #[error("作业不处于活动状态: {id}")]
    JobNotActive { id: String },

    #[error("扩展任务被拒绝: {0}")]
    ExpandRejected(String),

    #[error("获取集群锁超时: {name}")]
    LockTimeout { name: String },

    #[error("Analyst通信错误: {0}")]
    Transport(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    pub fn task_not_found(id: impl ToString) -> Self {
        SchedulerError::TaskNotFound { id: id.to_string() }
    }

    pub fn job_not_found(id: impl ToString) -> Self {
        SchedulerError::JobNotFound { id: id.to_string() }
    }

    pub fn analyst_not_found(id: impl ToString) -> Self {
        SchedulerError::AnalystNotFound { id: id.to_string() }
    }

    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        SchedulerError::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// 是否为资源不存在类错误
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SchedulerError::JobNotFound { .. }
                | SchedulerError::TaskNotFound { .. }
                | SchedulerError::AnalystNotFound { .. }
        )
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
