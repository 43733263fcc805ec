use serde::{Deserialize, Serialize};

/// 任务派发配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    pub enabled: bool,
    /// 派发周期（秒）
    pub dispatch_interval_seconds: u64,
    /// 每个周期最多派发的任务数
    pub max_tasks_per_tick: usize,
    /// Analyst可接收任务的最小空闲内存（MB）
    pub min_free_ram_mb: i32,
    /// Analyst可接收任务的最大负载
    pub max_load: f32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dispatch_interval_seconds: 5,
            max_tasks_per_tick: 50,
            min_free_ram_mb: 256,
            max_load: 0.9,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.dispatch_interval_seconds == 0 {
            return Err(anyhow::anyhow!("派发间隔必须大于0"));
        }

        if self.max_tasks_per_tick == 0 {
            return Err(anyhow::anyhow!("每周期最大派发任务数必须大于0"));
        }

        if self.min_free_ram_mb < 0 {
            return Err(anyhow::anyhow!("最小空闲内存不能为负数"));
        }

        if self.max_load <= 0.0 {
            return Err(anyhow::anyhow!("最大负载必须大于0"));
        }

        Ok(())
    }
}

/// 孤儿任务回收与Analyst维护配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    pub enabled: bool,
    pub reaper_interval_seconds: u64,
    /// 任务多久没有心跳视为孤儿（秒）
    pub orphan_time_seconds: i64,
    /// 自动重试上限，run_count达到该值后不再重新排队
    pub auto_retry_limit: i32,
    /// 每次回收的最大孤儿任务数
    pub orphan_batch_size: usize,
    /// Analyst多久没有心跳标记为Down（秒）
    pub analyst_down_seconds: i64,
    /// Down状态的Analyst多久后被删除（秒）
    pub analyst_remove_seconds: i64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reaper_interval_seconds: 30,
            orphan_time_seconds: 300,
            auto_retry_limit: 4,
            orphan_batch_size: 15,
            analyst_down_seconds: 120,
            analyst_remove_seconds: 3600,
        }
    }
}

impl MaintenanceConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.reaper_interval_seconds == 0 {
            return Err(anyhow::anyhow!("回收间隔必须大于0"));
        }

        if self.orphan_time_seconds <= 0 {
            return Err(anyhow::anyhow!("孤儿任务判定时间必须大于0"));
        }

        if self.auto_retry_limit < 0 {
            return Err(anyhow::anyhow!("自动重试上限不能为负数"));
        }

        if self.orphan_batch_size == 0 {
            return Err(anyhow::anyhow!("孤儿任务批量大小必须大于0"));
        }

        if self.analyst_remove_seconds <= self.analyst_down_seconds {
            return Err(anyhow::anyhow!(
                "Analyst删除阈值({})必须大于Down阈值({})",
                self.analyst_remove_seconds,
                self.analyst_down_seconds
            ));
        }

        Ok(())
    }
}

/// 集群锁配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterLockConfig {
    /// 每次等待后退避时间的增量（毫秒）
    pub backoff_step_ms: u64,
    /// 退避时间上限（毫秒）
    pub backoff_max_ms: u64,
    /// 锁的默认过期时间（秒）
    pub default_timeout_seconds: u64,
}

impl Default for ClusterLockConfig {
    fn default() -> Self {
        Self {
            backoff_step_ms: 100,
            backoff_max_ms: 10_000,
            default_timeout_seconds: 60,
        }
    }
}

impl ClusterLockConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.backoff_step_ms == 0 {
            return Err(anyhow::anyhow!("退避增量必须大于0"));
        }

        if self.backoff_max_ms < self.backoff_step_ms {
            return Err(anyhow::anyhow!("退避上限不能小于退避增量"));
        }

        if self.default_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("锁超时时间必须大于0"));
        }

        Ok(())
    }
}

/// Analyst HTTP客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub request_timeout_seconds: u64,
    pub connect_timeout_seconds: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 10,
            connect_timeout_seconds: 3,
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.request_timeout_seconds == 0 || self.connect_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("Analyst请求超时时间必须大于0"));
        }

        Ok(())
    }
}
