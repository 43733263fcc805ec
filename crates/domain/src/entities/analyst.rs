use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnalystState {
    Up,
    Down,
}

/// Analyst派发锁，防止同一Analyst被并发派发两个任务
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockState {
    Unlocked,
    Locked,
}

/// 远端执行节点
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Analyst {
    pub id: Uuid,
    pub endpoint: String,
    pub task_id: Option<Uuid>,
    pub total_ram_mb: i32,
    pub free_ram_mb: i32,
    pub load: f32,
    pub version: String,
    pub state: AnalystState,
    pub lock: LockState,
    pub time_ping: DateTime<Utc>,
    pub time_created: DateTime<Utc>,
}

/// 心跳上报内容
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalystSpec {
    pub endpoint: String,
    pub total_ram_mb: i32,
    pub free_ram_mb: i32,
    pub load: f32,
    pub version: String,
    pub task_id: Option<Uuid>,
}

impl Analyst {
    pub fn from_spec(spec: &AnalystSpec) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            endpoint: spec.endpoint.clone(),
            task_id: spec.task_id,
            total_ram_mb: spec.total_ram_mb,
            free_ram_mb: spec.free_ram_mb,
            load: spec.load,
            version: spec.version.clone(),
            state: AnalystState::Up,
            lock: LockState::Unlocked,
            time_ping: now,
            time_created: now,
        }
    }

    /// 用一次心跳刷新状态，锁状态保持不变
    pub fn refresh(&mut self, spec: &AnalystSpec, now: DateTime<Utc>) {
        self.task_id = spec.task_id;
        self.total_ram_mb = spec.total_ram_mb;
        self.free_ram_mb = spec.free_ram_mb;
        self.load = spec.load;
        self.version = spec.version.clone();
        self.state = AnalystState::Up;
        self.time_ping = now;
    }

    /// 是否可以接收新任务
    pub fn is_available(&self, min_free_ram_mb: i32, max_load: f32) -> bool {
        self.state == AnalystState::Up
            && self.lock == LockState::Unlocked
            && self.task_id.is_none()
            && self.free_ram_mb >= min_free_ram_mb
            && self.load <= max_load
    }
}
