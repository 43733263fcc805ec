use std::ops::{AddAssign, SubAssign};

use serde::{Deserialize, Serialize};

use super::task::TaskState;

/// 资产处理计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetCounters {
    pub created: i64,
    pub replaced: i64,
    pub errors: i64,
    pub warnings: i64,
}

impl AssetCounters {
    pub fn errors(count: i64) -> Self {
        Self {
            errors: count,
            ..Default::default()
        }
    }

    pub fn warnings(count: i64) -> Self {
        Self {
            warnings: count,
            ..Default::default()
        }
    }

    pub fn total(&self) -> i64 {
        self.created + self.replaced
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

impl AddAssign for AssetCounters {
    fn add_assign(&mut self, rhs: Self) {
        self.created += rhs.created;
        self.replaced += rhs.replaced;
        self.errors += rhs.errors;
        self.warnings += rhs.warnings;
    }
}

impl SubAssign for AssetCounters {
    fn sub_assign(&mut self, rhs: Self) {
        self.created -= rhs.created;
        self.replaced -= rhs.replaced;
        self.errors -= rhs.errors;
        self.warnings -= rhs.warnings;
    }
}

/// 作业内各状态的任务数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStateCounts {
    pub waiting: i64,
    pub queued: i64,
    pub running: i64,
    pub success: i64,
    pub failure: i64,
    pub skipped: i64,
}

impl TaskStateCounts {
    pub fn get(&self, state: TaskState) -> i64 {
        match state {
            TaskState::Waiting => self.waiting,
            TaskState::Queued => self.queued,
            TaskState::Running => self.running,
            TaskState::Success => self.success,
            TaskState::Failure => self.failure,
            TaskState::Skipped => self.skipped,
        }
    }

    fn slot(&mut self, state: TaskState) -> &mut i64 {
        match state {
            TaskState::Waiting => &mut self.waiting,
            TaskState::Queued => &mut self.queued,
            TaskState::Running => &mut self.running,
            TaskState::Success => &mut self.success,
            TaskState::Failure => &mut self.failure,
            TaskState::Skipped => &mut self.skipped,
        }
    }

    pub fn increment(&mut self, state: TaskState) {
        *self.slot(state) += 1;
    }

    /// 一次状态迁移：旧状态减一，新状态加一
    pub fn shift(&mut self, from: TaskState, to: TaskState) {
        *self.slot(from) -= 1;
        *self.slot(to) += 1;
    }

    pub fn total(&self) -> i64 {
        TaskState::ALL.iter().map(|s| self.get(*s)).sum()
    }

    /// 未到达终态的任务数
    pub fn pending(&self) -> i64 {
        self.waiting + self.queued + self.running
    }

    pub fn dispatched(&self) -> i64 {
        self.queued + self.running
    }
}

/// 作业的统计汇总
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobCounts {
    pub task_states: TaskStateCounts,
    pub asset_counters: AssetCounters,
    pub max_running_tasks: i32,
    pub pending_expands: i32,
}

impl JobCounts {
    pub fn has_capacity(&self) -> bool {
        self.task_states.dispatched() < self.max_running_tasks as i64
    }

    /// 没有未完成任务也没有进行中的扩展
    pub fn is_complete(&self) -> bool {
        self.task_states.pending() == 0 && self.pending_expands == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_add_and_sub() {
        let mut total = AssetCounters::default();
        total += AssetCounters {
            created: 3,
            replaced: 1,
            errors: 2,
            warnings: 0,
        };
        total += AssetCounters::warnings(5);
        assert_eq!(total.total(), 4);
        assert_eq!(total.warnings, 5);

        total -= total;
        assert!(total.is_zero());
    }

    #[test]
    fn test_state_counts_shift() {
        let mut counts = TaskStateCounts::default();
        counts.increment(TaskState::Waiting);
        counts.increment(TaskState::Waiting);
        counts.shift(TaskState::Waiting, TaskState::Queued);
        counts.shift(TaskState::Queued, TaskState::Running);

        assert_eq!(counts.waiting, 1);
        assert_eq!(counts.running, 1);
        assert_eq!(counts.total(), 2);
        assert_eq!(counts.pending(), 2);
        assert_eq!(counts.dispatched(), 1);
    }

    #[test]
    fn test_job_counts_completion() {
        let mut counts = JobCounts {
            max_running_tasks: 1,
            ..Default::default()
        };
        assert!(counts.is_complete());
        assert!(counts.has_capacity());

        counts.pending_expands = 1;
        assert!(!counts.is_complete());

        counts.pending_expands = 0;
        counts.task_states.increment(TaskState::Running);
        assert!(!counts.is_complete());
        assert!(!counts.has_capacity());
    }
}
