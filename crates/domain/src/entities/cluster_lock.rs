use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 不限次数重试
pub const UNBOUNDED_TRIES: i32 = -1;

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// 集群锁描述
///
/// - 硬锁：无限重试直到获取或超时
/// - 软锁：只尝试`max_tries`次（0表示只尝试一次），失败则放弃
/// - 合并锁：同名的并发执行合并为一次，调用方共享结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterLockSpec {
    pub name: String,
    pub max_tries: i32,
    pub combine_multiple: bool,
    pub timeout: Duration,
    /// 执行完成后不释放，等待锁自然过期
    pub hold_till_timeout: bool,
}

impl ClusterLockSpec {
    pub fn hard_lock(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_tries: UNBOUNDED_TRIES,
            combine_multiple: false,
            timeout: DEFAULT_LOCK_TIMEOUT,
            hold_till_timeout: false,
        }
    }

    pub fn soft_lock(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_tries: 0,
            combine_multiple: false,
            timeout: DEFAULT_LOCK_TIMEOUT,
            hold_till_timeout: false,
        }
    }

    pub fn combine_lock(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_tries: UNBOUNDED_TRIES,
            combine_multiple: true,
            timeout: DEFAULT_LOCK_TIMEOUT,
            hold_till_timeout: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_tries(mut self, max_tries: i32) -> Self {
        self.max_tries = max_tries;
        self
    }

    pub fn hold_till_timeout(mut self) -> Self {
        self.hold_till_timeout = true;
        self
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_tries == UNBOUNDED_TRIES
    }
}

/// 一次加锁尝试的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockStatus {
    Locked,
    Wait,
}

/// 锁的持有记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterLock {
    pub name: String,
    pub owner: String,
    pub time_locked: DateTime<Utc>,
    pub time_expired: DateTime<Utc>,
}

impl ClusterLock {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.time_expired <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let hard = ClusterLockSpec::hard_lock("a");
        assert!(hard.is_unbounded());
        assert!(!hard.combine_multiple);

        let soft = ClusterLockSpec::soft_lock("b");
        assert_eq!(soft.max_tries, 0);

        let combine = ClusterLockSpec::combine_lock("c").with_timeout(Duration::from_secs(5));
        assert!(combine.combine_multiple);
        assert!(combine.is_unbounded());
        assert_eq!(combine.timeout, Duration::from_secs(5));
    }
}
