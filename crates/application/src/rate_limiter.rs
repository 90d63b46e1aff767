//! 登录尝试计数
//!
//! 每个邮箱维护一个一分钟的失败计数窗口；窗口内失败次数达到上限后，
//! 锁定该邮箱一段时间。登录成功会清空计数；记录失败时顺带清理
//! 窗口早已过去且不在锁定期的条目。

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use domain::Timestamp;

#[derive(Debug, Clone)]
struct AttemptWindow {
    failures: u32,
    window_start: Timestamp,
    locked_until: Option<Timestamp>,
}

/// 限流错误类型
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RateLimitError {
    #[error("too many failed login attempts, retry in {retry_after_secs}s")]
    Locked { retry_after_secs: u64 },
}

pub struct LoginAttemptLimiter {
    window_duration: Duration,
    attempts: RwLock<HashMap<String, AttemptWindow>>,
}

impl Default for LoginAttemptLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl LoginAttemptLimiter {
    pub fn new() -> Self {
        Self {
            window_duration: Duration::from_secs(60),
            attempts: RwLock::new(HashMap::new()),
        }
    }

    /// 检查该邮箱当前是否处于锁定期
    pub fn check(&self, key: &str, now: Timestamp) -> Result<(), RateLimitError> {
        let attempts = match self.attempts.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match attempts.get(key).and_then(|w| w.locked_until) {
            Some(until) if now < until => Err(RateLimitError::Locked {
                retry_after_secs: (until - now).num_seconds().max(1) as u64,
            }),
            _ => Ok(()),
        }
    }

    /// 记录一次失败；达到上限时开始锁定，返回是否已锁定
    pub fn record_failure(
        &self,
        key: &str,
        now: Timestamp,
        max_attempts: u32,
        lockout: Duration,
    ) -> bool {
        let window_len = chrono::Duration::from_std(self.window_duration)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let mut attempts = match self.attempts.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Self::cleanup_expired(&mut attempts, now, window_len);

        let window = attempts.entry(key.to_string()).or_insert(AttemptWindow {
            failures: 0,
            window_start: now,
            locked_until: None,
        });

        let lock_expired = window.locked_until.is_some_and(|until| now >= until);
        if lock_expired || now - window.window_start >= window_len {
            window.failures = 0;
            window.window_start = now;
            window.locked_until = None;
        }

        window.failures += 1;
        if window.failures >= max_attempts {
            let lockout =
                chrono::Duration::from_std(lockout).unwrap_or_else(|_| chrono::Duration::zero());
            window.locked_until = Some(now + lockout);
            return true;
        }
        false
    }

    /// 清理过期的计数窗口（防止未知邮箱把表撑大）
    fn cleanup_expired(
        attempts: &mut HashMap<String, AttemptWindow>,
        now: Timestamp,
        window_len: chrono::Duration,
    ) {
        attempts.retain(|_, window| {
            let locked = window.locked_until.is_some_and(|until| now < until);
            locked || now - window.window_start < window_len * 2
        });
    }

    /// 当前跟踪的邮箱数量
    pub fn tracked(&self) -> usize {
        match self.attempts.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn reset(&self, key: &str) {
        let mut attempts = match self.attempts.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        attempts.remove(key);
    }
}
