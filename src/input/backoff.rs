//! 指数退避重连策略
//! Exponential reconnect backoff: base, 2·base, 4·base, … capped

use std::time::Duration;

/// 退避延迟绝对上限
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
    failures: u32,
}

impl Backoff {
    /// `cap` 超过 60 秒时按 60 秒计
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap: cap.min(MAX_BACKOFF),
            max_attempts: max_attempts.max(1),
            failures: 0,
        }
    }

    /// 第 `retry` 次重试 (从0开始) 的等待时长
    pub fn delay_for(&self, retry: u32) -> Duration {
        2u32.checked_pow(retry)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.cap, |d| d.min(self.cap))
    }

    /// 记录一次失败
    ///
    /// 返回下一次重试前的等待时长; 连续失败次数达到上限时返回 `None` (终止)
    pub fn on_failure(&mut self) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        if self.failures >= self.max_attempts {
            None
        } else {
            Some(self.delay_for(self.failures - 1))
        }
    }

    /// 连接成功后清零
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
