//! # 空闲接收的退避策略
//!
//! 医生在分发通道上接收时，每次等待窗口为 `first × factor^attempt`，上限为 `max`。
//! 收到任何消息后尝试次数归零。通道本身可唤醒，窗口只限制单次等待的时长，
//! 因此空闲医生既不会忙等，也不会无限期挂起。

use std::time::Duration;

/// 接收等待窗口策略
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// 第一次等待的窗口
    pub first: Duration,
    /// 窗口上限
    pub max: Duration,
    /// 增长系数 (`>= 1.0`)
    pub factor: f64,
}

impl Default for BackoffPolicy {
    /// `first = 10ms`，`max = 500ms`，`factor = 2.0`
    fn default() -> Self {
        Self {
            first: Duration::from_millis(10),
            max: Duration::from_millis(500),
            factor: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// 第 `attempt` 次 (从 0 开始) 的等待窗口
    pub fn next(&self, attempt: u32) -> Duration {
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}
