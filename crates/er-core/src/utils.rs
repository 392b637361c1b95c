//! 通用工具函数

use chrono::{DateTime, Utc};
use std::time::Duration;

/// 当前墙钟时间
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// 两个时间点之间经过的毫秒数，时钟回拨或来源时间在未来时记为 0
pub fn elapsed_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    (to - from).num_milliseconds().max(0) as u64
}

/// 按时间缩放系数换算模拟工作时长
///
/// 非有限或非正的系数视为不等待；结果超出 `Duration` 范围时取 `Duration::MAX`。
pub fn scaled_duration(ms: u32, time_scale: f64) -> Duration {
    if !time_scale.is_finite() || time_scale <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(f64::from(ms) / 1000.0 * time_scale).unwrap_or(Duration::MAX)
}
