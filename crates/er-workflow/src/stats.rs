//! 共享统计

use serde::Serialize;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::trace;

/// 统计快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// 已开始治疗的患者数 (即完成分诊等待的患者数)
    pub total_triaged: u64,
    /// 已完成治疗的患者数
    pub total_treated: u64,
    /// 到达至开始治疗的累计等待 (毫秒)
    pub total_wait_triage_ms: u64,
    /// 治疗时长累计 (毫秒)
    pub total_wait_treatment_ms: u64,
    /// 到达至治疗结束的累计时长 (毫秒)
    pub total_time_ms: u64,
}

/// 所有医生共享的统计存储
///
/// 每次修改都在同一把锁内完成，计数不会丢失。
#[derive(Debug, Default)]
pub struct StatsStore {
    inner: Mutex<StatsSnapshot>,
}

impl StatsStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StatsSnapshot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 记录一次治疗开始前的等待
    pub fn record_triage(&self, wait_ms: u64) {
        let mut stats = self.lock();
        stats.total_triaged += 1;
        stats.total_wait_triage_ms = stats.total_wait_triage_ms.saturating_add(wait_ms);
        trace!(wait_ms, total = stats.total_triaged, "Recorded triage wait");
    }

    /// 记录一次完成的治疗
    pub fn record_treatment(&self, wait_ms: u64, total_ms: u64) {
        let mut stats = self.lock();
        stats.total_treated += 1;
        stats.total_wait_treatment_ms = stats.total_wait_treatment_ms.saturating_add(wait_ms);
        stats.total_time_ms = stats.total_time_ms.saturating_add(total_ms);
        trace!(wait_ms, total_ms, total = stats.total_treated, "Recorded treatment");
    }

    /// 一致的快照
    pub fn snapshot(&self) -> StatsSnapshot {
        *self.lock()
    }

    pub fn report(&self) -> StatsReport {
        StatsReport::from(self.snapshot())
    }
}

/// 统计报告
///
/// 计数为零时平均值为 `None`，显示为 `n/a`。
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatsReport {
    pub snapshot: StatsSnapshot,
    pub avg_wait_triage_ms: Option<f64>,
    pub avg_wait_treatment_ms: Option<f64>,
    pub avg_time_ms: Option<f64>,
}

fn average(total: u64, count: u64) -> Option<f64> {
    (count > 0).then(|| total as f64 / count as f64)
}

impl From<StatsSnapshot> for StatsReport {
    fn from(snapshot: StatsSnapshot) -> Self {
        Self {
            avg_wait_triage_ms: average(snapshot.total_wait_triage_ms, snapshot.total_triaged),
            avg_wait_treatment_ms: average(snapshot.total_wait_treatment_ms, snapshot.total_treated),
            avg_time_ms: average(snapshot.total_time_ms, snapshot.total_treated),
            snapshot,
        }
    }
}

struct Avg(Option<f64>);

impl fmt::Display for Avg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(ms) => write!(f, "{:.1} ms", ms),
            None => f.write_str("n/a"),
        }
    }
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "triaged={} treated={} avg_wait_before_treatment={} avg_treatment={} avg_total={}",
            self.snapshot.total_triaged,
            self.snapshot.total_treated,
            Avg(self.avg_wait_triage_ms),
            Avg(self.avg_wait_treatment_ms),
            Avg(self.avg_time_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_record_and_snapshot() {
        let stats = StatsStore::new();
        stats.record_triage(100);
        stats.record_treatment(2000, 2100);
        stats.record_triage(300);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_triaged, 2);
        assert_eq!(snapshot.total_treated, 1);
        assert_eq!(snapshot.total_wait_triage_ms, 400);
        assert_eq!(snapshot.total_wait_treatment_ms, 2000);
        assert_eq!(snapshot.total_time_ms, 2100);
    }

    #[test]
    fn test_report_averages() {
        let stats = StatsStore::new();
        stats.record_triage(100);
        stats.record_triage(300);
        stats.record_treatment(1000, 1100);
        stats.record_treatment(3000, 3300);

        let report = stats.report();
        assert_eq!(report.avg_wait_triage_ms, Some(200.0));
        assert_eq!(report.avg_wait_treatment_ms, Some(2000.0));
        assert_eq!(report.avg_time_ms, Some(2200.0));
        assert!(report.to_string().contains("avg_total=2200.0 ms"));
    }

    #[test]
    fn test_report_with_zero_patients() {
        let report = StatsStore::new().report();

        assert_eq!(report.avg_wait_triage_ms, None);
        assert_eq!(report.avg_time_ms, None);
        let text = report.to_string();
        assert!(text.contains("treated=0"));
        assert!(text.contains("avg_total=n/a"));
        assert!(!text.contains("NaN"));
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let stats = Arc::new(StatsStore::new());
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let stats = stats.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record_triage(1);
                        stats.record_treatment(2, 3);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_triaged, 8000);
        assert_eq!(snapshot.total_treated, 8000);
        assert_eq!(snapshot.total_time_ms, 24000);
    }
}
