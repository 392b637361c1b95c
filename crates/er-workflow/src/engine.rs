//! 急诊引擎
//!
//! 持有分诊队列、分发通道、统计、分诊线程池和班次监督者，负责它们的创建顺序和停机顺序。

use crate::backoff::BackoffPolicy;
use crate::dispatch::{DispatchChannel, Transport};
use crate::doctor::DoctorExit;
use crate::queue::TriageQueue;
use crate::routing::{RoutingEngine, RoutingPolicy};
use crate::stats::{StatsReport, StatsStore};
use crate::supervisor::ShiftSupervisor;
use crate::triage::TriagePool;
use er_admin::EmergencyConfig;
use er_core::{ErError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// 运行参数 (不属于配置文件的部分)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineOptions {
    /// 医生路由策略
    pub routing: RoutingPolicy,
    /// 分诊与治疗时长的缩放系数，0 表示不等待
    pub time_scale: f64,
    /// 医生空闲接收的等待窗口
    pub receive_backoff: BackoffPolicy,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            routing: RoutingPolicy::default(),
            time_scale: 1.0,
            receive_backoff: BackoffPolicy::default(),
        }
    }
}

/// 急诊引擎
pub struct EmergencyEngine {
    queue: Arc<TriageQueue>,
    dispatch: Arc<DispatchChannel>,
    stats: Arc<StatsStore>,
    triage: TriagePool,
    supervisor: ShiftSupervisor,
}

impl EmergencyEngine {
    /// 按依赖顺序创建所有组件
    ///
    /// 任一步失败时已创建的部分会被回收，返回的错误不会留下运行中的线程或任务。
    pub fn start(config: &EmergencyConfig, options: EngineOptions) -> Result<Self> {
        let queue = Arc::new(TriageQueue::new(config.triage_queue_max)?);
        let dispatch = Arc::new(DispatchChannel::new(config.msq_wait_max));
        let stats = Arc::new(StatsStore::new());
        let router = Arc::new(RoutingEngine::new(options.routing, config.doctors)?);

        let supervisor = ShiftSupervisor::start(
            config.doctors,
            config.shift_length,
            dispatch.clone(),
            stats.clone(),
            options.receive_backoff,
            options.time_scale,
        )?;

        let triage = match TriagePool::spawn(
            config.triage_threads,
            queue.clone(),
            dispatch.clone(),
            router,
            options.time_scale,
        ) {
            Ok(pool) => pool,
            Err(e) => {
                dispatch.close();
                drop(supervisor);
                return Err(e);
            }
        };

        info!(
            routing = %options.routing,
            time_scale = options.time_scale,
            "Emergency engine started"
        );

        Ok(Self {
            queue,
            dispatch,
            stats,
            triage,
            supervisor,
        })
    }

    /// 接诊使用的分诊队列
    pub fn queue(&self) -> Arc<TriageQueue> {
        self.queue.clone()
    }

    pub fn tick_interval(&self) -> Duration {
        self.supervisor.tick_interval()
    }

    /// 一次监督节拍：先替换异常退出的医生，再轮换到期的医生
    pub fn supervise(&mut self, now: Instant) -> Result<()> {
        let replaced = self.supervisor.check_health(now)?;
        if !replaced.is_empty() {
            warn!("Replaced {} doctors that left unexpectedly", replaced.len());
        }
        self.supervisor.rotate_due(now)?;
        Ok(())
    }

    /// 当前统计报告
    pub fn report(&self) -> StatsReport {
        self.stats.report()
    }

    /// 有序停机
    ///
    /// 关闭分诊队列并等待分诊线程排空，向所有医生发送终止哨兵并等待其完成手上的治疗，
    /// 最后关闭分发通道并返回最终统计。
    pub async fn shutdown(self) -> Result<StatsReport> {
        let Self {
            queue,
            dispatch,
            stats,
            triage,
            mut supervisor,
        } = self;

        info!("Shutting down, {} patients still waiting for triage", queue.len());
        queue.close();
        let triaged = tokio::task::spawn_blocking(move || triage.shutdown())
            .await
            .map_err(|e| ErError::Internal(format!("triage shutdown failed: {}", e)))?;

        let exits = supervisor.retire_all().await;
        let retired = exits.iter().filter(|exit| **exit == DoctorExit::Retired).count();
        dispatch.close();

        let report = stats.report();
        info!(
            queue_dropped = queue.dropped(),
            dispatch_dropped = triaged.dropped,
            retired,
            doctors = exits.len(),
            "Final statistics: {}",
            report
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Enqueue;
    use crate::test_utils::arriving;

    fn config() -> EmergencyConfig {
        EmergencyConfig {
            triage_queue_max: 16,
            triage_threads: 2,
            doctors: 3,
            shift_length: Duration::from_secs(5),
            msq_wait_max: 10,
        }
    }

    fn instant() -> EngineOptions {
        EngineOptions {
            time_scale: 0.0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_every_admitted_patient_is_treated() {
        let engine = EmergencyEngine::start(&config(), instant()).unwrap();
        let queue = engine.queue();

        for i in 0..10 {
            assert_eq!(queue.enqueue(arriving(i, (i % 5 + 1) as u8, 100)), Enqueue::Accepted);
        }
        let report = engine.shutdown().await.unwrap();

        assert_eq!(report.snapshot.total_treated, 10);
        assert_eq!(report.snapshot.total_triaged, 10);
        assert!(report.avg_wait_triage_ms.unwrap() >= 0.0);
    }

    #[tokio::test]
    async fn test_report_without_patients() {
        let engine = EmergencyEngine::start(&config(), instant()).unwrap();
        assert_eq!(engine.report().snapshot.total_treated, 0);

        let report = engine.shutdown().await.unwrap();
        assert_eq!(report.avg_time_ms, None);
        assert!(report.to_string().contains("n/a"));
    }

    #[tokio::test]
    async fn test_supervise_rotates_all_doctors() {
        let mut config = config();
        config.shift_length = Duration::from_millis(10);
        let mut engine = EmergencyEngine::start(&config, instant()).unwrap();
        assert_eq!(engine.tick_interval(), Duration::from_millis(10));

        engine.supervise(Instant::now() + Duration::from_millis(20)).unwrap();
        engine.queue().enqueue(arriving(1, 1, 0));

        let report = engine.shutdown().await.unwrap();
        assert_eq!(report.snapshot.total_treated, 1);
    }

    #[tokio::test]
    async fn test_invalid_routing_setup_fails_cleanly() {
        let mut config = config();
        config.doctors = 0;
        assert!(EmergencyEngine::start(&config, instant()).is_err());
    }
}
