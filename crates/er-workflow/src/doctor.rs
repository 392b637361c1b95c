//! 医生工作任务
//!
//! 每位医生身份在任一时刻只有一个活动任务。接班任务先等待前任退出再开始接收，
//! 前任会先处理完终止哨兵之前排队的所有治疗指令。

use crate::backoff::BackoffPolicy;
use crate::dispatch::{DispatchError, DispatchMessage, Transport};
use crate::stats::StatsStore;
use er_core::utils::{elapsed_ms, now, scaled_duration};
use er_core::{DoctorId, Patient};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 医生任务的退出原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoctorExit {
    /// 收到终止哨兵，正常下班
    Retired,
    /// 分发通道关闭或接收失败
    TransportFailed,
    /// 任务异常终止
    Crashed,
}

/// 医生工作任务
pub struct DoctorWorker {
    id: DoctorId,
    generation: u64,
    transport: Arc<dyn Transport>,
    stats: Arc<StatsStore>,
    backoff: BackoffPolicy,
    time_scale: f64,
}

impl DoctorWorker {
    /// 创建新的医生任务
    pub fn new(
        id: DoctorId,
        generation: u64,
        transport: Arc<dyn Transport>,
        stats: Arc<StatsStore>,
        backoff: BackoffPolicy,
        time_scale: f64,
    ) -> Self {
        Self {
            id,
            generation,
            transport,
            stats,
            backoff,
            time_scale,
        }
    }

    /// 接收循环，直到收到终止哨兵或通道失败
    ///
    /// `predecessor` 为同一身份上一班的任务句柄。
    pub async fn run(self, predecessor: Option<JoinHandle<DoctorExit>>) -> DoctorExit {
        if let Some(previous) = predecessor {
            match previous.await {
                Ok(exit) => debug!("{} predecessor finished: {:?}", self.id, exit),
                Err(e) => warn!("{} predecessor ended abnormally: {}", self.id, e),
            }
        }

        info!("{} (generation {}) started shift", self.id, self.generation);
        let tag = self.id.tag();
        let mut attempt = 0u32;

        loop {
            match self.transport.receive(tag, self.backoff.next(attempt)).await {
                Ok(DispatchMessage::Treat(patient)) => {
                    attempt = 0;
                    self.treat(patient).await;
                }
                Ok(DispatchMessage::Terminate) => {
                    info!("{} (generation {}) ended shift", self.id, self.generation);
                    return DoctorExit::Retired;
                }
                Err(DispatchError::Empty(_)) => attempt = attempt.saturating_add(1),
                Err(e) => {
                    error!("{} (generation {}) stopped receiving: {}", self.id, self.generation, e);
                    return DoctorExit::TransportFailed;
                }
            }
        }
    }

    /// 治疗一位患者并记录统计
    async fn treat(&self, mut patient: Patient) {
        let start = now();
        patient.treatment_start = Some(start);
        self.stats.record_triage(elapsed_ms(patient.arrival_time, start));
        debug!("{} treating {}", self.id, patient);

        tokio::time::sleep(scaled_duration(patient.treatment_time_ms, self.time_scale)).await;

        let end = now();
        patient.treatment_end = Some(end);
        self.stats
            .record_treatment(elapsed_ms(start, end), elapsed_ms(patient.arrival_time, end));
        info!(
            "{} treated {} in {} ms",
            self.id,
            patient,
            elapsed_ms(patient.arrival_time, end)
        );
    }
}
