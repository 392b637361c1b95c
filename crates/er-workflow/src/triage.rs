//! 分诊线程池
//!
//! 固定数量的 OS 线程从分诊队列阻塞取患者，模拟分诊耗时后按路由策略转交医生。
//! 关闭队列即为毒丸：线程先排空剩余患者，再退出。

use crate::dispatch::{DispatchMessage, Transport};
use crate::queue::TriageQueue;
use crate::routing::RoutingEngine;
use er_core::utils::{now, scaled_duration};
use er_core::{ErError, Result};
use std::ops::AddAssign;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// 分诊线程的累计结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriageSummary {
    /// 成功交给医生的患者数
    pub dispatched: u64,
    /// 发送失败被丢弃的患者数
    pub dropped: u64,
}

impl AddAssign for TriageSummary {
    fn add_assign(&mut self, other: Self) {
        self.dispatched += other.dispatched;
        self.dropped += other.dropped;
    }
}

/// 分诊线程池
#[derive(Debug)]
pub struct TriagePool {
    queue: Arc<TriageQueue>,
    workers: Vec<JoinHandle<TriageSummary>>,
}

impl TriagePool {
    /// 启动 `size` 个分诊线程
    ///
    /// 任一线程创建失败时，关闭队列并回收已启动的线程，返回 `WorkerCreation`。
    pub fn spawn(
        size: usize,
        queue: Arc<TriageQueue>,
        transport: Arc<dyn Transport>,
        router: Arc<RoutingEngine>,
        time_scale: f64,
    ) -> Result<Self> {
        let mut pool = Self {
            queue,
            workers: Vec::with_capacity(size),
        };

        for index in 0..size {
            let queue = pool.queue.clone();
            let transport = transport.clone();
            let router = router.clone();

            let spawned = thread::Builder::new()
                .name(format!("triage-{}", index))
                .spawn(move || run_worker(index, &queue, transport.as_ref(), &router, time_scale));

            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(e) => {
                    error!("Failed to start triage thread {}: {}", index, e);
                    pool.shutdown();
                    return Err(ErError::WorkerCreation(format!("triage thread {}: {}", index, e)));
                }
            }
        }

        info!("Started {} triage threads", size);
        Ok(pool)
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// 关闭队列并等待所有线程排空退出
    ///
    /// 会阻塞当前线程，异步上下文中应放在 `spawn_blocking` 里调用。
    pub fn shutdown(self) -> TriageSummary {
        self.queue.close();

        let mut total = TriageSummary::default();
        for (index, worker) in self.workers.into_iter().enumerate() {
            match worker.join() {
                Ok(summary) => total += summary,
                Err(_) => error!("Triage thread {} panicked", index),
            }
        }

        info!(
            dispatched = total.dispatched,
            dropped = total.dropped,
            "Triage threads stopped"
        );
        total
    }
}

fn run_worker(
    index: usize,
    queue: &TriageQueue,
    transport: &dyn Transport,
    router: &RoutingEngine,
    time_scale: f64,
) -> TriageSummary {
    let mut summary = TriageSummary::default();
    debug!("Triage worker {} waiting for patients", index);

    while let Some(mut patient) = queue.dequeue() {
        patient.triage_start = Some(now());
        thread::sleep(scaled_duration(patient.triage_time_ms, time_scale));
        patient.triage_end = Some(now());

        let doctor = router.route(patient.priority, |id| transport.backlog(id.tag()));
        let label = patient.to_string();

        match transport.send(doctor.tag(), DispatchMessage::Treat(patient)) {
            Ok(()) => {
                debug!("Triaged {} and sent to {}", label, doctor);
                summary.dispatched += 1;
            }
            Err(e) => {
                warn!("Dropping {} after triage, could not reach {}: {}", label, doctor, e);
                summary.dropped += 1;
            }
        }
    }

    debug!("Triage worker {} exiting", index);
    summary
}
