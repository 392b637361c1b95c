//! # 班次监督
//!
//! 持有每位医生的开始时间和任务句柄，这张表只由监督者修改。控制循环每个节拍调用一次：
//!
//! 1. [`ShiftSupervisor::check_health`]：未经轮换就结束的任务 (通道失败或 panic) 立即替换
//! 2. [`ShiftSupervisor::rotate_due`]：在岗时间达到班次时长的医生发送终止哨兵，
//!    并创建等待其退出的接班任务
//!
//! 轮换只看时间，与工作量无关；空闲的医生同样会被轮换。

use crate::backoff::BackoffPolicy;
use crate::dispatch::{DispatchMessage, Transport};
use crate::doctor::{DoctorExit, DoctorWorker};
use crate::stats::StatsStore;
use er_core::{DoctorId, ErError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// 创建医生任务所需的共享资源
struct Crew {
    transport: Arc<dyn Transport>,
    stats: Arc<StatsStore>,
    backoff: BackoffPolicy,
    time_scale: f64,
}

impl Crew {
    fn spawn(
        &self,
        id: DoctorId,
        generation: u64,
        predecessor: Option<JoinHandle<DoctorExit>>,
    ) -> Result<JoinHandle<DoctorExit>> {
        if self.transport.is_closed() {
            return Err(ErError::WorkerCreation(format!(
                "{} generation {}: dispatch channel is closed",
                id, generation
            )));
        }
        let runtime = Handle::try_current()
            .map_err(|e| ErError::WorkerCreation(format!("{} generation {}: {}", id, generation, e)))?;

        let worker = DoctorWorker::new(
            id,
            generation,
            self.transport.clone(),
            self.stats.clone(),
            self.backoff,
            self.time_scale,
        );
        Ok(runtime.spawn(worker.run(predecessor)))
    }
}

#[derive(Debug)]
struct DoctorSlot {
    generation: u64,
    started_at: Instant,
    handle: Option<JoinHandle<DoctorExit>>,
}

/// 班次监督者
pub struct ShiftSupervisor {
    shift_length: Duration,
    crew: Crew,
    slots: Vec<DoctorSlot>,
}

impl ShiftSupervisor {
    /// 为每位医生启动第一班任务
    pub fn start(
        doctors: usize,
        shift_length: Duration,
        transport: Arc<dyn Transport>,
        stats: Arc<StatsStore>,
        backoff: BackoffPolicy,
        time_scale: f64,
    ) -> Result<Self> {
        let mut supervisor = Self {
            shift_length,
            crew: Crew {
                transport,
                stats,
                backoff,
                time_scale,
            },
            slots: Vec::with_capacity(doctors),
        };

        for index in 0..doctors {
            let handle = supervisor.crew.spawn(DoctorId(index), 0, None)?;
            supervisor.slots.push(DoctorSlot {
                generation: 0,
                started_at: Instant::now(),
                handle: Some(handle),
            });
        }

        info!(
            "Started {} doctors, shift length {:?}",
            doctors, shift_length
        );
        Ok(supervisor)
    }

    /// 控制循环的节拍间隔：`min(1s, 班次时长)`
    pub fn tick_interval(&self) -> Duration {
        self.shift_length.min(Duration::from_secs(1))
    }

    /// 当前在岗任务的班次序号
    pub fn generation(&self, id: DoctorId) -> Option<u64> {
        self.slots.get(id.0).map(|slot| slot.generation)
    }

    /// 轮换所有到期的医生，返回被轮换的身份
    ///
    /// 无法发送终止哨兵或无法创建接班任务时返回错误，调用方应视为致命。
    pub fn rotate_due(&mut self, now: Instant) -> Result<Vec<DoctorId>> {
        let mut rotated = Vec::new();

        for (index, slot) in self.slots.iter_mut().enumerate() {
            if now.saturating_duration_since(slot.started_at) < self.shift_length {
                continue;
            }
            let id = DoctorId(index);

            // 已退出的任务无需哨兵，否则哨兵会被接班任务收到
            let running = slot.handle.as_ref().is_some_and(|h| !h.is_finished());
            if running {
                self.crew
                    .transport
                    .send(id.tag(), DispatchMessage::Terminate)
                    .map_err(|e| ErError::WorkerCreation(format!("cannot end shift of {}: {}", id, e)))?;
            }

            let generation = slot.generation + 1;
            let handle = self.crew.spawn(id, generation, slot.handle.take())?;
            *slot = DoctorSlot {
                generation,
                started_at: now,
                handle: Some(handle),
            };

            debug!("{} rotated to generation {}", id, generation);
            rotated.push(id);
        }

        if !rotated.is_empty() {
            info!("Shift change for {} doctors", rotated.len());
        }
        Ok(rotated)
    }

    /// 替换未经轮换就结束的医生任务，返回被替换的身份
    pub fn check_health(&mut self, now: Instant) -> Result<Vec<DoctorId>> {
        let mut replaced = Vec::new();

        for (index, slot) in self.slots.iter_mut().enumerate() {
            let finished = slot.handle.as_ref().map_or(true, |h| h.is_finished());
            if !finished {
                continue;
            }
            let id = DoctorId(index);
            warn!("{} (generation {}) left without a shift change, replacing", id, slot.generation);

            let generation = slot.generation + 1;
            let handle = self.crew.spawn(id, generation, slot.handle.take())?;
            *slot = DoctorSlot {
                generation,
                started_at: now,
                handle: Some(handle),
            };
            replaced.push(id);
        }

        Ok(replaced)
    }

    /// 向所有在岗医生发送终止哨兵并等待全部退出
    pub async fn retire_all(&mut self) -> Vec<DoctorExit> {
        for (index, slot) in self.slots.iter().enumerate() {
            let running = slot.handle.as_ref().is_some_and(|h| !h.is_finished());
            if !running {
                continue;
            }
            let id = DoctorId(index);
            if let Err(e) = self.crew.transport.send(id.tag(), DispatchMessage::Terminate) {
                error!("Cannot send termination to {}: {}", id, e);
            }
        }

        let mut exits = Vec::with_capacity(self.slots.len());
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let Some(handle) = slot.handle.take() else {
                continue;
            };
            let exit = match handle.await {
                Ok(exit) => exit,
                Err(e) => {
                    error!("{} crashed: {}", DoctorId(index), e);
                    DoctorExit::Crashed
                }
            };
            exits.push(exit);
        }

        info!("All doctors off shift");
        exits
    }
}

/// 只在启动失败回收时生效；正常停机经 [`ShiftSupervisor::retire_all`] 取走全部句柄，
/// 此处不会强制中止任何医生。
impl Drop for ShiftSupervisor {
    fn drop(&mut self) {
        for handle in self.slots.iter().filter_map(|slot| slot.handle.as_ref()) {
            handle.abort();
        }
    }
}
