//! # 急诊工作流模块
//!
//! 提供急诊接诊流水线中与并发协调相关的全部组件，包括：
//! - 分诊队列：接诊与分诊线程之间的有界环形缓冲区
//! - 分诊线程池：并发分诊并按路由策略转交医生
//! - 分发通道：按标签寻址的医生消息通道
//! - 医生工作任务：治疗患者并记录统计
//! - 班次监督：按班次时长轮换医生，替换异常退出的医生
//! - 统计：所有医生共享的累计统计

pub mod backoff;
pub mod dispatch;
pub mod doctor;
pub mod engine;
pub mod queue;
pub mod routing;
pub mod stats;
pub mod supervisor;
pub mod triage;

#[cfg(test)]
pub(crate) mod test_utils;

// 重新导出主要类型
pub use backoff::BackoffPolicy;
pub use dispatch::{DispatchChannel, DispatchError, DispatchMessage, Tag, Transport};
pub use doctor::{DoctorExit, DoctorWorker};
pub use engine::{EmergencyEngine, EngineOptions};
pub use queue::{Enqueue, TriageQueue};
pub use routing::{RoutingEngine, RoutingPolicy};
pub use stats::{StatsReport, StatsSnapshot, StatsStore};
pub use supervisor::ShiftSupervisor;
pub use triage::{TriagePool, TriageSummary};
