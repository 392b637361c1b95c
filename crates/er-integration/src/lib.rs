//! # 急诊接入模块
//!
//! 提供与外部患者来源的集成：
//! - 入站命名管道的创建、打开和清理
//! - 接诊循环：从管道读取定长患者记录并放入分诊队列

pub mod intake;

pub use intake::{AdmissionIntake, InboundPipe, IntakeSummary};
