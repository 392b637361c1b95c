//! # ER管理模块
//!
//! 提供配置加载与校验、日志订阅者初始化等运维功能

pub mod config;
pub mod logging;

pub use config::{EmergencyConfig, KeyValueFormat};
pub use logging::{init_logging, LogFormat};
