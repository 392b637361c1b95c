//! 错误定义模块

use thiserror::Error;

/// 急诊系统统一错误类型
#[derive(Error, Debug)]
pub enum ErError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("资源获取失败: {0}")]
    ResourceAcquisition(String),

    #[error("工作者创建失败: {0}")]
    WorkerCreation(String),

    #[error("患者记录无效: {0}")]
    InvalidRecord(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("系统内部错误: {0}")]
    Internal(String),
}

/// 急诊系统统一结果类型
pub type Result<T> = std::result::Result<T, ErError>;
