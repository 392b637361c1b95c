//! # ER Core
//!
//! 急诊分诊系统的核心模块，提供患者记录、错误定义、二进制帧编解码和通用工具。

pub mod codec;
pub mod error;
pub mod models;
pub mod utils;

pub use codec::{PatientCodec, RecordFrame, RECORD_SIZE};
pub use error::{ErError, Result};
pub use models::*;
