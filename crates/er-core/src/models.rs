//! 核心数据模型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ErError, Result};

/// 患者姓名字段的字节长度 (含结尾 NUL)
pub const NAME_LEN: usize = 50;

/// 分诊优先级 (1-5)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Priority(u8);

impl Priority {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    /// 创建优先级，超出 1-5 范围时返回错误
    pub fn new(value: u8) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ErError::InvalidRecord(format!(
                "priority {} outside {}..={}",
                value,
                Self::MIN,
                Self::MAX
            )))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<i32> for Priority {
    type Error = ErError;

    fn try_from(value: i32) -> Result<Self> {
        u8::try_from(value)
            .map_err(|_| ErError::InvalidRecord(format!("priority {} outside 1..=5", value)))
            .and_then(Self::new)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// 医生身份，取值范围 [0, DOCTORS)
///
/// 分发通道以 [`DoctorId::tag`] 作为消息标签，医生只接收与自身标签完全相等的消息。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DoctorId(pub usize);

impl DoctorId {
    /// 分发通道使用的消息标签
    pub fn tag(self) -> u64 {
        self.0 as u64
    }
}

impl fmt::Display for DoctorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doctor-{}", self.0)
    }
}

/// 患者记录
///
/// 由接诊读取时创建；分诊工作线程写入分诊时间戳，医生写入治疗时间戳；
/// 治疗完成后记录即被丢弃。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub arrival_number: i32,
    pub name: String,
    pub triage_time_ms: u32,
    pub treatment_time_ms: u32,
    pub priority: Priority,
    pub arrival_time: DateTime<Utc>,
    pub triage_start: Option<DateTime<Utc>>,
    pub triage_end: Option<DateTime<Utc>>,
    pub treatment_start: Option<DateTime<Utc>>,
    pub treatment_end: Option<DateTime<Utc>>,
}

impl Patient {
    /// 创建新到达的患者，到达时间为当前时刻
    pub fn new(
        arrival_number: i32,
        name: impl Into<String>,
        triage_time_ms: u32,
        treatment_time_ms: u32,
        priority: Priority,
    ) -> Self {
        Self {
            arrival_number,
            name: name.into(),
            triage_time_ms,
            treatment_time_ms,
            priority,
            arrival_time: Utc::now(),
            triage_start: None,
            triage_end: None,
            treatment_start: None,
            treatment_end: None,
        }
    }
}

impl fmt::Display for Patient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' (#{}, {})", self.name, self.arrival_number, self.priority)
    }
}
