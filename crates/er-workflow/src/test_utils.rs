//! 测试辅助函数

use chrono::DateTime;
use er_core::{Patient, Priority};

/// 到达时间固定的患者，便于比较
pub(crate) fn patient(arrival_number: i32, name: &str) -> Patient {
    Patient {
        arrival_number,
        name: name.to_string(),
        triage_time_ms: 0,
        treatment_time_ms: 0,
        priority: Priority::new(3).unwrap(),
        arrival_time: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
        triage_start: None,
        triage_end: None,
        treatment_start: None,
        treatment_end: None,
    }
}

/// 刚到达的患者
pub(crate) fn arriving(arrival_number: i32, priority: u8, treatment_time_ms: u32) -> Patient {
    Patient::new(
        arrival_number,
        format!("patient_{}", arrival_number),
        0,
        treatment_time_ms,
        Priority::new(priority).unwrap(),
    )
}
