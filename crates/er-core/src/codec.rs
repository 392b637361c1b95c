//! 患者记录二进制帧编解码
//!
//! 入站管道上的记录是定长帧，没有长度前缀，读写双方必须严格一致：
//!
//! ```text
//! offset size field
//!      0    4 arrival_number      i32 LE
//!      4   50 name                UTF-8, NUL 填充
//!     54    2 padding
//!     56    4 triage_time_ms      i32 LE
//!     60    4 treatment_time_ms   i32 LE
//!     64    4 priority            i32 LE (1-5)
//!     68    4 padding
//!     72    8 arrival_time        i64 LE, Unix 毫秒, 0 = 未设置
//!     80    8 triage_start
//!     88    8 triage_end
//!     96    8 treatment_start
//!    104    8 treatment_end
//! ```

use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, Utc};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{ErError, Result};
use crate::models::{Patient, Priority, NAME_LEN};

/// 单条记录的字节数
pub const RECORD_SIZE: usize = 112;

/// 解码结果
///
/// 结构校验失败的帧不会中断流，而是以 [`RecordFrame::Malformed`] 交给调用方记录后跳过。
#[derive(Debug, Clone, PartialEq)]
pub enum RecordFrame {
    Patient(Patient),
    Malformed { arrival_number: i32, reason: String },
}

/// 入站管道编解码器
#[derive(Debug, Clone, Copy, Default)]
pub struct PatientCodec;

impl Decoder for PatientCodec {
    type Item = RecordFrame;
    type Error = ErError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < RECORD_SIZE {
            src.reserve(RECORD_SIZE - src.len());
            return Ok(None);
        }

        let frame = src.split_to(RECORD_SIZE);
        let arrival_number = i32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);

        Ok(Some(match decode_record(&frame) {
            Ok(patient) => RecordFrame::Patient(patient),
            Err(e) => RecordFrame::Malformed {
                arrival_number,
                reason: e.to_string(),
            },
        }))
    }
}

impl Encoder<Patient> for PatientCodec {
    type Error = ErError;

    fn encode(&mut self, patient: Patient, dst: &mut BytesMut) -> Result<()> {
        encode_record(&patient, dst);
        Ok(())
    }
}

/// 将患者写成一条定长帧
pub fn encode_record(patient: &Patient, dst: &mut BytesMut) {
    dst.reserve(RECORD_SIZE);

    dst.put_i32_le(patient.arrival_number);

    let mut name = [0u8; NAME_LEN];
    let encoded = truncate_name(&patient.name);
    name[..encoded.len()].copy_from_slice(encoded.as_bytes());
    dst.put_slice(&name);
    dst.put_bytes(0, 2);

    dst.put_i32_le(clamp_i32(patient.triage_time_ms));
    dst.put_i32_le(clamp_i32(patient.treatment_time_ms));
    dst.put_i32_le(i32::from(patient.priority.get()));
    dst.put_bytes(0, 4);

    dst.put_i64_le(patient.arrival_time.timestamp_millis());
    for stamp in [
        patient.triage_start,
        patient.triage_end,
        patient.treatment_start,
        patient.treatment_end,
    ] {
        dst.put_i64_le(stamp.map(|t| t.timestamp_millis()).unwrap_or(0));
    }
}

/// 解析一条定长帧
///
/// 只做结构校验：优先级范围、时长非负、姓名为合法 UTF-8、时间戳可表示。
/// 未设置到达时间的记录以读取时刻作为到达时间。
pub fn decode_record(frame: &[u8]) -> Result<Patient> {
    if frame.len() != RECORD_SIZE {
        return Err(ErError::InvalidRecord(format!(
            "frame is {} bytes, expected {}",
            frame.len(),
            RECORD_SIZE
        )));
    }

    let mut buf = frame;
    let arrival_number = buf.get_i32_le();

    let mut raw_name = [0u8; NAME_LEN];
    buf.copy_to_slice(&mut raw_name);
    let end = raw_name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
    let name = std::str::from_utf8(&raw_name[..end])
        .map_err(|e| ErError::InvalidRecord(format!("name is not UTF-8: {}", e)))?
        .to_string();
    buf.advance(2);

    let triage_time_ms = non_negative(buf.get_i32_le(), "triage_time_ms")?;
    let treatment_time_ms = non_negative(buf.get_i32_le(), "treatment_time_ms")?;
    let priority = Priority::try_from(buf.get_i32_le())?;
    buf.advance(4);

    let arrival_time = millis_to_time(buf.get_i64_le(), "arrival_time")?.unwrap_or_else(Utc::now);
    let triage_start = millis_to_time(buf.get_i64_le(), "triage_start")?;
    let triage_end = millis_to_time(buf.get_i64_le(), "triage_end")?;
    let treatment_start = millis_to_time(buf.get_i64_le(), "treatment_start")?;
    let treatment_end = millis_to_time(buf.get_i64_le(), "treatment_end")?;

    Ok(Patient {
        arrival_number,
        name,
        triage_time_ms,
        treatment_time_ms,
        priority,
        arrival_time,
        triage_start,
        triage_end,
        treatment_start,
        treatment_end,
    })
}

/// 截断到 NAME_LEN - 1 字节以内，保留结尾 NUL 且不切断多字节字符
fn truncate_name(name: &str) -> &str {
    let limit = NAME_LEN - 1;
    if name.len() <= limit {
        return name;
    }
    let mut end = limit;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

fn clamp_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn non_negative(value: i32, field: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| ErError::InvalidRecord(format!("{} is negative: {}", field, value)))
}

fn millis_to_time(ms: i64, field: &str) -> Result<Option<DateTime<Utc>>> {
    if ms == 0 {
        return Ok(None);
    }
    DateTime::from_timestamp_millis(ms)
        .map(Some)
        .ok_or_else(|| ErError::InvalidRecord(format!("{} out of range: {}", field, ms)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_patient() -> Patient {
        let at = |ms| DateTime::from_timestamp_millis(ms).unwrap();
        Patient {
            arrival_number: 42,
            name: "Grace_7".to_string(),
            triage_time_ms: 1200,
            treatment_time_ms: 4800,
            priority: Priority::new(2).unwrap(),
            arrival_time: at(1_700_000_000_123),
            triage_start: Some(at(1_700_000_000_500)),
            triage_end: Some(at(1_700_000_001_700)),
            treatment_start: None,
            treatment_end: None,
        }
    }

    #[test]
    fn test_record_layout_is_fixed() {
        let mut buf = BytesMut::new();
        encode_record(&sample_patient(), &mut buf);

        assert_eq!(buf.len(), RECORD_SIZE);
        assert_eq!(&buf[0..4], &42i32.to_le_bytes());
        assert_eq!(&buf[4..11], b"Grace_7");
        assert!(buf[11..56].iter().all(|&b| b == 0));
        assert_eq!(&buf[64..68], &2i32.to_le_bytes());
        assert_eq!(&buf[72..80], &1_700_000_000_123i64.to_le_bytes());
        assert_eq!(&buf[96..112], &[0u8; 16]);
    }

    #[test]
    fn test_written_record_reads_back_identical() {
        let patient = sample_patient();
        let mut codec = PatientCodec;
        let mut buf = BytesMut::new();
        codec.encode(patient.clone(), &mut buf).unwrap();

        let frame = codec.decode(&mut buf).unwrap();
        assert_eq!(frame, Some(RecordFrame::Patient(patient)));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame_waits_for_more_bytes() {
        let mut codec = PatientCodec;
        let mut full = BytesMut::new();
        encode_record(&sample_patient(), &mut full);

        let mut buf = BytesMut::from(&full[..60]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(&full[60..]);
        assert!(matches!(codec.decode(&mut buf).unwrap(), Some(RecordFrame::Patient(_))));
    }

    #[test]
    fn test_malformed_frame_does_not_stop_stream() {
        let mut codec = PatientCodec;
        let mut buf = BytesMut::new();
        encode_record(&sample_patient(), &mut buf);
        // 优先级改成 9
        buf[64..68].copy_from_slice(&9i32.to_le_bytes());
        encode_record(&sample_patient(), &mut buf);

        match codec.decode(&mut buf).unwrap() {
            Some(RecordFrame::Malformed { arrival_number, .. }) => assert_eq!(arrival_number, 42),
            other => panic!("expected malformed frame, got {:?}", other),
        }
        assert!(matches!(codec.decode(&mut buf).unwrap(), Some(RecordFrame::Patient(_))));
    }

    #[test]
    fn test_long_name_is_truncated_on_char_boundary() {
        let mut patient = sample_patient();
        patient.name = "é".repeat(40);

        let mut buf = BytesMut::new();
        encode_record(&patient, &mut buf);
        let decoded = decode_record(&buf).unwrap();

        assert_eq!(decoded.name.len(), 48);
        assert!(patient.name.starts_with(&decoded.name));
    }

    #[test]
    fn test_unset_arrival_time_is_stamped_on_read() {
        let mut buf = BytesMut::new();
        encode_record(&sample_patient(), &mut buf);
        buf[72..80].copy_from_slice(&0i64.to_le_bytes());

        let before = Utc::now();
        let decoded = decode_record(&buf).unwrap();
        assert!(decoded.arrival_time >= before);
    }
}
