//! 接诊
//!
//! 入站管道是不受信任的无界生产者。接诊任务在管道可读和停机信号之间多路等待，
//! 停机信号优先；队列满时丢弃新患者，从不等待空位。

use er_core::{ErError, Patient, PatientCodec, RecordFrame, Result};
use er_workflow::{Enqueue, TriageQueue};
use futures::StreamExt;
use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::net::unix::pipe;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 入站命名管道
///
/// 创建时若路径上已有旧文件会先删除；析构时删除管道文件。
#[derive(Debug)]
pub struct InboundPipe {
    path: PathBuf,
}

impl InboundPipe {
    /// 创建命名管道
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        match std::fs::remove_file(&path) {
            Ok(()) => debug!("Removed stale file at {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ErError::ResourceAcquisition(format!(
                    "cannot remove stale {}: {}",
                    path.display(),
                    e
                )))
            }
        }

        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
            ErError::ResourceAcquisition(format!("pipe path contains NUL: {}", path.display()))
        })?;
        // SAFETY: c_path 是以 NUL 结尾的有效字符串，调用期间一直存活
        let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o666) };
        if rc != 0 {
            return Err(ErError::ResourceAcquisition(format!(
                "mkfifo {}: {}",
                path.display(),
                io::Error::last_os_error()
            )));
        }

        info!("Created inbound pipe {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 以读写方式打开读端
    ///
    /// 进程自身持有一个写端，写入方全部断开时读端不会读到 EOF，接诊一直运行到停机。
    pub fn open_reader(&self) -> Result<pipe::Receiver> {
        pipe::OpenOptions::new()
            .read_write(true)
            .open_receiver(&self.path)
            .map_err(|e| ErError::ResourceAcquisition(format!("open {}: {}", self.path.display(), e)))
    }
}

impl Drop for InboundPipe {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => info!("Removed inbound pipe {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove inbound pipe {}: {}", self.path.display(), e),
        }
    }
}

/// 接诊结果统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntakeSummary {
    /// 放入分诊队列的患者数
    pub admitted: u64,
    /// 因队列满被丢弃的患者数
    pub dropped: u64,
    /// 结构校验失败被跳过的记录数
    pub malformed: u64,
}

/// 接诊任务
#[derive(Debug, Clone)]
pub struct AdmissionIntake {
    queue: Arc<TriageQueue>,
}

impl AdmissionIntake {
    pub fn new(queue: Arc<TriageQueue>) -> Self {
        Self { queue }
    }

    /// 读取记录直到停机信号或流结束
    pub async fn run<R>(&self, reader: R, cancel: CancellationToken) -> Result<IntakeSummary>
    where
        R: AsyncRead + Unpin,
    {
        let mut frames = FramedRead::new(reader, PatientCodec);
        let mut summary = IntakeSummary::default();

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("Intake stopped");
                    break;
                }
                frame = frames.next() => match frame {
                    Some(Ok(RecordFrame::Patient(patient))) => self.admit(patient, &mut summary),
                    Some(Ok(RecordFrame::Malformed { arrival_number, reason })) => {
                        warn!("Skipping malformed record #{}: {}", arrival_number, reason);
                        summary.malformed += 1;
                    }
                    Some(Err(e)) => {
                        error!("Inbound stream failed: {}", e);
                        return Err(e);
                    }
                    None => {
                        info!("Inbound stream closed");
                        break;
                    }
                },
            }
        }

        info!(
            admitted = summary.admitted,
            dropped = summary.dropped,
            malformed = summary.malformed,
            "Intake finished"
        );
        Ok(summary)
    }

    fn admit(&self, patient: Patient, summary: &mut IntakeSummary) {
        let label = patient.to_string();
        match self.queue.enqueue(patient) {
            Enqueue::Accepted => {
                debug!("Admitted {}", label);
                summary.admitted += 1;
            }
            // 队列已记录丢弃并告警
            Enqueue::Dropped(_) => summary.dropped += 1,
        }
    }
}
