//! 控制面
//!
//! 信号监听最先安装，启动期间到达的信号留在监听流中，启动完成后才处理。
//! 终止信号按固定顺序停机：停止接诊、排空分诊、医生下班、关闭分发通道、
//! 输出最终统计、删除管道。

use crate::Args;
use anyhow::Context;
use er_admin::EmergencyConfig;
use er_integration::{AdmissionIntake, InboundPipe, IntakeSummary};
use er_workflow::{BackoffPolicy, EmergencyEngine, EngineOptions, StatsReport};
use futures::stream::{BoxStream, Stream, StreamExt};
use std::io;
use std::time::Duration;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::task::JoinError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 外部控制指令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// SIGINT / SIGTERM
    Terminate,
    /// SIGUSR1
    Report,
}

/// 信号监听
pub struct Controls {
    interrupt: Signal,
    terminate: Signal,
    report: Signal,
}

impl Controls {
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            report: signal(SignalKind::user_defined1())?,
        })
    }

    /// 等待下一条控制指令
    pub async fn next(&mut self) -> Control {
        tokio::select! {
            _ = self.interrupt.recv() => Control::Terminate,
            _ = self.terminate.recv() => Control::Terminate,
            _ = self.report.recv() => Control::Report,
        }
    }

    /// 转为控制指令流
    pub fn into_stream(self) -> BoxStream<'static, Control> {
        futures::stream::unfold(self, |mut controls| async move {
            let control = controls.next().await;
            Some((control, controls))
        })
        .boxed()
    }
}

/// 一次运行的结果
#[derive(Debug, Clone, Copy)]
pub struct Session {
    /// 处理过的统计报告请求数
    pub reports: usize,
    /// 停机后的最终统计
    pub report: StatsReport,
}

fn log_intake(result: Result<er_core::Result<IntakeSummary>, JoinError>) {
    match result {
        Ok(Ok(summary)) => info!(
            admitted = summary.admitted,
            dropped = summary.dropped,
            malformed = summary.malformed,
            "接诊已结束"
        ),
        Ok(Err(e)) => error!("接诊失败: {}", e),
        Err(e) => error!("接诊任务异常终止: {}", e),
    }
}

/// 启动并运行直到收到终止信号
pub async fn run(args: Args) -> anyhow::Result<()> {
    let controls = Controls::install().context("安装信号监听失败")?;

    let session = serve(&args, controls.into_stream()).await?;
    info!(
        "急诊服务器已退出，共治疗 {} 位患者，处理 {} 次统计请求",
        session.report.snapshot.total_treated, session.reports
    );
    Ok(())
}

/// 启动所有组件并处理控制指令，直到终止
///
/// 启动期间到达的指令留在 `controls` 中，启动完成后依次处理。
pub async fn serve<S>(args: &Args, mut controls: S) -> anyhow::Result<Session>
where
    S: Stream<Item = Control> + Unpin,
{
    let config = EmergencyConfig::load(&args.config)
        .with_context(|| format!("加载配置 {} 失败", args.config.display()))?;

    let pipe = InboundPipe::create(&args.pipe)
        .with_context(|| format!("创建管道 {} 失败", args.pipe.display()))?;
    let reader = pipe.open_reader()?;

    let options = EngineOptions {
        routing: args.routing,
        time_scale: args.time_scale,
        receive_backoff: BackoffPolicy::default(),
    };
    let mut engine = EmergencyEngine::start(&config, options).context("启动急诊引擎失败")?;

    let cancel = CancellationToken::new();
    let intake = AdmissionIntake::new(engine.queue());
    let mut intake_task = tokio::spawn({
        let cancel = cancel.clone();
        async move { intake.run(reader, cancel).await }
    });

    let mut ticker = tokio::time::interval(engine.tick_interval().max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("急诊服务器已就绪，等待患者写入 {}", pipe.path().display());

    let mut reports = 0;
    let mut intake_running = true;
    let outcome = loop {
        tokio::select! {
            control = controls.next() => match control {
                Some(Control::Terminate) => {
                    info!("收到终止信号，开始停机");
                    break Ok(());
                }
                Some(Control::Report) => {
                    reports += 1;
                    info!("统计报告: {}", engine.report());
                }
                None => {
                    warn!("控制指令流已结束，开始停机");
                    break Ok(());
                }
            },
            now = ticker.tick() => {
                if let Err(e) = engine.supervise(now) {
                    error!("班次监督失败: {}", e);
                    break Err(anyhow::Error::from(e).context("班次监督失败"));
                }
            }
            result = &mut intake_task, if intake_running => {
                intake_running = false;
                warn!("接诊提前结束，继续处理已接诊的患者");
                log_intake(result);
            }
        }
    };

    cancel.cancel();
    if intake_running {
        log_intake(intake_task.await);
    }

    let report = engine.shutdown().await.context("停机失败");
    drop(pipe);

    outcome?;
    Ok(Session {
        reports,
        report: report?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use er_core::{Patient, PatientCodec, Priority};
    use er_workflow::RoutingPolicy;
    use futures::channel::mpsc;
    use futures::SinkExt;
    use er_admin::LogFormat;
    use std::path::Path;
    use tokio::net::unix::pipe;
    use tokio_util::codec::FramedWrite;

    const CONFIG: &str = "TRIAGE_QUEUE_MAX 8\nTRIAGE 2\nDOCTORS 2\nSHIFT_LENGTH 5\nMSQ_WAIT_MAX 10\n";

    fn args(dir: &Path) -> Args {
        let config = dir.join("config.txt");
        std::fs::write(&config, CONFIG).unwrap();
        Args {
            config,
            pipe: dir.join("input_pipe"),
            routing: RoutingPolicy::LeastLoaded,
            time_scale: 0.0,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }

    #[tokio::test]
    async fn test_controls_queued_before_startup_are_handled() {
        let dir = tempfile::tempdir().unwrap();
        let args = args(dir.path());
        let controls = futures::stream::iter([Control::Report, Control::Report, Control::Terminate]);

        let session = tokio::time::timeout(Duration::from_secs(10), serve(&args, controls))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(session.reports, 2);
        assert_eq!(session.report.snapshot.total_treated, 0);
        assert!(!args.pipe.exists());
    }

    #[tokio::test]
    async fn test_terminate_after_patients_shuts_down_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let args = args(dir.path());
        let (mut control_tx, control_rx) = mpsc::unbounded();

        let server = tokio::spawn({
            let args = args.clone();
            async move { serve(&args, control_rx).await }
        });

        let sender = loop {
            match pipe::OpenOptions::new().open_sender(&args.pipe) {
                Ok(sender) => break sender,
                Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        };
        let mut feed = FramedWrite::new(sender, PatientCodec);
        for i in 0..3 {
            let patient = Patient::new(i, format!("Bob_{}", i), 500, 1000, Priority::new(2).unwrap());
            feed.send(patient).await.unwrap();
        }
        drop(feed);

        // 留出接诊读取的时间
        tokio::time::sleep(Duration::from_millis(500)).await;
        control_tx.send(Control::Report).await.unwrap();
        control_tx.send(Control::Terminate).await.unwrap();

        let session = tokio::time::timeout(Duration::from_secs(10), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(session.reports, 1);
        assert_eq!(session.report.snapshot.total_treated, 3);
        assert!(!args.pipe.exists());
    }

    #[tokio::test]
    async fn test_bad_config_fails_before_creating_pipe() {
        let dir = tempfile::tempdir().unwrap();
        let args = args(dir.path());
        std::fs::write(&args.config, "DOCTORS 0\n").unwrap();

        let result = serve(&args, futures::stream::iter([Control::Terminate])).await;
        assert!(result.is_err());
        assert!(!args.pipe.exists());
    }

    #[tokio::test]
    async fn test_signals_raised_during_startup_are_deferred() {
        let dir = tempfile::tempdir().unwrap();
        let args = args(dir.path());
        let mut controls = Controls::install().unwrap();

        // SAFETY: 信号监听已安装，raise 只会触发 tokio 的处理函数
        unsafe { libc::raise(libc::SIGUSR1) };
        let control = tokio::time::timeout(Duration::from_secs(5), controls.next())
            .await
            .unwrap();
        assert_eq!(control, Control::Report);

        // 终止信号在引擎启动之前到达
        unsafe { libc::raise(libc::SIGTERM) };
        let session = tokio::time::timeout(Duration::from_secs(10), serve(&args, controls.into_stream()))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(session.report.snapshot.total_treated, 0);
        assert!(!args.pipe.exists());
    }
}
