//! 急诊接诊服务器主程序

mod control;

use clap::Parser;
use er_admin::LogFormat;
use er_workflow::RoutingPolicy;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

/// 急诊服务器命令行参数
#[derive(Parser, Debug, Clone)]
#[command(name = "er-server")]
#[command(about = "急诊接诊流水线服务器：接诊、分诊、医生治疗与班次轮换")]
pub struct Args {
    /// 配置文件路径
    #[arg(short, long, default_value = "config.txt")]
    pub config: PathBuf,

    /// 入站命名管道路径
    #[arg(short, long, default_value = "input_pipe")]
    pub pipe: PathBuf,

    /// 医生路由策略 (least-loaded, round-robin, priority-band)
    #[arg(short, long, default_value = "least-loaded")]
    pub routing: RoutingPolicy,

    /// 分诊与治疗时长缩放系数
    #[arg(short, long, default_value_t = 1.0, value_parser = parse_time_scale)]
    pub time_scale: f64,

    /// 日志级别
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// 日志格式 (text, json)
    #[arg(long, default_value = "text")]
    pub log_format: LogFormat,
}

/// 时间缩放系数上限
const MAX_TIME_SCALE: f64 = 1000.0;

fn parse_time_scale(value: &str) -> Result<f64, String> {
    let scale: f64 = value
        .parse()
        .map_err(|e| format!("'{}' is not a number: {}", value, e))?;
    if !scale.is_finite() || !(0.0..=MAX_TIME_SCALE).contains(&scale) {
        return Err(format!("time scale must be within 0..={}, got {}", MAX_TIME_SCALE, value));
    }
    Ok(scale)
}

#[cfg(feature = "logging")]
fn init_logging(args: &Args) -> anyhow::Result<()> {
    er_admin::init_logging(&args.log_level, args.log_format)?;
    Ok(())
}

#[cfg(not(feature = "logging"))]
fn init_logging(_args: &Args) -> anyhow::Result<()> {
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(&args) {
        eprintln!("日志初始化失败: {:#}", e);
        return ExitCode::FAILURE;
    }

    match control::run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("急诊服务器异常退出: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
