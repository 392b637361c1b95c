//! 患者生成器
//!
//! 向入站管道写入随机患者记录，供 er-server 接诊。必须先启动服务器创建管道。

use anyhow::Context;
use clap::Parser;
use er_core::{Patient, PatientCodec, Priority};
use futures::SinkExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::unix::pipe;
use tokio_util::codec::FramedWrite;
use tracing::info;

const NAMES: [&str; 10] = [
    "Alice", "Bob", "Carol", "David", "Eve", "Frank", "Grace", "Heidi", "Ivan", "Jack",
];

/// 患者生成器命令行参数
#[derive(Parser, Debug)]
#[command(name = "patient-feed")]
#[command(about = "向急诊入站管道写入随机患者")]
struct Args {
    /// 入站命名管道路径
    #[arg(short, long, default_value = "input_pipe")]
    pipe: PathBuf,

    /// 生成的患者数量
    #[arg(short = 'n', long, default_value_t = 50)]
    count: u32,

    /// 随机种子，便于复现
    #[arg(short, long)]
    seed: Option<u64>,

    /// 两位患者之间的最短间隔 (毫秒)
    #[arg(long, default_value_t = 50)]
    min_delay_ms: u64,

    /// 两位患者之间的最长间隔 (毫秒)
    #[arg(long, default_value_t = 250)]
    max_delay_ms: u64,
}

fn random_patient(rng: &mut StdRng, arrival_number: u32) -> anyhow::Result<Patient> {
    let name = NAMES[rng.gen_range(0..NAMES.len())];
    Ok(Patient::new(
        i32::try_from(arrival_number)?,
        format!("{}_{}", name, arrival_number),
        rng.gen_range(500..=3500),
        rng.gen_range(1000..=6000),
        Priority::new(rng.gen_range(Priority::MIN..=Priority::MAX))?,
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    #[cfg(feature = "logging")]
    er_admin::init_logging("info", er_admin::LogFormat::Text)?;

    let sender = pipe::OpenOptions::new()
        .open_sender(&args.pipe)
        .with_context(|| format!("打开管道 {} 失败，er-server 是否已启动?", args.pipe.display()))?;
    let mut sink = FramedWrite::new(sender, PatientCodec);

    let mut rng = args.seed.map(StdRng::seed_from_u64).unwrap_or_else(StdRng::from_entropy);
    let (low, high) = (args.min_delay_ms, args.max_delay_ms.max(args.min_delay_ms));

    for arrival_number in 0..args.count {
        let patient = random_patient(&mut rng, arrival_number)?;
        info!("Sending patient {}", patient);
        sink.send(patient).await.context("写入管道失败")?;

        tokio::time::sleep(Duration::from_millis(rng.gen_range(low..=high))).await;
    }

    info!("Sent {} patients", args.count);
    Ok(())
}
