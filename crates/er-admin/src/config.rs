//! 配置管理
//!
//! 配置文件为纯文本，每行一个 `KEY VALUE` (或 `KEY=VALUE`)。识别的键：
//!
//! | 键 | 含义 |
//! |---|---|
//! | `TRIAGE_QUEUE_MAX` | 分诊队列容量 |
//! | `TRIAGE` / `TRIAGE_THREADS` | 分诊线程数 |
//! | `DOCTORS` | 医生数量 |
//! | `SHIFT_LENGTH` | 班次时长 (秒) |
//! | `MSQ_WAIT_MAX` | 每位医生在分发通道中的最大积压 |
//!
//! 文件之上叠加 `EMERGENCY_<KEY>` 环境变量。未知键、缺失键、非整数或小于 1 的值
//! 都会导致加载失败，此时尚未获取任何资源。

use config::builder::{ConfigBuilder, DefaultState};
use config::{
    Config, ConfigError, Environment, File, FileStoredFormat, Format, Map, Source, Value, ValueKind,
};
use er_core::{ErError, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// 环境变量覆盖前缀
const ENV_PREFIX: &str = "EMERGENCY";

/// 急诊系统配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmergencyConfig {
    /// 分诊队列容量
    pub triage_queue_max: usize,
    /// 分诊线程数
    pub triage_threads: usize,
    /// 医生数量
    pub doctors: usize,
    /// 班次时长
    pub shift_length: Duration,
    /// 每位医生的分发积压上限
    pub msq_wait_max: usize,
}

/// 未校验的原始配置
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    triage_queue_max: i64,
    triage_threads: i64,
    doctors: i64,
    shift_length: i64,
    msq_wait_max: i64,
}

impl RawConfig {
    fn validate(self) -> Result<EmergencyConfig> {
        Ok(EmergencyConfig {
            triage_queue_max: positive("TRIAGE_QUEUE_MAX", self.triage_queue_max)?,
            triage_threads: positive("TRIAGE", self.triage_threads)?,
            doctors: positive("DOCTORS", self.doctors)?,
            shift_length: Duration::from_secs(positive("SHIFT_LENGTH", self.shift_length)? as u64),
            msq_wait_max: positive("MSQ_WAIT_MAX", self.msq_wait_max)?,
        })
    }
}

fn positive(key: &str, value: i64) -> Result<usize> {
    if value < 1 {
        return Err(ErError::Config(format!("{} must be at least 1, got {}", key, value)));
    }
    usize::try_from(value).map_err(|_| ErError::Config(format!("{} is too large: {}", key, value)))
}

/// 文件中的键到配置字段名的映射
fn field_for_key(key: &str) -> Option<&'static str> {
    match key.to_ascii_uppercase().as_str() {
        "TRIAGE_QUEUE_MAX" => Some("triage_queue_max"),
        "TRIAGE" | "TRIAGE_THREADS" => Some("triage_threads"),
        "DOCTORS" => Some("doctors"),
        "SHIFT_LENGTH" => Some("shift_length"),
        "MSQ_WAIT_MAX" => Some("msq_wait_max"),
        _ => None,
    }
}

/// `KEY VALUE` 纯文本格式
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyValueFormat;

impl Format for KeyValueFormat {
    fn parse(
        &self,
        uri: Option<&String>,
        text: &str,
    ) -> std::result::Result<Map<String, Value>, Box<dyn std::error::Error + Send + Sync>> {
        let mut map = Map::new();

        for (index, line) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            let mut tokens = line
                .split(|c: char| c == '=' || c.is_whitespace())
                .filter(|t| !t.is_empty());
            let (key, value) = match (tokens.next(), tokens.next(), tokens.next()) {
                (Some(key), Some(value), None) => (key, value),
                (Some(key), None, _) => {
                    return Err(format!("line {}: key '{}' has no value", line_no, key).into())
                }
                _ => return Err(format!("line {}: expected 'KEY VALUE'", line_no).into()),
            };

            let field = field_for_key(key)
                .ok_or_else(|| format!("line {}: unrecognized key '{}'", line_no, key))?;
            let parsed: i64 = value
                .parse()
                .map_err(|_| format!("line {}: value '{}' for {} is not an integer", line_no, value, key))?;

            map.insert(field.to_string(), Value::new(uri, ValueKind::I64(parsed)));
        }

        Ok(map)
    }
}

impl FileStoredFormat for KeyValueFormat {
    fn file_extensions(&self) -> &'static [&'static str] {
        &["txt", "conf"]
    }
}

/// `EMERGENCY_<KEY>` 环境变量，键名与配置文件使用同一张映射表
#[derive(Debug, Clone)]
struct EnvOverrides(Environment);

impl Source for EnvOverrides {
    fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
        Box::new(self.clone())
    }

    fn collect(&self) -> std::result::Result<Map<String, Value>, ConfigError> {
        // 未识别的键保持原样，交给反序列化拒绝
        Ok(self
            .0
            .collect()?
            .into_iter()
            .map(|(key, value)| match field_for_key(&key) {
                Some(field) => (field.to_string(), value),
                None => (key, value),
            })
            .collect())
    }
}

impl EmergencyConfig {
    /// 从配置文件加载，并叠加环境变量
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_with_env(path, Environment::with_prefix(ENV_PREFIX))
    }

    fn load_with_env(path: impl AsRef<Path>, env: Environment) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .to_str()
            .ok_or_else(|| ErError::Config(format!("config path is not UTF-8: {}", path.display())))?;

        let settings = Config::builder()
            .add_source(File::new(name, KeyValueFormat).required(true))
            .add_source(EnvOverrides(env.try_parsing(true)));

        let config = Self::build(settings)?;
        info!(
            queue = config.triage_queue_max,
            triage = config.triage_threads,
            doctors = config.doctors,
            shift_secs = config.shift_length.as_secs(),
            backlog = config.msq_wait_max,
            "Loaded configuration from {}",
            path.display()
        );
        Ok(config)
    }

    /// 从字符串解析，不读取环境变量
    pub fn from_text(text: &str) -> Result<Self> {
        Self::build(Config::builder().add_source(File::from_str(text, KeyValueFormat)))
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let raw: RawConfig = builder
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| ErError::Config(e.to_string()))?;
        debug!(?raw, "Validating configuration");
        raw.validate()
    }
}
