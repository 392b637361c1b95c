//! 医生路由策略
//!
//! 决定分诊完成的患者交给哪位医生。患者优先级本身不作为标签使用。

use er_core::{DoctorId, ErError, Priority, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 路由策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingPolicy {
    /// 积压最少的医生，并列时轮询
    #[default]
    LeastLoaded,
    /// 不看优先级，依次轮询
    RoundRobin,
    /// 优先级 1-5 映射到五个连续的医生段，段内轮询
    PriorityBand,
}

impl FromStr for RoutingPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "least-loaded" => Ok(Self::LeastLoaded),
            "round-robin" => Ok(Self::RoundRobin),
            "priority-band" => Ok(Self::PriorityBand),
            other => Err(format!(
                "unknown routing policy '{}' (expected least-loaded, round-robin or priority-band)",
                other
            )),
        }
    }
}

impl fmt::Display for RoutingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LeastLoaded => "least-loaded",
            Self::RoundRobin => "round-robin",
            Self::PriorityBand => "priority-band",
        })
    }
}

/// 路由引擎
///
/// 多个分诊线程共享同一个实例，轮询游标用原子量推进。
#[derive(Debug)]
pub struct RoutingEngine {
    policy: RoutingPolicy,
    doctors: usize,
    cursor: AtomicUsize,
}

impl RoutingEngine {
    /// 创建新的路由引擎
    pub fn new(policy: RoutingPolicy, doctors: usize) -> Result<Self> {
        if doctors == 0 {
            return Err(ErError::Config("routing needs at least one doctor".to_string()));
        }
        Ok(Self {
            policy,
            doctors,
            cursor: AtomicUsize::new(0),
        })
    }

    /// 为患者选择医生
    ///
    /// `backlog` 返回某位医生当前的待处理积压，仅 `LeastLoaded` 使用。
    pub fn route(&self, priority: Priority, backlog: impl Fn(DoctorId) -> usize) -> DoctorId {
        let turn = self.cursor.fetch_add(1, Ordering::Relaxed);

        let doctor = match self.policy {
            RoutingPolicy::RoundRobin => turn % self.doctors,
            RoutingPolicy::LeastLoaded => {
                let start = turn % self.doctors;
                (0..self.doctors)
                    .map(|offset| (start + offset) % self.doctors)
                    .min_by_key(|&index| backlog(DoctorId(index)))
                    .unwrap_or(start)
            }
            RoutingPolicy::PriorityBand => {
                let band = self.band(priority);
                band.start + turn % band.len()
            }
        };

        tracing::trace!(policy = %self.policy, %priority, doctor, "Routed patient");
        DoctorId(doctor)
    }

    /// 某优先级对应的医生段，始终非空且落在 [0, doctors) 内
    pub fn band(&self, priority: Priority) -> Range<usize> {
        let p = usize::from(priority.get());
        let bands = usize::from(Priority::MAX);
        let start = (p - 1) * self.doctors / bands;
        let end = (p * self.doctors / bands).max(start + 1);
        start..end
    }
}
