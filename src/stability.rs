use log::info;
use serde::{Deserialize, Serialize};

use crate::bpm::RECORD_SLOTS;
use crate::error::{PipelineError, PipelineResult};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct StabilityConfig {
    // 6 个记录的总体标准差低于该值视为读数稳定
    pub max_std_dev: f64,
}

impl Default for StabilityConfig {
    fn default() -> Self { Self { max_std_dev: 10.0 } }
}

impl StabilityConfig {
    pub fn validate(&self) -> PipelineResult<()> {
        if !self.max_std_dev.is_finite() || self.max_std_dev <= 0.0 {
            return Err(PipelineError::InvalidConfig("stability max_std_dev must be positive".into()));
        }
        Ok(())
    }
}

/// 每个会话只报告一次
#[derive(Debug, Clone)]
pub struct StabilityGate {
    config: StabilityConfig,
    stabilized: bool,
}

impl StabilityGate {
    pub fn new(config: StabilityConfig) -> Self { Self { config, stabilized: false } }

    pub fn is_stabilized(&self) -> bool { self.stabilized }

    /// 首次满足条件时返回 true
    pub fn check(&mut self, records: &[i64; RECORD_SLOTS], at: f64) -> bool {
        if self.stabilized { return false; }
        let sd = population_std_dev(records);
        if sd < self.config.max_std_dev {
            info!("[STABLE] records={:?} sd={:.2} at {:.3}s", records, sd, at);
            self.stabilized = true;
            return true;
        }
        false
    }

    pub fn reset(&mut self) { self.stabilized = false; }
}

pub fn population_std_dev(records: &[i64; RECORD_SLOTS]) -> f64 {
    let n = RECORD_SLOTS as f64;
    let mean = records.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = records.iter().map(|&v| { let d = v as f64 - mean; d * d }).sum::<f64>() / n;
    var.sqrt()
}
