use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::symbolizer::Symbol;

mod training;
mod viterbi;

pub use training::{baum_welch, TrainingReport};
pub use viterbi::viterbi;

pub const STATES: usize = 4;

pub type Matrix = [[f64; STATES]; STATES];

// 行和允许的误差（训练结果保留 4 位小数）
const ROW_SUM_TOLERANCE: f64 = 1e-2;

/// 四状态心动周期模型：行为隐状态，发射矩阵的列为观测符号
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct HmmModel {
    pub transition: Matrix,
    pub emission: Matrix,
    pub initial: [f64; STATES],
}

impl Default for HmmModel {
    fn default() -> Self {
        Self {
            transition: [
                [0.6794, 0.3206, 0.0, 0.0],
                [0.0, 0.5366, 0.4634, 0.0],
                [0.0, 0.0, 0.3485, 0.6516],
                [0.1508, 0.0, 0.0, 0.8492],
            ],
            emission: [
                [0.6884, 0.0015, 0.3002, 0.0099],
                [0.0, 0.7205, 0.0102, 0.2694],
                [0.2894, 0.3731, 0.3362, 0.0023],
                [0.0005, 0.8440, 0.0021, 0.1534],
            ],
            initial: [0.25, 0.20, 0.10, 0.45],
        }
    }
}

impl HmmModel {
    pub fn validate(&self) -> PipelineResult<()> {
        check_row("initial", &self.initial)?;
        for (i, row) in self.transition.iter().enumerate() {
            check_row(&format!("transition row {}", i), row)?;
        }
        for (i, row) in self.emission.iter().enumerate() {
            check_row(&format!("emission row {}", i), row)?;
        }
        Ok(())
    }

    /// 最可能的隐状态路径，与观测等长
    pub fn decode(&self, observations: &[Symbol]) -> Vec<usize> { viterbi(self, observations) }
}

fn check_row(name: &str, row: &[f64; STATES]) -> PipelineResult<()> {
    if row.iter().any(|p| !p.is_finite() || *p < 0.0) {
        return Err(PipelineError::InvalidModel(format!("{} has a negative or non-finite entry: {:?}", name, row)));
    }
    let sum: f64 = row.iter().sum();
    if (sum - 1.0).abs() > ROW_SUM_TOLERANCE {
        return Err(PipelineError::InvalidModel(format!("{} sums to {:.4}, expected 1", name, sum)));
    }
    Ok(())
}
