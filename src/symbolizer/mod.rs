use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

mod slope;

pub use slope::SlopeSymbolizer;

/// 亮度波形的局部形态：上升、下降、局部极大、局部极小
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Symbol {
    Rising = 0,
    Falling = 1,
    Peak = 2,
    Trough = 3,
}

impl Symbol {
    pub const ALL: [Symbol; 4] = [Symbol::Rising, Symbol::Falling, Symbol::Peak, Symbol::Trough];

    pub fn index(self) -> usize { self as usize }

    pub fn from_index(idx: usize) -> Option<Self> { Self::ALL.get(idx).copied() }
}

/// 观测量化策略。`current_symbol` 返回 None 表示窗口尚未填满
pub trait Symbolizer: Send {
    fn add_value(&mut self, sample: f64);
    fn current_symbol(&self) -> Option<Symbol>;
    fn reset(&mut self);
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct SymbolizerConfig {
    // 滑动平均窗口（样本数）
    pub smoothing: usize,
    // 相邻平滑值差的绝对值不超过该值视为持平（归一化亮度单位）
    pub flat_tolerance: f64,
}

impl Default for SymbolizerConfig {
    fn default() -> Self { Self { smoothing: 5, flat_tolerance: 0.0 } }
}

impl SymbolizerConfig {
    pub fn validate(&self) -> PipelineResult<()> {
        if self.smoothing == 0 {
            return Err(PipelineError::InvalidConfig("symbolizer smoothing must be at least 1".into()));
        }
        if !self.flat_tolerance.is_finite() || self.flat_tolerance < 0.0 {
            return Err(PipelineError::InvalidConfig("symbolizer flat_tolerance must be finite and non-negative".into()));
        }
        Ok(())
    }
}

pub fn make_symbolizer(config: &SymbolizerConfig) -> Box<dyn Symbolizer> { Box::new(SlopeSymbolizer::new(*config)) }
