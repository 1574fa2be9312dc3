use std::collections::VecDeque;

use super::{Symbol, Symbolizer, SymbolizerConfig};

/// 滑动平均后看相邻两段斜率的符号：
/// 升→非升 记为 Peak，降→非降 记为 Trough，其余按最新斜率记为 Rising/Falling；
/// 持平时延续上一个方向
pub struct SlopeSymbolizer {
    config: SymbolizerConfig,
    raw: VecDeque<f64>,
    trail: VecDeque<f64>,
    last: Option<Symbol>,
}

impl SlopeSymbolizer {
    pub fn new(config: SymbolizerConfig) -> Self {
        let n = config.smoothing.max(1);
        Self { config, raw: VecDeque::with_capacity(n), trail: VecDeque::with_capacity(3), last: None }
    }

    fn sign(&self, d: f64) -> i8 {
        if d > self.config.flat_tolerance { 1 } else if d < -self.config.flat_tolerance { -1 } else { 0 }
    }

    fn classify(&self, before: i8, after: i8) -> Symbol {
        match (before, after) {
            (1, a) if a <= 0 => Symbol::Peak,
            (-1, a) if a >= 0 => Symbol::Trough,
            (_, 1) => Symbol::Rising,
            (_, -1) => Symbol::Falling,
            // 两段都持平：延续之前的方向，极值之后转为离开极值的方向
            _ => match self.last {
                Some(Symbol::Peak) | None => Symbol::Falling,
                Some(Symbol::Trough) => Symbol::Rising,
                Some(s) => s,
            },
        }
    }
}

impl Symbolizer for SlopeSymbolizer {
    fn add_value(&mut self, sample: f64) {
        let n = self.config.smoothing.max(1);
        self.raw.push_back(sample);
        if self.raw.len() > n { self.raw.pop_front(); }
        if self.raw.len() < n { self.last = None; return; }
        let avg = self.raw.iter().sum::<f64>() / n as f64;
        self.trail.push_back(avg);
        if self.trail.len() > 3 { self.trail.pop_front(); }
        if self.trail.len() < 3 { self.last = None; return; }

        let before = self.sign(self.trail[1] - self.trail[0]);
        let after = self.sign(self.trail[2] - self.trail[1]);
        self.last = Some(self.classify(before, after));
    }

    fn current_symbol(&self) -> Option<Symbol> { self.last }

    fn reset(&mut self) {
        self.raw.clear();
        self.trail.clear();
        self.last = None;
    }
}
