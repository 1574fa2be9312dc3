use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::symbolizer::{Symbol, Symbolizer};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct BufferConfig {
    // 暂存跨度达到该值（秒）时做一次并入/丢弃判定
    pub fold_span_secs: f64,
    // 并入时只保留距最新暂存样本不超过该值（秒）的样本，其余丢弃；
    // 不小于 fold_span_secs 时整段并入
    pub continuity_secs: f64,
    // 新一段开始后的寻峰期，期间暂存只保留最新样本
    pub peak_seek_secs: f64,
    // 历史跨度达到该值且条数超过 trim_count 时，丢弃最早的 trim_count 条
    pub history_span_secs: f64,
    pub trim_count: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self { fold_span_secs: 2.0, continuity_secs: 1.0, peak_seek_secs: 1.0, history_span_secs: 20.0, trim_count: 200 }
    }
}

impl BufferConfig {
    pub fn validate(&self) -> PipelineResult<()> {
        let secs = [self.fold_span_secs, self.continuity_secs, self.peak_seek_secs, self.history_span_secs];
        if secs.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(PipelineError::InvalidConfig("buffer windows must be finite and non-negative".into()));
        }
        if self.fold_span_secs <= 0.0 || self.trim_count == 0 {
            return Err(PipelineError::InvalidConfig("fold_span_secs and trim_count must be positive".into()));
        }
        Ok(())
    }
}

/// 长期观测历史：符号与时间戳等长、同索引、时间严格递增
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservationHistory {
    symbols: Vec<Symbol>,
    timestamps: Vec<f64>,
}

impl ObservationHistory {
    pub fn new() -> Self { Self::default() }

    /// 时间戳不晚于末尾的样本被拒绝
    pub fn push(&mut self, symbol: Symbol, t: f64) -> bool {
        if let Some(&last) = self.timestamps.last() {
            if t <= last { return false; }
        }
        self.symbols.push(symbol);
        self.timestamps.push(t);
        true
    }

    pub fn len(&self) -> usize { self.symbols.len() }

    pub fn is_empty(&self) -> bool { self.symbols.is_empty() }

    pub fn symbols(&self) -> &[Symbol] { &self.symbols }

    pub fn timestamps(&self) -> &[f64] { &self.timestamps }

    pub fn last_timestamp(&self) -> Option<f64> { self.timestamps.last().copied() }

    pub fn span(&self) -> f64 {
        match (self.timestamps.first(), self.timestamps.last()) {
            (Some(a), Some(b)) => b - a,
            _ => 0.0,
        }
    }

    pub fn drop_front(&mut self, n: usize) {
        let n = n.min(self.len());
        self.symbols.drain(..n);
        self.timestamps.drain(..n);
    }

    pub fn clear(&mut self) {
        self.symbols.clear();
        self.timestamps.clear();
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FoldOutcome {
    pub folded: usize,
    pub discarded: usize,
    pub trimmed: usize,
}

/// 暂存 → 判定 → 并入历史；并负责历史长度上限
pub struct ObservationBuffer {
    config: BufferConfig,
    symbolizer: Box<dyn Symbolizer>,
    history: ObservationHistory,
    staging: Vec<(Symbol, f64)>,
    burst_start: Option<f64>,
    need_to_find_next_peak: bool,
    last_sample_at: Option<f64>,
}

impl ObservationBuffer {
    pub fn new(config: BufferConfig, symbolizer: Box<dyn Symbolizer>) -> Self {
        Self {
            config,
            symbolizer,
            history: ObservationHistory::new(),
            staging: Vec::new(),
            burst_start: None,
            need_to_find_next_peak: false,
            last_sample_at: None,
        }
    }

    pub fn history(&self) -> &ObservationHistory { &self.history }

    pub fn staging_len(&self) -> usize { self.staging.len() }

    pub fn is_seeking_peak(&self) -> bool { self.need_to_find_next_peak }

    /// 重新覆盖后调用：量化器从空窗口开始，下一个有效符号开启新一段（含寻峰期）
    pub fn begin_burst(&mut self) {
        self.symbolizer.reset();
        self.burst_start = None;
        self.need_to_find_next_peak = false;
    }

    /// 输入一帧归一化亮度；返回本帧触发的并入结果（若有）
    pub fn push_brightness(&mut self, value: f64, t: f64) -> Option<FoldOutcome> {
        if !self.accept_time(t) { return None; }
        self.symbolizer.add_value(value);
        let symbol = self.symbolizer.current_symbol();
        self.stage(symbol, t)
    }

    /// 已量化的观测直接入暂存（None 即哨兵，丢弃）
    pub fn push_symbol(&mut self, symbol: Option<Symbol>, t: f64) -> Option<FoldOutcome> {
        if !self.accept_time(t) { return None; }
        self.stage(symbol, t)
    }

    pub fn reset(&mut self) {
        self.symbolizer.reset();
        self.history.clear();
        self.staging.clear();
        self.burst_start = None;
        self.need_to_find_next_peak = false;
        self.last_sample_at = None;
    }

    fn accept_time(&mut self, t: f64) -> bool {
        if !t.is_finite() { return false; }
        if let Some(prev) = self.last_sample_at {
            if t <= prev {
                debug!("[BUF] drop out-of-order sample t={:.3}s (last {:.3}s)", t, prev);
                return false;
            }
        }
        self.last_sample_at = Some(t);
        true
    }

    fn stage(&mut self, symbol: Option<Symbol>, t: f64) -> Option<FoldOutcome> {
        let symbol = symbol?;
        let start = match self.burst_start {
            Some(s) => s,
            None => {
                debug!("[BUF] burst starts at {:.3}s", t);
                self.burst_start = Some(t);
                self.need_to_find_next_peak = true;
                t
            }
        };
        self.staging.push((symbol, t));

        if self.need_to_find_next_peak {
            if t - start < self.config.peak_seek_secs {
                let keep_from = self.staging.len() - 1;
                self.staging.drain(..keep_from);
                return None;
            }
            self.need_to_find_next_peak = false;
        }

        let span = match (self.staging.first(), self.staging.last()) {
            (Some(a), Some(b)) => b.1 - a.1,
            _ => 0.0,
        };
        if span < self.config.fold_span_secs { return None; }
        Some(self.fold())
    }

    fn fold(&mut self) -> FoldOutcome {
        // 暂存时间单调递增：从最新样本往回走，超出 continuity_secs 即停
        let newest = self.staging.last().map_or(0.0, |s| s.1);
        let mut keep_from = self.staging.len();
        while keep_from > 0 && newest - self.staging[keep_from - 1].1 <= self.config.continuity_secs {
            keep_from -= 1;
        }
        let mut out = FoldOutcome { discarded: keep_from, ..FoldOutcome::default() };
        for &(symbol, t) in &self.staging[keep_from..] {
            if self.history.push(symbol, t) { out.folded += 1; } else { out.discarded += 1; }
        }
        self.staging.clear();

        if self.history.span() >= self.config.history_span_secs && self.history.len() > self.config.trim_count {
            self.history.drop_front(self.config.trim_count);
            out.trimmed = self.config.trim_count;
        }
        if out.discarded > 0 || out.trimmed > 0 {
            info!("[FOLD] folded={} discarded={} trimmed={} history={}", out.folded, out.discarded, out.trimmed, self.history.len());
        } else {
            debug!("[FOLD] folded={} history={}", out.folded, self.history.len());
        }
        out
    }
}
