use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::luma::LumaStats;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct CoverageThresholds {
    pub min_luma_mean: f64,
    pub max_luma_mean: f64,
    pub max_luma_std_dev: f64,
    // 由覆盖转为未覆盖时的防抖时长（秒）
    pub debounce_secs: f64,
}

impl Default for CoverageThresholds {
    fn default() -> Self {
        Self { min_luma_mean: 60.0, max_luma_mean: 100.0, max_luma_std_dev: 20.0, debounce_secs: 1.0 }
    }
}

impl CoverageThresholds {
    /// 开区间判定：边界值（均值恰为 60/100、标准差恰为 20）不算覆盖
    pub fn is_covered(&self, stats: &LumaStats) -> bool {
        stats.mean > self.min_luma_mean && stats.mean < self.max_luma_mean && stats.std_dev < self.max_luma_std_dev
    }

    pub fn validate(&self) -> PipelineResult<()> {
        let all = [self.min_luma_mean, self.max_luma_mean, self.max_luma_std_dev, self.debounce_secs];
        if all.iter().any(|v| !v.is_finite()) {
            return Err(PipelineError::InvalidConfig("coverage thresholds must be finite".into()));
        }
        if self.min_luma_mean >= self.max_luma_mean {
            return Err(PipelineError::InvalidConfig(format!(
                "min_luma_mean {} must be below max_luma_mean {}", self.min_luma_mean, self.max_luma_mean
            )));
        }
        if self.max_luma_std_dev <= 0.0 || self.debounce_secs < 0.0 {
            return Err(PipelineError::InvalidConfig("coverage std-dev limit must be positive and debounce non-negative".into()));
        }
        Ok(())
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct CoverageTransition {
    pub covered: bool,
    pub at: f64,
}

/// 手指覆盖判定：逐帧原始状态 + 对外提交状态（带防抖）
#[derive(Debug, Clone)]
pub struct CoverageClassifier {
    thresholds: CoverageThresholds,
    raw: bool,
    committed: bool,
    lapse_deadline: Option<f64>,
    last_transition_at: Option<f64>,
}

impl CoverageClassifier {
    pub fn new(thresholds: CoverageThresholds) -> Self {
        Self { thresholds, raw: false, committed: false, lapse_deadline: None, last_transition_at: None }
    }

    /// 逐帧状态；估计流程以它为门控
    pub fn raw_covered(&self) -> bool { self.raw }

    pub fn committed(&self) -> bool { self.committed }

    pub fn is_lapsing(&self) -> bool { self.lapse_deadline.is_some() }

    pub fn last_transition_at(&self) -> Option<f64> { self.last_transition_at }

    pub fn observe(&mut self, stats: &LumaStats, now: f64, active: bool) -> Vec<CoverageTransition> {
        let covered = self.thresholds.is_covered(stats);
        self.observe_flag(covered, now, active)
    }

    /// 先结算已到期的防抖，再处理本帧的状态变化
    pub fn observe_flag(&mut self, covered: bool, now: f64, active: bool) -> Vec<CoverageTransition> {
        let mut out = Vec::new();
        if let Some(t) = self.poll(now, active) { out.push(t); }
        if covered == self.raw { return out; }
        self.raw = covered;
        if !covered && self.lapse_deadline.is_none() {
            let deadline = now + self.thresholds.debounce_secs;
            debug!("[COVER] lost at {:.3}s, lapsing until {:.3}s", now, deadline);
            self.lapse_deadline = Some(deadline);
        } else if self.lapse_deadline.is_none() && active {
            if let Some(t) = self.commit(covered, now) { out.push(t); }
        }
        out
    }

    /// 防抖到期检查；无新帧时宿主也可直接调用
    pub fn poll(&mut self, now: f64, active: bool) -> Option<CoverageTransition> {
        let deadline = self.lapse_deadline?;
        if now < deadline { return None; }
        self.lapse_deadline = None;
        if !self.raw && active {
            self.commit(false, deadline)
        } else {
            debug!("[COVER] lapse at {:.3}s absorbed as noise", deadline);
            None
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.thresholds);
    }

    fn commit(&mut self, covered: bool, at: f64) -> Option<CoverageTransition> {
        if covered == self.committed { return None; }
        self.committed = covered;
        self.last_transition_at = Some(at);
        info!("[COVER] covered={} at {:.3}s", covered, at);
        Some(CoverageTransition { covered, at })
    }
}
