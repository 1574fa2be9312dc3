use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

pub const RECORD_SLOTS: usize = 6;

// 瞬时心率的合法区间（含端点的比较见各处）
const MIN_BPM: i64 = 30;
const MAX_BPM: i64 = 300;
// 首尾记录、混合值距离均值的容差
const BLEND_WINDOW: f64 = 10.0;

// 周期边界：状态 3 → 状态 0
const CYCLE_END_STATE: usize = 3;
const CYCLE_START_STATE: usize = 0;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct EstimatorConfig {
    // 历史跨度达到该值（秒）才做解码
    pub min_decode_span_secs: f64,
    // 历史末尾这段时间内的边界暂不消费；0 表示每个边界都立即消费
    pub settle_secs: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self { Self { min_decode_span_secs: 3.0, settle_secs: 0.0 } }
}

impl EstimatorConfig {
    pub fn validate(&self) -> PipelineResult<()> {
        if !self.min_decode_span_secs.is_finite() || self.min_decode_span_secs < 0.0 || !self.settle_secs.is_finite() || self.settle_secs < 0.0 {
            return Err(PipelineError::InvalidConfig("estimator windows must be finite and non-negative".into()));
        }
        Ok(())
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct BpmState {
    pub current_bpm: i64,
    pub previous_bpm: i64,
    pub hr_count: u64,
    // 上一个边界的时间；首个边界之前为 None
    pub beginning_time: Option<f64>,
}

/// 第 6 个周期之后每个边界产生一次平滑输出
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct BpmEstimate {
    pub bpm: i64,
    pub candidate: i64,
    pub hr_count: u64,
    pub at: f64,
}

pub struct BpmEstimator {
    config: EstimatorConfig,
    state: BpmState,
    records: [i64; RECORD_SLOTS],
}

impl BpmEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self { config, state: BpmState::default(), records: [0; RECORD_SLOTS] }
    }

    pub fn state(&self) -> &BpmState { &self.state }

    pub fn records(&self) -> &[i64; RECORD_SLOTS] { &self.records }

    /// 0 表示尚无平滑结果
    pub fn current_bpm(&self) -> i64 { self.state.current_bpm }

    pub fn should_decode(&self, history_span: f64) -> bool { history_span >= self.config.min_decode_span_secs }

    /// 扫描整条解码路径；只消费晚于上一个边界、且不在末尾未稳定段内的边界
    pub fn scan(&mut self, path: &[usize], timestamps: &[f64]) -> Vec<BpmEstimate> {
        let mut out = Vec::new();
        let n = path.len().min(timestamps.len());
        let Some(&last) = timestamps[..n].last() else { return out };
        let limit = last - self.config.settle_secs;
        for i in 1..n {
            let t = timestamps[i];
            if t > limit { break; }
            if path[i - 1] != CYCLE_END_STATE || path[i] != CYCLE_START_STATE { continue; }
            if self.state.beginning_time.map_or(false, |b| t <= b) { continue; }
            if let Some(e) = self.record_boundary(t) { out.push(e); }
        }
        out
    }

    pub fn record_boundary(&mut self, t: f64) -> Option<BpmEstimate> {
        let Some(begin) = self.state.beginning_time else {
            debug!("[BEAT] first boundary at {:.3}s", t);
            self.state.beginning_time = Some(t);
            return None;
        };
        let interval = t - begin;
        // 间隔为 0 时 f64 为 inf，转换后饱和，被区间判定拒绝
        let candidate = (60.0 / interval).round() as i64;
        let hr = self.state.hr_count;
        let slot = (hr % RECORD_SLOTS as u64) as usize;
        let record = if (candidate > MIN_BPM && candidate < MAX_BPM) || hr == 0 {
            candidate
        } else {
            self.records[(slot + RECORD_SLOTS - 1) % RECORD_SLOTS]
        };
        self.records[slot] = record;
        debug!("[BEAT] t={:.3}s interval={:.3}s candidate={} record={} hr={}", t, interval, candidate, record, hr);

        let mut out = None;
        if hr < RECORD_SLOTS as u64 {
            if (MIN_BPM..=MAX_BPM).contains(&candidate) { self.state.previous_bpm = candidate; }
        } else {
            let prev = self.state.previous_bpm;
            let mut sorted = self.records;
            sorted.sort_unstable();
            let blended = (candidate.saturating_add(prev)) / 2;
            let estimate = if (blended as f64 - prev as f64).abs() <= BLEND_WINDOW && (MIN_BPM..=MAX_BPM).contains(&blended) {
                ((sorted[2] as f64 + sorted[3] as f64 + blended as f64) / 3.0 + prev as f64) / 2.0
            } else {
                robust_average(&self.records)
            };
            let bpm = estimate.round() as i64;
            self.state.current_bpm = bpm;
            self.state.previous_bpm = bpm;
            info!("[OUT] bpm={} candidate={} blended={} records={:?}", bpm, candidate, blended, self.records);
            out = Some(BpmEstimate { bpm, candidate, hr_count: hr + 1, at: t });
        }
        self.state.hr_count = hr + 1;
        self.state.beginning_time = Some(t);
        out
    }

    pub fn reset(&mut self) {
        self.state = BpmState::default();
        self.records = [0; RECORD_SLOTS];
    }
}

/// 去掉首尾的均值；首/尾若在中间四个的均值 ±10 以内也计入
pub fn robust_average(records: &[i64; RECORD_SLOTS]) -> f64 {
    let mut sorted = *records;
    sorted.sort_unstable();
    // 记录可能饱和到 i64::MAX，按 f64 累加
    let inner: f64 = sorted[1..RECORD_SLOTS - 1].iter().map(|&v| v as f64).sum();
    let avg = inner / 4.0;
    let (mut total, mut used) = (inner, 4.0);
    for end in [sorted[0], sorted[RECORD_SLOTS - 1]] {
        if (end as f64 - avg).abs() <= BLEND_WINDOW { total += end as f64; used += 1.0; }
    }
    total / used
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn feed(est: &mut BpmEstimator, start: f64, intervals: &[f64]) -> (f64, Vec<BpmEstimate>) {
        let mut t = start;
        let mut out = Vec::new();
        if est.state().beginning_time.is_none() { est.record_boundary(t); }
        for dt in intervals {
            t += dt;
            out.extend(est.record_boundary(t));
        }
        (t, out)
    }

    #[test]
    fn robust_average_drops_far_outliers() {
        assert_relative_eq!(robust_average(&[60, 62, 58, 61, 59, 200]), 60.0);
        assert_relative_eq!(robust_average(&[70, 70, 70, 70, 70, 70]), 70.0);
        // 两端都远离：只取中间四个
        assert_relative_eq!(robust_average(&[10, 70, 72, 74, 76, 200]), 73.0);
    }

    #[test]
    fn first_boundary_only_sets_the_origin() {
        let mut est = BpmEstimator::new(EstimatorConfig::default());
        assert_eq!(est.record_boundary(2.0), None);
        assert_eq!(est.state().beginning_time, Some(2.0));
        assert_eq!(est.state().hr_count, 0);
        assert_eq!(est.current_bpm(), 0);
    }

    #[test]
    fn out_of_range_candidates_carry_the_previous_record() {
        let mut est = BpmEstimator::new(EstimatorConfig::default());
        feed(&mut est, 0.0, &[1.0, 0.1]);
        // 第一个记录 60；600 超出区间，沿用 60
        assert_eq!(est.records()[..2], [60, 60]);
        assert_eq!(est.state().previous_bpm, 60);
        assert_eq!(est.state().hr_count, 2);
    }

    #[test]
    fn first_record_is_kept_even_out_of_range() {
        let mut est = BpmEstimator::new(EstimatorConfig::default());
        feed(&mut est, 0.0, &[0.1]);
        assert_eq!(est.records()[0], 600);
        assert_eq!(est.state().previous_bpm, 0);
    }

    #[test]
    fn steady_half_second_cycles_read_120() {
        let mut est = BpmEstimator::new(EstimatorConfig::default());
        let (_, out) = feed(&mut est, 0.0, &[0.5; 6]);
        assert!(out.is_empty());
        assert_eq!(est.current_bpm(), 0);
        let (_, out) = feed(&mut est, 3.0, &[0.5; 4]);
        assert_eq!(out.len(), 4);
        assert!(out.iter().all(|e| e.bpm == 120));
        assert_eq!(est.current_bpm(), 120);
        assert_eq!(out[0].hr_count, 7);
    }

    #[test]
    fn outlier_falls_back_to_robust_average_then_blends() {
        let mut est = BpmEstimator::new(EstimatorConfig::default());
        let intervals: Vec<f64> = [60.0, 62.0, 58.0, 61.0, 59.0, 60.0].iter().map(|b| 60.0 / b).collect();
        let (t, out) = feed(&mut est, 0.0, &intervals);
        assert!(out.is_empty());
        assert_eq!(*est.records(), [60, 62, 58, 61, 59, 60]);
        assert_eq!(est.state().previous_bpm, 60);

        // 200：混合值 130 偏离过大，取稳健均值
        let (t, out) = feed(&mut est, t, &[0.3]);
        assert_eq!(*est.records(), [200, 62, 58, 61, 59, 60]);
        assert_eq!(out[0].bpm, 60);

        // 66：混合值 63 在窗口内，((60+61+63)/3 + 60)/2 ≈ 60.67
        let (_, out) = feed(&mut est, t, &[60.0 / 66.0]);
        assert_eq!(out[0].candidate, 66);
        assert_eq!(out[0].bpm, 61);
        assert_eq!(est.state().previous_bpm, 61);
    }

    #[test]
    fn scan_consumes_each_boundary_once() {
        let mut est = BpmEstimator::new(EstimatorConfig::default());
        let ts: Vec<f64> = (0..50).map(|i| i as f64 * 0.1).collect();
        let mut path = vec![1usize; 50];
        path[9] = 3;
        path[10] = 0;
        path[44] = 3;
        path[45] = 0;
        est.scan(&path, &ts);
        assert_eq!(est.state().beginning_time, Some(ts[45]));
        assert_eq!(est.state().hr_count, 1);

        let ts: Vec<f64> = (0..70).map(|i| i as f64 * 0.1).collect();
        path.resize(70, 1);
        est.scan(&path, &ts);
        est.scan(&path, &ts);
        assert_eq!(est.state().hr_count, 1);
        assert_eq!(est.records()[0], 17);
        assert_eq!(est.state().beginning_time, Some(ts[45]));
    }

    #[test]
    fn boundary_near_the_end_of_history_is_consumed() {
        let mut est = BpmEstimator::new(EstimatorConfig::default());
        let ts: Vec<f64> = (0..40).map(|i| i as f64 * 0.1).collect();
        let mut path = vec![1usize; 40];
        path[34] = 3;
        path[35] = 0;
        est.scan(&path, &ts);
        assert_eq!(est.state().beginning_time, Some(ts[35]));
    }

    #[test]
    fn settle_window_defers_tail_boundaries() {
        let mut est = BpmEstimator::new(EstimatorConfig { settle_secs: 1.0, ..EstimatorConfig::default() });
        let ts: Vec<f64> = (0..40).map(|i| i as f64 * 0.1).collect();
        let mut path = vec![1usize; 40];
        path[34] = 3;
        path[35] = 0;
        est.scan(&path, &ts);
        assert_eq!(est.state().beginning_time, None);

        let ts: Vec<f64> = (0..50).map(|i| i as f64 * 0.1).collect();
        path.resize(50, 1);
        est.scan(&path, &ts);
        assert_eq!(est.state().beginning_time, Some(ts[35]));
    }

    #[test]
    fn saturated_records_do_not_overflow() {
        let mut est = BpmEstimator::new(EstimatorConfig::default());
        feed(&mut est, 0.0, &[1e-300; 8]);
        assert_eq!(*est.records(), [i64::MAX; RECORD_SLOTS]);
        assert_eq!(est.state().hr_count, 8);
        assert_eq!(est.current_bpm(), i64::MAX);
        assert_relative_eq!(robust_average(&[i64::MAX; RECORD_SLOTS]), i64::MAX as f64);
    }

    #[test]
    fn decoded_cycle_at_30hz_converges_to_120() {
        let mut cyc = vec![0usize; 4];
        cyc.extend([1; 4]);
        cyc.extend([2; 4]);
        cyc.extend([3; 3]);
        let path = cyc.repeat(12);
        let ts: Vec<f64> = (0..path.len()).map(|i| i as f64 / 30.0).collect();
        let out = BpmEstimator::new(EstimatorConfig::default()).scan(&path, &ts);
        let mut est = BpmEstimator::new(EstimatorConfig::default());
        for end in (30..=path.len()).step_by(7) { est.scan(&path[..end], &ts[..end]); }
        est.scan(&path, &ts);
        assert_eq!(est.current_bpm(), 120);
        assert!(!out.is_empty() && out.iter().all(|e| e.bpm == 120));
        assert_eq!(est.records(), &[120; RECORD_SLOTS]);
    }

    #[test]
    fn reset_clears_state_and_records() {
        let mut est = BpmEstimator::new(EstimatorConfig::default());
        feed(&mut est, 0.0, &[0.5; 8]);
        est.reset();
        assert_eq!(*est.state(), BpmState::default());
        assert_eq!(*est.records(), [0; RECORD_SLOTS]);
    }
}
