use log::{debug, info};

use crate::bpm::BpmEstimator;
use crate::buffer::ObservationBuffer;
use crate::config::PipelineConfig;
use crate::coverage::CoverageClassifier;
use crate::error::PipelineResult;
use crate::hmm::HmmModel;
use crate::luma::{Frame, LumaStats};
use crate::stability::StabilityGate;
use crate::state::{PipelineEvent, Snapshot};
use crate::symbolizer::make_symbolizer;

/// 一次测量会话的全部状态。单线程 `&mut self` 驱动；`stop()` 清空一切
pub struct Pipeline {
    model: HmmModel,
    classifier: CoverageClassifier,
    buffer: ObservationBuffer,
    estimator: BpmEstimator,
    gate: StabilityGate,
    active: bool,
    last_frame_at: Option<f64>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> PipelineResult<Self> {
        config.validate()?;
        info!(
            "[INIT] pipeline smoothing={} debounce={}s fold_span={}s settle={}s",
            config.symbolizer.smoothing, config.coverage.debounce_secs, config.buffer.fold_span_secs, config.estimator.settle_secs
        );
        Ok(Self {
            classifier: CoverageClassifier::new(config.coverage),
            buffer: ObservationBuffer::new(config.buffer, make_symbolizer(&config.symbolizer)),
            estimator: BpmEstimator::new(config.estimator),
            gate: StabilityGate::new(config.stability),
            model: config.model,
            active: false,
            last_frame_at: None,
        })
    }

    pub fn start(&mut self) {
        self.clear();
        self.active = true;
        info!("[INIT] session started");
    }

    pub fn stop(&mut self) {
        self.active = false;
        self.clear();
        info!("[RST] session stopped");
    }

    /// 非法帧返回 `InvalidFrame`，覆盖状态不受影响
    pub fn process_frame(&mut self, frame: &Frame<'_>) -> PipelineResult<Vec<PipelineEvent>> {
        let stats = frame.stats()?;
        Ok(self.process_stats(stats, frame.timestamp))
    }

    pub fn process_stats(&mut self, stats: LumaStats, t: f64) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        if !self.active { return events; }
        self.last_frame_at = Some(t);

        let was_covered = self.classifier.raw_covered();
        for tr in self.classifier.observe(&stats, t, self.active) {
            events.push(PipelineEvent::CoverageChanged { covered: tr.covered, at: tr.at });
        }
        if !self.classifier.raw_covered() { return events; }
        if !was_covered { self.buffer.begin_burst(); }

        let Some(outcome) = self.buffer.push_brightness(stats.brightness(), t) else { return events };
        if outcome.folded == 0 && outcome.trimmed == 0 { return events; }

        let history = self.buffer.history();
        if !self.estimator.should_decode(history.span()) { return events; }
        let path = self.model.decode(history.symbols());
        debug!("[DECODE] len={} span={:.2}s", path.len(), history.span());

        for est in self.estimator.scan(&path, history.timestamps()) {
            events.push(PipelineEvent::BpmUpdated { bpm: est.bpm, at: est.at });
            if self.gate.check(self.estimator.records(), est.at) {
                events.push(PipelineEvent::Stabilized { bpm: est.bpm, at: est.at });
            }
        }
        events
    }

    /// 无新帧时结算覆盖防抖
    pub fn poll(&mut self, now: f64) -> Vec<PipelineEvent> {
        self.classifier
            .poll(now, self.active)
            .map(|tr| PipelineEvent::CoverageChanged { covered: tr.covered, at: tr.at })
            .into_iter()
            .collect()
    }

    pub fn current_bpm(&self) -> i64 { self.estimator.current_bpm() }

    pub fn is_stabilized(&self) -> bool { self.gate.is_stabilized() }

    pub fn last_frame_at(&self) -> Option<f64> { self.last_frame_at }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            active: self.active,
            covered: self.classifier.committed(),
            current_bpm: self.estimator.current_bpm(),
            hr_count: self.estimator.state().hr_count,
            stabilized: self.gate.is_stabilized(),
            history_len: self.buffer.history().len(),
            last_transition_at: self.classifier.last_transition_at(),
            last_frame_at: self.last_frame_at,
        }
    }

    fn clear(&mut self) {
        self.classifier.reset();
        self.buffer.reset();
        self.estimator.reset();
        self.gate.reset();
        self.last_frame_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::luma::FRAME_ROWS;

    fn covered(mean: f64) -> LumaStats { LumaStats { mean, std_dev: 3.0 } }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let mut cfg = PipelineConfig::default();
        cfg.model.transition[0][0] = 2.0;
        assert!(matches!(Pipeline::new(cfg), Err(PipelineError::InvalidModel(_))));
    }

    #[test]
    fn inactive_pipeline_ignores_frames() {
        let mut p = Pipeline::new(PipelineConfig::default()).unwrap();
        assert!(p.process_stats(covered(80.0), 0.0).is_empty());
        assert_eq!(p.snapshot(), Snapshot::default());
    }

    #[test]
    fn short_frame_is_skipped_without_touching_coverage() {
        let mut p = Pipeline::new(PipelineConfig::default()).unwrap();
        p.start();
        let plane = vec![80u8; FRAME_ROWS * 2];
        let events = p.process_frame(&Frame::new(&plane, 2, 0.0)).unwrap();
        assert_eq!(events, vec![PipelineEvent::CoverageChanged { covered: true, at: 0.0 }]);
        let short = vec![10u8; 16];
        assert!(matches!(p.process_frame(&Frame::new(&short, 2, 0.1)), Err(PipelineError::InvalidFrame(_))));
        assert!(p.snapshot().covered);
        assert_eq!(p.last_frame_at(), Some(0.0));
    }

    #[test]
    fn coverage_loss_commits_through_poll() {
        let mut p = Pipeline::new(PipelineConfig::default()).unwrap();
        p.start();
        p.process_stats(covered(80.0), 0.0);
        assert!(p.process_stats(LumaStats { mean: 200.0, std_dev: 3.0 }, 0.5).is_empty());
        assert!(p.poll(1.2).is_empty());
        assert_eq!(p.poll(1.6), vec![PipelineEvent::CoverageChanged { covered: false, at: 1.5 }]);
        assert!(!p.snapshot().covered);
    }

    #[test]
    fn stop_clears_the_session() {
        let mut p = Pipeline::new(PipelineConfig::default()).unwrap();
        p.start();
        for i in 0..300 {
            let t = i as f64 / 30.0;
            p.process_stats(covered(80.0 + 3.0 * (t * std::f64::consts::TAU).sin()), t);
        }
        assert!(p.snapshot().history_len > 0);
        p.stop();
        let s = p.snapshot();
        assert!(!s.active && !s.covered && s.history_len == 0 && s.current_bpm == 0 && s.hr_count == 0);
    }
}
