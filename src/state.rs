use serde::Serialize;

// 对外展示的会话状态，按值拷贝给其他线程
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct Snapshot {
    pub active: bool,
    pub covered: bool,
    // 0 = 尚无估计
    pub current_bpm: i64,
    pub hr_count: u64,
    pub stabilized: bool,
    pub history_len: usize,
    pub last_transition_at: Option<f64>,
    pub last_frame_at: Option<f64>,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    CoverageChanged { covered: bool, at: f64 },
    BpmUpdated { bpm: i64, at: f64 },
    Stabilized { bpm: i64, at: f64 },
}

impl PipelineEvent {
    pub fn at(&self) -> f64 {
        match *self {
            PipelineEvent::CoverageChanged { at, .. } | PipelineEvent::BpmUpdated { at, .. } | PipelineEvent::Stabilized { at, .. } => at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_a_tag() {
        let v = serde_json::to_value(PipelineEvent::Stabilized { bpm: 72, at: 12.5 }).unwrap();
        assert_eq!(v, serde_json::json!({"event": "stabilized", "bpm": 72, "at": 12.5}));
        let v = serde_json::to_value(PipelineEvent::CoverageChanged { covered: true, at: 0.0 }).unwrap();
        assert_eq!(v["event"], "coverage_changed");
    }
}
