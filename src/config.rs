use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::bpm::EstimatorConfig;
use crate::buffer::BufferConfig;
use crate::coverage::CoverageThresholds;
use crate::error::PipelineResult;
use crate::hmm::HmmModel;
use crate::stability::StabilityConfig;
use crate::symbolizer::SymbolizerConfig;

// 指向 JSON 配置文件；可写在 .env.local / .env 中
pub const CONFIG_ENV: &str = "FINGERTIP_BPM_CONFIG";

/// 所有字段都有默认值，JSON 里只写需要覆盖的部分
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub coverage: CoverageThresholds,
    pub symbolizer: SymbolizerConfig,
    pub buffer: BufferConfig,
    pub estimator: EstimatorConfig,
    pub stability: StabilityConfig,
    pub model: HmmModel,
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.validate().with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    /// 环境变量未设置时使用默认配置
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(p) if !p.trim().is_empty() => Self::load(Path::new(p.trim())),
            _ => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    pub fn validate(&self) -> PipelineResult<()> {
        self.coverage.validate()?;
        self.symbolizer.validate()?;
        self.buffer.validate()?;
        self.estimator.validate()?;
        self.stability.validate()?;
        self.model.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip() {
        let mut cfg = PipelineConfig::default();
        cfg.symbolizer.smoothing = 3;
        cfg.coverage.debounce_secs = 0.5;
        let text = serde_json::to_string(&cfg).unwrap();
        assert_eq!(serde_json::from_str::<PipelineConfig>(&text).unwrap(), cfg);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: PipelineConfig = serde_json::from_str(r#"{"buffer":{"trim_count":100},"stability":{"max_std_dev":5.0}}"#).unwrap();
        assert_eq!(cfg.buffer.trim_count, 100);
        assert_eq!(cfg.buffer.fold_span_secs, 2.0);
        assert_eq!(cfg.stability.max_std_dev, 5.0);
        assert_eq!(cfg.model, HmmModel::default());
        cfg.validate().unwrap();
    }

    #[test]
    fn load_rejects_invalid_values() {
        let dir = std::env::temp_dir().join(format!("fingertip-bpm-cfg-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.json");
        fs::write(&path, r#"{"symbolizer":{"smoothing":0}}"#).unwrap();
        let err = PipelineConfig::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("smoothing"));

        let good = dir.join("good.json");
        PipelineConfig::default().save(&good).unwrap();
        assert_eq!(PipelineConfig::load(&good).unwrap(), PipelineConfig::default());
        let _ = fs::remove_dir_all(&dir);
    }
}
