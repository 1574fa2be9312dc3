use serde::Serialize;

use crate::error::{PipelineError, PipelineResult};

// 统计只覆盖前 1080 行（与采集端固定分辨率一致，不从缓冲区推导）
pub const FRAME_ROWS: usize = 1080;

/// 一帧 Y 平面（只读借用）及其采集时间（秒）
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub plane: &'a [u8],
    pub row_stride: usize,
    pub timestamp: f64,
}

impl<'a> Frame<'a> {
    pub fn new(plane: &'a [u8], row_stride: usize, timestamp: f64) -> Self {
        Self { plane, row_stride, timestamp }
    }

    pub fn stats(&self) -> PipelineResult<LumaStats> {
        LumaStats::from_plane(self.plane, self.row_stride)
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct LumaStats {
    pub mean: f64,
    pub std_dev: f64,
}

impl LumaStats {
    /// 均值与总体标准差（除以 N，而非 N-1）
    pub fn from_plane(plane: &[u8], row_stride: usize) -> PipelineResult<Self> {
        if row_stride == 0 {
            return Err(PipelineError::InvalidFrame("row stride is zero".into()));
        }
        let pixels = FRAME_ROWS
            .checked_mul(row_stride)
            .ok_or_else(|| PipelineError::InvalidFrame(format!("row stride {} overflows", row_stride)))?;
        if plane.len() < pixels {
            return Err(PipelineError::InvalidFrame(format!(
                "plane holds {} bytes, need {} ({} rows x {} stride)",
                plane.len(), pixels, FRAME_ROWS, row_stride
            )));
        }
        let samples = &plane[..pixels];

        let mut sum = 0u64;
        for &v in samples { sum += v as u64; }
        let mean = sum as f64 / pixels as f64;

        let mut sqrd = 0.0f64;
        for &v in samples { let d = v as f64 - mean; sqrd += d * d; }
        let std_dev = (sqrd / pixels as f64).sqrt();

        Ok(Self { mean, std_dev })
    }

    /// 归一化亮度，作为观测序列的输入
    pub fn brightness(&self) -> f64 {
        self.mean / 255.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn uniform_plane_has_zero_spread() {
        let plane = vec![80u8; FRAME_ROWS * 8];
        let stats = LumaStats::from_plane(&plane, 8).unwrap();
        assert_relative_eq!(stats.mean, 80.0);
        assert_relative_eq!(stats.std_dev, 0.0);
    }

    #[test]
    fn population_std_dev_is_not_bessel_corrected() {
        let plane: Vec<u8> = (0..FRAME_ROWS * 4).map(|i| if i % 2 == 0 { 70 } else { 90 }).collect();
        let stats = LumaStats::from_plane(&plane, 4).unwrap();
        assert_relative_eq!(stats.mean, 80.0);
        assert_relative_eq!(stats.std_dev, 10.0, epsilon = 1e-12);
    }

    #[test]
    fn bytes_past_the_fixed_height_are_ignored() {
        let mut plane = vec![60u8; FRAME_ROWS * 2];
        plane.extend(std::iter::repeat(255u8).take(2 * 100));
        let stats = LumaStats::from_plane(&plane, 2).unwrap();
        assert_relative_eq!(stats.mean, 60.0);
    }

    #[test]
    fn short_or_strideless_planes_are_rejected() {
        let plane = vec![80u8; FRAME_ROWS * 4 - 1];
        assert!(matches!(LumaStats::from_plane(&plane, 4), Err(PipelineError::InvalidFrame(_))));
        assert!(matches!(LumaStats::from_plane(&[], 0), Err(PipelineError::InvalidFrame(_))));
    }

    #[test]
    fn brightness_is_normalized_mean() {
        let plane = vec![51u8; FRAME_ROWS];
        let frame = Frame::new(&plane, 1, 0.0);
        assert_relative_eq!(frame.stats().unwrap().brightness(), 0.2);
    }
}
