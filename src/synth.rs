//! 合成的指尖 PPG 亮度信号，用于 `simulate` 子命令和测试。

use crate::luma::FRAME_ROWS;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PpgWaveform {
    pub bpm: f64,
    // 基线亮度（0-255）与脉搏幅度
    pub baseline: f64,
    pub amplitude: f64,
    // 一个周期中上升段所占比例，其余为缓降
    pub rise_fraction: f64,
}

impl PpgWaveform {
    pub fn new(bpm: f64) -> Self { Self { bpm, baseline: 80.0, amplitude: 3.0, rise_fraction: 0.25 } }

    pub fn luma_at(&self, t: f64) -> f64 {
        let period = 60.0 / self.bpm;
        let phase = t.rem_euclid(period) / period;
        let w = if phase < self.rise_fraction {
            phase / self.rise_fraction
        } else {
            1.0 - (phase - self.rise_fraction) / (1.0 - self.rise_fraction)
        };
        self.baseline + self.amplitude * w
    }
}

/// 均值为 `mean` 的 Y 平面（`FRAME_ROWS × stride`）：整数部分铺满，
/// 小数部分用若干个 +1 的像素表示，均值分辨率为 1/像素数
pub fn luma_plane(mean: f64, row_stride: usize) -> Vec<u8> {
    let pixels = FRAME_ROWS * row_stride.max(1);
    let mean = mean.clamp(0.0, 255.0);
    let base = mean.floor();
    let extra = (((mean - base) * pixels as f64).round() as usize).min(pixels);
    let base = base as u8;
    let mut plane = vec![base; pixels];
    if base < 255 {
        for px in plane.iter_mut().take(extra) { *px = base + 1; }
    }
    plane
}
