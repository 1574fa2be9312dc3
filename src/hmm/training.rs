use log::{debug, info};
use serde::Serialize;

use super::{HmmModel, Matrix, STATES};
use crate::error::{PipelineError, PipelineResult};
use crate::symbolizer::Symbol;

#[derive(Serialize, Debug, Clone)]
pub struct TrainingReport {
    pub model: HmmModel,
    pub iterations: usize,
    // 每轮 E 步时（更新前）模型的对数似然
    pub log_likelihoods: Vec<f64>,
    pub converged: bool,
}

/// Baum-Welch 重估转移与发射矩阵，初始分布保持不变。
/// 多段观测的期望计数累加后统一归一；两次矩阵差的 Frobenius 范数都小于 `tolerance` 即收敛
pub fn baum_welch(model: &HmmModel, sequences: &[Vec<Symbol>], max_iter: usize, tolerance: f64) -> PipelineResult<TrainingReport> {
    model.validate()?;
    if sequences.iter().all(|s| s.is_empty()) {
        return Err(PipelineError::InvalidConfig("no observations to train on".into()));
    }

    let mut cur = model.clone();
    let mut log_likelihoods = Vec::new();
    let mut converged = false;
    let mut iterations = 0;

    while iterations < max_iter {
        iterations += 1;
        let mut acc = Counts::default();
        let mut ll = 0.0;
        for seq in sequences.iter().filter(|s| !s.is_empty()) {
            ll += accumulate(&cur, seq, &mut acc)?;
        }
        log_likelihoods.push(ll);

        let next = acc.reestimate(&cur);
        let dt = frobenius(&cur.transition, &next.transition);
        let de = frobenius(&cur.emission, &next.emission);
        debug!("[TRAIN] iter={} ll={:.4} dA={:.2e} dB={:.2e}", iterations, ll, dt, de);
        cur = next;
        if dt < tolerance && de < tolerance { converged = true; break; }
    }

    info!("[TRAIN] done iterations={} converged={} ll={:.4}", iterations, converged, log_likelihoods.last().copied().unwrap_or(f64::NAN));
    Ok(TrainingReport { model: cur, iterations, log_likelihoods, converged })
}

#[derive(Default)]
struct Counts {
    // 转移期望次数与离开各状态的期望次数
    trans: Matrix,
    trans_from: [f64; STATES],
    // 发射期望次数与处于各状态的期望次数
    emit: Matrix,
    occupancy: [f64; STATES],
}

impl Counts {
    fn reestimate(&self, old: &HmmModel) -> HmmModel {
        let mut m = old.clone();
        for i in 0..STATES {
            // 期望计数为 0 的行（状态从未访问）沿用旧值
            if self.trans_from[i] > 0.0 {
                for j in 0..STATES { m.transition[i][j] = self.trans[i][j] / self.trans_from[i]; }
            }
            if self.occupancy[i] > 0.0 {
                for k in 0..STATES { m.emission[i][k] = self.emit[i][k] / self.occupancy[i]; }
            }
        }
        m
    }
}

/// 带缩放的前向/后向，返回该段的对数似然
fn accumulate(model: &HmmModel, obs: &[Symbol], acc: &mut Counts) -> PipelineResult<f64> {
    let n = obs.len();
    let a = &model.transition;
    let b = &model.emission;

    let mut alpha = vec![[0.0f64; STATES]; n];
    let mut scale = vec![0.0f64; n];
    for s in 0..STATES { alpha[0][s] = model.initial[s] * b[s][obs[0].index()]; }
    scale[0] = rescale(&mut alpha[0], 0)?;
    for t in 1..n {
        for j in 0..STATES {
            let mut v = 0.0;
            for i in 0..STATES { v += alpha[t - 1][i] * a[i][j]; }
            alpha[t][j] = v * b[j][obs[t].index()];
        }
        scale[t] = rescale(&mut alpha[t], t)?;
    }

    let mut beta = vec![[1.0f64; STATES]; n];
    for t in (0..n.saturating_sub(1)).rev() {
        let o = obs[t + 1].index();
        for i in 0..STATES {
            let mut v = 0.0;
            for j in 0..STATES { v += a[i][j] * b[j][o] * beta[t + 1][j]; }
            beta[t][i] = v / scale[t + 1];
        }
    }

    for t in 0..n {
        let o = obs[t].index();
        for i in 0..STATES {
            let g = alpha[t][i] * beta[t][i];
            acc.emit[i][o] += g;
            acc.occupancy[i] += g;
        }
        if t + 1 < n {
            let o1 = obs[t + 1].index();
            for i in 0..STATES {
                for j in 0..STATES {
                    let x = alpha[t][i] * a[i][j] * b[j][o1] * beta[t + 1][j] / scale[t + 1];
                    acc.trans[i][j] += x;
                    acc.trans_from[i] += x;
                }
            }
        }
    }

    Ok(scale.iter().map(|c| c.ln()).sum())
}

fn rescale(v: &mut [f64; STATES], t: usize) -> PipelineResult<f64> {
    let sum: f64 = v.iter().sum();
    if !(sum > 0.0) || !sum.is_finite() {
        return Err(PipelineError::InvalidModel(format!("observation {} is impossible under the current model", t)));
    }
    for x in v.iter_mut() { *x /= sum; }
    Ok(sum)
}

fn frobenius(x: &Matrix, y: &Matrix) -> f64 {
    let mut s = 0.0;
    for i in 0..STATES {
        for j in 0..STATES { let d = x[i][j] - y[i][j]; s += d * d; }
    }
    s.sqrt()
}
