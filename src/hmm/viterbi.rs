use super::{HmmModel, STATES};
use crate::symbolizer::Symbol;

/// 最大积解码。每步按和归一化（不改变 argmax），长历史不会下溢；
/// 并列时取编号最小的状态（前驱与终态都是）
pub fn viterbi(model: &HmmModel, observations: &[Symbol]) -> Vec<usize> {
    let Some(first) = observations.first() else { return Vec::new() };

    let mut prob = [0.0f64; STATES];
    for s in 0..STATES { prob[s] = model.initial[s] * model.emission[s][first.index()]; }
    normalize(&mut prob);

    let mut back: Vec<[usize; STATES]> = Vec::with_capacity(observations.len().saturating_sub(1));
    for obs in &observations[1..] {
        let mut next = [0.0f64; STATES];
        let mut from = [0usize; STATES];
        for cur in 0..STATES {
            let (mut best, mut arg) = (prob[0] * model.transition[0][cur], 0usize);
            for prev in 1..STATES {
                let v = prob[prev] * model.transition[prev][cur];
                if v > best { best = v; arg = prev; }
            }
            next[cur] = best * model.emission[cur][obs.index()];
            from[cur] = arg;
        }
        normalize(&mut next);
        prob = next;
        back.push(from);
    }

    let mut state = argmax(&prob);
    let mut path = vec![0usize; observations.len()];
    path[observations.len() - 1] = state;
    for (i, from) in back.iter().enumerate().rev() {
        state = from[state];
        path[i] = state;
    }
    path
}

fn normalize(v: &mut [f64; STATES]) {
    let sum: f64 = v.iter().sum();
    if sum > 0.0 && sum.is_finite() {
        for x in v.iter_mut() { *x /= sum; }
    }
}

fn argmax(v: &[f64; STATES]) -> usize {
    let mut arg = 0;
    for s in 1..STATES {
        if v[s] > v[arg] { arg = s; }
    }
    arg
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbols(idx: &[usize]) -> Vec<Symbol> {
        idx.iter().map(|&i| Symbol::from_index(i).unwrap()).collect()
    }

    fn cycle() -> Vec<usize> {
        let mut c = vec![0; 4];
        c.extend([1; 4]);
        c.extend([2; 4]);
        c.extend([3; 3]);
        c
    }

    #[test]
    fn empty_input_gives_empty_path() {
        assert!(viterbi(&HmmModel::default(), &[]).is_empty());
    }

    #[test]
    fn single_observation_is_argmax_of_initial_times_emission() {
        let m = HmmModel::default();
        for sym in Symbol::ALL {
            let scores: Vec<f64> = (0..STATES).map(|s| m.initial[s] * m.emission[s][sym.index()]).collect();
            let mut best = 0;
            for s in 1..STATES { if scores[s] > scores[best] { best = s; } }
            assert_eq!(viterbi(&m, &[sym]), vec![best]);
        }
        // Peak → 状态 0，Falling → 状态 3
        assert_eq!(viterbi(&m, &[Symbol::Peak]), vec![0]);
        assert_eq!(viterbi(&m, &[Symbol::Falling]), vec![3]);
    }

    #[test]
    fn uniform_model_ties_break_to_lowest_state() {
        let m = HmmModel { transition: [[0.25; 4]; 4], emission: [[0.25; 4]; 4], initial: [0.25; 4] };
        assert_eq!(viterbi(&m, &symbols(&[0, 1, 2, 3, 1])), vec![0; 5]);
    }

    #[test]
    fn clean_cycle_decodes_to_itself_away_from_the_tail() {
        let obs: Vec<usize> = cycle().repeat(8);
        let path = viterbi(&HmmModel::default(), &symbols(&obs));
        assert_eq!(path.len(), obs.len());
        assert_eq!(path[..105], obs[..105]);
        let boundaries: Vec<usize> = (1..105).filter(|&i| path[i - 1] == 3 && path[i] == 0).collect();
        assert_eq!(boundaries, vec![15, 30, 45, 60, 75, 90]);
    }

    #[test]
    fn long_histories_do_not_underflow() {
        let obs: Vec<usize> = cycle().repeat(400);
        let path = viterbi(&HmmModel::default(), &symbols(&obs));
        assert_eq!(path[..150], obs[..150]);
        assert_eq!(path[3000..3150], obs[3000..3150]);
    }
}
