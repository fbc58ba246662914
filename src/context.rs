use bitflags::bitflags;

use crate::error::{grow, zeroed, Result};

bitflags! {
    /// Functionality flags for contexts
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Flag: u32 {
        const VITERBI = 0x01;
        const MARGINALS = 0x02;
        const ALL = 0xFF;
    }
}

bitflags! {
    /// Reset flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Reset: u32 {
        /// Reset state scores
        const STATE = 0x01;
        /// Reset transition scores
        const TRANS = 0x02;
        /// Reset all
        const ALL = 0xFF;
    }
}

/// Context maintains internal data for an instance.
///
/// All matrices are stored row-major in flat vectors. Capacity only grows;
/// every buffer is overwritten for each new sequence.
#[derive(Debug, Clone)]
pub struct Context {
    /// Flag specifying the functionality
    flag: Flag,
    /// The total number of distinct labels
    num_labels: usize,
    /// The number of items in the current instance
    num_items: usize,
    /// The number of items the buffers can hold
    cap_items: usize,
    /// Logarithm of the normalization factor for the instance.
    ///
    /// This is equivalent to the total scores of all paths in the lattice.
    log_norm: f64,
    /// State scores
    ///
    /// This is a `[T][L]` matrix whose element `[t][l]` presents total score
    /// of state features associating label #l at #t.
    state: Vec<f64>,
    /// Transition scores
    ///
    /// This is a `[L][L]` matrix whose element `[i][j]` represents the total
    /// score of transition features associating labels #i and #j.
    trans: Vec<f64>,
    /// Alpha score matrix
    ///
    /// This is a `[T][L]` matrix whose element `[t][l]` presents the total
    /// score of paths starting at BOS and arriving at (t, l), rescaled so
    /// every row sums to one. Viterbi borrows it as its score table.
    alpha_score: Vec<f64>,
    /// Beta score matrix
    ///
    /// This is a `[T][L]` matrix whose element `[t][l]` presents the total
    /// score of paths starting at (t, l) and arriving at EOS.
    beta_score: Vec<f64>,
    /// Scale factor vector
    ///
    /// Element `[t]` is the reciprocal of the sum of the unscaled alpha row `t`.
    scale_factor: Vec<f64>,
    /// `[L]` work space
    row: Vec<f64>,
    /// Backward edges
    ///
    /// This is a `[T][L]` matrix whose element `[t][j]` represents the label #i
    /// that yields the maximum score to arrive at (t, j).
    backward_edge: Vec<u32>,
    /// Exponents of state scores
    exp_state: Vec<f64>,
    /// Exponents of transition scores.
    exp_trans: Vec<f64>,
    /// Model expectations of states.
    ///
    /// This is a `[T][L]` matrix whose element `[t][l]` presents the model
    /// expectation (marginal probability) of the state (t,l)
    mexp_state: Vec<f64>,
    /// Model expectations of transitions.
    ///
    /// This is a `[L][L]` matrix whose element `[i][j]` presents the model
    /// expectation of the transition (i--j), summed over positions.
    mexp_trans: Vec<f64>,
}

impl Context {
    /// Create a context for `num_labels` labels, sized for `cap_items` items.
    pub fn new(flag: Flag, num_labels: usize, cap_items: usize) -> Result<Self> {
        let ll = num_labels * num_labels;
        let marginals = flag.contains(Flag::MARGINALS);
        let mut ctx = Self {
            flag,
            num_labels,
            num_items: 0,
            cap_items: 0,
            log_norm: 0.0,
            state: Vec::new(),
            trans: zeroed(ll)?,
            alpha_score: Vec::new(),
            beta_score: Vec::new(),
            scale_factor: Vec::new(),
            row: zeroed(num_labels)?,
            backward_edge: Vec::new(),
            exp_state: Vec::new(),
            exp_trans: if marginals { zeroed(ll)? } else { Vec::new() },
            mexp_state: Vec::new(),
            mexp_trans: if marginals { zeroed(ll)? } else { Vec::new() },
        };
        ctx.set_num_items(cap_items)?;
        // cap_items is only a hint for the longest sequence.
        ctx.num_items = 0;
        Ok(ctx)
    }

    /// Set the length of the current sequence, growing the buffers if needed.
    pub fn set_num_items(&mut self, t: usize) -> Result<()> {
        self.num_items = t;
        if self.cap_items < t {
            let tl = t * self.num_labels;
            grow(&mut self.alpha_score, tl)?;
            grow(&mut self.beta_score, tl)?;
            grow(&mut self.scale_factor, t)?;
            grow(&mut self.state, tl)?;
            if self.flag.contains(Flag::VITERBI) {
                grow(&mut self.backward_edge, tl)?;
            }
            if self.flag.contains(Flag::MARGINALS) {
                grow(&mut self.exp_state, tl)?;
                grow(&mut self.mexp_state, tl)?;
            }
            self.cap_items = t;
        }
        Ok(())
    }

    #[inline]
    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    #[inline]
    pub fn num_items(&self) -> usize {
        self.num_items
    }

    #[inline]
    pub fn cap_items(&self) -> usize {
        self.cap_items
    }

    /// Logarithm of the partition factor, valid after [`Context::alpha_score`].
    #[inline]
    pub fn log_norm(&self) -> f64 {
        self.log_norm
    }

    pub fn reset(&mut self, flag: Reset) {
        let tl = self.num_items * self.num_labels;
        if flag.contains(Reset::STATE) {
            self.state[..tl].fill(0.0);
        }
        if flag.contains(Reset::TRANS) {
            self.trans.fill(0.0);
        }
        if self.flag.contains(Flag::MARGINALS) {
            self.mexp_state[..tl].fill(0.0);
            self.mexp_trans.fill(0.0);
            self.log_norm = 0.0;
        }
    }

    #[inline]
    pub fn state(&self, t: usize) -> &[f64] {
        let l = self.num_labels;
        &self.state[t * l..(t + 1) * l]
    }

    #[inline]
    pub fn state_mut(&mut self, t: usize) -> &mut [f64] {
        let l = self.num_labels;
        &mut self.state[t * l..(t + 1) * l]
    }

    #[inline]
    pub fn trans(&self, i: usize) -> &[f64] {
        let l = self.num_labels;
        &self.trans[i * l..(i + 1) * l]
    }

    #[inline]
    pub fn trans_mut(&mut self, i: usize) -> &mut [f64] {
        let l = self.num_labels;
        &mut self.trans[i * l..(i + 1) * l]
    }

    /// Marginal probabilities of the labels at position `t`.
    #[inline]
    pub fn mexp_state(&self, t: usize) -> &[f64] {
        let l = self.num_labels;
        &self.mexp_state[t * l..(t + 1) * l]
    }

    /// Expected counts of the transitions leaving label `i`.
    #[inline]
    pub fn mexp_trans(&self, i: usize) -> &[f64] {
        let l = self.num_labels;
        &self.mexp_trans[i * l..(i + 1) * l]
    }

    #[inline]
    pub(crate) fn alpha(&self, t: usize) -> &[f64] {
        let l = self.num_labels;
        &self.alpha_score[t * l..(t + 1) * l]
    }

    #[inline]
    pub(crate) fn beta(&self, t: usize) -> &[f64] {
        let l = self.num_labels;
        &self.beta_score[t * l..(t + 1) * l]
    }

    /// Exponentiate the state scores of the current sequence.
    pub fn exp_state(&mut self) {
        let tl = self.num_items * self.num_labels;
        for (e, s) in self.exp_state[..tl].iter_mut().zip(&self.state[..tl]) {
            *e = s.exp();
        }
    }

    /// Exponentiate the transition scores.
    pub fn exp_transition(&mut self) {
        for (e, s) in self.exp_trans.iter_mut().zip(&self.trans) {
            *e = s.exp();
        }
    }

    /// Forward pass over the exponentiated scores.
    pub fn alpha_score(&mut self) {
        let l = self.num_labels;
        let t_max = self.num_items;
        if t_max == 0 || l == 0 {
            self.log_norm = 0.0;
            return;
        }

        // alpha[0] = exp_state[0], normalized.
        {
            let cur = &mut self.alpha_score[..l];
            cur.copy_from_slice(&self.exp_state[..l]);
            self.scale_factor[0] = normalize(cur);
        }

        for t in 1..t_max {
            let (head, tail) = self.alpha_score.split_at_mut(t * l);
            let prev = &head[(t - 1) * l..];
            let cur = &mut tail[..l];
            cur.fill(0.0);
            for (i, &p) in prev.iter().enumerate() {
                let trans = &self.exp_trans[i * l..(i + 1) * l];
                for (c, &e) in cur.iter_mut().zip(trans) {
                    *c += p * e;
                }
            }
            let state = &self.exp_state[t * l..(t + 1) * l];
            for (c, &s) in cur.iter_mut().zip(state) {
                *c *= s;
            }
            self.scale_factor[t] = normalize(cur);
        }

        // The partition factor is the product of the row sums.
        self.log_norm = -self.scale_factor[..t_max]
            .iter()
            .map(|s| s.ln())
            .sum::<f64>();
    }

    /// Backward pass, rescaled with the factors of the forward pass.
    pub fn beta_score(&mut self) {
        let l = self.num_labels;
        let t_max = self.num_items;
        if t_max == 0 || l == 0 {
            return;
        }

        let last = t_max - 1;
        let scale = self.scale_factor[last];
        self.beta_score[last * l..t_max * l].fill(scale);

        for t in (0..last).rev() {
            let (head, tail) = self.beta_score.split_at_mut((t + 1) * l);
            let cur = &mut head[t * l..];
            let next = &tail[..l];
            let state = &self.exp_state[(t + 1) * l..(t + 2) * l];
            for ((r, &n), &s) in self.row.iter_mut().zip(next).zip(state) {
                *r = n * s;
            }
            let scale = self.scale_factor[t];
            for (i, c) in cur.iter_mut().enumerate() {
                let trans = &self.exp_trans[i * l..(i + 1) * l];
                *c = dot(trans, &self.row) * scale;
            }
        }
    }

    /// Point and pairwise marginals from the forward and backward matrices.
    pub fn marginals(&mut self) {
        let l = self.num_labels;
        let t_max = self.num_items;
        if t_max == 0 || l == 0 {
            return;
        }

        for t in 0..t_max {
            let fwd = &self.alpha_score[t * l..(t + 1) * l];
            let bwd = &self.beta_score[t * l..(t + 1) * l];
            let coeff = 1.0 / self.scale_factor[t];
            let prob = &mut self.mexp_state[t * l..(t + 1) * l];
            for ((p, &a), &b) in prob.iter_mut().zip(fwd).zip(bwd) {
                *p = a * b * coeff;
            }
        }

        for t in 0..t_max - 1 {
            let fwd = &self.alpha_score[t * l..(t + 1) * l];
            let bwd = &self.beta_score[(t + 1) * l..(t + 2) * l];
            let state = &self.exp_state[(t + 1) * l..(t + 2) * l];
            for ((r, &b), &s) in self.row.iter_mut().zip(bwd).zip(state) {
                *r = b * s;
            }
            for (i, &a) in fwd.iter().enumerate() {
                let edge = &self.exp_trans[i * l..(i + 1) * l];
                let prob = &mut self.mexp_trans[i * l..(i + 1) * l];
                for ((p, &e), &r) in prob.iter_mut().zip(edge).zip(&self.row) {
                    *p += a * e * r;
                }
            }
        }
    }

    /// Marginal probability of label `l` at position `t`.
    pub fn marginal_point(&self, l: usize, t: usize) -> f64 {
        let fwd = self.alpha(t)[l];
        let bwd = self.beta(t)[l];
        fwd * bwd / self.scale_factor[t]
    }

    /// Marginal probability of the partial path `path[begin..end]`.
    ///
    /// `path` is indexed by absolute position; only `begin..end` is read.
    pub fn marginal_path(&self, path: &[u32], begin: usize, end: usize) -> f64 {
        if begin >= end {
            return 0.0;
        }
        let l = self.num_labels;
        let mut prob = self.alpha(begin)[path[begin] as usize]
            * self.beta(end - 1)[path[end - 1] as usize]
            / self.scale_factor[begin];

        for t in begin..end - 1 {
            let i = path[t] as usize;
            let j = path[t + 1] as usize;
            let edge = self.exp_trans[i * l + j];
            let state = self.exp_state[(t + 1) * l + j];
            prob *= edge * state * self.scale_factor[t];
        }
        prob
    }

    /// Sum of state and transition scores along `labels`.
    pub fn score(&self, labels: &[u32]) -> f64 {
        let t_max = self.num_items.min(labels.len());
        if t_max == 0 {
            return 0.0;
        }
        let mut prev = labels[0] as usize;
        let mut ret = self.state(0)[prev];
        for (t, &cur) in labels.iter().enumerate().take(t_max).skip(1) {
            let cur = cur as usize;
            ret += self.trans(prev)[cur];
            ret += self.state(t)[cur];
            prev = cur;
        }
        ret
    }

    /// Find the best label path, writing it into `labels` and returning its score.
    ///
    /// The forward matrix serves as the score table, so the forward-backward
    /// results are stale afterwards.
    pub fn viterbi(&mut self, labels: &mut [u32]) -> f64 {
        let l = self.num_labels;
        let t_max = self.num_items;
        if t_max == 0 || l == 0 {
            return 0.0;
        }

        // Compute the scores at (0, *)
        self.alpha_score[..l].copy_from_slice(&self.state[..l]);

        // Compute the scores at (t, *)
        for t in 1..t_max {
            let (head, tail) = self.alpha_score.split_at_mut(t * l);
            let prev = &head[(t - 1) * l..];
            let cur = &mut tail[..l];
            let back = &mut self.backward_edge[t * l..(t + 1) * l];
            let state = &self.state[t * l..(t + 1) * l];
            for j in 0..l {
                let mut max_score = f64::MIN;
                let mut argmax = 0;
                for (i, &p) in prev.iter().enumerate() {
                    // Transit from (t-1, i) to (t, j)
                    let score = p + self.trans[i * l + j];
                    if max_score < score {
                        max_score = score;
                        argmax = i;
                    }
                }
                // Backward link (#t, #j) -> (#t-1, #i)
                back[j] = argmax as u32;
                cur[j] = max_score + state[j];
            }
        }

        // Find the node (#T, #i) that reaches EOS with the maximum score
        let last = &self.alpha_score[(t_max - 1) * l..t_max * l];
        let mut max_score = f64::MIN;
        let mut best = 0;
        for (i, &score) in last.iter().enumerate() {
            if max_score < score {
                max_score = score;
                best = i;
            }
        }

        // Tag labels by tracing the backward links
        labels[t_max - 1] = best as u32;
        for t in (0..t_max - 1).rev() {
            let next = labels[t + 1] as usize;
            labels[t] = self.backward_edge[(t + 1) * l + next];
        }
        max_score
    }
}

/// Scale `row` to sum to one and return the scale applied.
#[inline]
fn normalize(row: &mut [f64]) -> f64 {
    let sum: f64 = row.iter().sum();
    let scale = if sum != 0.0 { 1.0 / sum } else { 1.0 };
    for x in row.iter_mut() {
        *x *= scale;
    }
    scale
}

#[inline]
fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    const L: usize = 3;
    const T: usize = 3;

    fn lattice() -> Context {
        let mut ctx = Context::new(Flag::VITERBI | Flag::MARGINALS, L, T).unwrap();
        ctx.set_num_items(T).unwrap();
        ctx.reset(Reset::ALL);
        let state = [
            [0.5, -0.2, 1.1],
            [-0.7, 0.3, 0.0],
            [0.9, 0.4, -1.3],
        ];
        let trans = [[0.2, -0.5, 0.7], [1.0, 0.1, -0.3], [-0.6, 0.8, 0.05]];
        for t in 0..T {
            ctx.state_mut(t).copy_from_slice(&state[t]);
        }
        for i in 0..L {
            ctx.trans_mut(i).copy_from_slice(&trans[i]);
        }
        ctx.exp_state();
        ctx.exp_transition();
        ctx.alpha_score();
        ctx.beta_score();
        ctx.marginals();
        ctx
    }

    fn all_paths() -> Vec<[u32; T]> {
        let mut out = Vec::new();
        for a in 0..L as u32 {
            for b in 0..L as u32 {
                for c in 0..L as u32 {
                    out.push([a, b, c]);
                }
            }
        }
        out
    }

    fn partition(ctx: &Context) -> f64 {
        all_paths().iter().map(|p| ctx.score(p).exp()).sum()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
    }

    #[test]
    fn test_context_new() {
        let ctx = Context::new(Flag::VITERBI, 2, 0).unwrap();
        assert_eq!(ctx.num_items(), 0);
        let _ctx = Context::new(Flag::MARGINALS, 2, 0).unwrap();
        let ctx = Context::new(Flag::VITERBI | Flag::MARGINALS, 2, 8).unwrap();
        assert_eq!(ctx.cap_items(), 8);
    }

    #[test]
    fn test_capacity_only_grows() {
        let mut ctx = Context::new(Flag::ALL, 2, 4).unwrap();
        ctx.set_num_items(10).unwrap();
        assert_eq!(ctx.cap_items(), 10);
        ctx.set_num_items(3).unwrap();
        assert_eq!(ctx.cap_items(), 10);
        assert_eq!(ctx.num_items(), 3);
    }

    #[test]
    fn test_context_reset() {
        let mut ctx = Context::new(Flag::VITERBI | Flag::MARGINALS, 2, 2).unwrap();
        ctx.set_num_items(2).unwrap();
        ctx.state_mut(1)[0] = 3.0;
        ctx.trans_mut(0)[1] = 2.0;
        ctx.reset(Reset::STATE);
        assert_eq!(ctx.state(1)[0], 0.0);
        assert_eq!(ctx.trans(0)[1], 2.0);
        ctx.reset(Reset::TRANS);
        assert_eq!(ctx.trans(0)[1], 0.0);
    }

    #[test]
    fn test_log_norm_matches_brute_force() {
        let ctx = lattice();
        assert!(close(ctx.log_norm().exp(), partition(&ctx)));
    }

    #[test]
    fn test_point_marginals_match_brute_force() {
        let ctx = lattice();
        let z = partition(&ctx);
        for t in 0..T {
            for l in 0..L {
                let expected: f64 = all_paths()
                    .iter()
                    .filter(|p| p[t] as usize == l)
                    .map(|p| ctx.score(p).exp())
                    .sum::<f64>()
                    / z;
                assert!(close(ctx.marginal_point(l, t), expected));
                assert!(close(ctx.mexp_state(t)[l], expected));
            }
        }
    }

    #[test]
    fn test_pairwise_marginals_match_brute_force() {
        let ctx = lattice();
        let z = partition(&ctx);
        for i in 0..L {
            for j in 0..L {
                let mut expected = 0.0;
                for p in all_paths() {
                    for t in 0..T - 1 {
                        if p[t] as usize == i && p[t + 1] as usize == j {
                            expected += ctx.score(&p).exp();
                        }
                    }
                }
                expected /= z;
                assert!(close(ctx.mexp_trans(i)[j], expected));
            }
        }
    }

    #[test]
    fn test_marginal_path_matches_brute_force() {
        let ctx = lattice();
        let z = partition(&ctx);
        for (begin, end) in [(0, 1), (0, 2), (1, 3), (0, 3)] {
            for target in all_paths() {
                let expected: f64 = all_paths()
                    .iter()
                    .filter(|p| p[begin..end] == target[begin..end])
                    .map(|p| ctx.score(p).exp())
                    .sum::<f64>()
                    / z;
                assert!(close(ctx.marginal_path(&target, begin, end), expected));
            }
        }
    }

    #[test]
    fn test_viterbi_finds_best_path() {
        let mut ctx = lattice();
        let mut labels = [0u32; T];
        let score = ctx.viterbi(&mut labels);
        assert!(close(score, ctx.score(&labels)));
        for p in all_paths() {
            assert!(ctx.score(&p) <= score + 1e-12);
        }
    }

    #[test]
    fn test_long_sequence_stays_finite() {
        let l = 4;
        let t_max = 2000;
        let mut ctx = Context::new(Flag::MARGINALS, l, t_max).unwrap();
        ctx.set_num_items(t_max).unwrap();
        ctx.reset(Reset::ALL);
        for t in 0..t_max {
            for (j, s) in ctx.state_mut(t).iter_mut().enumerate() {
                *s = 5.0 + ((t * 7 + j * 3) % 11) as f64 * 0.5;
            }
        }
        for i in 0..l {
            for (j, s) in ctx.trans_mut(i).iter_mut().enumerate() {
                *s = if i == j { 2.0 } else { -1.0 };
            }
        }
        ctx.exp_state();
        ctx.exp_transition();
        ctx.alpha_score();
        ctx.beta_score();
        ctx.marginals();
        assert!(ctx.log_norm().is_finite());
        assert!(ctx.log_norm() > 0.0);
        for t in [0, 1, t_max / 2, t_max - 1] {
            let sum: f64 = ctx.mexp_state(t).iter().sum();
            assert!((sum - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_empty_sequence() {
        let mut ctx = Context::new(Flag::ALL, 3, 0).unwrap();
        ctx.set_num_items(0).unwrap();
        ctx.reset(Reset::ALL);
        ctx.exp_state();
        ctx.alpha_score();
        ctx.beta_score();
        ctx.marginals();
        assert_eq!(ctx.log_norm(), 0.0);
        assert_eq!(ctx.viterbi(&mut []), 0.0);
        assert_eq!(ctx.score(&[]), 0.0);
    }
}
