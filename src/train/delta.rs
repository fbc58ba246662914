use crate::error::{zeroed, Result};

/// Sparse difference between two feature vectors.
///
/// The online trainers collect the features fired by the reference path
/// with `+1` and those fired by the predicted path with `-1`; features
/// shared by both cancel out. Only touched entries are cleared on reset,
/// so the cost of a step is proportional to the features it visits.
#[derive(Debug, Clone)]
pub(crate) struct Delta {
    /// Feature ids in first-touch order, unique after `finalize`
    actives: Vec<usize>,
    values: Vec<f64>,
    used: Vec<bool>,
}

impl Delta {
    pub fn new(num_features: usize) -> Result<Self> {
        Ok(Self {
            actives: Vec::new(),
            values: zeroed(num_features)?,
            used: zeroed(num_features)?,
        })
    }

    /// Add `c * value` to feature `fid`
    #[inline]
    pub fn collect(&mut self, fid: usize, value: f64, c: f64) {
        self.values[fid] += c * value;
        self.actives.push(fid);
    }

    /// Collapse repeated ids so every active feature appears once.
    pub fn finalize(&mut self) {
        let mut kept = 0;
        for k in 0..self.actives.len() {
            let fid = self.actives[k];
            if !self.used[fid] {
                self.used[fid] = true;
                self.actives[kept] = fid;
                kept += 1;
            }
        }
        self.actives.truncate(kept);
    }

    /// Active `(fid, value)` pairs; call after `finalize`.
    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.actives.iter().map(move |&fid| (fid, self.values[fid]))
    }

    /// Squared norm of the difference vector
    pub fn norm2(&self) -> f64 {
        self.iter().map(|(_, v)| v * v).sum()
    }

    pub fn reset(&mut self) {
        for &fid in &self.actives {
            self.values[fid] = 0.0;
            self.used[fid] = false;
        }
        self.actives.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_features_cancel() {
        let mut delta = Delta::new(5).unwrap();
        delta.collect(1, 1.0, 1.0);
        delta.collect(2, 0.5, 1.0);
        delta.collect(1, 1.0, -1.0);
        delta.collect(3, 2.0, -1.0);
        delta.finalize();

        let active: Vec<_> = delta.iter().collect();
        assert_eq!(active, vec![(1, 0.0), (2, 0.5), (3, -2.0)]);
        assert_eq!(delta.norm2(), 4.25);
    }

    #[test]
    fn test_reset_clears_touched_entries() {
        let mut delta = Delta::new(3).unwrap();
        delta.collect(0, 1.0, 1.0);
        delta.collect(0, 1.0, 1.0);
        delta.finalize();
        assert_eq!(delta.iter().collect::<Vec<_>>(), vec![(0, 2.0)]);

        delta.reset();
        assert_eq!(delta.iter().count(), 0);
        delta.collect(2, 1.0, -1.0);
        delta.finalize();
        assert_eq!(delta.iter().collect::<Vec<_>>(), vec![(2, -1.0)]);
    }
}
