//! Fixed-length feature vectors summarizing a measured variant.

use serde::{Deserialize, Serialize};

/// Integer features of the most recent measurement of a variant.
///
/// The length must be identical for every program in one training run,
/// since it fixes the approximator's input dimensionality.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateVector(pub Vec<i64>);

impl StateVector {
    /// Number of features.
    pub fn dim(&self) -> usize {
        self.0.len()
    }

    /// Raw integer features.
    pub fn values(&self) -> &[i64] {
        &self.0
    }

    /// Approximator input: each feature squashed with `sign(x) * ln(1 + |x|)`.
    ///
    /// Raw counters span many orders of magnitude (kilobytes of RSS next to
    /// a handful of swaps), which would otherwise dominate the first layer.
    pub fn features(&self) -> Vec<f32> {
        self.0
            .iter()
            .map(|&x| {
                let magnitude = (x.unsigned_abs() as f64).ln_1p();
                (magnitude.copysign(x as f64)) as f32
            })
            .collect()
    }
}

impl From<Vec<i64>> for StateVector {
    fn from(values: Vec<i64>) -> Self {
        StateVector(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn features_preserve_sign_and_zero() {
        let s = StateVector(vec![0, 1, -1, 1000]);
        let f = s.features();
        assert_eq!(f[0], 0.0);
        assert!((f[1] - std::f32::consts::LN_2).abs() < 1e-6);
        assert!((f[2] + std::f32::consts::LN_2).abs() < 1e-6);
        assert!(f[3] > 6.9 && f[3] < 7.0);
    }

    #[test]
    fn dim_matches_len() {
        assert_eq!(StateVector(vec![1, 2, 3]).dim(), 3);
        assert_eq!(StateVector::default().dim(), 0);
    }
}
