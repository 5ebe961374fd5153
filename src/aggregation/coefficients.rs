use std::ops::Deref;

use crate::error::{FederationErr, Result};

/// The relative weight of each contributor in a round's aggregation.
///
/// Indexed parallel to the round's contributor list, the coefficients are
/// non-negative and sum to one.
#[derive(Debug, Clone, PartialEq)]
pub struct MixingCoefficients(Vec<f64>);

impl MixingCoefficients {
    /// Derives the coefficients from the contributors' data volume.
    ///
    /// # Arguments
    /// * `sample_counts` - The sample count of every contributor.
    ///
    /// # Returns
    /// `count[i] / sum(count)` for every contributor, or `InvalidConfiguration`
    /// if the total is zero.
    pub fn from_sample_counts(sample_counts: &[usize]) -> Result<Self> {
        let weights: Vec<_> = sample_counts.iter().map(|&n| n as f64).collect();
        Self::from_weights(&weights)
    }

    /// Normalizes arbitrary non-negative weights into coefficients.
    ///
    /// # Arguments
    /// * `weights` - The unnormalized weight of every contributor.
    ///
    /// # Returns
    /// The normalized coefficients, or `InvalidConfiguration` if a weight is
    /// negative or not finite, or the total isn't positive.
    pub fn from_weights(weights: &[f64]) -> Result<Self> {
        if let Some(w) = weights.iter().find(|w| !w.is_finite() || **w < 0.) {
            return Err(FederationErr::config(format!(
                "mixing weights must be finite and non-negative, got {w}"
            )));
        }

        let total: f64 = weights.iter().sum();
        if total <= 0. {
            return Err(FederationErr::config(
                "selected total size is zero, there is nothing to aggregate",
            ));
        }

        Ok(Self(weights.iter().map(|w| w / total).collect()))
    }
}

impl Deref for MixingCoefficients {
    type Target = [f64];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
