use rand::{SeedableRng, rngs::StdRng, seq::index};

use crate::error::{FederationErr, Result};

/// Computes how many clients take part in a round.
///
/// # Arguments
/// * `num_clients` - The amount of registered clients.
/// * `fraction` - The fraction of clients to sample.
///
/// # Returns
/// `max(floor(fraction * num_clients), 1)`.
pub fn sample_size(num_clients: usize, fraction: f64) -> usize {
    ((fraction * num_clients as f64).floor() as usize).max(1)
}

/// Selects the subset of clients taking part in each round.
#[derive(Debug, Clone)]
pub struct Sampler {
    rng: StdRng,
}

impl Sampler {
    /// Creates a new `Sampler`.
    ///
    /// # Arguments
    /// * `seed` - An optional seed, the same seed always yields the same sequence of samples.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self { rng }
    }

    /// Draws distinct client indices uniformly at random, without replacement.
    ///
    /// # Arguments
    /// * `num_clients` - The amount of registered clients.
    /// * `fraction` - The fraction of clients to sample, in `(0, 1]`.
    ///
    /// # Returns
    /// The sampled indices in ascending order, or `InvalidConfiguration` if
    /// there are no clients or the fraction is out of range.
    pub fn sample(&mut self, num_clients: usize, fraction: f64) -> Result<Vec<usize>> {
        if num_clients == 0 {
            return Err(FederationErr::config("can't sample from zero clients"));
        }

        if !(fraction > 0. && fraction <= 1.) {
            return Err(FederationErr::config(format!(
                "sampling fraction must be in (0, 1], got {fraction}"
            )));
        }

        let amount = sample_size(num_clients, fraction);
        let mut indices = index::sample(&mut self.rng, num_clients, amount).into_vec();
        indices.sort_unstable();
        Ok(indices)
    }
}
