//! Exploration noise for data collection.

use ndarray::Array2;
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Adds `N(0, sigma^2)` to every action element, then clips to `[low, high]`.
#[derive(Clone, Debug)]
pub struct AdditiveGaussian {
    sigma: f32,
    low: f32,
    high: f32,
}

impl AdditiveGaussian {
    pub fn new(sigma: f32) -> Self {
        Self {
            sigma,
            low: -1.0,
            high: 1.0,
        }
    }

    pub fn with_bounds(mut self, low: f32, high: f32) -> Self {
        self.low = low;
        self.high = high;
        self
    }

    pub fn sigma(&self) -> f32 {
        self.sigma
    }

    pub fn apply<R: Rng>(&self, actions: &mut Array2<f32>, rng: &mut R) {
        if self.sigma > 0.0 {
            if let Ok(noise) = Normal::new(0.0, self.sigma) {
                actions.mapv_inplace(|a| a + noise.sample(rng));
            }
        }
        actions.mapv_inplace(|a| a.clamp(self.low, self.high));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_noise_is_clipped() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut actions = Array2::from_elem((16, 2), 0.9);
        AdditiveGaussian::new(0.3).apply(&mut actions, &mut rng);
        assert!(actions.iter().all(|a| (-1.0..=1.0).contains(a)));
        assert!(actions.iter().any(|&a| a != 0.9));
    }

    #[test]
    fn test_zero_sigma_is_identity() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut actions = Array2::from_elem((4, 2), 0.5);
        AdditiveGaussian::new(0.0).apply(&mut actions, &mut rng);
        assert!(actions.iter().all(|&a| a == 0.5));
    }
}
