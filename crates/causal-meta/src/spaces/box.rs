//! Box (continuous) observation/action space

use super::Space;
use ndarray::Array1;
use rand::Rng;
use rand_distr::{Distribution, Uniform};

/// Flat continuous space with per-element bounds
#[derive(Clone, Debug, PartialEq)]
pub struct BoxSpace {
    /// Lower bound for each element
    pub low: Array1<f32>,
    /// Upper bound for each element
    pub high: Array1<f32>,
    shape: [usize; 1],
}

impl BoxSpace {
    /// Create a new box space with given bounds
    pub fn new(low: Array1<f32>, high: Array1<f32>) -> crate::Result<Self> {
        if low.len() != high.len() || low.iter().zip(high.iter()).any(|(l, h)| l > h) {
            return Err(crate::CausalMetaError::InvalidConfig(format!(
                "invalid box bounds: low={}, high={}",
                low, high
            )));
        }
        let shape = [low.len()];
        Ok(Self { low, high, shape })
    }

    /// Same bounds for every element
    pub fn uniform(dim: usize, low: f32, high: f32) -> Self {
        Self {
            low: Array1::from_elem(dim, low),
            high: Array1::from_elem(dim, high),
            shape: [dim],
        }
    }

    /// `[-1, 1]` for every element
    pub fn symmetric(dim: usize) -> Self {
        Self::uniform(dim, -1.0, 1.0)
    }

    /// `(-inf, inf)` for every element
    pub fn unbounded(dim: usize) -> Self {
        Self::uniform(dim, f32::NEG_INFINITY, f32::INFINITY)
    }

    pub fn dim(&self) -> usize {
        self.shape[0]
    }

    /// Clip `value` into the bounds
    pub fn clip(&self, value: &Array1<f32>) -> Array1<f32> {
        let mut out = value.clone();
        for ((v, &l), &h) in out.iter_mut().zip(self.low.iter()).zip(self.high.iter()) {
            *v = v.clamp(l, h);
        }
        out
    }

    pub fn is_bounded(&self) -> bool {
        self.low.iter().chain(self.high.iter()).all(|v| v.is_finite())
    }
}

impl Space for BoxSpace {
    type Sample = Array1<f32>;

    /// Uniform within finite bounds; standard normal on unbounded elements.
    fn sample<R: Rng>(&self, rng: &mut R) -> Self::Sample {
        let normal = rand_distr::StandardNormal;
        self.low
            .iter()
            .zip(self.high.iter())
            .map(|(&l, &h)| {
                if l.is_finite() && h.is_finite() && l < h {
                    Uniform::new(l, h).sample(rng)
                } else if l.is_finite() && l == h {
                    l
                } else {
                    let v: f32 = normal.sample(rng);
                    v.clamp(l, h)
                }
            })
            .collect()
    }

    fn contains(&self, value: &Self::Sample) -> bool {
        if value.len() != self.low.len() {
            return false;
        }
        value
            .iter()
            .zip(self.low.iter())
            .zip(self.high.iter())
            .all(|((&v, &l), &h)| v >= l && v <= h)
    }

    fn shape(&self) -> &[usize] {
        &self.shape
    }
}
