//! Linear dynamics over a chain of variables, shifted by hidden task factors.

use causal_meta::env::{EnvInfo, MetaEnv, StepResult};
use causal_meta::spaces::BoxSpace;
use causal_meta::{CausalMetaError, Result};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Shape of a causal-chain family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainLayout {
    pub variable_num: usize,
    pub state_dim_per_variable: usize,
    pub hidden_dim_per_variable: usize,
}

impl ChainLayout {
    pub fn obs_dim(&self) -> usize {
        self.variable_num * self.state_dim_per_variable
    }

    /// One action dim per variable
    pub fn action_dim(&self) -> usize {
        self.variable_num
    }

    pub fn context_dim(&self) -> usize {
        self.variable_num * self.hidden_dim_per_variable
    }
}

/// `variable_num` variables, each with `state_dim_per_variable` observed
/// dims. Variable `v` is driven by itself, its parent `v - 1`, its own
/// action dim and its `hidden_dim_per_variable` task factors:
///
/// ```text
/// x'[v] = DECAY * x[v] + COUPLING * x[v - 1] + GAIN * a[v] + SHIFT * sum(h[v]) + noise
/// ```
///
/// Reward is `-mean(x'²)`; the episode terminates once any dim leaves
/// `[-BOUND, BOUND]`.
pub struct CausalChain {
    layout: ChainLayout,
    /// `[variable_num, hidden_dim_per_variable]`
    hidden: Array2<f32>,
    max_steps: u32,
    state: Array2<f32>,
    steps: u32,
    done: bool,
    rng: StdRng,
}

const DECAY: f32 = 0.9;
const COUPLING: f32 = 0.3;
const GAIN: f32 = 0.5;
const SHIFT: f32 = 0.2;
const NOISE_STD: f32 = 0.01;
const BOUND: f32 = 10.0;

impl CausalChain {
    /// `hidden` holds the task factors, row-major per variable.
    pub fn new(layout: ChainLayout, hidden: Array1<f32>, max_steps: u32, seed: u64) -> Result<Self> {
        if hidden.len() != layout.context_dim() {
            return Err(CausalMetaError::ShapeMismatch {
                expected: vec![layout.context_dim() as i64],
                actual: vec![hidden.len() as i64],
            });
        }
        let hidden = Array2::from_shape_vec(
            (layout.variable_num, layout.hidden_dim_per_variable),
            hidden.to_vec(),
        )
        .map_err(|e| CausalMetaError::EnvError(e.to_string()))?;
        Ok(Self {
            layout,
            hidden,
            max_steps,
            state: Array2::zeros((layout.variable_num, layout.state_dim_per_variable)),
            steps: 0,
            done: false,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// Uniform task factors in `[-1, 1]`.
    pub fn sample_hidden<R: Rng>(layout: &ChainLayout, rng: &mut R) -> Array1<f32> {
        (0..layout.context_dim()).map(|_| rng.gen_range(-1.0..1.0)).collect()
    }

    /// Parents of output variable `v` (itself and its predecessor).
    pub fn parents(v: usize) -> Vec<usize> {
        match v {
            0 => vec![0],
            _ => vec![v - 1, v],
        }
    }

    fn observation(&self) -> Array1<f32> {
        self.state.iter().copied().collect()
    }
}

impl MetaEnv for CausalChain {
    fn observation_space(&self) -> BoxSpace {
        BoxSpace::unbounded(self.layout.obs_dim())
    }

    fn action_space(&self) -> BoxSpace {
        BoxSpace::symmetric(self.layout.action_dim())
    }

    fn reset(&mut self, seed: Option<u64>) -> (Array1<f32>, EnvInfo) {
        if let Some(s) = seed {
            self.rng = StdRng::seed_from_u64(s);
        }
        let rng = &mut self.rng;
        self.state.mapv_inplace(|_| rng.gen_range(-0.1..0.1));
        self.steps = 0;
        self.done = false;
        (self.observation(), EnvInfo::new())
    }

    fn step(&mut self, action: &Array1<f32>) -> StepResult {
        let prev = self.state.clone();
        for v in 0..self.layout.variable_num {
            let push = GAIN * action.get(v).copied().unwrap_or(0.0).clamp(-1.0, 1.0);
            let shift = SHIFT * self.hidden.row(v).sum();
            for d in 0..self.layout.state_dim_per_variable {
                let parent = if v > 0 { prev[[v - 1, d]] } else { 0.0 };
                let noise: f32 = self.rng.sample(StandardNormal);
                self.state[[v, d]] =
                    DECAY * prev[[v, d]] + COUPLING * parent + push + shift + NOISE_STD * noise;
            }
        }
        self.steps += 1;

        let terminated = self.state.iter().any(|x| x.abs() > BOUND);
        let truncated = self.steps >= self.max_steps;
        self.done = terminated || truncated;
        let reward = -self.state.mapv(|x| x * x).mean().unwrap_or(0.0);

        StepResult {
            observation: self.observation(),
            reward,
            terminated,
            truncated,
            info: EnvInfo::new(),
        }
    }

    fn context(&self) -> Array1<f32> {
        self.hidden.iter().copied().collect()
    }

    fn is_done(&self) -> bool {
        self.done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn layout() -> ChainLayout {
        ChainLayout {
            variable_num: 3,
            state_dim_per_variable: 2,
            hidden_dim_per_variable: 1,
        }
    }

    #[test]
    fn test_dimensions() {
        let env = CausalChain::new(layout(), array![0.1, 0.2, 0.3], 10, 0).unwrap();
        assert_eq!(env.observation_space().dim(), 6);
        assert_eq!(env.action_space().dim(), 3);
        assert_eq!(env.context(), array![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_action_only_reaches_its_variable_and_children() {
        let mut a = CausalChain::new(layout(), array![0.0, 0.0, 0.0], 10, 0).unwrap();
        let mut b = CausalChain::new(layout(), array![0.0, 0.0, 0.0], 10, 0).unwrap();
        a.reset(Some(3));
        b.reset(Some(3));

        // push variable 1 only
        let first_a = a.step(&array![0.0, 0.0, 0.0]).observation;
        let first_b = b.step(&array![0.0, 1.0, 0.0]).observation;
        assert!((first_a[0] - first_b[0]).abs() < 1e-6);
        assert!((first_b[2] - first_a[2] - GAIN).abs() < 1e-5);
        assert!((first_a[4] - first_b[4]).abs() < 1e-6);

        // one step later the effect has reached variable 2
        let second_a = a.step(&array![0.0, 0.0, 0.0]).observation;
        let second_b = b.step(&array![0.0, 0.0, 0.0]).observation;
        assert!((second_a[4] - second_b[4]).abs() > 1e-3);
        assert!((second_a[0] - second_b[0]).abs() < 1e-6);
    }

    #[test]
    fn test_hidden_factors_shift_dynamics() {
        let mut a = CausalChain::new(layout(), array![0.0, 0.0, 0.0], 10, 0).unwrap();
        let mut b = CausalChain::new(layout(), array![1.0, 0.0, 0.0], 10, 0).unwrap();
        a.reset(Some(1));
        b.reset(Some(1));
        let diff = &b.step(&array![0.0, 0.0, 0.0]).observation - &a.step(&array![0.0, 0.0, 0.0]).observation;
        assert!((diff[0] - SHIFT).abs() < 1e-5);
        assert!(diff[2].abs() < 1e-6);
    }

    #[test]
    fn test_termination_and_truncation() {
        let mut env = CausalChain::new(layout(), array![1.0, 1.0, 1.0], 200, 0).unwrap();
        env.reset(Some(0));
        let mut terminated = false;
        for _ in 0..200 {
            let result = env.step(&array![1.0, 1.0, 1.0]);
            assert!(result.reward <= 0.0);
            if result.terminated {
                terminated = true;
                break;
            }
        }
        assert!(terminated);

        let mut env = CausalChain::new(layout(), array![0.0, 0.0, 0.0], 2, 0).unwrap();
        env.reset(Some(0));
        assert!(!env.step(&array![0.0, 0.0, 0.0]).truncated);
        assert!(env.step(&array![0.0, 0.0, 0.0]).truncated);
    }

    #[test]
    fn test_wrong_hidden_length() {
        assert!(CausalChain::new(layout(), array![0.0, 0.0], 10, 0).is_err());
    }

    #[test]
    fn test_parents() {
        assert_eq!(CausalChain::parents(0), vec![0]);
        assert_eq!(CausalChain::parents(2), vec![1, 2]);
    }
}
