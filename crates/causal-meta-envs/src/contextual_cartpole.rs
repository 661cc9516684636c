//! Cart-pole with a continuous force and per-task physics.

use causal_meta::env::{EnvInfo, MetaEnv, StepResult};
use causal_meta::spaces::BoxSpace;
use ndarray::{array, Array1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::PI;

/// Hidden physics of one cart-pole task.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CartPoleParams {
    pub gravity: f32,
    pub mass_pole: f32,
    /// Half-pole length
    pub length: f32,
}

impl Default for CartPoleParams {
    fn default() -> Self {
        Self {
            gravity: 9.8,
            mass_pole: 0.1,
            length: 0.5,
        }
    }
}

impl CartPoleParams {
    /// Draw task parameters from ranges centred on the classic constants.
    pub fn sample<R: Rng>(rng: &mut R) -> Self {
        Self {
            gravity: rng.gen_range(5.0..15.0),
            mass_pole: rng.gen_range(0.05..0.5),
            length: rng.gen_range(0.25..1.0),
        }
    }

    pub fn to_array(&self) -> Array1<f32> {
        array![self.gravity, self.mass_pole, self.length]
    }
}

/// A pole is attached to a cart on a frictionless track; the action in
/// `[-1, 1]` scales a horizontal force on the cart.
///
/// Observation: [cart_pos, cart_vel, pole_angle, pole_vel]
/// Context: [gravity, pole mass, half-pole length]
pub struct ContextualCartPole {
    params: CartPoleParams,
    mass_cart: f32,
    force_mag: f32,
    tau: f32,

    theta_threshold: f32,
    x_threshold: f32,
    max_steps: u32,

    state: [f32; 4],
    steps: u32,
    done: bool,
    rng: StdRng,
}

impl ContextualCartPole {
    pub fn new(params: CartPoleParams, max_steps: u32, seed: u64) -> Self {
        Self {
            params,
            mass_cart: 1.0,
            force_mag: 10.0,
            tau: 0.02,
            theta_threshold: 12.0 * 2.0 * PI / 360.0,
            x_threshold: 2.4,
            max_steps,
            state: [0.0; 4],
            steps: 0,
            done: false,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn params(&self) -> CartPoleParams {
        self.params
    }

    fn is_terminal(&self) -> bool {
        self.state[0].abs() > self.x_threshold || self.state[2].abs() > self.theta_threshold
    }
}

impl MetaEnv for ContextualCartPole {
    fn observation_space(&self) -> BoxSpace {
        BoxSpace::uniform(4, -4.8, 4.8)
    }

    fn action_space(&self) -> BoxSpace {
        BoxSpace::symmetric(1)
    }

    fn reset(&mut self, seed: Option<u64>) -> (Array1<f32>, EnvInfo) {
        if let Some(s) = seed {
            self.rng = StdRng::seed_from_u64(s);
        }
        for v in self.state.iter_mut() {
            *v = self.rng.gen_range(-0.05..0.05);
        }
        self.steps = 0;
        self.done = false;
        (Array1::from(self.state.to_vec()), EnvInfo::new())
    }

    fn step(&mut self, action: &Array1<f32>) -> StepResult {
        let CartPoleParams {
            gravity,
            mass_pole,
            length,
        } = self.params;
        let total_mass = self.mass_cart + mass_pole;
        let pole_mass_length = mass_pole * length;
        let [x, x_dot, theta, theta_dot] = self.state;

        let force = self.force_mag * action.get(0).copied().unwrap_or(0.0).clamp(-1.0, 1.0);
        let (sin_theta, cos_theta) = theta.sin_cos();

        let temp = (force + pole_mass_length * theta_dot * theta_dot * sin_theta) / total_mass;
        let theta_acc = (gravity * sin_theta - cos_theta * temp)
            / (length * (4.0 / 3.0 - mass_pole * cos_theta * cos_theta / total_mass));
        let x_acc = temp - pole_mass_length * theta_acc * cos_theta / total_mass;

        // Euler integration
        self.state = [
            x + self.tau * x_dot,
            x_dot + self.tau * x_acc,
            theta + self.tau * theta_dot,
            theta_dot + self.tau * theta_acc,
        ];
        self.steps += 1;

        let terminated = self.is_terminal();
        let truncated = self.steps >= self.max_steps;
        self.done = terminated || truncated;

        StepResult {
            observation: Array1::from(self.state.to_vec()),
            reward: if terminated { 0.0 } else { 1.0 },
            terminated,
            truncated,
            info: EnvInfo::new(),
        }
    }

    fn context(&self) -> Array1<f32> {
        self.params.to_array()
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn render(&self) -> Option<String> {
        let [x, _, theta, _] = self.state;
        let cart_pos = (((x + 2.4) / 4.8 * 20.0) as i32).clamp(0, 20);
        let mut line = vec![' '; 21];
        line[cart_pos as usize] = if theta.abs() < 0.1 { '|' } else { '/' };
        Some(format!("[{}]", line.iter().collect::<String>()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset() {
        let mut env = ContextualCartPole::new(CartPoleParams::default(), 200, 0);
        let (obs, _) = env.reset(Some(42));
        assert_eq!(obs.len(), 4);
        assert!(obs.iter().all(|v| v.abs() <= 0.05));
        assert!(!env.is_done());
    }

    #[test]
    fn test_step_rewards_upright_pole() {
        let mut env = ContextualCartPole::new(CartPoleParams::default(), 200, 0);
        env.reset(Some(42));
        let result = env.step(&array![1.0]);
        assert_eq!(result.observation.len(), 4);
        assert_eq!(result.reward, 1.0);
        assert!(!result.done());
    }

    #[test]
    fn test_determinism() {
        let mut env1 = ContextualCartPole::new(CartPoleParams::default(), 200, 0);
        let mut env2 = ContextualCartPole::new(CartPoleParams::default(), 200, 1);
        env1.reset(Some(42));
        env2.reset(Some(42));
        for _ in 0..10 {
            let res1 = env1.step(&array![0.3]);
            let res2 = env2.step(&array![0.3]);
            assert_eq!(res1.observation, res2.observation);
        }
    }

    #[test]
    fn test_gravity_changes_dynamics() {
        let light = CartPoleParams {
            gravity: 5.0,
            ..Default::default()
        };
        let heavy = CartPoleParams {
            gravity: 15.0,
            ..Default::default()
        };
        let mut env1 = ContextualCartPole::new(light, 200, 0);
        let mut env2 = ContextualCartPole::new(heavy, 200, 0);
        env1.reset(Some(7));
        env2.reset(Some(7));
        for _ in 0..5 {
            env1.step(&array![0.0]);
            env2.step(&array![0.0]);
        }
        let a = env1.step(&array![0.0]).observation;
        let b = env2.step(&array![0.0]).observation;
        assert_ne!(a[3], b[3]);
        assert_eq!(env2.context(), array![15.0, 0.1, 0.5]);
    }

    #[test]
    fn test_truncation() {
        let mut env = ContextualCartPole::new(CartPoleParams::default(), 3, 0);
        env.reset(Some(0));
        env.step(&array![0.0]);
        env.step(&array![0.0]);
        let last = env.step(&array![0.0]);
        assert!(last.truncated);
        assert!(env.is_done());
    }
}
