//! Rollout collection over one environment per task.

use crate::data::TrajectoryBatch;
use crate::policy::{Actor, AdditiveGaussian};
use crate::spaces::Space;
use crate::utils::array2_to_tensor;
use crate::vector::TaskVecEnv;
use crate::{CausalMetaError, Result};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use tch::{Device, Kind, Tensor};

/// Summary of one collected rollout.
#[derive(Clone, Debug, Default)]
pub struct RolloutStats {
    pub frames: u64,
    pub reward_mean: f64,
    pub reward_std: f64,
    /// Mean return of the episodes that finished during the rollout
    pub episode_reward_mean: Option<f64>,
    pub action_mean: f64,
    pub action_std: f64,
}

impl RolloutStats {
    pub fn metrics(&self) -> HashMap<String, f64> {
        let mut metrics = HashMap::new();
        metrics.insert("rollout/reward_mean".to_string(), self.reward_mean);
        metrics.insert("rollout/reward_std".to_string(), self.reward_std);
        metrics.insert("rollout/action_mean".to_string(), self.action_mean);
        metrics.insert("rollout/action_std".to_string(), self.action_std);
        if let Some(ret) = self.episode_reward_mean {
            metrics.insert("rollout/episode_reward_mean".to_string(), ret);
        }
        metrics
    }
}

fn mean_std(values: &[f32]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = values
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    (mean, var.sqrt())
}

/// Steps every task in lockstep and hands back `[task_num, steps]` batches.
///
/// Acts uniformly at random until `init_random_frames` frames were
/// collected, then with the actor plus exploration noise.
pub struct Collector<V: TaskVecEnv> {
    vec_env: V,
    obs: Array2<f32>,
    exploration: AdditiveGaussian,
    rng: StdRng,
    steps_per_task: usize,
    init_random_frames: u64,
    collected: u64,
    device: Device,
}

impl<V: TaskVecEnv> Collector<V> {
    pub fn new(
        mut vec_env: V,
        steps_per_task: usize,
        init_random_frames: u64,
        exploration: AdditiveGaussian,
        seed: u64,
        device: Device,
    ) -> Result<Self> {
        if steps_per_task == 0 {
            return Err(CausalMetaError::InvalidConfig(
                "steps_per_task must be positive".to_string(),
            ));
        }
        let obs = vec_env.reset(Some(seed))?;
        Ok(Self {
            vec_env,
            obs,
            exploration,
            rng: StdRng::seed_from_u64(seed),
            steps_per_task,
            init_random_frames,
            collected: 0,
            device,
        })
    }

    pub fn num_tasks(&self) -> usize {
        self.vec_env.num_envs()
    }

    pub fn collected_frames(&self) -> u64 {
        self.collected
    }

    /// Whether the next rollout still uses random actions.
    pub fn is_random_phase(&self) -> bool {
        self.collected < self.init_random_frames
    }

    pub fn vec_env(&self) -> &V {
        &self.vec_env
    }

    fn random_actions(&mut self) -> Array2<f32> {
        let space = self.vec_env.action_space();
        let n = self.vec_env.num_envs();
        let mut actions = Array2::zeros((n, space.dim()));
        for mut row in actions.rows_mut() {
            row.assign(&space.sample(&mut self.rng));
        }
        actions
    }

    fn policy_actions(&mut self, actor: &Actor, context: &Tensor) -> Result<Array2<f32>> {
        let obs = array2_to_tensor(&self.obs, self.device);
        let flat = actor.act(&obs, context)?;
        let n = self.vec_env.num_envs();
        let mut actions = Array2::from_shape_vec((n, actor.action_dim() as usize), flat)
            .map_err(|e| CausalMetaError::EnvError(e.to_string()))?;
        self.exploration.apply(&mut actions, &mut self.rng);
        Ok(actions)
    }

    /// Collect `steps_per_task` steps from every task.
    ///
    /// `policy` is the actor with its per-task context rows `[task_num, C]`;
    /// `None` forces random actions.
    pub fn collect(&mut self, policy: Option<(&Actor, &Tensor)>) -> Result<(TrajectoryBatch, RolloutStats)> {
        let n = self.vec_env.num_envs();
        let steps = self.steps_per_task;
        let obs_dim = self.vec_env.observation_space().dim();
        let action_dim = self.vec_env.action_space().dim();

        let mut observation = Vec::with_capacity(steps * n * obs_dim);
        let mut next_observation = Vec::with_capacity(steps * n * obs_dim);
        let mut action = Vec::with_capacity(steps * n * action_dim);
        let mut reward = Vec::with_capacity(steps * n);
        let mut terminated = Vec::with_capacity(steps * n);
        let mut done = Vec::with_capacity(steps * n);
        let mut episode_returns = Vec::new();

        let random = self.is_random_phase();
        for _ in 0..steps {
            let actions = match policy {
                Some((actor, context)) if !random => self.policy_actions(actor, context)?,
                _ => self.random_actions(),
            };
            let step = self.vec_env.step(&actions)?;

            observation.extend(self.obs.iter().copied());
            next_observation.extend(step.next_observations.iter().copied());
            action.extend(actions.iter().copied());
            reward.extend(step.rewards.iter().copied());
            let dones = step.dones();
            for i in 0..n {
                terminated.push(if step.terminated[i] { 1.0f32 } else { 0.0 });
                done.push(if dones[i] { 1.0f32 } else { 0.0 });
                if dones[i] {
                    if let Some(ret) = step.infos[i].get("episode_return") {
                        episode_returns.push(ret);
                    }
                }
            }
            self.obs = step.observations;
        }

        let frames = (steps * n) as u64;
        self.collected += frames;

        let (reward_mean, reward_std) = mean_std(&reward);
        let (action_mean, action_std) = mean_std(&action);
        let episode_reward_mean = if episode_returns.is_empty() {
            None
        } else {
            Some(mean_std(&episode_returns).0)
        };
        let stats = RolloutStats {
            frames,
            reward_mean,
            reward_std,
            episode_reward_mean,
            action_mean,
            action_std,
        };

        let s = steps as i64;
        let n = n as i64;
        // time-major [S, N, k] -> [N, S, k]
        let to_batch = |values: &[f32], width: usize| {
            Tensor::from_slice(values)
                .reshape([s, n, width as i64])
                .transpose(0, 1)
                .contiguous()
                .to_device(self.device)
        };
        let batch = TrajectoryBatch {
            observation: to_batch(&observation, obs_dim),
            action: to_batch(&action, action_dim),
            reward: to_batch(&reward, 1),
            next_observation: to_batch(&next_observation, obs_dim),
            terminated: to_batch(&terminated, 1),
            done: to_batch(&done, 1),
            task_idx: Tensor::arange(n, (Kind::Int64, self.device))
                .reshape([n, 1, 1])
                .repeat([1, s, 1]),
            mask: Tensor::ones([n, s, 1], (Kind::Float, self.device)),
        };
        Ok((batch, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{EnvInfo, MetaEnv, StepResult};
    use crate::policy::{ActorConfig, MlpConfig};
    use crate::spaces::BoxSpace;
    use crate::vector::Serial;
    use ndarray::{array, Array1};

    /// obs = [task, t]; terminates after 3 steps, reward = action
    struct Walk {
        task: f32,
        t: f32,
    }

    impl MetaEnv for Walk {
        fn observation_space(&self) -> BoxSpace {
            BoxSpace::unbounded(2)
        }

        fn action_space(&self) -> BoxSpace {
            BoxSpace::symmetric(1)
        }

        fn reset(&mut self, _seed: Option<u64>) -> (Array1<f32>, EnvInfo) {
            self.t = 0.0;
            (array![self.task, 0.0], EnvInfo::new())
        }

        fn step(&mut self, action: &Array1<f32>) -> StepResult {
            self.t += 1.0;
            StepResult {
                observation: array![self.task, self.t],
                reward: action[0],
                terminated: self.t >= 3.0,
                truncated: false,
                info: EnvInfo::new(),
            }
        }

        fn context(&self) -> Array1<f32> {
            array![self.task]
        }
    }

    fn collector(init_random_frames: u64) -> Collector<Serial<Walk>> {
        let envs = (0..2).map(|i| Walk { task: i as f32, t: 0.0 }).collect();
        Collector::new(
            Serial::new(envs).unwrap(),
            4,
            init_random_frames,
            AdditiveGaussian::new(0.0),
            0,
            Device::Cpu,
        )
        .unwrap()
    }

    #[test]
    fn test_batch_layout() {
        let mut collector = collector(100);
        let (batch, stats) = collector.collect(None).unwrap();
        batch.validate().unwrap();
        assert_eq!(batch.observation.size(), vec![2, 4, 2]);
        assert_eq!(batch.reward.size(), vec![2, 4, 1]);
        assert_eq!(stats.frames, 8);
        assert_eq!(collector.collected_frames(), 8);

        // row i is task i, steps in order; episode ends at t = 3
        let obs = Vec::<f32>::try_from(&batch.observation.get(1).reshape([-1])).unwrap();
        assert_eq!(obs, vec![1.0, 0.0, 1.0, 1.0, 1.0, 2.0, 1.0, 0.0]);
        let next = Vec::<f32>::try_from(&batch.next_observation.get(1).select(0, 2)).unwrap();
        assert_eq!(next, vec![1.0, 3.0]);
        let terminated = Vec::<f32>::try_from(&batch.terminated.get(0).reshape([-1])).unwrap();
        assert_eq!(terminated, vec![0.0, 0.0, 1.0, 0.0]);
        let task = Vec::<i64>::try_from(&batch.task_idx.select(1, 3).reshape([-1])).unwrap();
        assert_eq!(task, vec![0, 1]);
        assert!(stats.episode_reward_mean.is_some());

        // rewards equal the random actions
        assert!(batch.reward.allclose(&batch.action, 1e-6, 1e-6, false));
    }

    #[test]
    fn test_switches_to_actor_after_random_phase() {
        let mut collector = collector(8);
        let actor = Actor::new(
            2,
            0,
            1,
            ActorConfig {
                mlp: MlpConfig::new(8, 1),
                ..Default::default()
            },
            Device::Cpu,
        );
        let context = Tensor::zeros([2, 0], (Kind::Float, Device::Cpu));
        assert!(collector.is_random_phase());
        collector.collect(Some((&actor, &context))).unwrap();
        assert!(!collector.is_random_phase());
        let (batch, stats) = collector.collect(Some((&actor, &context))).unwrap();
        assert!(batch.action.abs().max().double_value(&[]) <= 1.0);
        assert!(stats.action_std >= 0.0);
        assert_eq!(collector.collected_frames(), 16);
    }

    #[test]
    fn test_zero_steps_rejected() {
        let envs = vec![Walk { task: 0.0, t: 0.0 }];
        assert!(Collector::new(
            Serial::new(envs).unwrap(),
            0,
            0,
            AdditiveGaussian::new(0.3),
            0,
            Device::Cpu
        )
        .is_err());
    }
}
