//! Parallel vectorization backend.
//!
//! Steps the task environments in parallel using rayon.

use super::vecenv::{check_actions, collect_step, common_spaces, stack_rows, step_env, TaskVecEnv, VecStep};
use crate::env::{EpisodeStats, MetaEnv};
use crate::spaces::BoxSpace;
use crate::Result;
use ndarray::Array2;
use rayon::prelude::*;

/// Parallel vectorization backend using rayon
pub struct Parallel<E: MetaEnv> {
    envs: Vec<EpisodeStats<E>>,
    obs_space: BoxSpace,
    action_space: BoxSpace,
}

impl<E: MetaEnv> Parallel<E> {
    /// One env per task, in task-index order
    pub fn new(envs: Vec<E>) -> Result<Self> {
        let (obs_space, action_space) = common_spaces(&envs)?;
        tracing::debug!(num_envs = envs.len(), "Created parallel task backend");
        Ok(Self {
            envs: envs.into_iter().map(EpisodeStats::new).collect(),
            obs_space,
            action_space,
        })
    }
}

impl<E: MetaEnv> TaskVecEnv for Parallel<E> {
    fn observation_space(&self) -> BoxSpace {
        self.obs_space.clone()
    }

    fn action_space(&self) -> BoxSpace {
        self.action_space.clone()
    }

    fn num_envs(&self) -> usize {
        self.envs.len()
    }

    fn reset(&mut self, seed: Option<u64>) -> Result<Array2<f32>> {
        let observations = self
            .envs
            .par_iter_mut()
            .enumerate()
            .map(|(i, env)| env.reset(seed.map(|s| s.wrapping_add(i as u64))).0)
            .collect();
        stack_rows(observations, self.obs_space.dim())
    }

    fn step(&mut self, actions: &Array2<f32>) -> Result<VecStep> {
        check_actions(actions, self.envs.len(), self.action_space.dim())?;
        let transitions = self
            .envs
            .par_iter_mut()
            .enumerate()
            .map(|(i, env)| step_env(env, actions.row(i)))
            .collect();
        collect_step(transitions, self.obs_space.dim())
    }

    fn oracle_context(&self) -> Result<Array2<f32>> {
        let contexts: Vec<_> = self.envs.iter().map(|e| e.context()).collect();
        let dim = contexts.first().map(|c| c.len()).unwrap_or(0);
        stack_rows(contexts, dim)
    }
}
