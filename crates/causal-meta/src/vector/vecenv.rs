//! Task-vectorised environment abstraction.

use crate::env::{EnvInfo, MetaEnv};
use crate::spaces::BoxSpace;
use crate::{CausalMetaError, Result};
use ndarray::{Array1, Array2, ArrayView1};

/// Batched step over all tasks.
#[derive(Clone, Debug)]
pub struct VecStep {
    /// Observation reached by the step; the terminal one when an episode ended
    pub next_observations: Array2<f32>,
    /// Observation to act on next (post-reset where an episode ended)
    pub observations: Array2<f32>,
    pub rewards: Array1<f32>,
    pub terminated: Vec<bool>,
    pub truncated: Vec<bool>,
    pub infos: Vec<EnvInfo>,
}

impl VecStep {
    pub fn dones(&self) -> Vec<bool> {
        self.terminated
            .iter()
            .zip(&self.truncated)
            .map(|(&t, &u)| t || u)
            .collect()
    }
}

/// One environment per task, stepped in lockstep. Row `i` belongs to task `i`.
pub trait TaskVecEnv {
    fn observation_space(&self) -> BoxSpace;

    fn action_space(&self) -> BoxSpace;

    fn num_envs(&self) -> usize;

    /// Reset every task; env `i` gets `seed + i`.
    fn reset(&mut self, seed: Option<u64>) -> Result<Array2<f32>>;

    /// Step every task with its action row, resetting finished episodes.
    fn step(&mut self, actions: &Array2<f32>) -> Result<VecStep>;

    /// Ground-truth contexts `[num_envs, context_dim]`.
    fn oracle_context(&self) -> Result<Array2<f32>>;
}

/// Result of stepping a single env.
pub(super) struct EnvTransition {
    next_observation: Array1<f32>,
    observation: Array1<f32>,
    reward: f32,
    terminated: bool,
    truncated: bool,
    info: EnvInfo,
}

/// Spaces shared by every env, checked once at construction.
pub(super) fn common_spaces<E: MetaEnv>(envs: &[E]) -> Result<(BoxSpace, BoxSpace)> {
    let first = envs
        .first()
        .ok_or_else(|| CausalMetaError::EnvError("no environments given".to_string()))?;
    let obs_space = first.observation_space();
    let action_space = first.action_space();
    for (i, env) in envs.iter().enumerate().skip(1) {
        if env.observation_space().dim() != obs_space.dim()
            || env.action_space().dim() != action_space.dim()
        {
            return Err(CausalMetaError::EnvError(format!(
                "env {} spaces differ from env 0",
                i
            )));
        }
    }
    Ok((obs_space, action_space))
}

pub(super) fn check_actions(actions: &Array2<f32>, num_envs: usize, action_dim: usize) -> Result<()> {
    if actions.dim() != (num_envs, action_dim) {
        return Err(CausalMetaError::ShapeMismatch {
            expected: vec![num_envs as i64, action_dim as i64],
            actual: vec![actions.nrows() as i64, actions.ncols() as i64],
        });
    }
    Ok(())
}

pub(super) fn step_env<E: MetaEnv>(env: &mut E, action: ArrayView1<f32>) -> EnvTransition {
    let res = env.step(&action.to_owned());
    let done = res.done();
    let observation = if done {
        env.reset(None).0
    } else {
        res.observation.clone()
    };
    EnvTransition {
        next_observation: res.observation,
        observation,
        reward: res.reward,
        terminated: res.terminated,
        truncated: res.truncated,
        info: res.info,
    }
}

pub(super) fn stack_rows(rows: Vec<Array1<f32>>, dim: usize) -> Result<Array2<f32>> {
    let n = rows.len();
    let flat: Vec<f32> = rows.into_iter().flat_map(|r| r.into_iter()).collect();
    let len = flat.len();
    Array2::from_shape_vec((n, dim), flat).map_err(|_| CausalMetaError::ShapeMismatch {
        expected: vec![(n * dim) as i64],
        actual: vec![len as i64],
    })
}

pub(super) fn collect_step(transitions: Vec<EnvTransition>, obs_dim: usize) -> Result<VecStep> {
    let n = transitions.len();
    let mut next_observations = Vec::with_capacity(n);
    let mut observations = Vec::with_capacity(n);
    let mut rewards = Vec::with_capacity(n);
    let mut terminated = Vec::with_capacity(n);
    let mut truncated = Vec::with_capacity(n);
    let mut infos = Vec::with_capacity(n);

    for t in transitions {
        next_observations.push(t.next_observation);
        observations.push(t.observation);
        rewards.push(t.reward);
        terminated.push(t.terminated);
        truncated.push(t.truncated);
        infos.push(t.info);
    }

    Ok(VecStep {
        next_observations: stack_rows(next_observations, obs_dim)?,
        observations: stack_rows(observations, obs_dim)?,
        rewards: Array1::from(rewards),
        terminated,
        truncated,
        infos,
    })
}
