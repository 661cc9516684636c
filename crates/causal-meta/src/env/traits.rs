//! Core environment trait definitions.

use crate::spaces::BoxSpace;
use ndarray::Array1;

/// Information returned from environment steps
#[derive(Clone, Debug, Default)]
pub struct EnvInfo {
    /// Episode return (if done)
    pub episode_return: Option<f32>,
    /// Episode length (if done)
    pub episode_length: Option<f32>,
    /// Custom metrics (kept minimal)
    pub extra: smallvec::SmallVec<[(&'static str, f32); 4]>,
}

impl EnvInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add episode stats
    pub fn with_episode_stats(mut self, ret: f32, len: u32) -> Self {
        self.episode_return = Some(ret);
        self.episode_length = Some(len as f32);
        self
    }

    pub fn with_extra(mut self, key: &'static str, value: f32) -> Self {
        self.extra.push((key, value));
        self
    }

    /// Get a value by key (including episode stats)
    pub fn get(&self, key: &str) -> Option<f32> {
        match key {
            "episode_return" => self.episode_return,
            "episode_length" => self.episode_length,
            _ => self.extra.iter().find(|(k, _)| k == &key).map(|(_, v)| *v),
        }
    }
}

/// Result from a single environment step
#[derive(Clone, Debug)]
pub struct StepResult {
    /// Observation after the step
    pub observation: Array1<f32>,
    pub reward: f32,
    /// Episode ended inside the MDP (failure, goal, ...)
    pub terminated: bool,
    /// Episode cut by a time limit
    pub truncated: bool,
    pub info: EnvInfo,
}

impl StepResult {
    /// Check if episode is done (terminated or truncated)
    pub fn done(&self) -> bool {
        self.terminated || self.truncated
    }
}

/// One task of a meta-RL environment family.
///
/// Each instance has fixed hidden parameters (its oracle context) that shape
/// the dynamics but are never part of the observation.
pub trait MetaEnv: Send {
    fn observation_space(&self) -> BoxSpace;

    fn action_space(&self) -> BoxSpace;

    /// Reset the environment to an initial state of the same task
    fn reset(&mut self, seed: Option<u64>) -> (Array1<f32>, EnvInfo);

    fn step(&mut self, action: &Array1<f32>) -> StepResult;

    /// Ground-truth task parameters
    fn context(&self) -> Array1<f32>;

    /// Check if environment is done and needs reset
    fn is_done(&self) -> bool {
        false
    }

    fn render(&self) -> Option<String> {
        None
    }

    fn close(&mut self) {}
}

impl<E: MetaEnv + ?Sized> MetaEnv for Box<E> {
    fn observation_space(&self) -> BoxSpace {
        (**self).observation_space()
    }

    fn action_space(&self) -> BoxSpace {
        (**self).action_space()
    }

    fn reset(&mut self, seed: Option<u64>) -> (Array1<f32>, EnvInfo) {
        (**self).reset(seed)
    }

    fn step(&mut self, action: &Array1<f32>) -> StepResult {
        (**self).step(action)
    }

    fn context(&self) -> Array1<f32> {
        (**self).context()
    }

    fn is_done(&self) -> bool {
        (**self).is_done()
    }

    fn render(&self) -> Option<String> {
        (**self).render()
    }

    fn close(&mut self) {
        (**self).close()
    }
}
