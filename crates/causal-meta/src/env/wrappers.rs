//! Environment wrappers.

use super::{EnvInfo, MetaEnv, StepResult};
use crate::spaces::BoxSpace;
use ndarray::Array1;

/// Tracks episode return and length.
///
/// Adds `episode_return` and `episode_length` to info on episode completion
/// and remembers whether the episode is over so vectorised backends can
/// auto-reset.
pub struct EpisodeStats<E: MetaEnv> {
    env: E,
    episode_return: f32,
    episode_length: u32,
    done: bool,
}

impl<E: MetaEnv> EpisodeStats<E> {
    pub fn new(env: E) -> Self {
        Self {
            env,
            episode_return: 0.0,
            episode_length: 0,
            done: true,
        }
    }
}

impl<E: MetaEnv> MetaEnv for EpisodeStats<E> {
    fn observation_space(&self) -> BoxSpace {
        self.env.observation_space()
    }

    fn action_space(&self) -> BoxSpace {
        self.env.action_space()
    }

    fn reset(&mut self, seed: Option<u64>) -> (Array1<f32>, EnvInfo) {
        self.episode_return = 0.0;
        self.episode_length = 0;
        self.done = false;
        self.env.reset(seed)
    }

    fn step(&mut self, action: &Array1<f32>) -> StepResult {
        let mut result = self.env.step(action);

        self.episode_return += result.reward;
        self.episode_length += 1;

        if result.done() {
            result.info = result
                .info
                .with_episode_stats(self.episode_return, self.episode_length);
            self.done = true;
        }

        result
    }

    fn context(&self) -> Array1<f32> {
        self.env.context()
    }

    fn is_done(&self) -> bool {
        self.done || self.env.is_done()
    }

    fn render(&self) -> Option<String> {
        self.env.render()
    }

    fn close(&mut self) {
        self.env.close()
    }
}
