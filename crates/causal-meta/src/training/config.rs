//! Trainer configuration.

use crate::{CausalMetaError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tch::Device;

fn env_or(name: &str, default: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Configuration for the causal Dreamer training loop
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainerConfig {
    // Collection
    /// Frames collected per task before training stops
    pub train_frames_per_task: u64,
    /// Frames per task collected with random actions before any update
    pub init_frames_per_task: u64,
    /// Frames collected per iteration, summed over tasks
    pub frames_per_batch: u64,
    /// Std of the additive exploration noise
    pub exploration_sigma: f32,
    /// Replay capacity in segments; defaults to the full training budget
    pub buffer_size: Option<usize>,

    // Optimisation
    /// Segments per sampled batch
    pub batch_size: usize,
    /// Steps per segment
    pub batch_length: i64,
    pub optim_steps_per_batch: usize,
    /// Total frames after which the actor and value start training
    pub train_agent_frames: u64,
    pub world_model_lr: f64,
    pub context_lr: f64,
    pub mask_logits_lr: f64,
    pub actor_value_lr: f64,
    /// Max global gradient norm per parameter group
    pub grad_clip: f64,

    // Bookkeeping
    /// Emit metrics every `log_interval` optimisation steps
    pub log_interval: usize,
    /// Save every N iterations (0 disables)
    pub checkpoint_interval: usize,
    /// Checkpoints kept on disk (0 keeps all)
    pub keep_last: usize,
    pub data_dir: PathBuf,
    pub progress_bar: bool,

    /// Device to train on
    #[serde(skip, default = "default_device")]
    pub device: Device,
}

fn default_device() -> Device {
    Device::Cpu
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            train_frames_per_task: 10_000,
            init_frames_per_task: 500,
            frames_per_batch: 1_000,
            exploration_sigma: 0.3,
            buffer_size: None,

            batch_size: 64,
            batch_length: 50,
            optim_steps_per_batch: 100,
            train_agent_frames: 0,
            world_model_lr: env_or("CAUSAL_META_WORLD_MODEL_LR", 1e-3),
            context_lr: env_or("CAUSAL_META_CONTEXT_LR", 1e-3),
            mask_logits_lr: env_or("CAUSAL_META_MASK_LOGITS_LR", 1e-3),
            actor_value_lr: env_or("CAUSAL_META_ACTOR_VALUE_LR", 8e-5),
            grad_clip: 100.0,

            log_interval: 10,
            checkpoint_interval: 0,
            keep_last: 3,
            data_dir: PathBuf::from("checkpoints"),
            progress_bar: true,

            device: Device::Cpu,
        }
    }
}

impl TrainerConfig {
    /// Create config for CUDA device
    pub fn cuda(mut self) -> Self {
        self.device = Device::Cuda(0);
        self
    }

    pub fn with_frames(mut self, train_frames_per_task: u64, init_frames_per_task: u64) -> Self {
        self.train_frames_per_task = train_frames_per_task;
        self.init_frames_per_task = init_frames_per_task;
        self
    }

    pub fn with_batch(mut self, batch_size: usize, batch_length: i64) -> Self {
        self.batch_size = batch_size;
        self.batch_length = batch_length;
        self
    }

    /// Environment steps per task in one collection round
    pub fn steps_per_task(&self, task_num: usize) -> usize {
        ((self.frames_per_batch as usize) / task_num.max(1)).max(1)
    }

    /// Replay capacity in segments of `batch_length` steps
    pub fn replay_capacity(&self, task_num: usize) -> usize {
        self.buffer_size.unwrap_or_else(|| {
            let frames = self.train_frames_per_task as usize * task_num;
            (frames / self.batch_length.max(1) as usize).max(1)
        })
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("frames_per_batch", self.frames_per_batch as f64),
            ("batch_size", self.batch_size as f64),
            ("batch_length", self.batch_length as f64),
            ("log_interval", self.log_interval as f64),
            ("world_model_lr", self.world_model_lr),
            ("context_lr", self.context_lr),
            ("mask_logits_lr", self.mask_logits_lr),
            ("actor_value_lr", self.actor_value_lr),
            ("grad_clip", self.grad_clip),
        ];
        for (name, value) in positive {
            if !(value > 0.0) {
                return Err(CausalMetaError::InvalidConfig(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        if self.buffer_size == Some(0) {
            return Err(CausalMetaError::InvalidConfig(
                "buffer_size must be positive".to_string(),
            ));
        }
        if self.exploration_sigma < 0.0 {
            return Err(CausalMetaError::InvalidConfig(format!(
                "exploration_sigma must be non-negative, got {}",
                self.exploration_sigma
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = TrainerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.steps_per_task(10), 100);
        assert_eq!(config.steps_per_task(5_000), 1);
        // 10 tasks * 10k frames / 50 steps per segment
        assert_eq!(config.replay_capacity(10), 2_000);
    }

    #[test]
    fn test_explicit_buffer_size() {
        let config = TrainerConfig {
            buffer_size: Some(7),
            ..Default::default()
        };
        assert_eq!(config.replay_capacity(10), 7);
    }

    #[test]
    fn test_invalid_values() {
        let mut config = TrainerConfig::default().with_batch(0, 50);
        assert!(config.validate().is_err());
        config.batch_size = 4;
        config.grad_clip = f64::NAN;
        assert!(config.validate().is_err());
        config.grad_clip = 1.0;
        config.buffer_size = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_round_trip_skips_device() {
        let json = r#"{"batch_size": 8, "log_interval": 2}"#;
        let config: TrainerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.batch_size, 8);
        assert_eq!(config.device, Device::Cpu);
        assert!(serde_json::from_str::<TrainerConfig>(r#"{"bptt_horizon": 8}"#).is_err());
    }
}
