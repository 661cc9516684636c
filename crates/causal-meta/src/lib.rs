//! # causal-meta
//!
//! Causal, context-conditioned world models for model-based meta reinforcement
//! learning.
//!
//! ## Overview
//!
//! causal-meta provides:
//! - `ContextModel` - one learnable latent vector per task
//! - `CausalMask` - learnable input → output gating for the dynamics network
//! - `WorldModel` - probabilistic dynamics over (next obs, reward, continue)
//! - `WorldModelLoss` plus imagination-based actor/value losses
//! - `CausalDreamerTrainer` - collection, replay and alternating optimizer steps
//! - `mean_corr_coef` - permutation-invariant scoring of learned contexts
//!
//! ## Features
//!
//! - `default` - Everything except TensorBoard output
//! - `tensorboard` - Enable `TensorBoardLogger`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use causal_meta::prelude::*;
//! use tch::{Device, Kind, Tensor};
//!
//! let config = WorldModelConfig::new(4, 2).meta(10, 100);
//! let model = WorldModel::new(config, Device::Cpu)?;
//!
//! let obs = Tensor::randn([32, 4], (Kind::Float, Device::Cpu));
//! let action = Tensor::randn([32, 2], (Kind::Float, Device::Cpu));
//! let idx = Tensor::randint(100, [32, 1], (Kind::Int64, Device::Cpu));
//! let out = model.forward(&obs, &action, Some(&idx))?;
//! ```

pub mod causal;
pub mod checkpoint;
pub mod config;
pub mod context;
pub mod data;
pub mod env;
pub mod log;
pub mod objectives;
pub mod policy;
pub mod spaces;
pub mod stats;
pub mod training;
pub mod utils;
pub mod vector;
pub mod world_model;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::causal::{CausalMask, CausalMaskConfig, MaskUpdate};
    pub use crate::config::{EnvConfig, ExperimentConfig};
    pub use crate::context::{ContextConfig, ContextModel};
    pub use crate::data::{ReplayBuffer, TrajectoryBatch};
    pub use crate::env::{EnvInfo, MetaEnv, StepResult};
    pub use crate::objectives::{
        ImaginationActorLoss, ImaginationConfig, ModelLossConfig, ValueLoss, WorldModelLoss,
    };
    pub use crate::policy::{Actor, ValueNet};
    pub use crate::spaces::BoxSpace;
    pub use crate::stats::{mean_corr_coef, CorrelationMethod};
    pub use crate::training::{CausalDreamerTrainer, TrainerConfig};
    pub use crate::vector::{Parallel, Serial, TaskVecEnv};
    pub use crate::world_model::{DynamicsOutput, WorldModel, WorldModelConfig, WorldModelKind};

    // Logging exports
    #[cfg(feature = "tensorboard")]
    pub use crate::log::TensorBoardLogger;
    pub use crate::log::{CompositeLogger, ConsoleLogger, MemoryLogger, MetricLogger};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Error types for the library
#[derive(Debug, thiserror::Error)]
pub enum CausalMetaError {
    #[error("task index is required when meta mode is enabled")]
    MissingTaskIndex,

    #[error("last dim of task index should be 1, got shape {0:?}")]
    TaskIndexShape(Vec<i64>),

    #[error("task index {index} out of range for {task_num} tasks")]
    TaskIndexOutOfRange { index: i64, task_num: i64 },

    #[error("task_num is unset: pass it to reset or at construction")]
    TaskCountUnset,

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch { expected: Vec<i64>, actual: Vec<i64> },

    #[error("not a valid correlation method: {0}")]
    InvalidCorrelationMethod(String),

    #[error("not a valid reduction: {0}")]
    InvalidReduction(String),

    #[error("assignment failed: {0}")]
    Assignment(String),

    #[error("non-finite loss `{name}`: {value}")]
    NonFiniteLoss { name: String, value: f64 },

    #[error("replay buffer is empty")]
    EmptyBuffer,

    #[error("unknown {0}")]
    UnknownFunction(String),

    #[error("unknown environment `{name}`, expected one of {known:?}")]
    UnknownEnvironment { name: String, known: Vec<String> },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Environment error: {0}")]
    EnvError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Tensor error: {0}")]
    TensorError(#[from] tch::TchError),
}

pub type Result<T> = core::result::Result<T, CausalMetaError>;
