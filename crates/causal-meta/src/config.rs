//! Experiment configuration.
//!
//! One statically typed struct per component, aggregated into
//! [`ExperimentConfig`]. Unknown fields are rejected when parsing.

use crate::env::ExternalFns;
use crate::objectives::{ImaginationConfig, ModelLossConfig};
use crate::policy::{ActorConfig, MlpConfig};
use crate::training::TrainerConfig;
use crate::world_model::WorldModelConfig;
use crate::{CausalMetaError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Task split
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Test,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Split {
    type Err = CausalMetaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "train" | "meta_train" => Ok(Split::Train),
            "test" | "meta_test" => Ok(Split::Test),
            other => Err(CausalMetaError::InvalidConfig(format!(
                "unknown split `{}`",
                other
            ))),
        }
    }
}

/// Environment family and per-split task counts
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnvConfig {
    pub env_name: String,
    /// Causal variables of the `causal_chain` family
    pub variable_num: usize,
    pub state_dim_per_variable: usize,
    /// Hidden (context) dims per variable
    pub hidden_dim_per_variable: usize,
    pub meta_train_task_num: usize,
    pub meta_test_task_num: usize,
    /// Episode step limit
    pub max_steps: u32,
    pub seed: u64,
    /// Named reward function replacing the reward head
    pub reward_fn: Option<String>,
    /// Named termination function replacing the continue head
    pub termination_fn: Option<String>,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            env_name: "causal_chain".to_string(),
            variable_num: 3,
            state_dim_per_variable: 1,
            hidden_dim_per_variable: 1,
            meta_train_task_num: 10,
            meta_test_task_num: 5,
            max_steps: 200,
            seed: 42,
            reward_fn: None,
            termination_fn: None,
        }
    }
}

impl EnvConfig {
    pub fn new(env_name: impl Into<String>) -> Self {
        Self {
            env_name: env_name.into(),
            ..Default::default()
        }
    }

    pub fn task_num(&self, split: Split) -> usize {
        match split {
            Split::Train => self.meta_train_task_num,
            Split::Test => self.meta_test_task_num,
        }
    }

    /// Resolve the configured function names.
    pub fn external_fns(&self) -> Result<ExternalFns> {
        ExternalFns::from_names(self.reward_fn.as_deref(), self.termination_fn.as_deref())
    }

    pub fn validate(&self) -> Result<()> {
        if self.meta_train_task_num == 0 {
            return Err(CausalMetaError::InvalidConfig(
                "meta_train_task_num must be positive".to_string(),
            ));
        }
        if self.variable_num == 0 || self.state_dim_per_variable == 0 {
            return Err(CausalMetaError::InvalidConfig(
                "variable_num and state_dim_per_variable must be positive".to_string(),
            ));
        }
        if self.max_steps == 0 {
            return Err(CausalMetaError::InvalidConfig(
                "max_steps must be positive".to_string(),
            ));
        }
        self.external_fns().map(|_| ())
    }
}

/// Context width of the default experiment
pub const DEFAULT_MAX_CONTEXT_DIM: i64 = 10;

/// Everything needed to run one experiment.
///
/// `model.obs_dim`, `model.action_dim` and the context `task_num` are filled
/// in from the environment by the trainer factory. Experiments default to
/// meta mode; a `model` block read from a file replaces the whole model
/// config, so it has to carry its own `context` block.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExperimentConfig {
    pub env: EnvConfig,
    pub model: WorldModelConfig,
    pub loss: ModelLossConfig,
    pub imagination: ImaginationConfig,
    pub actor: ActorConfig,
    pub value: MlpConfig,
    pub trainer: TrainerConfig,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            env: EnvConfig::default(),
            model: WorldModelConfig::default().meta(DEFAULT_MAX_CONTEXT_DIM, 0),
            loss: ModelLossConfig::default(),
            imagination: ImaginationConfig::default(),
            actor: ActorConfig::default(),
            value: MlpConfig::default(),
            trainer: TrainerConfig::default(),
        }
    }
}

impl ExperimentConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json_str(&text)?;
        tracing::debug!(path = %path.as_ref().display(), "Loaded experiment config");
        Ok(config)
    }

    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path.as_ref())?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    /// Checks that do not depend on the environment's dimensions.
    pub fn validate(&self) -> Result<()> {
        self.env.validate()?;
        self.trainer.validate()?;
        if self.model.context.meta && self.model.context.max_context_dim <= 0 {
            return Err(CausalMetaError::InvalidConfig(
                "meta mode needs max_context_dim > 0".to_string(),
            ));
        }
        if self.loss.sampling_times == 0 {
            return Err(CausalMetaError::InvalidConfig(
                "sampling_times must be positive".to_string(),
            ));
        }
        if self.imagination.imagination_horizon <= 0 {
            return Err(CausalMetaError::InvalidConfig(
                "imagination_horizon must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::causal::MaskUpdate;
    use crate::world_model::WorldModelKind;
    use tempfile::tempdir;

    #[test]
    fn test_split_names() {
        assert_eq!("train".parse::<Split>().unwrap(), Split::Train);
        assert_eq!("meta_test".parse::<Split>().unwrap(), Split::Test);
        assert!("valid".parse::<Split>().is_err());
        assert_eq!(Split::Test.to_string(), "test");
    }

    #[test]
    fn test_partial_json() {
        let json = r#"{
            "env": {"env_name": "contextual_cartpole", "meta_train_task_num": 4},
            "model": {"kind": "causal", "mask": {"update": {"kind": "reinforce", "period": 3}}},
            "trainer": {"batch_size": 16}
        }"#;
        let config = ExperimentConfig::from_json_str(json).unwrap();
        assert_eq!(config.env.env_name, "contextual_cartpole");
        assert_eq!(config.env.task_num(Split::Train), 4);
        assert_eq!(config.env.task_num(Split::Test), 5);
        assert_eq!(config.model.kind, WorldModelKind::Causal);
        assert_eq!(config.model.mask.update, MaskUpdate::Reinforce { period: 3 });
        assert_eq!(config.trainer.batch_size, 16);
        config.validate().unwrap();
    }

    #[test]
    fn test_default_is_meta() {
        let config = ExperimentConfig::default();
        assert!(config.model.context.meta);
        assert_eq!(config.model.context.max_context_dim, DEFAULT_MAX_CONTEXT_DIM);
        config.validate().unwrap();

        let config = ExperimentConfig::from_json_str(r#"{"trainer": {"batch_size": 8}}"#).unwrap();
        assert!(config.model.context.meta);
        assert_eq!(config.model.context.max_context_dim, DEFAULT_MAX_CONTEXT_DIM);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        assert!(ExperimentConfig::from_json_str(r#"{"launcher": {}}"#).is_err());
        assert!(ExperimentConfig::from_json_str(r#"{"loss": {"lambda_foo": 1.0}}"#).is_err());
    }

    #[test]
    fn test_unknown_function_name() {
        let mut config = ExperimentConfig::default();
        config.env.reward_fn = Some("ones".to_string());
        config.validate().unwrap();
        config.env.termination_fn = Some("cliff".to_string());
        assert!(matches!(
            config.validate(),
            Err(CausalMetaError::UnknownFunction(_))
        ));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = ExperimentConfig::default();
        config.loss.sampling_times = 3;
        config.to_json_file(&path).unwrap();
        let loaded = ExperimentConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded.loss.sampling_times, 3);
        assert!(ExperimentConfig::from_json_file(dir.path().join("missing.json")).is_err());
    }
}
