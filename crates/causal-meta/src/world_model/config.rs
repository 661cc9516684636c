use crate::causal::{CausalMaskConfig, MaskUpdate};
use crate::context::ContextConfig;
use crate::{CausalMetaError, Result};
use serde::{Deserialize, Serialize};
use tch::Tensor;

/// Dynamics network variant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorldModelKind {
    /// Single MLP over the concatenated input
    Plain,
    /// One small MLP per output dimension on the mask-gated input
    #[default]
    Causal,
}

/// Bounds applied to every predicted log-variance.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogVarBounds {
    pub min: f64,
    pub max: f64,
}

impl Default for LogVarBounds {
    fn default() -> Self {
        Self {
            min: -10.0,
            max: 0.5,
        }
    }
}

impl LogVarBounds {
    /// Two-sided softplus squash into `[min, max]`.
    ///
    /// `min + softplus(max - min)` lies slightly above `max`, so a hard clamp
    /// finishes the job.
    pub fn clamp(&self, log_var: &Tensor) -> Tensor {
        let upper = (self.max - log_var).softplus().neg() + self.max;
        let lower = (upper - self.min).softplus() + self.min;
        lower.clamp(self.min, self.max)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorldModelConfig {
    pub kind: WorldModelKind,
    pub obs_dim: i64,
    pub action_dim: i64,
    /// Hidden widths of the MLP (per output head for `Causal`)
    pub hidden_dims: Vec<i64>,
    /// Predict `next_obs - obs` instead of `next_obs`
    pub residual: bool,
    /// Learn observation and reward variances; zero log-variance otherwise
    pub learn_obs_var: bool,
    pub log_var_bounds: LogVarBounds,
    pub context: ContextConfig,
    pub mask: CausalMaskConfig,
}

impl Default for WorldModelConfig {
    fn default() -> Self {
        Self {
            kind: WorldModelKind::Causal,
            obs_dim: 0,
            action_dim: 0,
            hidden_dims: vec![256, 256],
            residual: true,
            learn_obs_var: true,
            log_var_bounds: LogVarBounds::default(),
            context: ContextConfig::default(),
            mask: CausalMaskConfig::default(),
        }
    }
}

impl WorldModelConfig {
    pub fn new(obs_dim: i64, action_dim: i64) -> Self {
        Self {
            obs_dim,
            action_dim,
            ..Default::default()
        }
    }

    /// Enable meta mode with a `[task_num, max_context_dim]` context table.
    pub fn meta(mut self, max_context_dim: i64, task_num: i64) -> Self {
        self.context = ContextConfig {
            meta: true,
            max_context_dim,
            task_num,
            ..self.context
        };
        self
    }

    pub fn kind(mut self, kind: WorldModelKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn hidden_dims(mut self, hidden_dims: Vec<i64>) -> Self {
        self.hidden_dims = hidden_dims;
        self
    }

    pub fn residual(mut self, residual: bool) -> Self {
        self.residual = residual;
        self
    }

    pub fn learn_obs_var(mut self, learn_obs_var: bool) -> Self {
        self.learn_obs_var = learn_obs_var;
        self
    }

    pub fn mask_update(mut self, update: MaskUpdate) -> Self {
        self.mask.update = update;
        self
    }

    pub fn variational_context(mut self, variational: bool) -> Self {
        self.context.variational = variational;
        self
    }

    /// Number of output heads: next observation dims, reward and continue.
    pub fn output_dim(&self) -> i64 {
        self.obs_dim + 2
    }

    pub fn validate(&self) -> Result<()> {
        if self.obs_dim <= 0 || self.action_dim <= 0 {
            return Err(CausalMetaError::InvalidConfig(format!(
                "obs_dim and action_dim must be positive, got {} and {}",
                self.obs_dim, self.action_dim
            )));
        }
        if self.hidden_dims.iter().any(|&h| h <= 0) {
            return Err(CausalMetaError::InvalidConfig(format!(
                "hidden_dims must be positive, got {:?}",
                self.hidden_dims
            )));
        }
        if !(self.log_var_bounds.min < self.log_var_bounds.max) {
            return Err(CausalMetaError::InvalidConfig(format!(
                "log_var_bounds must satisfy min < max, got {:?}",
                self.log_var_bounds
            )));
        }
        if self.context.meta && self.context.max_context_dim <= 0 {
            return Err(CausalMetaError::InvalidConfig(
                "meta mode needs max_context_dim > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tch::{Device, Kind};

    proptest! {
        #[test]
        fn prop_log_var_stays_in_bounds(
            values in prop::collection::vec(-1e6f32..1e6f32, 1..64),
            min in -20.0f64..-1.0,
            width in 0.5f64..10.0,
        ) {
            let bounds = LogVarBounds { min, max: min + width };
            let clamped = bounds.clamp(&Tensor::from_slice(&values));
            let lo = clamped.min().double_value(&[]);
            let hi = clamped.max().double_value(&[]);
            prop_assert!(lo >= bounds.min - 1e-5, "{} < {}", lo, bounds.min);
            prop_assert!(hi <= bounds.max + 1e-5, "{} > {}", hi, bounds.max);
        }
    }

    #[test]
    fn test_extreme_log_vars() {
        let bounds = LogVarBounds::default();
        let x = Tensor::from_slice(&[-1e6f32, -10.0, 0.0, 0.5, 1e6]);
        let y = bounds.clamp(&x);
        let values = Vec::<f32>::try_from(&y).unwrap();
        assert!(values.iter().all(|&v| (-10.0..=0.5).contains(&v)));
        assert!((values[0] + 10.0).abs() < 1e-4);
        assert!((values[4] - 0.5).abs() < 1e-4);
        // interior values are only mildly squashed
        assert!(values[2] < 0.0 && values[2] > -1.0);
        assert_eq!(y.kind(), Kind::Float);
        assert_eq!(y.device(), Device::Cpu);
    }

    #[test]
    fn test_meta_builder() {
        let config = WorldModelConfig::new(4, 2).meta(10, 100);
        assert!(config.context.meta);
        assert_eq!(config.context.max_context_dim, 10);
        assert_eq!(config.context.task_num, 100);
        assert_eq!(config.output_dim(), 6);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_bounds() {
        let mut config = WorldModelConfig::new(4, 2);
        config.log_var_bounds = LogVarBounds { min: 1.0, max: 1.0 };
        assert!(config.validate().is_err());
        assert!(WorldModelConfig::new(0, 2).validate().is_err());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let json = r#"{"obs_dim": 4, "action_dim": 2, "depth": 3}"#;
        assert!(serde_json::from_str::<WorldModelConfig>(json).is_err());

        let json = r#"{"obs_dim": 4, "action_dim": 2, "kind": "plain"}"#;
        let config: WorldModelConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.kind, WorldModelKind::Plain);
        assert_eq!(config.hidden_dims, vec![256, 256]);
    }
}
