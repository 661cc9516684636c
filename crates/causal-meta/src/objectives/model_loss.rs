//! World-model loss and the score-function mask update.

use crate::causal::reinforce_gradient;
use crate::data::TrajectoryBatch;
use crate::env::ExternalFns;
use crate::world_model::{DynamicsOutput, WorldModel};
use crate::{CausalMetaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tch::{Kind, Tensor};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelLossConfig {
    pub lambda_kl: f64,
    pub lambda_reco: f64,
    pub lambda_reward: f64,
    pub lambda_continue: f64,
    /// Weight of `sum(sigmoid(mask_logits))`
    pub sparse_weight: f64,
    /// Weight of `mean(|context|)`
    pub context_sparse_weight: f64,
    /// Weight of `max(|context|)`
    pub context_max_weight: f64,
    /// Stochastic passes averaged per step (sampled mask, variational
    /// context) and masks drawn per reinforce estimate
    pub sampling_times: usize,
}

impl Default for ModelLossConfig {
    fn default() -> Self {
        Self {
            lambda_kl: 1.0,
            lambda_reco: 1.0,
            lambda_reward: 1.0,
            lambda_continue: 1.0,
            sparse_weight: 0.02,
            context_sparse_weight: 0.01,
            context_max_weight: 0.01,
            sampling_times: 8,
        }
    }
}

/// Individual loss components (scalar tensors) and their weighted sum.
#[derive(Debug)]
pub struct ModelLossTerms {
    pub total: Tensor,
    pub kl: Tensor,
    pub reco: Tensor,
    pub reward: Tensor,
    pub continuation: Tensor,
    pub mask_sparsity: Tensor,
    pub context_mean: Tensor,
    pub context_max: Tensor,
    /// Fraction of valid steps predicted to continue
    pub mean_continue: f64,
}

impl ModelLossTerms {
    pub fn metrics(&self) -> HashMap<String, f64> {
        let mut metrics = HashMap::new();
        for (name, value) in [
            ("world_model/total_loss", &self.total),
            ("world_model/kl_loss", &self.kl),
            ("world_model/reco_loss", &self.reco),
            ("world_model/reward_loss", &self.reward),
            ("world_model/continue_loss", &self.continuation),
            ("world_model/mask_sparsity", &self.mask_sparsity),
            ("world_model/context_mean", &self.context_mean),
            ("world_model/context_max", &self.context_max),
        ] {
            metrics.insert(name.to_string(), value.double_value(&[]));
        }
        metrics.insert("world_model/mean_continue".to_string(), self.mean_continue);
        metrics
    }
}

/// Negative log-likelihood of (next observation, reward, continue) plus
/// regularisers on the mask and context.
#[derive(Debug)]
pub struct WorldModelLoss {
    config: ModelLossConfig,
    lambda_reward: f64,
    lambda_continue: f64,
}

impl WorldModelLoss {
    /// External reward / termination functions switch the matching head off.
    pub fn new(config: ModelLossConfig, fns: &ExternalFns) -> Self {
        let lambda_reward = if fns.reward.is_some() {
            0.0
        } else {
            config.lambda_reward
        };
        let lambda_continue = if fns.termination.is_some() {
            0.0
        } else {
            config.lambda_continue
        };
        Self {
            config,
            lambda_reward,
            lambda_continue,
        }
    }

    pub fn config(&self) -> &ModelLossConfig {
        &self.config
    }

    pub fn lambda_reward(&self) -> f64 {
        self.lambda_reward
    }

    pub fn lambda_continue(&self) -> f64 {
        self.lambda_continue
    }

    pub fn compute(&self, model: &WorldModel, batch: &TrajectoryBatch) -> Result<ModelLossTerms> {
        let idx = Some(&batch.task_idx);
        let valid = &batch.mask;
        let stochastic = model.is_stochastic();
        let passes = if stochastic {
            self.config.sampling_times.max(1)
        } else {
            1
        };

        let mut reco = Vec::with_capacity(passes);
        let mut reward = Vec::with_capacity(passes);
        let mut continuation = Vec::with_capacity(passes);
        let mut last = None;
        for _ in 0..passes {
            let out = if stochastic {
                let mask = model.mask().map(|m| m.mask(m.training_mode()));
                model.forward_sampled(&batch.observation, &batch.action, idx, mask.as_ref())?
            } else {
                model.forward(&batch.observation, &batch.action, idx)?
            };
            let terms = elementwise_terms(&out, batch);
            reco.push(masked_mean(&terms.reco, valid));
            reward.push(masked_mean(&terms.reward, valid));
            continuation.push(masked_mean(&terms.continuation, valid));
            last = Some(out);
        }
        let reco = Tensor::stack(&reco, 0).mean(Kind::Float);
        let reward = Tensor::stack(&reward, 0).mean(Kind::Float);
        let continuation = Tensor::stack(&continuation, 0).mean(Kind::Float);

        let mean_continue = match &last {
            Some(out) => tch::no_grad(|| {
                masked_mean(&out.continue_logit.gt(0.0).to_kind(Kind::Float), valid)
                    .double_value(&[])
            }),
            None => 0.0,
        };

        let zero = || Tensor::zeros([], (Kind::Float, batch.device()));
        let kl = match model.context().kl(idx)? {
            Some(kl) => masked_mean(&kl.unsqueeze(-1), valid),
            None => zero(),
        };
        let mask_sparsity = model.mask().map(|m| m.sparsity()).unwrap_or_else(zero);
        let (context_mean, context_max) = model
            .context()
            .usage()
            .unwrap_or_else(|| (zero(), zero()));

        let c = &self.config;
        let total = &kl * c.lambda_kl
            + &reco * c.lambda_reco
            + &reward * self.lambda_reward
            + &continuation * self.lambda_continue
            + &mask_sparsity * c.sparse_weight
            + &context_mean * c.context_sparse_weight
            + &context_max * c.context_max_weight;

        let value = total.double_value(&[]);
        if !value.is_finite() {
            return Err(CausalMetaError::NonFiniteLoss {
                name: "world_model/total_loss".to_string(),
                value,
            });
        }

        Ok(ModelLossTerms {
            total,
            kl,
            reco,
            reward,
            continuation,
            mask_sparsity,
            context_mean,
            context_max,
            mean_continue,
        })
    }

    /// Score-function gradient for the mask logits, shaped like the logits.
    ///
    /// Draws `sampling_times` masks, scores each by its per-output prediction
    /// loss and feeds them to [`reinforce_gradient`].
    pub fn reinforce(&self, model: &WorldModel, batch: &TrajectoryBatch) -> Result<Tensor> {
        let causal = model.mask().ok_or_else(|| {
            CausalMetaError::InvalidConfig("reinforce needs a causal world model".to_string())
        })?;
        let probs = causal.soft().detach();
        let samples = self.config.sampling_times.max(2);

        let mut masks = Vec::with_capacity(samples);
        let mut losses = Vec::with_capacity(samples);
        tch::no_grad(|| -> Result<()> {
            for _ in 0..samples {
                let mask = causal.sample();
                let out = model.forward_with_mask(
                    &batch.observation,
                    &batch.action,
                    Some(&batch.task_idx),
                    Some(&mask),
                )?;
                losses.push(per_output_loss(&out, batch));
                masks.push(mask);
            }
            Ok(())
        })?;

        reinforce_gradient(
            &Tensor::stack(&masks, 0),
            &Tensor::stack(&losses, 0),
            &probs,
            self.config.sparse_weight,
        )
    }
}

struct ElementwiseTerms {
    reco: Tensor,
    reward: Tensor,
    continuation: Tensor,
}

fn gaussian_nll(target: &Tensor, mean: &Tensor, log_var: &Tensor) -> Tensor {
    ((target - mean).pow_tensor_scalar(2) * (-log_var).exp() + log_var) * 0.5
}

fn bce_with_logits(logit: &Tensor, target: &Tensor) -> Tensor {
    logit.softplus() - logit * target
}

fn elementwise_terms(out: &DynamicsOutput, batch: &TrajectoryBatch) -> ElementwiseTerms {
    let continue_target = 1.0 - &batch.terminated;
    ElementwiseTerms {
        reco: gaussian_nll(&batch.next_observation, &out.next_obs_mean, &out.next_obs_log_var),
        reward: gaussian_nll(&batch.reward, &out.reward_mean, &out.reward_log_var),
        continuation: bce_with_logits(&out.continue_logit, &continue_target),
    }
}

/// `[obs_dim + 2]` loss per output head, in mask row order.
fn per_output_loss(out: &DynamicsOutput, batch: &TrajectoryBatch) -> Tensor {
    let terms = elementwise_terms(out, batch);
    let valid = &batch.mask;
    Tensor::cat(
        &[
            masked_mean_per_dim(&terms.reco, valid),
            masked_mean_per_dim(&terms.reward, valid),
            masked_mean_per_dim(&terms.continuation, valid),
        ],
        0,
    )
}

/// Sum over the feature dim, mean over valid `[B, T]` steps.
fn masked_mean(x: &Tensor, valid: &Tensor) -> Tensor {
    let per_step = x.sum_dim_intlist(Some(&[-1i64][..]), true, Kind::Float);
    (per_step * valid).sum(Kind::Float) / valid.sum(Kind::Float).clamp_min(1.0)
}

fn masked_mean_per_dim(x: &Tensor, valid: &Tensor) -> Tensor {
    (x * valid).sum_dim_intlist(Some(&[0i64, 1][..]), false, Kind::Float)
        / valid.sum(Kind::Float).clamp_min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::causal::MaskUpdate;
    use crate::data::batch::tests::rollout;
    use crate::world_model::{WorldModelConfig, WorldModelKind};
    use tch::Device;

    fn model(kind: WorldModelKind) -> WorldModel {
        let config = WorldModelConfig::new(4, 2)
            .kind(kind)
            .hidden_dims(vec![16])
            .meta(3, 2);
        WorldModel::new(config, Device::Cpu).unwrap()
    }

    fn batch() -> TrajectoryBatch {
        let mut batch = rollout(2, 6, 4, 2);
        batch.reward = batch.reward / 12.0;
        batch
    }

    #[test]
    fn test_terms_are_finite_and_sum() {
        let model = model(WorldModelKind::Causal);
        let loss = WorldModelLoss::new(ModelLossConfig::default(), &ExternalFns::default());
        let terms = loss.compute(&model, &batch()).unwrap();

        let c = loss.config();
        let expected = terms.kl.double_value(&[]) * c.lambda_kl
            + terms.reco.double_value(&[]) * c.lambda_reco
            + terms.reward.double_value(&[]) * c.lambda_reward
            + terms.continuation.double_value(&[]) * c.lambda_continue
            + terms.mask_sparsity.double_value(&[]) * c.sparse_weight
            + terms.context_mean.double_value(&[]) * c.context_sparse_weight
            + terms.context_max.double_value(&[]) * c.context_max_weight;
        assert!((terms.total.double_value(&[]) - expected).abs() < 1e-3);
        assert_eq!(terms.kl.double_value(&[]), 0.0);
        assert!(terms.metrics().values().all(|v| v.is_finite()));
        assert!(terms.metrics().contains_key("world_model/mean_continue"));
    }

    #[test]
    fn test_external_fns_disable_heads() {
        let fns = ExternalFns::from_names(Some("ones"), Some("no_termination")).unwrap();
        let loss = WorldModelLoss::new(ModelLossConfig::default(), &fns);
        assert_eq!(loss.lambda_reward(), 0.0);
        assert_eq!(loss.lambda_continue(), 0.0);
    }

    #[test]
    fn test_padding_is_ignored() {
        let model = model(WorldModelKind::Plain);
        let loss = WorldModelLoss::new(ModelLossConfig::default(), &ExternalFns::default());
        let clean = batch();
        let mut padded = clean.shallow_clone();

        let step_mask = Tensor::ones([2, 6, 1], (Kind::Float, Device::Cpu));
        let _ = step_mask.narrow(1, 4, 2).fill_(0.0);
        padded.mask = step_mask.shallow_clone();
        padded.next_observation = &clean.next_observation * &step_mask + (1.0 - &step_mask) * 1e3;

        let mut truncated = clean.shallow_clone();
        truncated.mask = step_mask;

        let a = loss.compute(&model, &padded).unwrap();
        let b = loss.compute(&model, &truncated).unwrap();
        assert!((a.reco.double_value(&[]) - b.reco.double_value(&[])).abs() < 1e-4);
    }

    #[test]
    fn test_non_finite_is_an_error() {
        let model = model(WorldModelKind::Plain);
        let loss = WorldModelLoss::new(ModelLossConfig::default(), &ExternalFns::default());
        let mut bad = batch();
        bad.next_observation = bad.next_observation * f64::NAN;
        assert!(matches!(
            loss.compute(&model, &bad),
            Err(CausalMetaError::NonFiniteLoss { .. })
        ));
    }

    #[test]
    fn test_variational_context_adds_kl() {
        let config = WorldModelConfig::new(4, 2)
            .hidden_dims(vec![16])
            .meta(3, 2)
            .variational_context(true);
        let model = WorldModel::new(config, Device::Cpu).unwrap();
        let loss = WorldModelLoss::new(
            ModelLossConfig {
                sampling_times: 2,
                ..Default::default()
            },
            &ExternalFns::default(),
        );
        let terms = loss.compute(&model, &batch()).unwrap();
        assert!(terms.kl.double_value(&[]) > 0.0);
    }

    #[test]
    fn test_reinforce_gradient_shape() {
        let config = WorldModelConfig::new(4, 2)
            .hidden_dims(vec![16])
            .meta(3, 2)
            .mask_update(MaskUpdate::Reinforce { period: 2 });
        let model = WorldModel::new(config, Device::Cpu).unwrap();
        let loss = WorldModelLoss::new(
            ModelLossConfig {
                sampling_times: 4,
                ..Default::default()
            },
            &ExternalFns::default(),
        );
        let grad = loss.reinforce(&model, &batch()).unwrap();
        assert_eq!(grad.size(), vec![6, 9]);
        assert!(!grad.requires_grad());
        assert!(grad.sum(Kind::Float).double_value(&[]).is_finite());

        let plain = self::model(WorldModelKind::Plain);
        assert!(loss.reinforce(&plain, &batch()).is_err());
    }
}
