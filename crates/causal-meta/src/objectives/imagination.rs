//! Actor and value losses on trajectories imagined by the world model.

use super::returns::{discount_weights, lambda_return};
use crate::data::TrajectoryBatch;
use crate::env::ExternalFns;
use crate::policy::{Actor, HasVarStore, ValueNet};
use crate::world_model::WorldModel;
use crate::{CausalMetaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tch::{Kind, Tensor};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImaginationConfig {
    pub imagination_horizon: i64,
    pub gamma: f64,
    pub lmbda: f64,
    /// Weight each step by its accumulated discount
    pub discount_loss: bool,
    /// Use the continue head; otherwise every imagined step continues
    pub pred_continue: bool,
    /// Feed back the predicted mean instead of a sample
    pub use_model_mean: bool,
}

impl Default for ImaginationConfig {
    fn default() -> Self {
        Self {
            imagination_horizon: 15,
            gamma: 0.99,
            lmbda: 0.95,
            discount_loss: true,
            pred_continue: true,
            use_model_mean: true,
        }
    }
}

/// Result of one imagined rollout.
///
/// Everything but `actor_loss` is detached and time-major `[H, N, ...]`.
#[derive(Debug)]
pub struct ImaginationOutput {
    pub actor_loss: Tensor,
    pub lambda_target: Tensor,
    pub weights: Tensor,
    pub states: Tensor,
    pub context: Tensor,
    pub reward: Tensor,
    pub cont: Tensor,
}

impl ImaginationOutput {
    pub fn metrics(&self) -> HashMap<String, f64> {
        let mut metrics = HashMap::new();
        metrics.insert("actor/loss".to_string(), self.actor_loss.double_value(&[]));
        metrics.insert(
            "actor/lambda_return".to_string(),
            self.lambda_target.mean(Kind::Float).double_value(&[]),
        );
        metrics.insert(
            "actor/imagined_reward".to_string(),
            self.reward.mean(Kind::Float).double_value(&[]),
        );
        metrics.insert(
            "actor/imagined_continue".to_string(),
            self.cont.mean(Kind::Float).double_value(&[]),
        );
        metrics
    }

    /// Number of imagined start states.
    pub fn num_starts(&self) -> i64 {
        self.states.size().get(1).copied().unwrap_or(0)
    }
}

/// Rolls the actor through the world model from every real state of a batch.
#[derive(Debug)]
pub struct ImaginationActorLoss {
    config: ImaginationConfig,
    fns: ExternalFns,
}

impl ImaginationActorLoss {
    pub fn new(config: ImaginationConfig, fns: ExternalFns) -> Self {
        Self { config, fns }
    }

    pub fn config(&self) -> &ImaginationConfig {
        &self.config
    }

    /// Imagine, then score the actor by `-mean(w_t G_t)`.
    ///
    /// The world model and value net are frozen for the duration so the
    /// actor loss only reaches the actor's parameters.
    pub fn compute(
        &self,
        model: &mut WorldModel,
        actor: &Actor,
        value: &mut ValueNet,
        batch: &TrajectoryBatch,
    ) -> Result<ImaginationOutput> {
        model.freeze();
        value.var_store_mut().freeze();
        let output = self.imagine(model, actor, value, batch);
        model.unfreeze();
        value.var_store_mut().unfreeze();
        output
    }

    fn imagine(
        &self,
        model: &WorldModel,
        actor: &Actor,
        value: &ValueNet,
        batch: &TrajectoryBatch,
    ) -> Result<ImaginationOutput> {
        let (start, idx) = start_states(batch)?;
        let n = start.size()[0];
        let context = if model.context().is_meta() {
            model.context().forward(Some(&idx))?.detach()
        } else {
            Tensor::zeros([n, 0], (Kind::Float, start.device()))
        };

        let horizon = self.config.imagination_horizon;
        let mut states = Vec::with_capacity(horizon as usize + 1);
        let mut rewards = Vec::with_capacity(horizon as usize);
        let mut conts = Vec::with_capacity(horizon as usize);
        let mut state = start;
        states.push(state.shallow_clone());
        for _ in 0..horizon {
            let action = actor.rsample(&state, &context);
            let out = model.forward(&state, &action, Some(&idx))?;
            let next = if self.config.use_model_mean {
                out.next_obs_mean.shallow_clone()
            } else {
                out.sample_next()
            };
            let reward = match self.fns.reward {
                Some(f) => f(&state, &action, &next),
                None => out.reward_mean.shallow_clone(),
            };
            let cont = match self.fns.termination {
                Some(f) => 1.0 - f(&state, &action, &next),
                None if self.config.pred_continue => out.continue_logit.sigmoid(),
                None => reward.ones_like(),
            };
            rewards.push(reward);
            conts.push(cont.detach());
            states.push(next.shallow_clone());
            state = next;
        }

        let states = Tensor::stack(&states, 0);
        let reward = Tensor::stack(&rewards, 0);
        let cont = Tensor::stack(&conts, 0);
        let context = context.unsqueeze(0).expand([horizon + 1, -1, -1], false);

        let values = value.forward(&states, &context);
        let next_value = values.narrow(0, 1, horizon);
        let target = lambda_return(
            &reward,
            &next_value,
            &cont,
            self.config.gamma,
            self.config.lmbda,
        )?;
        let weights = if self.config.discount_loss {
            discount_weights(&cont, self.config.gamma)
        } else {
            cont.ones_like()
        };

        let actor_loss = -(&weights * &target).mean(Kind::Float);
        let loss = actor_loss.double_value(&[]);
        if !loss.is_finite() {
            return Err(CausalMetaError::NonFiniteLoss {
                name: "actor/loss".to_string(),
                value: loss,
            });
        }

        Ok(ImaginationOutput {
            actor_loss,
            lambda_target: target.detach(),
            weights,
            states: states.narrow(0, 0, horizon).detach(),
            context: context.narrow(0, 0, horizon).detach(),
            reward: reward.detach(),
            cont,
        })
    }
}

/// Flattened observations and task indices of every unpadded step.
fn start_states(batch: &TrajectoryBatch) -> Result<(Tensor, Tensor)> {
    let obs_dim = batch.observation.size().last().copied().unwrap_or(0);
    let valid = batch
        .mask
        .reshape([-1])
        .gt(0.0)
        .nonzero()
        .squeeze_dim(1)
        .to_device(batch.device());
    if valid.size()[0] == 0 {
        return Err(CausalMetaError::ShapeMismatch {
            expected: vec![1],
            actual: vec![0],
        });
    }
    let obs = batch
        .observation
        .reshape([-1, obs_dim])
        .index_select(0, &valid)
        .detach();
    let idx = batch.task_idx.reshape([-1, 1]).index_select(0, &valid);
    Ok((obs, idx))
}

/// `0.5 * mean(w_t (V(s_t) - G_t)^2)` on detached imagined states.
#[derive(Clone, Copy, Debug, Default)]
pub struct ValueLoss;

impl ValueLoss {
    pub fn compute(&self, value: &ValueNet, imagined: &ImaginationOutput) -> Result<Tensor> {
        let prediction = value.forward(&imagined.states, &imagined.context);
        let loss = (&imagined.weights * (prediction - &imagined.lambda_target).pow_tensor_scalar(2))
            .mean(Kind::Float)
            * 0.5;
        let v = loss.double_value(&[]);
        if !v.is_finite() {
            return Err(CausalMetaError::NonFiniteLoss {
                name: "value/loss".to_string(),
                value: v,
            });
        }
        Ok(loss)
    }
}
