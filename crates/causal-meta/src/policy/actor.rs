//! Tanh-Gaussian actor.

use super::{HasVarStore, MlpConfig};
use crate::Result;
use serde::{Deserialize, Serialize};
use tch::{nn, nn::Module, Device, Kind, Tensor};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ActorConfig {
    pub mlp: MlpConfig,
    /// Lower bound on the pre-tanh std
    pub min_std: f64,
    /// Softplus offset so the initial std is about `init_std`
    pub init_std: f64,
    /// Pre-tanh mean is squashed into `[-mean_scale, mean_scale]`
    pub mean_scale: f64,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            mlp: MlpConfig::default(),
            min_std: 1e-4,
            init_std: 5.0,
            mean_scale: 5.0,
        }
    }
}

/// Maps (observation, context) to a tanh-squashed Gaussian over `[-1, 1]^A`.
pub struct Actor {
    vs: nn::VarStore,
    net: nn::Sequential,
    config: ActorConfig,
    raw_init_std: f64,
    action_dim: i64,
}

impl Actor {
    pub fn new(
        obs_dim: i64,
        context_dim: i64,
        action_dim: i64,
        config: ActorConfig,
        device: Device,
    ) -> Self {
        let vs = nn::VarStore::new(device);
        let net = config
            .mlp
            .build(&(vs.root() / "actor"), obs_dim + context_dim, 2 * action_dim);
        // inverse softplus
        let raw_init_std = config.init_std.exp_m1().ln();
        Self {
            vs,
            net,
            config,
            raw_init_std,
            action_dim,
        }
    }

    /// Pre-tanh Gaussian `(mean, std)`; `context` may be zero-length.
    pub fn dist_params(&self, obs: &Tensor, context: &Tensor) -> (Tensor, Tensor) {
        let input = Tensor::cat(&[obs, context], -1);
        let out = self.net.forward(&input);
        let parts = out.chunk(2, -1);
        let scale = self.config.mean_scale;
        let mean = (&parts[0] / scale).tanh() * scale;
        let std = (&parts[1] + self.raw_init_std).softplus() + self.config.min_std;
        (mean, std)
    }

    /// Reparameterised sample, differentiable w.r.t. the actor parameters.
    pub fn rsample(&self, obs: &Tensor, context: &Tensor) -> Tensor {
        let (mean, std) = self.dist_params(obs, context);
        (&mean + Tensor::randn_like(&mean) * std).tanh()
    }

    /// Deterministic action `tanh(mean)`.
    pub fn mode(&self, obs: &Tensor, context: &Tensor) -> Tensor {
        self.dist_params(obs, context).0.tanh()
    }

    /// Sample without building a graph, on the host as `f32`.
    pub fn act(&self, obs: &Tensor, context: &Tensor) -> Result<Vec<f32>> {
        let action = tch::no_grad(|| self.rsample(obs, context));
        let flat = action.to_device(Device::Cpu).to_kind(Kind::Float).reshape([-1]);
        Ok(Vec::<f32>::try_from(&flat)?)
    }

    pub fn action_dim(&self) -> i64 {
        self.action_dim
    }
}

impl HasVarStore for Actor {
    fn var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.vs
    }

    fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }
}
