//! State-value network.

use super::{HasVarStore, MlpConfig};
use tch::{nn, nn::Module, Device, Tensor};

/// `V(observation, context) -> [*, 1]`
pub struct ValueNet {
    vs: nn::VarStore,
    net: nn::Sequential,
}

impl ValueNet {
    pub fn new(obs_dim: i64, context_dim: i64, config: &MlpConfig, device: Device) -> Self {
        let vs = nn::VarStore::new(device);
        let net = config.build(&(vs.root() / "value"), obs_dim + context_dim, 1);
        Self { vs, net }
    }

    pub fn forward(&self, obs: &Tensor, context: &Tensor) -> Tensor {
        self.net.forward(&Tensor::cat(&[obs, context], -1))
    }
}

impl HasVarStore for ValueNet {
    fn var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.vs
    }

    fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }
}
