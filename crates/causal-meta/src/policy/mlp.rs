//! Multi-layer perceptron building block for the actor and value networks.

use serde::{Deserialize, Serialize};
use tch::nn;

/// Configuration for an MLP trunk
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MlpConfig {
    /// Hidden layer size
    pub hidden_size: i64,
    /// Number of hidden layers
    pub num_layers: usize,
    pub activation: Activation,
}

#[derive(Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    ReLU,
    Tanh,
    Elu,
    Silu,
}

impl Default for MlpConfig {
    fn default() -> Self {
        Self {
            hidden_size: 400,
            num_layers: 3,
            activation: Activation::Elu,
        }
    }
}

impl MlpConfig {
    pub fn new(hidden_size: i64, num_layers: usize) -> Self {
        Self {
            hidden_size,
            num_layers,
            ..Default::default()
        }
    }

    /// `num_layers` hidden layers followed by a linear `out_dim` head
    pub fn build(&self, p: &nn::Path, in_dim: i64, out_dim: i64) -> nn::Sequential {
        let mut seq = nn::seq();
        let mut in_size = in_dim;

        for i in 0..self.num_layers {
            seq = seq.add(nn::linear(
                p / format!("l{}", i),
                in_size,
                self.hidden_size,
                Default::default(),
            ));
            seq = match self.activation {
                Activation::ReLU => seq.add_fn(|x| x.relu()),
                Activation::Tanh => seq.add_fn(|x| x.tanh()),
                Activation::Elu => seq.add_fn(|x| x.elu()),
                Activation::Silu => seq.add_fn(|x| x.silu()),
            };
            in_size = self.hidden_size;
        }

        seq.add(nn::linear(p / "out", in_size, out_dim, Default::default()))
    }
}
