//! Actor and value networks.
//!
//! Provides:
//! - `Actor` - tanh-Gaussian policy over (observation, context)
//! - `ValueNet` - state-value estimate used for lambda returns
//! - `AdditiveGaussian` - exploration noise for collection

mod actor;
mod exploration;
mod mlp;
mod value;

pub use actor::{Actor, ActorConfig};
pub use exploration::AdditiveGaussian;
pub use mlp::{Activation, MlpConfig};
pub use value::ValueNet;

use tch::nn;

/// Components that own their parameters in a `VarStore`
pub trait HasVarStore {
    fn var_store_mut(&mut self) -> &mut nn::VarStore;

    fn var_store(&self) -> &nn::VarStore;

    fn num_parameters(&self) -> i64 {
        self.var_store()
            .variables()
            .values()
            .map(|v| v.numel() as i64)
            .sum()
    }
}
