//! Training objectives.
//!
//! Provides:
//! - `WorldModelLoss` - likelihood of observed transitions plus mask and context regularisers
//! - `ImaginationActorLoss` / `ValueLoss` - actor-critic losses on imagined rollouts
//! - `lambda_return` / `discount_weights` - return estimation helpers

mod imagination;
mod model_loss;
mod returns;

pub use imagination::{ImaginationActorLoss, ImaginationConfig, ImaginationOutput, ValueLoss};
pub use model_loss::{ModelLossConfig, ModelLossTerms, WorldModelLoss};
pub use returns::{discount_weights, lambda_return};
