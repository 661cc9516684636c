//! Causal Dreamer training.
//!
//! Provides:
//! - `Collector` - lockstep rollouts over one environment per task
//! - `GroupOptimizer` - Adam over one parameter group with gradient clipping
//! - `CausalDreamerTrainer` - collection, world-model, mask and actor/value updates

mod collector;
mod config;
mod optimizer;
mod trainer;

pub use collector::{Collector, RolloutStats};
pub use config::TrainerConfig;
pub use optimizer::GroupOptimizer;
pub use trainer::{make_causal_dreamer, CausalDreamerTrainer, TrainingSummary};
