//! Probabilistic dynamics over (next observation, reward, continue).
//!
//! Provides:
//! - `WorldModel` - context-conditioned dynamics with optional causal gating
//! - `WorldModelConfig` / `WorldModelKind` - `Plain` MLP or per-output `Causal` heads
//! - `LogVarBounds` - soft clamp applied to every predicted log-variance

mod config;
mod model;
mod nets;

pub use config::{LogVarBounds, WorldModelConfig, WorldModelKind};
pub use model::{DynamicsOutput, WorldModel};
pub use nets::{mlp, ParallelMlp};
