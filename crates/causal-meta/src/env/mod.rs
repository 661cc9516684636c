//! Environment traits and wrappers.
//!
//! Provides the `MetaEnv` trait every task environment implements, the
//! `EpisodeStats` wrapper and the named reward/termination function table.

pub mod fns;
mod traits;
mod wrappers;

pub use fns::{reward_fn, termination_fn, ExternalFns, RewardFn, TerminationFn};
pub use traits::{EnvInfo, MetaEnv, StepResult};
pub use wrappers::EpisodeStats;
