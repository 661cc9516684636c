//! Checkpointing.
//!
//! Provides:
//! - `Checkpointable` trait for components saved into a checkpoint directory
//! - `CheckpointManager` for rotation and resuming
//! - `OracleContextStore` for the ground-truth task contexts of each split

mod manager;
mod oracle;
mod state;

pub use manager::{CheckpointConfig, CheckpointManager};
pub use oracle::OracleContextStore;
pub use state::{CheckpointMetadata, Checkpointable};
