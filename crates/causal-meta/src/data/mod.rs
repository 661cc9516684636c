//! Trajectory storage.
//!
//! Provides:
//! - `TrajectoryBatch` - `[B, T, ...]` segments with a validity mask
//! - `split_segments` - cut collected rollouts into fixed-length segments
//! - `ReplayBuffer` - FIFO ring buffer with uniform sampling

mod batch;
mod replay;

pub use batch::{split_segments, TrajectoryBatch};
pub use replay::ReplayBuffer;
