//! Task-vectorised environment backends.
//!
//! Provides different backends for stepping one environment per task:
//! - `Serial` - Sequential execution for debugging
//! - `Parallel` - Parallel execution using rayon

mod parallel;
mod serial;
mod vecenv;

pub use parallel::Parallel;
pub use serial::Serial;
pub use vecenv::{TaskVecEnv, VecStep};
