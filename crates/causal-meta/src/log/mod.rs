//! Metric logging.
//!
//! Provides:
//! - `MetricLogger` trait for composable backends
//! - `ConsoleLogger` - metrics as `tracing` events
//! - `MemoryLogger` - keeps every series in memory
//! - `TensorBoardLogger` - event files (feature `tensorboard`)
//! - `CompositeLogger` for multi-backend logging

mod console;
mod logger;
mod memory;
#[cfg(feature = "tensorboard")]
mod tensorboard;

pub use console::ConsoleLogger;
pub use logger::{CompositeLogger, MetricLogger, NoOpLogger};
pub use memory::MemoryLogger;
#[cfg(feature = "tensorboard")]
pub use tensorboard::TensorBoardLogger;
