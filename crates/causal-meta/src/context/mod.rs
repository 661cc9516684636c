//! Per-task latent context.
//!
//! Provides:
//! - `ContextModel` - learnable `[task_num, max_context_dim]` context table
//! - `ContextConfig` - its construction parameters

mod model;

pub use model::{ContextConfig, ContextMcc, ContextModel};
