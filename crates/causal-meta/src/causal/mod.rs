//! Learnable causal structure between dynamics inputs and outputs.
//!
//! Provides:
//! - `CausalMask` - per-edge logits with soft, sampled and hard views
//! - `MaskUpdate` - how the logits are optimised (gradient or reinforce)
//! - `reinforce_gradient` - score-function estimate for the logits

mod mask;

pub use mask::{reinforce_gradient, CausalMask, CausalMaskConfig, MaskDiagnostics, MaskMode, MaskUpdate};
