//! One Adam optimizer per parameter group.

use crate::Result;
use tch::nn::OptimizerConfig;
use tch::{nn, Kind, Tensor};

/// Adam over the trainable variables of a single `VarStore`.
pub struct GroupOptimizer {
    name: &'static str,
    inner: nn::Optimizer,
    variables: Vec<Tensor>,
}

impl GroupOptimizer {
    pub fn new(name: &'static str, vs: &nn::VarStore, lr: f64) -> Result<Self> {
        let inner = nn::Adam::default().build(vs, lr)?;
        Ok(Self {
            name,
            inner,
            variables: vs.trainable_variables(),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn variables(&self) -> &[Tensor] {
        &self.variables
    }

    pub fn zero_grad(&mut self) {
        self.inner.zero_grad();
    }

    pub fn step(&mut self) {
        self.inner.step();
    }

    pub fn set_lr(&mut self, lr: f64) {
        self.inner.set_lr(lr);
    }

    /// Global L2 norm of the current gradients.
    pub fn grad_norm(&self) -> f64 {
        let mut total = 0.0f64;
        for var in &self.variables {
            let grad = var.grad();
            if grad.defined() {
                total += grad
                    .pow_tensor_scalar(2.0)
                    .sum(Kind::Float)
                    .double_value(&[]);
            }
        }
        total.sqrt()
    }

    /// Rescale gradients to a global norm of at most `max_norm`.
    ///
    /// Returns the norm before clipping.
    pub fn clip_grad_norm(&mut self, max_norm: f64) -> f64 {
        let norm = self.grad_norm();
        if norm > max_norm {
            let clip_coef = max_norm / (norm + 1e-6);
            for var in &self.variables {
                let mut grad = var.grad();
                if grad.defined() {
                    let _ = grad.f_mul_scalar_(clip_coef);
                }
            }
        }
        norm
    }

    /// Clip, step and zero the gradients. Returns the pre-clip norm.
    pub fn clip_and_step(&mut self, max_norm: f64) -> f64 {
        let norm = self.clip_grad_norm(max_norm);
        self.step();
        self.zero_grad();
        norm
    }
}

impl std::fmt::Debug for GroupOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupOptimizer")
            .field("name", &self.name)
            .field("variables", &self.variables.len())
            .finish()
    }
}
