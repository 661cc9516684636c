//! Learnable per-task context table.

use crate::stats::{
    mean_corr_coef_with, mutual_info_estimation, CorrelationMethod, MutualInfo, Permutation,
    Reduction,
};
use crate::utils::tensor_to_array2;
use crate::{CausalMetaError, Result};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use tch::{nn, Device, Kind, Tensor};

/// Configuration for the context model
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContextConfig {
    /// Whether tasks carry a learned context (meta-RL)
    pub meta: bool,
    /// Width of each task's context vector
    pub max_context_dim: i64,
    /// Number of tasks (rows of the table)
    pub task_num: i64,
    /// Std of the Gaussian used to (re)initialise the table
    pub init_scale: f64,
    /// Keep a log-variance table and sample contexts with the reparameterisation trick
    pub variational: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            meta: false,
            max_context_dim: 0,
            task_num: 0,
            init_scale: 0.1,
            variational: false,
        }
    }
}

impl ContextConfig {
    /// Meta-mode config with `task_num` contexts of width `max_context_dim`
    pub fn meta(max_context_dim: i64, task_num: i64) -> Self {
        Self {
            meta: true,
            max_context_dim,
            task_num,
            ..Default::default()
        }
    }

    pub fn with_init_scale(mut self, init_scale: f64) -> Self {
        self.init_scale = init_scale;
        self
    }

    pub fn variational(mut self, variational: bool) -> Self {
        self.variational = variational;
        self
    }
}

/// Output of [`ContextModel::get_mcc`].
#[derive(Clone, Debug)]
pub struct ContextMcc {
    pub score: f64,
    pub permutation: Permutation,
    /// Learned table (restricted to the requested columns)
    pub context_hat: Array2<f64>,
}

/// One learnable context vector per task.
///
/// The table lives in its own `VarStore` so that it can be driven by a
/// dedicated optimizer.
pub struct ContextModel {
    config: ContextConfig,
    vs: nn::VarStore,
    context_hat: Tensor,
    context_log_var: Option<Tensor>,
}

const INIT_LOG_VAR: f64 = -4.0;

impl ContextModel {
    pub fn new(config: ContextConfig, device: Device) -> Result<Self> {
        if config.task_num < 0 || config.max_context_dim < 0 {
            return Err(CausalMetaError::InvalidConfig(format!(
                "negative context table size: task_num={}, max_context_dim={}",
                config.task_num, config.max_context_dim
            )));
        }

        let vs = nn::VarStore::new(device);
        let root = vs.root();
        let dims = [config.task_num, config.max_context_dim];
        let context_hat = root.var(
            "context_hat",
            &dims,
            nn::Init::Randn {
                mean: 0.0,
                stdev: config.init_scale,
            },
        );
        let context_log_var = config
            .variational
            .then(|| root.var("context_log_var", &dims, nn::Init::Const(INIT_LOG_VAR)));

        Ok(Self {
            config,
            vs,
            context_hat,
            context_log_var,
        })
    }

    /// Re-draw the table from `N(0, init_scale^2)` on the current device.
    ///
    /// A different `task_num` resizes the table; optimizers holding the old
    /// shape have to be rebuilt afterwards.
    pub fn reset(&mut self, task_num: Option<i64>) -> Result<()> {
        let task_num = match task_num {
            Some(n) if n > 0 => n,
            _ if self.config.task_num > 0 => self.config.task_num,
            _ => return Err(CausalMetaError::TaskCountUnset),
        };
        self.config.task_num = task_num;

        let device = self.vs.device();
        let dims = [task_num, self.config.max_context_dim];
        let fresh = Tensor::randn(dims, (Kind::Float, device)) * self.config.init_scale;

        tch::no_grad(|| {
            overwrite(&mut self.context_hat, &fresh);
            if let Some(log_var) = self.context_log_var.as_mut() {
                let fresh_log_var = Tensor::full(dims, INIT_LOG_VAR, (Kind::Float, device));
                overwrite(log_var, &fresh_log_var);
            }
        });

        tracing::debug!(task_num, "Reset context table");
        Ok(())
    }

    /// Context rows for `idx` (`[*, 1]`), or a zero-length embedding without an index.
    pub fn forward(&self, idx: Option<&Tensor>) -> Result<Tensor> {
        match idx {
            None if self.config.meta => Err(CausalMetaError::MissingTaskIndex),
            None => Ok(Tensor::empty([0], (Kind::Float, self.vs.device()))),
            Some(idx) => self.rows(&self.context_hat, idx),
        }
    }

    /// Reparameterised sample for a variational table, otherwise [`Self::forward`].
    pub fn sample(&self, idx: Option<&Tensor>) -> Result<Tensor> {
        match (&self.context_log_var, idx) {
            (Some(log_var), Some(idx)) => {
                let mean = self.rows(&self.context_hat, idx)?;
                let std = (self.rows(log_var, idx)? * 0.5).exp();
                Ok(&mean + Tensor::randn_like(&mean) * std)
            }
            _ => self.forward(idx),
        }
    }

    /// `KL(q(c | task) || N(0, I))` per indexed row, `None` for a point-estimate table.
    pub fn kl(&self, idx: Option<&Tensor>) -> Result<Option<Tensor>> {
        let (log_var, idx) = match (&self.context_log_var, idx) {
            (Some(log_var), Some(idx)) => (log_var, idx),
            _ => return Ok(None),
        };
        let mean = self.rows(&self.context_hat, idx)?;
        let log_var = self.rows(log_var, idx)?;
        let kl = (mean.pow_tensor_scalar(2) + log_var.exp() - 1.0 - &log_var) * 0.5;
        Ok(Some(kl.sum_dim_intlist(Some(&[-1i64][..]), false, Kind::Float)))
    }

    /// Mean and max absolute context value over the whole table.
    pub fn usage(&self) -> Option<(Tensor, Tensor)> {
        if !self.config.meta || self.context_hat.numel() == 0 {
            return None;
        }
        let magnitude = self.context_hat.abs();
        Some((magnitude.mean(Kind::Float), magnitude.max()))
    }

    /// Pairwise mutual information between the selected context dimensions of `idx`'s rows.
    pub fn get_mutual_info(
        &self,
        idx: &Tensor,
        valid_context_idx: Option<&[usize]>,
        reduction: Reduction,
    ) -> Result<MutualInfo> {
        let rows = self
            .forward(Some(idx))?
            .reshape([-1, self.config.max_context_dim]);
        let mut context = tensor_to_array2(&rows)?;
        if let Some(valid) = valid_context_idx {
            context = context.select(Axis(1), valid);
        }
        mutual_info_estimation(context.view(), reduction)
    }

    /// Score the learned table against the ground-truth contexts `[task_num, d]`.
    pub fn get_mcc(
        &self,
        context_gt: &Array2<f64>,
        valid_idx: Option<&[usize]>,
        method: CorrelationMethod,
    ) -> Result<ContextMcc> {
        let mut context_hat = tensor_to_array2(&self.context_hat)?;
        if let Some(valid) = valid_idx {
            context_hat = context_hat.select(Axis(1), valid);
        }
        let res = mean_corr_coef_with(context_gt.view(), context_hat.view(), method)?;
        Ok(ContextMcc {
            score: res.score,
            permutation: res.permutation,
            context_hat,
        })
    }

    fn rows(&self, table: &Tensor, idx: &Tensor) -> Result<Tensor> {
        let size = idx.size();
        if size.last() != Some(&1) {
            return Err(CausalMetaError::TaskIndexShape(size));
        }
        let mut shape = size[..size.len() - 1].to_vec();
        shape.push(table.size()[1]);

        let flat = idx.reshape([-1]).to_kind(Kind::Int64);
        let task_num = table.size()[0];
        if flat.numel() > 0 {
            let min = flat.min().int64_value(&[]);
            let max = flat.max().int64_value(&[]);
            if min < 0 || max >= task_num {
                let index = if min < 0 { min } else { max };
                return Err(CausalMetaError::TaskIndexOutOfRange { index, task_num });
            }
        }
        Ok(table.f_index_select(0, &flat)?.reshape(shape.as_slice()))
    }

    /// Width of the embedding concatenated to the dynamics input.
    pub fn embedding_dim(&self) -> i64 {
        if self.config.meta {
            self.config.max_context_dim
        } else {
            0
        }
    }

    pub fn is_meta(&self) -> bool {
        self.config.meta
    }

    pub fn is_variational(&self) -> bool {
        self.context_log_var.is_some()
    }

    pub fn task_num(&self) -> i64 {
        self.config.task_num
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn context_hat(&self) -> &Tensor {
        &self.context_hat
    }

    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    pub fn var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.vs
    }
}

fn overwrite(dst: &mut Tensor, src: &Tensor) {
    if dst.size() == src.size() {
        dst.copy_(src);
    } else {
        dst.set_data(src);
    }
}

impl std::fmt::Debug for ContextModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("ContextModel");
        if self.config.meta {
            s.field("max_context_dim", &self.config.max_context_dim)
                .field("task_num", &self.config.task_num);
        }
        s.finish()
    }
}
