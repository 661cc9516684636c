use crate::utils::tensor_to_array2;
use crate::{CausalMetaError, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tch::{nn, Device, Kind, Tensor};

/// How the mask logits are optimised. Fixed for a whole run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MaskUpdate {
    /// Soft sigmoid gate, logits stepped together with the model
    #[default]
    Gradient,
    /// Sampled gate; every `period`-th step runs the score-function estimator
    Reinforce { period: usize },
}

impl MaskUpdate {
    /// Whether optimisation step `step` (0-based) is a reinforce step.
    pub fn is_reinforce_step(&self, step: usize) -> bool {
        match *self {
            Self::Gradient => false,
            Self::Reinforce { period } => period > 0 && (step + 1) % period == 0,
        }
    }
}

/// View of the mask used to gate the dynamics input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaskMode {
    /// `sigmoid(logits)`, differentiable
    Soft,
    /// Bernoulli sample of the soft mask, detached
    Sampled,
    /// `logits > 0`
    Hard,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CausalMaskConfig {
    /// Initial value of every logit
    pub init_logit: f64,
    pub update: MaskUpdate,
}

impl Default for CausalMaskConfig {
    fn default() -> Self {
        Self {
            init_logit: 3.0,
            update: MaskUpdate::Gradient,
        }
    }
}

/// Scalar summaries of the mask logits.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MaskDiagnostics {
    /// Fraction of edges with a negative logit
    pub sparsity: f64,
    pub mean_logit: f64,
}

/// Edge logits `[out_dim, in_dim]` from dynamics inputs to outputs.
///
/// Rows are the output heads (next observation dims, reward, continue),
/// columns the concatenated (observation, action, context) input.
pub struct CausalMask {
    config: CausalMaskConfig,
    vs: nn::VarStore,
    logits: Tensor,
}

impl CausalMask {
    pub fn new(out_dim: i64, in_dim: i64, config: CausalMaskConfig, device: Device) -> Result<Self> {
        if out_dim <= 0 || in_dim <= 0 {
            return Err(CausalMetaError::InvalidConfig(format!(
                "causal mask needs positive dims, got [{}, {}]",
                out_dim, in_dim
            )));
        }
        if let MaskUpdate::Reinforce { period: 0 } = config.update {
            return Err(CausalMetaError::InvalidConfig(
                "reinforce period must be positive".to_string(),
            ));
        }
        let vs = nn::VarStore::new(device);
        let logits = vs.root().var(
            "mask_logits",
            &[out_dim, in_dim],
            nn::Init::Const(config.init_logit),
        );
        Ok(Self { config, vs, logits })
    }

    pub fn soft(&self) -> Tensor {
        self.logits.sigmoid()
    }

    pub fn sample(&self) -> Tensor {
        self.soft().detach().bernoulli()
    }

    pub fn hard(&self) -> Tensor {
        self.logits.detach().gt(0.0).to_kind(Kind::Float)
    }

    pub fn mask(&self, mode: MaskMode) -> Tensor {
        match mode {
            MaskMode::Soft => self.soft(),
            MaskMode::Sampled => self.sample(),
            MaskMode::Hard => self.hard(),
        }
    }

    /// Mode used for the model step under the configured update rule.
    pub fn training_mode(&self) -> MaskMode {
        match self.config.update {
            MaskUpdate::Gradient => MaskMode::Soft,
            MaskUpdate::Reinforce { .. } => MaskMode::Sampled,
        }
    }

    /// Sparsity penalty: sum of `sigmoid(logits)`.
    pub fn sparsity(&self) -> Tensor {
        self.soft().sum(Kind::Float)
    }

    pub fn diagnostics(&self) -> MaskDiagnostics {
        tch::no_grad(|| MaskDiagnostics {
            sparsity: self
                .logits
                .lt(0.0)
                .to_kind(Kind::Float)
                .mean(Kind::Float)
                .double_value(&[]),
            mean_logit: self.logits.mean(Kind::Float).double_value(&[]),
        })
    }

    /// Thresholded adjacency `[out_dim, in_dim]`.
    pub fn adjacency(&self) -> Result<Array2<f64>> {
        tensor_to_array2(&self.hard())
    }

    pub fn logits(&self) -> &Tensor {
        &self.logits
    }

    pub fn out_dim(&self) -> i64 {
        self.logits.size()[0]
    }

    pub fn in_dim(&self) -> i64 {
        self.logits.size()[1]
    }

    pub fn update(&self) -> MaskUpdate {
        self.config.update
    }

    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    pub fn var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.vs
    }
}

impl std::fmt::Debug for CausalMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CausalMask")
            .field("shape", &self.logits.size())
            .field("update", &self.config.update)
            .finish()
    }
}

/// Score-function gradient for the mask logits.
///
/// `masks` holds `K` sampled masks `[K, out, in]`, `losses` the per-output
/// prediction loss under each `[K, out]` and `probs` the current
/// `sigmoid(logits)`. Returns
/// `mean_k[(L_k - mean_k L) * (M_k - p)] + sparse_weight * p * (1 - p)`.
pub fn reinforce_gradient(
    masks: &Tensor,
    losses: &Tensor,
    probs: &Tensor,
    sparse_weight: f64,
) -> Result<Tensor> {
    let m = masks.size();
    let l = losses.size();
    if m.len() != 3 || l.len() != 2 || m[0] != l[0] || m[1] != l[1] {
        return Err(CausalMetaError::ShapeMismatch {
            expected: m.iter().take(2).copied().collect(),
            actual: l,
        });
    }

    let grad = tch::no_grad(|| {
        let losses = losses.detach();
        let probs = probs.detach();
        let baseline = losses.mean_dim(Some(&[0i64][..]), true, Kind::Float);
        let advantage = (losses - baseline).unsqueeze(-1);
        let score = (advantage * (masks - &probs)).mean_dim(Some(&[0i64][..]), false, Kind::Float);
        let prior = &probs * (1.0 - &probs) * sparse_weight;
        score + prior
    });
    Ok(grad)
}
