use super::config::{WorldModelConfig, WorldModelKind};
use super::nets::{mlp, Backbone, ParallelMlp};
use crate::causal::{CausalMask, MaskMode};
use crate::context::ContextModel;
use crate::{CausalMetaError, Result};
use tch::{nn, Device, Tensor};

/// Gaussian parameters over (next observation, reward, continue).
///
/// Shapes: `B + [obs_dim]` for the observation terms, `B + [1]` for the rest.
#[derive(Debug)]
pub struct DynamicsOutput {
    pub next_obs_mean: Tensor,
    pub next_obs_log_var: Tensor,
    pub reward_mean: Tensor,
    pub reward_log_var: Tensor,
    pub continue_logit: Tensor,
    pub continue_log_var: Tensor,
}

impl DynamicsOutput {
    /// Draw a next observation from the predicted Gaussian.
    pub fn sample_next(&self) -> Tensor {
        let std = (&self.next_obs_log_var * 0.5).exp();
        &self.next_obs_mean + Tensor::randn_like(&self.next_obs_mean) * std
    }

    /// Per-output means `B + [obs_dim + 2]`, in mask row order.
    pub fn means(&self) -> Tensor {
        Tensor::cat(
            &[&self.next_obs_mean, &self.reward_mean, &self.continue_logit],
            -1,
        )
    }
}

/// Probabilistic, context-conditioned dynamics model.
///
/// Parameters are split into three groups with their own `VarStore`s:
/// the network ("module"), the context table and the mask logits.
pub struct WorldModel {
    config: WorldModelConfig,
    module_vs: nn::VarStore,
    backbone: Backbone,
    context: ContextModel,
    mask: Option<CausalMask>,
}

impl WorldModel {
    pub fn new(config: WorldModelConfig, device: Device) -> Result<Self> {
        config.validate()?;

        let context = ContextModel::new(config.context.clone(), device)?;
        let in_dim = config.obs_dim + config.action_dim + context.embedding_dim();
        let out_dim = config.output_dim();

        let module_vs = nn::VarStore::new(device);
        let p = module_vs.root();
        let (backbone, mask) = match config.kind {
            WorldModelKind::Plain => {
                let seq = mlp(&(&p / "mlp"), in_dim, &config.hidden_dims, 2 * out_dim);
                (Backbone::Plain(seq), None)
            }
            WorldModelKind::Causal => {
                let heads = ParallelMlp::new(&(&p / "heads"), out_dim, in_dim, &config.hidden_dims, 2);
                let mask = CausalMask::new(out_dim, in_dim, config.mask.clone(), device)?;
                (Backbone::Causal(heads), Some(mask))
            }
        };

        tracing::debug!(
            kind = ?config.kind,
            in_dim,
            out_dim,
            meta = context.is_meta(),
            "Built world model"
        );

        Ok(Self {
            config,
            module_vs,
            backbone,
            context,
            mask,
        })
    }

    /// Predict with the mask view of the configured update rule.
    pub fn forward(&self, obs: &Tensor, action: &Tensor, idx: Option<&Tensor>) -> Result<DynamicsOutput> {
        let mask = self.mask.as_ref().map(|m| m.mask(m.training_mode()));
        self.forward_with_mask(obs, action, idx, mask.as_ref())
    }

    /// Predict with the given `[obs_dim + 2, in_dim]` gate (ignored by `Plain`).
    pub fn forward_with_mask(
        &self,
        obs: &Tensor,
        action: &Tensor,
        idx: Option<&Tensor>,
        mask: Option<&Tensor>,
    ) -> Result<DynamicsOutput> {
        let context = self.context.forward(self.task_index(idx))?;
        self.forward_with_context(obs, action, &context, mask)
    }

    /// Predict with a reparameterised context sample.
    pub fn forward_sampled(
        &self,
        obs: &Tensor,
        action: &Tensor,
        idx: Option<&Tensor>,
        mask: Option<&Tensor>,
    ) -> Result<DynamicsOutput> {
        let context = self.context.sample(self.task_index(idx))?;
        self.forward_with_context(obs, action, &context, mask)
    }

    fn task_index<'a>(&self, idx: Option<&'a Tensor>) -> Option<&'a Tensor> {
        if self.context.is_meta() {
            idx
        } else {
            None
        }
    }

    fn forward_with_context(
        &self,
        obs: &Tensor,
        action: &Tensor,
        context: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<DynamicsOutput> {
        let o = self.config.obs_dim;
        let a = self.config.action_dim;
        let obs_size = obs.size();
        let action_size = action.size();
        if obs_size.last() != Some(&o) || action_size.last() != Some(&a) {
            return Err(CausalMetaError::ShapeMismatch {
                expected: vec![o, a],
                actual: vec![
                    obs_size.last().copied().unwrap_or(0),
                    action_size.last().copied().unwrap_or(0),
                ],
            });
        }

        let batch = &obs_size[..obs_size.len() - 1];
        let input = Tensor::cat(&[obs, action, context], -1);
        let in_dim = input.size().last().copied().unwrap_or(0);
        let raw = self.backbone.forward(&input.reshape([-1, in_dim]), mask);

        let e = self.config.output_dim();
        let mut shape = batch.to_vec();
        shape.push(2 * e);
        let raw = raw.reshape(shape.as_slice());

        let mean = raw.narrow(-1, 0, e);
        let log_var = self.config.log_var_bounds.clamp(&raw.narrow(-1, e, e));

        let delta = mean.narrow(-1, 0, o);
        let next_obs_mean = if self.config.residual {
            obs + delta
        } else {
            delta
        };
        let reward_mean = mean.narrow(-1, o, 1);
        let continue_logit = mean.narrow(-1, o + 1, 1);

        let (next_obs_log_var, reward_log_var) = if self.config.learn_obs_var {
            (log_var.narrow(-1, 0, o), log_var.narrow(-1, o, 1))
        } else {
            (
                next_obs_mean.zeros_like(),
                reward_mean.zeros_like(),
            )
        };
        let continue_log_var = log_var.narrow(-1, o + 1, 1);

        Ok(DynamicsOutput {
            next_obs_mean,
            next_obs_log_var,
            reward_mean,
            reward_log_var,
            continue_logit,
            continue_log_var,
        })
    }

    /// Draw the next observation given the current one.
    pub fn sample_next(&self, obs: &Tensor, action: &Tensor, idx: Option<&Tensor>) -> Result<Tensor> {
        Ok(self.forward(obs, action, idx)?.sample_next())
    }

    /// Whether forward passes draw random masks or contexts.
    pub fn is_stochastic(&self) -> bool {
        let sampled_mask = self
            .mask
            .as_ref()
            .map(|m| m.training_mode() == MaskMode::Sampled)
            .unwrap_or(false);
        sampled_mask || self.context.is_variational()
    }

    /// Stop gradient accumulation into every parameter group.
    pub fn freeze(&mut self) {
        self.module_vs.freeze();
        self.context.var_store_mut().freeze();
        if let Some(mask) = self.mask.as_mut() {
            mask.var_store_mut().freeze();
        }
    }

    pub fn unfreeze(&mut self) {
        self.module_vs.unfreeze();
        self.context.var_store_mut().unfreeze();
        if let Some(mask) = self.mask.as_mut() {
            mask.var_store_mut().unfreeze();
        }
    }

    pub fn config(&self) -> &WorldModelConfig {
        &self.config
    }

    pub fn obs_dim(&self) -> i64 {
        self.config.obs_dim
    }

    pub fn action_dim(&self) -> i64 {
        self.config.action_dim
    }

    pub fn device(&self) -> Device {
        self.module_vs.device()
    }

    pub fn module_vs(&self) -> &nn::VarStore {
        &self.module_vs
    }

    pub fn module_vs_mut(&mut self) -> &mut nn::VarStore {
        &mut self.module_vs
    }

    pub fn context(&self) -> &ContextModel {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut ContextModel {
        &mut self.context
    }

    pub fn mask(&self) -> Option<&CausalMask> {
        self.mask.as_ref()
    }

    pub fn mask_mut(&mut self) -> Option<&mut CausalMask> {
        self.mask.as_mut()
    }
}

impl std::fmt::Debug for WorldModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldModel")
            .field("kind", &self.config.kind)
            .field("obs_dim", &self.config.obs_dim)
            .field("action_dim", &self.config.action_dim)
            .field("context", &self.context)
            .field("mask", &self.mask)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world_model::LogVarBounds;
    use tch::Kind;

    const OBS: i64 = 4;
    const ACT: i64 = 2;

    fn opts() -> (Kind, Device) {
        (Kind::Float, Device::Cpu)
    }

    fn zero_module(model: &mut WorldModel) {
        tch::no_grad(|| {
            for (_, mut var) in model.module_vs().variables() {
                let _ = var.zero_();
            }
        });
    }

    #[test]
    fn test_output_shapes() {
        for kind in [WorldModelKind::Plain, WorldModelKind::Causal] {
            let config = WorldModelConfig::new(OBS, ACT)
                .kind(kind)
                .hidden_dims(vec![32, 32])
                .meta(10, 100);
            let model = WorldModel::new(config, Device::Cpu).unwrap();

            let obs = Tensor::randn([3, 5, OBS], opts());
            let action = Tensor::randn([3, 5, ACT], opts());
            let idx = Tensor::randint(100, [3, 5, 1], (Kind::Int64, Device::Cpu));
            let out = model.forward(&obs, &action, Some(&idx)).unwrap();

            assert_eq!(out.next_obs_mean.size(), vec![3, 5, OBS]);
            assert_eq!(out.next_obs_log_var.size(), vec![3, 5, OBS]);
            assert_eq!(out.reward_mean.size(), vec![3, 5, 1]);
            assert_eq!(out.reward_log_var.size(), vec![3, 5, 1]);
            assert_eq!(out.continue_logit.size(), vec![3, 5, 1]);
            assert_eq!(out.continue_log_var.size(), vec![3, 5, 1]);
            assert_eq!(out.means().size(), vec![3, 5, OBS + 2]);
        }
    }

    #[test]
    fn test_residual_zero_delta() {
        let config = WorldModelConfig::new(OBS, ACT)
            .kind(WorldModelKind::Plain)
            .hidden_dims(vec![16]);
        let mut model = WorldModel::new(config, Device::Cpu).unwrap();
        zero_module(&mut model);

        let obs = Tensor::randn([8, OBS], opts());
        let action = Tensor::randn([8, ACT], opts());
        let out = model.forward(&obs, &action, None).unwrap();
        assert!(out.next_obs_mean.equal(&obs));
    }

    #[test]
    fn test_log_var_bounds_hold() {
        let mut config = WorldModelConfig::new(OBS, ACT).hidden_dims(vec![16]);
        config.log_var_bounds = LogVarBounds { min: -3.0, max: 0.2 };
        let model = WorldModel::new(config, Device::Cpu).unwrap();

        let obs = Tensor::randn([64, OBS], opts()) * 1e4;
        let action = Tensor::randn([64, ACT], opts()) * 1e4;
        let out = model.forward(&obs, &action, None).unwrap();
        for lv in [&out.next_obs_log_var, &out.reward_log_var, &out.continue_log_var] {
            assert!(lv.min().double_value(&[]) >= -3.0 - 1e-6);
            assert!(lv.max().double_value(&[]) <= 0.2 + 1e-6);
        }
    }

    #[test]
    fn test_fixed_obs_variance() {
        let config = WorldModelConfig::new(OBS, ACT)
            .hidden_dims(vec![16])
            .learn_obs_var(false);
        let model = WorldModel::new(config, Device::Cpu).unwrap();
        let obs = Tensor::randn([4, OBS], opts());
        let action = Tensor::randn([4, ACT], opts());
        let out = model.forward(&obs, &action, None).unwrap();
        assert_eq!(out.next_obs_log_var.abs().sum(Kind::Float).double_value(&[]), 0.0);
        assert_eq!(out.reward_log_var.abs().sum(Kind::Float).double_value(&[]), 0.0);
        assert!(out.continue_log_var.abs().sum(Kind::Float).double_value(&[]) > 0.0);
    }

    #[test]
    fn test_meta_requires_index() {
        let config = WorldModelConfig::new(OBS, ACT).hidden_dims(vec![16]).meta(3, 5);
        let model = WorldModel::new(config, Device::Cpu).unwrap();
        let obs = Tensor::randn([4, OBS], opts());
        let action = Tensor::randn([4, ACT], opts());
        assert!(matches!(
            model.forward(&obs, &action, None),
            Err(CausalMetaError::MissingTaskIndex)
        ));
    }

    #[test]
    fn test_wrong_obs_dim() {
        let model = WorldModel::new(WorldModelConfig::new(OBS, ACT).hidden_dims(vec![8]), Device::Cpu)
            .unwrap();
        let obs = Tensor::randn([4, OBS + 1], opts());
        let action = Tensor::randn([4, ACT], opts());
        assert!(model.forward(&obs, &action, None).is_err());
    }

    #[test]
    fn test_freeze_stops_gradients() {
        let config = WorldModelConfig::new(OBS, ACT).hidden_dims(vec![8]).meta(3, 5);
        let mut model = WorldModel::new(config, Device::Cpu).unwrap();
        model.freeze();
        let obs = Tensor::randn([4, OBS], opts()).set_requires_grad(true);
        let action = Tensor::randn([4, ACT], opts());
        let idx = Tensor::zeros([4, 1], (Kind::Int64, Device::Cpu));
        let out = model.forward(&obs, &action, Some(&idx)).unwrap();
        out.reward_mean.sum(Kind::Float).backward();

        assert!(obs.grad().defined());
        assert!(!model.context().context_hat().grad().defined());
        model.unfreeze();
        assert!(model.context().context_hat().requires_grad());
    }

    #[test]
    fn test_sample_next_is_noisy() {
        let model = WorldModel::new(WorldModelConfig::new(OBS, ACT).hidden_dims(vec![8]), Device::Cpu)
            .unwrap();
        let obs = Tensor::randn([16, OBS], opts());
        let action = Tensor::randn([16, ACT], opts());
        let out = model.forward(&obs, &action, None).unwrap();
        let sample = out.sample_next();
        assert_eq!(sample.size(), vec![16, OBS]);
        assert!(!sample.equal(&out.next_obs_mean));
    }
}
