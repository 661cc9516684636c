//! Causal Dreamer training loop.

use super::collector::Collector;
use super::config::TrainerConfig;
use super::optimizer::GroupOptimizer;
use crate::causal::MaskUpdate;
use crate::checkpoint::{CheckpointConfig, CheckpointManager, CheckpointMetadata, Checkpointable};
use crate::config::ExperimentConfig;
use crate::data::{split_segments, ReplayBuffer, TrajectoryBatch};
use crate::log::{ConsoleLogger, MetricLogger};
use crate::objectives::{ImaginationActorLoss, ValueLoss, WorldModelLoss};
use crate::policy::{Actor, AdditiveGaussian, HasVarStore, ValueNet};
use crate::stats::CorrelationMethod;
use crate::vector::TaskVecEnv;
use crate::world_model::WorldModel;
use crate::Result;
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::Array2;
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;
use tch::{Device, Kind, Tensor};

/// Build the world model, actor and value net for an environment with the
/// given dimensions. `config.model`'s dims and task count are overridden.
pub fn make_causal_dreamer(
    config: &ExperimentConfig,
    obs_dim: i64,
    action_dim: i64,
    task_num: i64,
    device: Device,
) -> Result<(WorldModel, Actor, ValueNet)> {
    let mut model_config = config.model.clone();
    model_config.obs_dim = obs_dim;
    model_config.action_dim = action_dim;
    if model_config.context.meta {
        model_config.context.task_num = task_num;
    }
    let model = WorldModel::new(model_config, device)?;
    let context_dim = model.context().embedding_dim();
    let actor = Actor::new(obs_dim, context_dim, action_dim, config.actor.clone(), device);
    let value = ValueNet::new(obs_dim, context_dim, &config.value, device);
    Ok((model, actor, value))
}

/// Returned by [`CausalDreamerTrainer::train`].
#[derive(Clone, Debug, Default)]
pub struct TrainingSummary {
    pub iterations: u64,
    pub frames: u64,
    pub optim_steps: u64,
    pub elapsed_secs: f64,
    /// Last value of every metric
    pub metrics: HashMap<String, f64>,
}

struct Optimizers {
    module: GroupOptimizer,
    context: Option<GroupOptimizer>,
    mask: Option<GroupOptimizer>,
    actor: GroupOptimizer,
    value: GroupOptimizer,
}

impl Optimizers {
    fn new(model: &WorldModel, actor: &Actor, value: &ValueNet, config: &TrainerConfig) -> Result<Self> {
        let context = if model.context().is_meta() {
            Some(GroupOptimizer::new(
                "context",
                model.context().var_store(),
                config.context_lr,
            )?)
        } else {
            None
        };
        let mask = match model.mask() {
            Some(mask) => Some(GroupOptimizer::new(
                "mask_logits",
                mask.var_store(),
                config.mask_logits_lr,
            )?),
            None => None,
        };
        Ok(Self {
            module: GroupOptimizer::new("module", model.module_vs(), config.world_model_lr)?,
            context,
            mask,
            actor: GroupOptimizer::new("actor", actor.var_store(), config.actor_value_lr)?,
            value: GroupOptimizer::new("value", value.var_store(), config.actor_value_lr)?,
        })
    }

    fn zero_world_model(&mut self) {
        self.module.zero_grad();
        if let Some(opt) = self.context.as_mut() {
            opt.zero_grad();
        }
        if let Some(opt) = self.mask.as_mut() {
            opt.zero_grad();
        }
    }
}

/// Collects experience from one environment per task and trains the world
/// model, mask, context table, actor and value net on it.
pub struct CausalDreamerTrainer<V: TaskVecEnv> {
    config: TrainerConfig,
    model: WorldModel,
    actor: Actor,
    value: ValueNet,
    model_loss: WorldModelLoss,
    actor_loss: ImaginationActorLoss,
    value_loss: ValueLoss,
    optimizers: Optimizers,
    replay: ReplayBuffer,
    collector: Collector<V>,
    logger: Box<dyn MetricLogger>,
    checkpoints: Option<CheckpointManager>,
    oracle_context: Option<Array2<f64>>,
    iteration: u64,
    optim_steps: u64,
    last_metrics: HashMap<String, f64>,
}

impl<V: TaskVecEnv> CausalDreamerTrainer<V> {
    pub fn new(config: &ExperimentConfig, vec_env: V) -> Result<Self> {
        config.validate()?;
        let trainer = config.trainer.clone();
        let task_num = vec_env.num_envs();
        let obs_dim = vec_env.observation_space().dim() as i64;
        let action_dim = vec_env.action_space().dim() as i64;
        let device = trainer.device;

        let (model, actor, value) =
            make_causal_dreamer(config, obs_dim, action_dim, task_num as i64, device)?;
        let fns = config.env.external_fns()?;
        let model_loss = WorldModelLoss::new(config.loss.clone(), &fns);
        let actor_loss = ImaginationActorLoss::new(config.imagination.clone(), fns);
        let optimizers = Optimizers::new(&model, &actor, &value, &trainer)?;

        let replay = ReplayBuffer::new(trainer.replay_capacity(task_num), Device::Cpu);
        let collector = Collector::new(
            vec_env,
            trainer.steps_per_task(task_num),
            trainer.init_frames_per_task * task_num as u64,
            AdditiveGaussian::new(trainer.exploration_sigma),
            config.env.seed,
            device,
        )?;

        let checkpoints = if trainer.checkpoint_interval > 0 {
            let ckpt = CheckpointConfig::new(&trainer.data_dir).keep_last(trainer.keep_last);
            Some(CheckpointManager::new(ckpt)?)
        } else {
            None
        };

        tracing::info!(
            task_num,
            obs_dim,
            action_dim,
            kind = ?model.config().kind,
            mask_update = ?model.mask().map(|m| m.update()),
            replay_capacity = replay.capacity(),
            "Built causal Dreamer trainer"
        );

        Ok(Self {
            config: trainer,
            model,
            actor,
            value,
            model_loss,
            actor_loss,
            value_loss: ValueLoss,
            optimizers,
            replay,
            collector,
            logger: Box::new(ConsoleLogger::new()),
            checkpoints,
            oracle_context: None,
            iteration: 0,
            optim_steps: 0,
            last_metrics: HashMap::new(),
        })
    }

    pub fn with_logger(mut self, logger: Box<dyn MetricLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Ground-truth contexts of the training tasks, scored against the
    /// learned table as `context/mcc`.
    pub fn with_oracle_context(mut self, oracle: &Array2<f32>) -> Self {
        self.oracle_context = Some(oracle.mapv(|v| v as f64));
        self
    }

    /// Run until `train_frames_per_task * task_num` frames were collected.
    pub fn train(&mut self) -> Result<TrainingSummary> {
        let task_num = self.collector.num_tasks() as u64;
        let total_frames = self.config.train_frames_per_task * task_num;
        let init_frames = self.config.init_frames_per_task * task_num;
        let start_time = Instant::now();

        let progress = if self.config.progress_bar && total_frames > 0 {
            let pb = ProgressBar::new(total_frames);
            if let Ok(style) = ProgressStyle::default_bar().template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
            ) {
                pb.set_style(style.progress_chars("#>-"));
            }
            Some(pb)
        } else {
            None
        };

        tracing::info!(total_frames, init_frames, "Starting training");

        while self.collector.collected_frames() < total_frames {
            self.iteration += 1;
            let context = self.policy_context()?;
            let (rollout, stats) = self.collector.collect(Some((&self.actor, &context)))?;
            let frames = self.collector.collected_frames();

            self.replay
                .extend(&split_segments(&rollout, self.config.batch_length)?)?;
            let rollout_metrics = stats.metrics();
            self.logger.log_metrics(&rollout_metrics, frames);
            self.last_metrics.extend(rollout_metrics);

            if let Some(ref pb) = progress {
                pb.set_position(frames.min(total_frames));
                let loss = self
                    .last_metrics
                    .get("world_model/total_loss")
                    .copied()
                    .unwrap_or(f64::NAN);
                pb.set_message(format!(
                    "Model loss: {:.4} Reward: {:.2}",
                    loss, stats.reward_mean
                ));
            }

            if frames < init_frames {
                continue;
            }

            let train_agent = frames >= self.config.train_agent_frames;
            for _ in 0..self.config.optim_steps_per_batch {
                let batch = self
                    .replay
                    .sample(self.config.batch_size)?
                    .to_device(self.config.device);
                let metrics = self.optim_step(&batch, train_agent)?;
                if self.optim_steps % self.config.log_interval.max(1) as u64 == 0 {
                    self.logger.log_metrics(&metrics, frames);
                }
                self.last_metrics.extend(metrics);
            }

            if let Some(score) = self.context_mcc()? {
                self.logger.log_scalar("context/mcc", score, frames);
                self.last_metrics.insert("context/mcc".to_string(), score);
            }

            if progress.is_none() {
                tracing::info!(
                    iteration = self.iteration,
                    frames,
                    optim_steps = self.optim_steps,
                    "Training progress"
                );
            }

            if let Some(ref manager) = self.checkpoints {
                if self.iteration % self.config.checkpoint_interval as u64 == 0 {
                    manager.save(&*self, self.iteration)?;
                }
            }
        }

        if let Some(pb) = progress {
            pb.finish_with_message("Training complete");
        }
        self.logger.close();

        Ok(TrainingSummary {
            iterations: self.iteration,
            frames: self.collector.collected_frames(),
            optim_steps: self.optim_steps,
            elapsed_secs: start_time.elapsed().as_secs_f64(),
            metrics: self.last_metrics.clone(),
        })
    }

    /// One optimisation step on `batch`.
    ///
    /// Runs either the model step or, on the reinforce schedule, the mask
    /// estimator step; then the actor and value steps when `train_agent`.
    pub fn optim_step(&mut self, batch: &TrajectoryBatch, train_agent: bool) -> Result<HashMap<String, f64>> {
        let grad_clip = self.config.grad_clip;
        let mut metrics = HashMap::new();
        let update = self.model.mask().map(|m| m.update()).unwrap_or_default();

        if update.is_reinforce_step(self.optim_steps as usize) {
            let grad = self.model_loss.reinforce(&self.model, batch)?;
            if let (Some(mask), Some(opt)) = (self.model.mask(), self.optimizers.mask.as_mut()) {
                opt.zero_grad();
                (mask.logits() * &grad).sum(Kind::Float).backward();
                let norm = opt.clip_and_step(grad_clip);
                metrics.insert("causal/grad".to_string(), norm);
            }
        } else {
            self.optimizers.zero_world_model();
            let terms = self.model_loss.compute(&self.model, batch)?;
            terms.total.backward();

            let norm = self.optimizers.module.clip_and_step(grad_clip);
            if let Some(opt) = self.optimizers.context.as_mut() {
                let context_norm = opt.clip_and_step(grad_clip);
                metrics.insert("context/grad".to_string(), context_norm);
            }
            if let Some(opt) = self.optimizers.mask.as_mut() {
                if let MaskUpdate::Reinforce { .. } = update {
                    // logits only move on reinforce steps
                    opt.zero_grad();
                } else {
                    let mask_norm = opt.clip_and_step(grad_clip);
                    metrics.insert("causal/grad".to_string(), mask_norm);
                }
            }
            metrics.extend(terms.metrics());
            metrics.insert("world_model/grad".to_string(), norm);
        }

        if let Some(mask) = self.model.mask() {
            let diag = mask.diagnostics();
            metrics.insert("causal/sparsity".to_string(), diag.sparsity);
            metrics.insert("causal/mean_logits".to_string(), diag.mean_logit);
        }

        if train_agent {
            self.optimizers.actor.zero_grad();
            let imagined =
                self.actor_loss
                    .compute(&mut self.model, &self.actor, &mut self.value, batch)?;
            imagined.actor_loss.backward();
            let actor_norm = self.optimizers.actor.clip_and_step(grad_clip);

            self.optimizers.value.zero_grad();
            let value_loss = self.value_loss.compute(&self.value, &imagined)?;
            value_loss.backward();
            let value_norm = self.optimizers.value.clip_and_step(grad_clip);

            metrics.extend(imagined.metrics());
            metrics.insert("actor/grad".to_string(), actor_norm);
            metrics.insert("value/loss".to_string(), value_loss.double_value(&[]));
            metrics.insert("value/grad".to_string(), value_norm);
            metrics.insert(
                "value/target_mean".to_string(),
                imagined.lambda_target.mean(Kind::Float).double_value(&[]),
            );
            metrics.insert(
                "value/target_std".to_string(),
                imagined.lambda_target.std(false).double_value(&[]),
            );
        }

        self.optim_steps += 1;
        Ok(metrics)
    }

    /// Per-task context rows fed to the actor while collecting.
    fn policy_context(&self) -> Result<Tensor> {
        let n = self.collector.num_tasks() as i64;
        let device = self.model.device();
        if self.model.context().is_meta() {
            let idx = Tensor::arange(n, (Kind::Int64, device)).reshape([n, 1]);
            Ok(self.model.context().forward(Some(&idx))?.detach())
        } else {
            Ok(Tensor::zeros([n, 0], (Kind::Float, device)))
        }
    }

    /// MCC of the learned table against the oracle, when both are available.
    pub fn context_mcc(&self) -> Result<Option<f64>> {
        let oracle = match &self.oracle_context {
            Some(oracle) if self.model.context().is_meta() => oracle,
            _ => return Ok(None),
        };
        if oracle.nrows() as i64 != self.model.context().task_num() || oracle.ncols() == 0 {
            return Ok(None);
        }
        let mcc = self
            .model
            .context()
            .get_mcc(oracle, None, CorrelationMethod::Pearson)?;
        Ok(Some(mcc.score))
    }

    /// Redraw the context table, optionally for a new number of tasks.
    pub fn reset_context(&mut self, task_num: Option<i64>) -> Result<()> {
        self.model.context_mut().reset(task_num)?;
        if self.model.context().is_meta() {
            self.optimizers.context = Some(GroupOptimizer::new(
                "context",
                self.model.context().var_store(),
                self.config.context_lr,
            )?);
        }
        Ok(())
    }

    /// Write every parameter group and `meta.json` into `dir`.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        std::fs::create_dir_all(dir.as_ref())?;
        self.save_to(dir.as_ref())
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn model(&self) -> &WorldModel {
        &self.model
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn value(&self) -> &ValueNet {
        &self.value
    }

    pub fn replay(&self) -> &ReplayBuffer {
        &self.replay
    }

    pub fn collected_frames(&self) -> u64 {
        self.collector.collected_frames()
    }

    pub fn optim_steps(&self) -> u64 {
        self.optim_steps
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn last_metrics(&self) -> &HashMap<String, f64> {
        &self.last_metrics
    }
}

const MODULE_FILE: &str = "world_model.pt";
const CONTEXT_FILE: &str = "context.pt";
const MASK_FILE: &str = "mask_logits.pt";
const ACTOR_FILE: &str = "actor.pt";
const VALUE_FILE: &str = "value.pt";
const META_FILE: &str = "meta.json";

impl<V: TaskVecEnv> Checkpointable for CausalDreamerTrainer<V> {
    fn save_to(&self, dir: &Path) -> Result<()> {
        self.model.module_vs().save(dir.join(MODULE_FILE))?;
        self.model.context().var_store().save(dir.join(CONTEXT_FILE))?;
        if let Some(mask) = self.model.mask() {
            mask.var_store().save(dir.join(MASK_FILE))?;
        }
        self.actor.var_store().save(dir.join(ACTOR_FILE))?;
        self.value.var_store().save(dir.join(VALUE_FILE))?;

        CheckpointMetadata::new(self.iteration, self.collected_frames(), self.optim_steps)
            .with_metrics(&self.last_metrics)
            .save(&dir.join(META_FILE))
    }

    fn load_from(&mut self, dir: &Path) -> Result<()> {
        self.model.module_vs_mut().load(dir.join(MODULE_FILE))?;
        self.model
            .context_mut()
            .var_store_mut()
            .load(dir.join(CONTEXT_FILE))?;
        if let Some(mask) = self.model.mask_mut() {
            mask.var_store_mut().load(dir.join(MASK_FILE))?;
        }
        self.actor.var_store_mut().load(dir.join(ACTOR_FILE))?;
        self.value.var_store_mut().load(dir.join(VALUE_FILE))?;

        let meta = CheckpointMetadata::load(&dir.join(META_FILE))?;
        self.iteration = meta.iteration;
        self.optim_steps = meta.optim_steps;
        tracing::info!(
            iteration = meta.iteration,
            frames = meta.frames,
            "Restored trainer state"
        );
        Ok(())
    }
}
