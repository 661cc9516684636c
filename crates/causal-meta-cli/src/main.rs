//! causal-meta CLI
//!
//! Command-line interface for training causal meta world models and scoring
//! the learned task contexts.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use causal_meta::checkpoint::OracleContextStore;
use causal_meta::config::{ExperimentConfig, Split};
use causal_meta::log::{ConsoleLogger, MetricLogger};
use causal_meta::stats::mean_corr_coef;
use causal_meta::training::CausalDreamerTrainer;
use causal_meta::utils::{set_seed, tensor_to_array2};
use causal_meta::vector::Parallel;
use causal_meta_envs::{make_task_envs, ENV_NAMES};

#[derive(Parser)]
#[command(name = "causal-meta")]
#[command(version, about = "Causal meta world models for model-based RL", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a causal Dreamer agent on the meta-train tasks
    Train {
        /// Environment family
        #[arg(default_value = "causal_chain")]
        env: String,

        /// Experiment config (JSON); defaults for every missing field
        #[arg(long)]
        config: Option<PathBuf>,

        /// Frames to collect per task
        #[arg(long)]
        frames: Option<u64>,

        /// Random frames per task before training starts
        #[arg(long)]
        init_frames: Option<u64>,

        /// Number of meta-train tasks
        #[arg(long)]
        tasks: Option<usize>,

        #[arg(long)]
        seed: Option<u64>,

        /// cpu, cuda or cuda:N
        #[arg(long, default_value = "cpu")]
        device: String,

        /// Directory for oracle contexts, checkpoints and the final model
        #[arg(long, default_value = "runs/causal_meta")]
        output: PathBuf,

        /// Plain log lines instead of a progress bar
        #[arg(long)]
        no_progress: bool,

        /// Also write TensorBoard event files here (feature `tensorboard`)
        #[arg(long)]
        tensorboard: Option<PathBuf>,
    },

    /// List available environment families
    List,

    /// Score a trained context table against the oracle contexts
    Mcc {
        /// Checkpoint directory holding `context.pt`
        checkpoint: PathBuf,

        /// Directory holding `{split}_oracle_context.pt`
        #[arg(long)]
        oracle_dir: PathBuf,

        /// train or test
        #[arg(long, default_value = "train")]
        split: String,

        /// pearson or spearman
        #[arg(long, default_value = "pearson")]
        method: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            env,
            config,
            frames,
            init_frames,
            tasks,
            seed,
            device,
            output,
            no_progress,
            tensorboard,
        } => {
            let mut cfg = match config {
                Some(path) => ExperimentConfig::from_json_file(&path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => ExperimentConfig::default(),
            };
            cfg.env.env_name = env;
            if let Some(frames) = frames {
                cfg.trainer.train_frames_per_task = frames;
            }
            if let Some(init_frames) = init_frames {
                cfg.trainer.init_frames_per_task = init_frames;
            }
            if let Some(tasks) = tasks {
                cfg.env.meta_train_task_num = tasks;
            }
            if let Some(seed) = seed {
                cfg.env.seed = seed;
            }
            if no_progress {
                cfg.trainer.progress_bar = false;
            }
            cfg.trainer.device = parse_device(&device)?;
            cfg.trainer.data_dir = output.join("checkpoints");
            train(cfg, &output, tensorboard.as_deref())?;
        }
        Commands::List => list_envs(),
        Commands::Mcc {
            checkpoint,
            oracle_dir,
            split,
            method,
        } => {
            let split: Split = split.parse()?;
            mcc(&checkpoint, &oracle_dir, split, &method)?;
        }
    }

    Ok(())
}

fn parse_device(name: &str) -> Result<tch::Device> {
    let device = match name {
        "cpu" => tch::Device::Cpu,
        "cuda" => tch::Device::cuda_if_available(),
        other => match other.strip_prefix("cuda:") {
            Some(index) => tch::Device::Cuda(index.parse().with_context(|| format!("device {}", other))?),
            None => bail!("unknown device `{}`, expected cpu, cuda or cuda:N", other),
        },
    };
    Ok(device)
}

fn make_logger(tensorboard: Option<&Path>) -> Result<Box<dyn MetricLogger>> {
    match tensorboard {
        None => Ok(Box::new(ConsoleLogger::new())),
        #[cfg(feature = "tensorboard")]
        Some(dir) => Ok(Box::new(causal_meta::log::CompositeLogger::new(vec![
            Box::new(ConsoleLogger::new()),
            Box::new(causal_meta::log::TensorBoardLogger::new(dir)),
        ]))),
        #[cfg(not(feature = "tensorboard"))]
        Some(_) => bail!("--tensorboard needs a build with the `tensorboard` feature"),
    }
}

fn train(cfg: ExperimentConfig, output: &Path, tensorboard: Option<&Path>) -> Result<()> {
    cfg.validate()?;
    let logger = make_logger(tensorboard)?;
    set_seed(cfg.env.seed);
    std::fs::create_dir_all(output)?;
    cfg.to_json_file(output.join("config.json"))?;

    let (train_envs, train_oracle) = make_task_envs(&cfg.env, Split::Train)?;
    let (_, test_oracle) = make_task_envs(&cfg.env, Split::Test)?;
    let store = OracleContextStore::new(output);
    store.save(Split::Train, &train_oracle)?;
    store.save(Split::Test, &test_oracle)?;

    tracing::info!(
        env = %cfg.env.env_name,
        tasks = train_envs.len(),
        frames_per_task = cfg.trainer.train_frames_per_task,
        device = ?cfg.trainer.device,
        "Starting training"
    );

    let vec_env = Parallel::new(train_envs)?;
    let mut trainer = CausalDreamerTrainer::new(&cfg, vec_env)?
        .with_logger(logger)
        .with_oracle_context(&train_oracle);
    let summary = trainer.train()?;

    let final_dir = output.join("final");
    trainer.save(&final_dir)?;

    println!(
        "Trained {} iterations, {} frames, {} optimisation steps in {:.1}s",
        summary.iterations, summary.frames, summary.optim_steps, summary.elapsed_secs
    );
    for key in ["world_model/total_loss", "actor/loss", "context/mcc"] {
        if let Some(value) = summary.metrics.get(key) {
            println!("  {:<24} {:.4}", key, value);
        }
    }
    println!("Saved model to {}", final_dir.display());
    Ok(())
}

fn mcc(checkpoint: &Path, oracle_dir: &Path, split: Split, method: &str) -> Result<()> {
    let path = checkpoint.join("context.pt");
    let tensors = tch::Tensor::load_multi(&path).with_context(|| format!("loading {}", path.display()))?;
    let (_, table) = tensors
        .into_iter()
        .find(|(name, _)| name == "context_hat")
        .with_context(|| format!("no context table in {}", path.display()))?;
    let learned = tensor_to_array2(&table)?;

    let oracle = OracleContextStore::new(oracle_dir).load(split)?.mapv(f64::from);
    if oracle.nrows() != learned.nrows() {
        bail!(
            "oracle has {} tasks but the context table has {}",
            oracle.nrows(),
            learned.nrows()
        );
    }

    let result = mean_corr_coef(oracle.view(), learned.view(), method)?;
    println!("MCC ({}, {}): {:.4}", split, method, result.score);
    for (row, col) in result.permutation.rows.iter().zip(&result.permutation.cols) {
        println!(
            "  oracle[{}] <-> context[{}]  |r| = {:.4}",
            row,
            col,
            result.correlation[[*row, *col]]
        );
    }
    Ok(())
}

fn list_envs() {
    println!("Available environments:");
    println!();
    for name in ENV_NAMES {
        let about = match *name {
            "causal_chain" => "Linear dynamics over a chain of variables\n             Context: per-variable hidden factors",
            "contextual_cartpole" => "Continuous-force cart-pole\n             Context: gravity, pole mass, pole length",
            _ => "",
        };
        println!("  {:<22} {}", name, about);
        println!();
    }
}
