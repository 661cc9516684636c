//! Meta-task environment families for causal-meta.
//!
//! Each family draws one hidden parameter vector per task:
//! - `CausalChain` - sparse linear dynamics over a chain of variables
//! - `ContextualCartPole` - continuous cart-pole with per-task physics
//!
//! `make_task_envs` builds every task of a split together with the
//! `[task_num, context_dim]` oracle context matrix.

mod causal_chain;
mod contextual_cartpole;

pub use causal_chain::{CausalChain, ChainLayout};
pub use contextual_cartpole::{CartPoleParams, ContextualCartPole};

use causal_meta::config::{EnvConfig, Split};
use causal_meta::env::MetaEnv;
use causal_meta::{CausalMetaError, Result};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Registered environment family names.
pub const ENV_NAMES: &[&str] = &["causal_chain", "contextual_cartpole"];

/// Boxed task environment, as returned by [`make_task_envs`].
pub type TaskEnv = Box<dyn MetaEnv>;

fn split_seed(seed: u64, split: Split) -> u64 {
    match split {
        Split::Train => seed,
        Split::Test => seed.wrapping_add(1_000_003),
    }
}

/// Build the tasks of `split` and their oracle contexts.
///
/// Task parameters are drawn from a generator seeded by `config.seed` and the
/// split, so train and test tasks differ but are reproducible.
pub fn make_task_envs(config: &EnvConfig, split: Split) -> Result<(Vec<TaskEnv>, Array2<f32>)> {
    config.validate()?;
    let task_num = config.task_num(split);
    let seed = split_seed(config.seed, split);
    let mut rng = StdRng::seed_from_u64(seed);

    let envs: Vec<TaskEnv> = match config.env_name.as_str() {
        "causal_chain" => {
            let layout = ChainLayout {
                variable_num: config.variable_num,
                state_dim_per_variable: config.state_dim_per_variable,
                hidden_dim_per_variable: config.hidden_dim_per_variable,
            };
            (0..task_num)
                .map(|i| {
                    let hidden = CausalChain::sample_hidden(&layout, &mut rng);
                    let env_seed = seed.wrapping_add(i as u64);
                    CausalChain::new(layout, hidden, config.max_steps, env_seed)
                        .map(|env| Box::new(env) as TaskEnv)
                })
                .collect::<Result<_>>()?
        }
        "contextual_cartpole" => (0..task_num)
            .map(|i| {
                let params = CartPoleParams::sample(&mut rng);
                let env_seed = seed.wrapping_add(i as u64);
                Box::new(ContextualCartPole::new(params, config.max_steps, env_seed)) as TaskEnv
            })
            .collect(),
        other => {
            return Err(CausalMetaError::UnknownEnvironment {
                name: other.to_string(),
                known: ENV_NAMES.iter().map(|n| n.to_string()).collect(),
            })
        }
    };

    let oracle = oracle_context(&envs)?;
    tracing::debug!(
        env = %config.env_name,
        split = %split,
        task_num,
        context_dim = oracle.ncols(),
        "Built task environments"
    );
    Ok((envs, oracle))
}

/// Stack the per-task contexts into `[task_num, context_dim]`.
pub fn oracle_context<E: MetaEnv>(envs: &[E]) -> Result<Array2<f32>> {
    let dim = envs.first().map(|env| env.context().len()).unwrap_or(0);
    let mut flat = Vec::with_capacity(envs.len() * dim);
    for env in envs {
        let context = env.context();
        if context.len() != dim {
            return Err(CausalMetaError::ShapeMismatch {
                expected: vec![dim as i64],
                actual: vec![context.len() as i64],
            });
        }
        flat.extend(context.iter().copied());
    }
    Array2::from_shape_vec((envs.len(), dim), flat)
        .map_err(|e| CausalMetaError::EnvError(e.to_string()))
}
