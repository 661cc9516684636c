use causal_meta::config::{EnvConfig, Split};
use causal_meta::vector::{Parallel, TaskVecEnv};
use causal_meta::CausalMetaError;
use causal_meta_envs::{make_task_envs, ENV_NAMES};
use ndarray::Array2;

fn config(name: &str) -> EnvConfig {
    EnvConfig {
        meta_train_task_num: 4,
        meta_test_task_num: 2,
        max_steps: 20,
        ..EnvConfig::new(name)
    }
}

#[test]
fn test_causal_chain_shapes() {
    let mut cfg = config("causal_chain");
    cfg.variable_num = 3;
    cfg.state_dim_per_variable = 2;
    cfg.hidden_dim_per_variable = 2;

    let (envs, oracle) = make_task_envs(&cfg, Split::Train).unwrap();
    assert_eq!(envs.len(), 4);
    assert_eq!(oracle.dim(), (4, 6));
    assert_eq!(envs[0].observation_space().dim(), 6);
    assert_eq!(envs[0].action_space().dim(), 3);
    assert!(oracle.iter().all(|v| (-1.0..1.0).contains(v)));

    let (test_envs, test_oracle) = make_task_envs(&cfg, Split::Test).unwrap();
    assert_eq!(test_envs.len(), 2);
    assert_ne!(test_oracle.row(0), oracle.row(0));
}

#[test]
fn test_contexts_are_reproducible() {
    for name in ENV_NAMES {
        let cfg = config(name);
        let (_, a) = make_task_envs(&cfg, Split::Train).unwrap();
        let (_, b) = make_task_envs(&cfg, Split::Train).unwrap();
        assert_eq!(a, b, "{}", name);

        let mut other = cfg.clone();
        other.seed += 1;
        let (_, c) = make_task_envs(&other, Split::Train).unwrap();
        assert_ne!(a, c, "{}", name);
    }
}

#[test]
fn test_cartpole_oracle_matches_envs() {
    let (envs, oracle) = make_task_envs(&config("contextual_cartpole"), Split::Train).unwrap();
    assert_eq!(oracle.ncols(), 3);
    for (env, row) in envs.iter().zip(oracle.rows()) {
        assert_eq!(env.context(), row.to_owned());
    }
}

#[test]
fn test_unknown_env_name() {
    let result = make_task_envs(&config("mountain_car"), Split::Train);
    match result {
        Err(CausalMetaError::UnknownEnvironment { name, known }) => {
            assert_eq!(name, "mountain_car");
            assert_eq!(known, ENV_NAMES);
        }
        other => panic!("expected an unknown environment error, got {:?}", other.err()),
    }
}

#[test]
fn test_seed_near_max_wraps() {
    for name in ENV_NAMES {
        let mut cfg = config(name);
        cfg.seed = u64::MAX;
        let (envs, oracle) = make_task_envs(&cfg, Split::Train).unwrap();
        assert_eq!(envs.len(), 4);
        assert_eq!(oracle.nrows(), 4);
        assert!(make_task_envs(&cfg, Split::Test).is_ok(), "{}", name);
    }
}

#[test]
fn test_vectorised_rollout() {
    let (envs, oracle) = make_task_envs(&config("causal_chain"), Split::Train).unwrap();
    let mut vec_env = Parallel::new(envs).unwrap();
    assert_eq!(vec_env.oracle_context().unwrap(), oracle);

    let obs = vec_env.reset(Some(0)).unwrap();
    assert_eq!(obs.dim(), (4, 3));
    for _ in 0..25 {
        let step = vec_env.step(&Array2::zeros((4, 3))).unwrap();
        assert_eq!(step.rewards.len(), 4);
        assert!(step.rewards.iter().all(|r| *r <= 0.0));
    }
}
