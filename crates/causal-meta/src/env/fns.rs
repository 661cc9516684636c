//! Named reward and termination functions of `(obs, action, next_obs)`.
//!
//! When configured they replace the world model's reward or continue head
//! during imagination.

use crate::{CausalMetaError, Result};
use tch::{Kind, Tensor};

/// `(obs, action, next_obs) -> reward [*, 1]`
pub type RewardFn = fn(&Tensor, &Tensor, &Tensor) -> Tensor;

/// `(obs, action, next_obs) -> terminated [*, 1]` as a float in `{0, 1}`
pub type TerminationFn = fn(&Tensor, &Tensor, &Tensor) -> Tensor;

static REWARD_FNS: [(&str, RewardFn); 2] = [("ones", ones), ("zeros", zeros)];
static TERMINATION_FNS: [(&str, TerminationFn); 1] = [("no_termination", zeros)];

fn column_like(next_obs: &Tensor, value: f64) -> Tensor {
    let mut shape = next_obs.size();
    if let Some(last) = shape.last_mut() {
        *last = 1;
    }
    Tensor::full(shape.as_slice(), value, (Kind::Float, next_obs.device()))
}

fn ones(_obs: &Tensor, _action: &Tensor, next_obs: &Tensor) -> Tensor {
    column_like(next_obs, 1.0)
}

fn zeros(_obs: &Tensor, _action: &Tensor, next_obs: &Tensor) -> Tensor {
    column_like(next_obs, 0.0)
}

pub fn reward_fn(name: &str) -> Result<RewardFn> {
    REWARD_FNS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, f)| *f)
        .ok_or_else(|| CausalMetaError::UnknownFunction(format!("reward function `{}`", name)))
}

pub fn termination_fn(name: &str) -> Result<TerminationFn> {
    TERMINATION_FNS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, f)| *f)
        .ok_or_else(|| {
            CausalMetaError::UnknownFunction(format!("termination function `{}`", name))
        })
}

/// External functions replacing the reward and continue heads.
#[derive(Clone, Copy, Default)]
pub struct ExternalFns {
    pub reward: Option<RewardFn>,
    pub termination: Option<TerminationFn>,
}

impl ExternalFns {
    pub fn from_names(reward: Option<&str>, termination: Option<&str>) -> Result<Self> {
        Ok(Self {
            reward: reward.map(reward_fn).transpose()?,
            termination: termination.map(termination_fn).transpose()?,
        })
    }
}

impl std::fmt::Debug for ExternalFns {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalFns")
            .field("reward", &self.reward.is_some())
            .field("termination", &self.termination.is_some())
            .finish()
    }
}

pub fn reward_fn_names() -> impl Iterator<Item = &'static str> {
    REWARD_FNS.iter().map(|(n, _)| *n)
}

pub fn termination_fn_names() -> impl Iterator<Item = &'static str> {
    TERMINATION_FNS.iter().map(|(n, _)| *n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::Device;

    #[test]
    fn test_ones_reward_shape() {
        let opts = (Kind::Float, Device::Cpu);
        let obs = Tensor::randn([3, 7, 4], opts);
        let action = Tensor::randn([3, 7, 2], opts);
        let f = reward_fn("ones").unwrap();
        let r = f(&obs, &action, &obs);
        assert_eq!(r.size(), vec![3, 7, 1]);
        assert_eq!(r.sum(Kind::Float).double_value(&[]), 21.0);
    }

    #[test]
    fn test_no_termination() {
        let obs = Tensor::randn([5, 4], (Kind::Float, Device::Cpu));
        let f = termination_fn("no_termination").unwrap();
        assert_eq!(f(&obs, &obs, &obs).sum(Kind::Float).double_value(&[]), 0.0);
    }

    #[test]
    fn test_unknown_name() {
        assert!(matches!(
            reward_fn("sparse"),
            Err(CausalMetaError::UnknownFunction(_))
        ));
        assert!(termination_fn("ones").is_err());
        assert!(reward_fn_names().any(|n| n == "ones"));
        assert_eq!(termination_fn_names().count(), 1);
    }

    #[test]
    fn test_external_fns_from_names() {
        let fns = ExternalFns::from_names(Some("ones"), None).unwrap();
        assert!(fns.reward.is_some());
        assert!(fns.termination.is_none());
        assert!(ExternalFns::from_names(None, Some("never")).is_err());
    }
}
