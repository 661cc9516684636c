//! Trajectory segments shared by the collector, replay buffer and losses.

use crate::{CausalMetaError, Result};
use tch::{Device, Kind, Tensor};

/// Batch of trajectory segments, every field shaped `[B, T, ...]`.
///
/// Scalars per step (`reward`, `terminated`, `done`, `task_idx`, `mask`) keep
/// a trailing dim of 1. `task_idx` is `Int64`, everything else `Float`.
#[derive(Debug)]
pub struct TrajectoryBatch {
    pub observation: Tensor,
    pub action: Tensor,
    pub reward: Tensor,
    pub next_observation: Tensor,
    pub terminated: Tensor,
    pub done: Tensor,
    pub task_idx: Tensor,
    /// 1 for real steps, 0 for padding
    pub mask: Tensor,
}

impl TrajectoryBatch {
    pub fn fields(&self) -> [&Tensor; 8] {
        [
            &self.observation,
            &self.action,
            &self.reward,
            &self.next_observation,
            &self.terminated,
            &self.done,
            &self.task_idx,
            &self.mask,
        ]
    }

    pub fn fields_mut(&mut self) -> [&mut Tensor; 8] {
        [
            &mut self.observation,
            &mut self.action,
            &mut self.reward,
            &mut self.next_observation,
            &mut self.terminated,
            &mut self.done,
            &mut self.task_idx,
            &mut self.mask,
        ]
    }

    fn from_fields(fields: [Tensor; 8]) -> Self {
        let [observation, action, reward, next_observation, terminated, done, task_idx, mask] =
            fields;
        Self {
            observation,
            action,
            reward,
            next_observation,
            terminated,
            done,
            task_idx,
            mask,
        }
    }

    /// Apply `f` to every field.
    pub fn map<F: Fn(&Tensor) -> Tensor>(&self, f: F) -> Self {
        Self::from_fields(self.fields().map(f))
    }

    pub fn shallow_clone(&self) -> Self {
        self.map(Tensor::shallow_clone)
    }

    pub fn to_device(&self, device: Device) -> Self {
        self.map(|t| t.to_device(device))
    }

    pub fn batch_size(&self) -> i64 {
        self.observation.size()[0]
    }

    pub fn length(&self) -> i64 {
        self.observation.size()[1]
    }

    pub fn device(&self) -> Device {
        self.observation.device()
    }

    /// Number of real (unpadded) steps.
    pub fn valid_steps(&self) -> f64 {
        self.mask.sum(Kind::Float).double_value(&[])
    }

    /// Check every field is at least 3-D and shares `[B, T]`.
    pub fn validate(&self) -> Result<()> {
        let lead = self.observation.size();
        if lead.len() < 3 {
            return Err(CausalMetaError::ShapeMismatch {
                expected: vec![-1, -1, -1],
                actual: lead,
            });
        }
        for field in self.fields() {
            let size = field.size();
            if size.len() < 3 || size[..2] != lead[..2] {
                return Err(CausalMetaError::ShapeMismatch {
                    expected: lead[..2].to_vec(),
                    actual: size,
                });
            }
        }
        Ok(())
    }
}

/// Cut `[N, S, ...]` rollouts into `[N * ceil(S / L), L, ...]` segments.
///
/// The tail of each rollout is zero padded with `mask = 0`.
pub fn split_segments(rollout: &TrajectoryBatch, batch_length: i64) -> Result<TrajectoryBatch> {
    if batch_length <= 0 {
        return Err(CausalMetaError::InvalidConfig(format!(
            "batch_length must be positive, got {}",
            batch_length
        )));
    }
    rollout.validate()?;

    let steps = rollout.length();
    let segments = (steps + batch_length - 1) / batch_length;
    let pad = segments * batch_length - steps;

    Ok(rollout.map(|t| {
        let mut size = t.size();
        let padded = if pad > 0 {
            let mut pad_size = size.clone();
            pad_size[1] = pad;
            let zeros = Tensor::zeros(pad_size.as_slice(), (t.kind(), t.device()));
            Tensor::cat(&[t.shallow_clone(), zeros], 1)
        } else {
            t.shallow_clone()
        };
        size[0] *= segments;
        size[1] = batch_length;
        padded.reshape(size.as_slice())
    }))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Rollout where `reward` holds a unique id per step.
    pub(crate) fn rollout(n: i64, s: i64, obs: i64, act: i64) -> TrajectoryBatch {
        let opts = (Kind::Float, Device::Cpu);
        TrajectoryBatch {
            observation: Tensor::randn([n, s, obs], opts),
            action: Tensor::randn([n, s, act], opts),
            reward: Tensor::arange(n * s, opts).reshape([n, s, 1]),
            next_observation: Tensor::randn([n, s, obs], opts),
            terminated: Tensor::zeros([n, s, 1], opts),
            done: Tensor::zeros([n, s, 1], opts),
            task_idx: Tensor::arange(n, (Kind::Int64, Device::Cpu))
                .reshape([n, 1, 1])
                .repeat([1, s, 1]),
            mask: Tensor::ones([n, s, 1], opts),
        }
    }

    #[test]
    fn test_split_with_padding() {
        let batch = split_segments(&rollout(2, 5, 4, 2), 2).unwrap();
        assert_eq!(batch.batch_size(), 6);
        assert_eq!(batch.length(), 2);
        assert_eq!(batch.observation.size(), vec![6, 2, 4]);
        assert_eq!(batch.valid_steps(), 10.0);

        let mask = Vec::<f32>::try_from(&batch.mask.reshape([-1])).unwrap();
        assert_eq!(&mask[4..6], &[1.0, 0.0]);
        assert_eq!(&mask[10..12], &[1.0, 0.0]);

        let task = Vec::<i64>::try_from(&batch.task_idx.select(1, 0).reshape([-1])).unwrap();
        assert_eq!(task, vec![0, 0, 0, 1, 1, 1]);
        assert_eq!(batch.task_idx.kind(), Kind::Int64);
    }

    #[test]
    fn test_split_exact() {
        let batch = split_segments(&rollout(3, 4, 4, 2), 4).unwrap();
        assert_eq!(batch.batch_size(), 3);
        assert_eq!(batch.valid_steps(), 12.0);
    }

    #[test]
    fn test_validate_catches_mismatch() {
        let mut batch = rollout(2, 3, 4, 2);
        batch.action = Tensor::zeros([2, 4, 2], (Kind::Float, Device::Cpu));
        assert!(batch.validate().is_err());
        assert!(split_segments(&batch, 2).is_err());
        assert!(split_segments(&rollout(2, 3, 4, 2), 0).is_err());
    }
}
