//! Fixed-capacity FIFO replay of trajectory segments.

use super::TrajectoryBatch;
use crate::{CausalMetaError, Result};
use tch::{Device, Kind, Tensor};

/// Ring buffer of `[L, ...]` segments stored on `device`.
///
/// Storage is allocated on the first `extend`, when the field shapes are
/// known; once full the oldest segments are overwritten first.
pub struct ReplayBuffer {
    capacity: i64,
    device: Device,
    storage: Option<TrajectoryBatch>,
    cursor: i64,
    len: i64,
}

impl ReplayBuffer {
    pub fn new(capacity: usize, device: Device) -> Self {
        Self {
            capacity: capacity as i64,
            device,
            storage: None,
            cursor: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Append every segment of `batch`, evicting the oldest when full.
    pub fn extend(&mut self, batch: &TrajectoryBatch) -> Result<()> {
        batch.validate()?;
        if self.capacity <= 0 {
            return Err(CausalMetaError::InvalidConfig(
                "replay capacity must be positive".to_string(),
            ));
        }

        let n = batch.batch_size();
        // only the newest `capacity` rows can survive
        let keep = n.min(self.capacity);
        let batch = batch.map(|t| t.narrow(0, n - keep, keep).to_device(self.device));

        let capacity = self.capacity;
        let device = self.device;
        let storage = self.storage.get_or_insert_with(|| {
            batch.map(|t| {
                let mut size = t.size();
                size[0] = capacity;
                Tensor::zeros(size.as_slice(), (t.kind(), device))
            })
        });

        for (dst, src) in storage.fields().into_iter().zip(batch.fields()) {
            if dst.size()[1..] != src.size()[1..] {
                return Err(CausalMetaError::ShapeMismatch {
                    expected: dst.size(),
                    actual: src.size(),
                });
            }
        }

        let positions = (Tensor::arange(keep, (Kind::Int64, device)) + self.cursor)
            .remainder(capacity);
        tch::no_grad(|| {
            for (dst, src) in storage.fields_mut().into_iter().zip(batch.fields()) {
                let _ = dst.index_copy_(0, &positions, src);
            }
        });

        self.cursor = (self.cursor + keep) % capacity;
        self.len = (self.len + keep).min(capacity);
        Ok(())
    }

    /// Uniformly sample `batch_size` segments with replacement.
    pub fn sample(&self, batch_size: usize) -> Result<TrajectoryBatch> {
        let storage = match &self.storage {
            Some(storage) if self.len > 0 => storage,
            _ => return Err(CausalMetaError::EmptyBuffer),
        };
        let idx = Tensor::randint(self.len, [batch_size as i64], (Kind::Int64, self.device));
        Ok(storage.map(|t| t.index_select(0, &idx)))
    }
}

impl std::fmt::Debug for ReplayBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayBuffer")
            .field("capacity", &self.capacity)
            .field("len", &self.len)
            .finish()
    }
}
