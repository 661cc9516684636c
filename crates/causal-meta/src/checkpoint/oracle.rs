//! Ground-truth task contexts persisted per split.

use crate::config::Split;
use crate::{CausalMetaError, Result};
use ndarray::Array2;
use std::path::{Path, PathBuf};
use tch::{Device, Kind, Tensor};

/// Reads and writes `{split}_oracle_context.pt` tensors under one directory.
#[derive(Clone, Debug)]
pub struct OracleContextStore {
    dir: PathBuf,
}

impl OracleContextStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, split: Split) -> PathBuf {
        self.dir.join(format!("{}_oracle_context.pt", split))
    }

    pub fn exists(&self, split: Split) -> bool {
        self.path(split).is_file()
    }

    /// Save a `[task_num, context_dim]` matrix.
    pub fn save(&self, split: Split, context: &Array2<f32>) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let (rows, cols) = context.dim();
        let data: Vec<f32> = context.iter().copied().collect();
        let tensor = Tensor::from_slice(&data).reshape([rows as i64, cols as i64]);
        let path = self.path(split);
        tensor.save(&path)?;
        tracing::debug!(path = %path.display(), rows, cols, "Saved oracle context");
        Ok(path)
    }

    pub fn load(&self, split: Split) -> Result<Array2<f32>> {
        let tensor = Tensor::load(self.path(split))?
            .to_device(Device::Cpu)
            .to_kind(Kind::Float)
            .contiguous();
        let size = tensor.size();
        if size.len() != 2 {
            return Err(CausalMetaError::ShapeMismatch {
                expected: vec![-1, -1],
                actual: size,
            });
        }
        let data = Vec::<f32>::try_from(&tensor.reshape([-1]))?;
        Array2::from_shape_vec((size[0] as usize, size[1] as usize), data).map_err(|_| {
            CausalMetaError::ShapeMismatch {
                expected: vec![size[0], size[1]],
                actual: vec![-1],
            }
        })
    }
}
