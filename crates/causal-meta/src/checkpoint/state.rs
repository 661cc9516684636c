//! Checkpoint metadata and the save/restore trait.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Components that persist themselves into a checkpoint directory.
pub trait Checkpointable {
    /// Write every file of the checkpoint into `dir` (already created).
    fn save_to(&self, dir: &Path) -> Result<()>;

    /// Restore from a directory written by [`Checkpointable::save_to`].
    fn load_from(&mut self, dir: &Path) -> Result<()>;
}

/// Contents of `meta.json` next to the weight files.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct CheckpointMetadata {
    /// Collection iteration the checkpoint was taken at
    pub iteration: u64,
    /// Environment frames collected so far
    pub frames: u64,
    pub optim_steps: u64,
    /// Last logged metrics
    pub metrics: BTreeMap<String, f64>,
    /// Seconds since the Unix epoch
    pub timestamp: u64,
    pub version: String,
}

impl CheckpointMetadata {
    pub fn new(iteration: u64, frames: u64, optim_steps: u64) -> Self {
        Self {
            iteration,
            frames,
            optim_steps,
            metrics: BTreeMap::new(),
            timestamp: unix_timestamp(),
            version: crate::VERSION.to_string(),
        }
    }

    pub fn with_metrics<'a>(mut self, metrics: impl IntoIterator<Item = (&'a String, &'a f64)>) -> Self {
        self.metrics = metrics.into_iter().map(|(k, v)| (k.clone(), *v)).collect();
        self
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

fn unix_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
