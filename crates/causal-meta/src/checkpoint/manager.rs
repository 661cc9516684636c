//! Checkpoint directories with rotation.

use super::state::Checkpointable;
use crate::Result;
use std::fs;
use std::path::{Path, PathBuf};

const PREFIX: &str = "checkpoint_";

/// Configuration for checkpoint management.
#[derive(Clone, Debug)]
pub struct CheckpointConfig {
    /// Directory holding one sub-directory per checkpoint
    pub checkpoint_dir: PathBuf,
    /// Keep only the last N checkpoints (0 = keep all)
    pub keep_last: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: PathBuf::from("checkpoints"),
            keep_last: 3,
        }
    }
}

impl CheckpointConfig {
    pub fn new(checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            checkpoint_dir: checkpoint_dir.into(),
            ..Default::default()
        }
    }

    pub fn keep_last(mut self, n: usize) -> Self {
        self.keep_last = n;
        self
    }
}

/// Saves `checkpoint_{iteration:06}/` directories and prunes old ones.
#[derive(Debug)]
pub struct CheckpointManager {
    config: CheckpointConfig,
}

impl CheckpointManager {
    pub fn new(config: CheckpointConfig) -> Result<Self> {
        fs::create_dir_all(&config.checkpoint_dir)?;
        Ok(Self { config })
    }

    pub fn checkpoint_dir(&self) -> &Path {
        &self.config.checkpoint_dir
    }

    /// Save `trainable` for `iteration`, returning the checkpoint directory.
    pub fn save<T: Checkpointable>(&self, trainable: &T, iteration: u64) -> Result<PathBuf> {
        let dir = self
            .config
            .checkpoint_dir
            .join(format!("{}{:06}", PREFIX, iteration));
        fs::create_dir_all(&dir)?;
        trainable.save_to(&dir)?;
        tracing::info!(path = %dir.display(), iteration, "Saved checkpoint");

        if self.config.keep_last > 0 {
            self.cleanup_old_checkpoints()?;
        }
        Ok(dir)
    }

    /// Load the most recent checkpoint; `None` when there is none.
    pub fn load_latest<T: Checkpointable>(&self, trainable: &mut T) -> Result<Option<u64>> {
        match self.list_checkpoints()?.pop() {
            Some(dir) => {
                trainable.load_from(&dir)?;
                let iteration = iteration_of(&dir);
                tracing::info!(path = %dir.display(), iteration, "Loaded checkpoint");
                Ok(Some(iteration))
            }
            None => Ok(None),
        }
    }

    /// Checkpoint directories, oldest first.
    pub fn list_checkpoints(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.config.checkpoint_dir) {
            Ok(e) => e,
            Err(_) => return Ok(Vec::new()),
        };

        let mut checkpoints: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.is_dir()
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.starts_with(PREFIX))
                        .unwrap_or(false)
            })
            .collect();

        checkpoints.sort();
        Ok(checkpoints)
    }

    fn cleanup_old_checkpoints(&self) -> Result<()> {
        let mut checkpoints = self.list_checkpoints()?;

        while checkpoints.len() > self.config.keep_last {
            let old = checkpoints.remove(0);
            if let Err(e) = fs::remove_dir_all(&old) {
                tracing::warn!(path = %old.display(), "Failed to remove old checkpoint: {}", e);
            } else {
                tracing::debug!(path = %old.display(), "Removed old checkpoint");
            }
        }

        Ok(())
    }
}

fn iteration_of(path: &Path) -> u64 {
    path.file_name()
        .and_then(|s| s.to_str())
        .and_then(|s| s.strip_prefix(PREFIX))
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}
