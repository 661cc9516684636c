//! In-memory logging backend.

use super::MetricLogger;
use std::collections::HashMap;
use std::sync::Mutex;

/// Keeps every `(step, value)` pair per metric name.
#[derive(Default)]
pub struct MemoryLogger {
    records: Mutex<HashMap<String, Vec<(u64, f64)>>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// All values logged under `name`, in logging order.
    pub fn series(&self, name: &str) -> Vec<(u64, f64)> {
        self.records
            .lock()
            .map(|records| records.get(name).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn last(&self, name: &str) -> Option<f64> {
        self.series(name).last().map(|&(_, v)| v)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .records
            .lock()
            .map(|records| records.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

impl MetricLogger for MemoryLogger {
    fn log_scalar(&self, name: &str, value: f64, step: u64) {
        if let Ok(mut records) = self.records.lock() {
            records.entry(name.to_string()).or_default().push((step, value));
        }
    }
}
