//! Residency tuning parameters

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::error::Error;

/// Tuning knobs for a [`TileProvider`](crate::streaming::TileProvider).
///
/// All fields have defaults, so a JSON file only needs the values it changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResidencyConfig {
    /// Maximum eviction candidates processed per `drain_batch` call
    pub drain_batch_size: usize,
    /// Maximum full saves per non-forced `flush_all` call
    pub flush_batch_size: usize,
    /// Ticks after a deferred recomputation during which a tile cannot be queued
    pub recency_window: u64,
    /// Whether pending or recent deferred recomputation blocks eviction
    pub defer_unload_for_pending_updates: bool,
    /// Ticks between periodic saves of tiles holding dynamic objects
    pub autosave_interval: u64,
    /// Blocking I/O threads used for async loads
    pub io_threads: usize,
    /// Populate a tile only once its +x, +z and +xz neighbors are resident
    pub populate_requires_neighbors: bool,
    /// Initial capacity of the residency cache
    pub initial_capacity: usize,
}

impl Default for ResidencyConfig {
    fn default() -> Self {
        Self {
            drain_batch_size: 100,
            flush_batch_size: 24,
            recency_window: 20,
            defer_unload_for_pending_updates: true,
            autosave_interval: 600,
            io_threads: 2,
            populate_requires_neighbors: false,
            initial_capacity: 1024,
        }
    }
}

impl ResidencyConfig {
    /// Parse a config from JSON text
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let config: ResidencyConfig =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&json)
    }

    /// Reject values that would stall the engine
    pub fn validate(&self) -> Result<(), Error> {
        if self.drain_batch_size == 0 {
            return Err(Error::Config("drain_batch_size must be at least 1".into()));
        }
        if self.flush_batch_size == 0 {
            return Err(Error::Config("flush_batch_size must be at least 1".into()));
        }
        if self.io_threads == 0 {
            return Err(Error::Config("io_threads must be at least 1".into()));
        }
        Ok(())
    }
}
