//! Eviction candidate queue
//!
//! Holds coordinates only; the cache keeps ownership of the tiles. Order is
//! irrelevant and duplicates collapse.

use std::collections::HashSet;

use crate::tile::TileCoord;

/// Set of tile coordinates queued for unload
#[derive(Debug, Default)]
pub struct EvictionQueue {
    queued: HashSet<TileCoord>,
}

impl EvictionQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a coordinate; returns false when it was already queued
    pub fn insert(&mut self, coord: TileCoord) -> bool {
        self.queued.insert(coord)
    }

    /// Drop a coordinate from the queue
    pub fn remove(&mut self, coord: TileCoord) -> bool {
        self.queued.remove(&coord)
    }

    /// Check if a coordinate is queued
    pub fn contains(&self, coord: TileCoord) -> bool {
        self.queued.contains(&coord)
    }

    /// Take up to `max` coordinates off the queue
    pub fn take_batch(&mut self, max: usize) -> Vec<TileCoord> {
        let batch: Vec<TileCoord> = self.queued.iter().take(max).copied().collect();
        for coord in &batch {
            self.queued.remove(coord);
        }
        batch
    }

    /// Number of queued coordinates
    pub fn len(&self) -> usize {
        self.queued.len()
    }

    /// Check if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    /// Drop every queued coordinate
    pub fn clear(&mut self) {
        self.queued.clear();
    }
}
