//! Chunkhold - residency engine for tiled, persistent worlds

pub mod core;
pub mod events;
pub mod generation;
pub mod streaming;
pub mod tile;
