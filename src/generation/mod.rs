//! Tile generation collaborator
//!
//! The residency manager calls a [`Generator`] when a tile exists neither in
//! memory nor in storage, and again to decorate freshly generated tiles once.
//! Structures and mobs are opaque to the manager; it only forwards queries.

pub mod noise_gen;

pub use noise_gen::{NoiseGenerator, NoiseParams};

use glam::IVec3;

use crate::core::error::GeneratorError;
use crate::tile::{TileCoord, TileEntity};

/// Spawn category queried through [`Generator::mob_spawn_table`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CreatureKind {
    Monster,
    Creature,
    Ambient,
    WaterCreature,
}

/// One weighted entry of a spawn table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnEntry {
    pub kind: String,
    pub weight: u32,
    pub min_group: u32,
    pub max_group: u32,
}

impl SpawnEntry {
    pub fn new(kind: impl Into<String>, weight: u32, min_group: u32, max_group: u32) -> Self {
        Self {
            kind: kind.into(),
            weight,
            min_group,
            max_group,
        }
    }
}

/// Procedural source of tiles
pub trait Generator {
    /// Name used in diagnostics
    fn name(&self) -> &str;

    /// Build a new tile at `coord`
    fn synthesize(&mut self, coord: TileCoord) -> Result<TileEntity, GeneratorError>;

    /// One-time enrichment of a freshly generated tile
    fn decorate(&mut self, tile: &mut TileEntity);

    /// Rebuild generator-side structure bookkeeping for a tile read from storage
    fn recreate_derived_structures(&mut self, _tile: &mut TileEntity) {}

    /// Creatures that may spawn at `pos`
    fn mob_spawn_table(&self, _kind: CreatureKind, _pos: IVec3) -> Vec<SpawnEntry> {
        Vec::new()
    }

    /// Closest known feature of type `kind` to `pos`
    fn nearest_feature(&self, _kind: &str, _pos: IVec3) -> Option<IVec3> {
        None
    }
}
