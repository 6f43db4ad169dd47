//! Noise-based reference generator

use std::collections::HashMap;

use glam::{DVec3, IVec3};
use noise::{Fbm, MultiFractal, NoiseFn, Perlin};

use super::{CreatureKind, Generator, SpawnEntry};
use crate::core::error::GeneratorError;
use crate::tile::{DynamicObject, NibbleArray, TileCoord, TileEntity, TILE_WIDTH};

/// Attribute layer holding cell materials
pub const MATERIAL_LAYER: usize = 0;
/// Attribute layer holding sky light
pub const SKY_LIGHT_LAYER: usize = 1;

pub const AIR: u8 = 0;
pub const ROCK: u8 = 1;
pub const SOIL: u8 = 2;
pub const WATER: u8 = 3;

/// Feature type registered for ruin tiles
pub const RUIN: &str = "ruin";

/// Parameters controlling generation
#[derive(Clone, Debug)]
pub struct NoiseParams {
    pub seed: u32,
    pub scale: f64,        // Horizontal scale (larger = smoother)
    pub height_scale: f64, // Max surface height in cells
    pub octaves: u32,
    pub persistence: f64,
    pub lacunarity: f64,
    pub sea_level: i32,
    /// One tile in `ruin_rarity` carries a ruin
    pub ruin_rarity: u64,
}

impl Default for NoiseParams {
    fn default() -> Self {
        Self {
            seed: 12345,
            scale: 48.0,
            height_scale: 15.0,
            octaves: 4,
            persistence: 0.5,
            lacunarity: 2.0,
            sea_level: 5,
            ruin_rarity: 7,
        }
    }
}

/// Fractal Brownian motion heightfield generator
///
/// Tiles get a material layer and a sky light layer. Decoration scatters
/// shrub objects on soil; every `ruin_rarity`-th tile gets a ruin feature that
/// `nearest_feature` can find.
pub struct NoiseGenerator {
    params: NoiseParams,
    noise: Fbm<Perlin>,
    /// Ruin positions of tiles this generator has seen
    features: HashMap<TileCoord, IVec3>,
    next_object_id: u64,
}

impl NoiseGenerator {
    pub fn new(params: NoiseParams) -> Self {
        let noise = Fbm::<Perlin>::new(params.seed)
            .set_octaves(params.octaves as usize)
            .set_persistence(params.persistence)
            .set_lacunarity(params.lacunarity);

        Self {
            params,
            noise,
            features: HashMap::new(),
            next_object_id: 1,
        }
    }

    pub fn params(&self) -> &NoiseParams {
        &self.params
    }

    /// Surface height (in cells, 0..16) at a block column
    pub fn height_at(&self, block_x: i32, block_z: i32) -> i32 {
        let nx = block_x as f64 / self.params.scale;
        let nz = block_z as f64 / self.params.scale;
        let normalized = (self.noise.get([nx, nz]) + 1.0) / 2.0;
        ((normalized * self.params.height_scale) as i32).clamp(1, TILE_WIDTH - 1)
    }

    /// Deterministic per-tile hash
    fn tile_hash(&self, coord: TileCoord) -> u64 {
        // splitmix64 over the packed key and seed
        let mut z = coord.key() ^ ((self.params.seed as u64) << 17) ^ 0x9e37_79b9_7f4a_7c15;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }

    fn register_features(&mut self, coord: TileCoord) {
        if self.params.ruin_rarity == 0 || self.tile_hash(coord) % self.params.ruin_rarity != 0 {
            return;
        }
        let origin = coord.block_origin(0);
        let center = origin + IVec3::new(TILE_WIDTH / 2, 0, TILE_WIDTH / 2);
        let y = self.height_at(center.x, center.z);
        self.features.insert(coord, IVec3::new(center.x, y, center.z));
    }

    /// Number of tiles with a registered feature
    pub fn feature_count(&self) -> usize {
        self.features.len()
    }
}

impl Default for NoiseGenerator {
    fn default() -> Self {
        Self::new(NoiseParams::default())
    }
}

impl Generator for NoiseGenerator {
    fn name(&self) -> &str {
        "noise"
    }

    fn synthesize(&mut self, coord: TileCoord) -> Result<TileEntity, GeneratorError> {
        let origin = coord.block_origin(0);
        let mut material = NibbleArray::new();
        let mut sky = NibbleArray::new();

        for z in 0..TILE_WIDTH {
            for x in 0..TILE_WIDTH {
                let height = self.height_at(origin.x + x, origin.z + z);
                for y in 0..TILE_WIDTH {
                    let cell = if y < height - 1 {
                        ROCK
                    } else if y == height - 1 {
                        SOIL
                    } else if y < self.params.sea_level {
                        WATER
                    } else {
                        AIR
                    };
                    let light = if y >= height { 15 } else { 0 };
                    let (ux, uy, uz) = (x as usize, y as usize, z as usize);
                    material.set_xyz(ux, uy, uz, cell);
                    sky.set_xyz(ux, uy, uz, light);
                }
            }
        }

        self.register_features(coord);
        log::trace!("Synthesized tile {}", coord);

        let mut tile = TileEntity::with_attributes(coord, vec![material, sky]);
        tile.mark_dirty();
        Ok(tile)
    }

    fn decorate(&mut self, tile: &mut TileEntity) {
        let coord = tile.coord();
        let hash = self.tile_hash(coord);
        let origin = coord.block_origin(0);
        let shrubs = (hash % 3) as i32;

        for i in 0..shrubs {
            let x = ((hash >> (8 + i * 8)) & 0xf) as i32;
            let z = ((hash >> (12 + i * 8)) & 0xf) as i32;
            let y = self.height_at(origin.x + x, origin.z + z);
            let below = tile
                .attributes
                .get(MATERIAL_LAYER)
                .map(|m| m.get_xyz(x as usize, (y - 1) as usize, z as usize));
            if below != Some(SOIL) || y < self.params.sea_level {
                continue;
            }

            let id = self.next_object_id;
            self.next_object_id += 1;
            let position = DVec3::new(
                (origin.x + x) as f64 + 0.5,
                y as f64,
                (origin.z + z) as f64 + 0.5,
            );
            tile.add_object(DynamicObject::new(id, "shrub", position));
        }

        if let Some(&ruin) = self.features.get(&coord) {
            let id = self.next_object_id;
            self.next_object_id += 1;
            let mut marker = DynamicObject::new(id, RUIN, ruin.as_dvec3());
            marker.keeps_region_loaded = hash & 0x100 != 0;
            tile.add_object(marker);
        }
    }

    fn recreate_derived_structures(&mut self, tile: &mut TileEntity) {
        self.register_features(tile.coord());
    }

    fn mob_spawn_table(&self, kind: CreatureKind, pos: IVec3) -> Vec<SpawnEntry> {
        let underwater = pos.y < self.params.sea_level
            && self.height_at(pos.x, pos.z) <= pos.y;
        match kind {
            CreatureKind::Monster => vec![
                SpawnEntry::new("zombie", 100, 4, 4),
                SpawnEntry::new("skeleton", 100, 4, 4),
                SpawnEntry::new("spider", 100, 4, 4),
            ],
            CreatureKind::Creature if !underwater => vec![
                SpawnEntry::new("sheep", 12, 4, 4),
                SpawnEntry::new("pig", 10, 4, 4),
                SpawnEntry::new("cow", 8, 4, 4),
            ],
            CreatureKind::WaterCreature if underwater => vec![SpawnEntry::new("squid", 10, 4, 4)],
            CreatureKind::Ambient => vec![SpawnEntry::new("bat", 10, 8, 8)],
            _ => Vec::new(),
        }
    }

    fn nearest_feature(&self, kind: &str, pos: IVec3) -> Option<IVec3> {
        if kind != RUIN {
            return None;
        }
        self.features
            .values()
            .copied()
            .min_by_key(|p| {
                let d = *p - pos;
                (d.x as i64).pow(2) + (d.z as i64).pow(2)
            })
    }
}
