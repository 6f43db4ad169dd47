//! Tile coordinates and cache key packing

use glam::IVec3;

/// Width of a tile in blocks along x and z
pub const TILE_WIDTH: i32 = 16;

/// Shift converting a block coordinate to a tile coordinate
pub const TILE_SHIFT: u32 = 4;

/// Integer coordinate identifying a tile in the world grid
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    pub x: i32,
    pub z: i32,
}

impl TileCoord {
    /// Create a new tile coordinate
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Pack into a 64-bit cache key (x in the low word, z in the high word)
    ///
    /// The packing is a bijection between `(i32, i32)` and `u64`.
    pub const fn key(self) -> u64 {
        (self.x as u32 as u64) | ((self.z as u32 as u64) << 32)
    }

    /// Inverse of [`TileCoord::key`]
    pub const fn from_key(key: u64) -> Self {
        Self {
            x: key as u32 as i32,
            z: (key >> 32) as u32 as i32,
        }
    }

    /// Tile containing the given block column
    pub const fn from_block(block_x: i32, block_z: i32) -> Self {
        Self {
            x: block_x >> TILE_SHIFT,
            z: block_z >> TILE_SHIFT,
        }
    }

    /// Tile containing the given block position
    pub fn from_block_pos(pos: IVec3) -> Self {
        Self::from_block(pos.x, pos.z)
    }

    /// Minimum block corner of this tile at height `y`
    pub fn block_origin(self, y: i32) -> IVec3 {
        IVec3::new(self.x * TILE_WIDTH, y, self.z * TILE_WIDTH)
    }

    /// Coordinate shifted by `(dx, dz)`
    pub const fn offset(self, dx: i32, dz: i32) -> Self {
        Self {
            x: self.x.wrapping_add(dx),
            z: self.z.wrapping_add(dz),
        }
    }

    /// Chebyshev distance in tiles
    pub fn distance(self, other: TileCoord) -> u32 {
        let dx = (self.x as i64 - other.x as i64).unsigned_abs();
        let dz = (self.z as i64 - other.z as i64).unsigned_abs();
        dx.max(dz) as u32
    }
}

impl std::fmt::Display for TileCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.x, self.z)
    }
}
