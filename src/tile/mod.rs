//! Tile data: coordinates, packed attribute arrays and per-tile state

pub mod coord;
pub mod entity;
pub mod nibble;

pub use coord::{TileCoord, TILE_SHIFT, TILE_WIDTH};
pub use entity::{DynamicObject, TileEntity, NEIGHBOR_RADIUS};
pub use nibble::{NibbleArray, NIBBLE_BYTES, NIBBLE_CELLS};
