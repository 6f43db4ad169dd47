//! Tile residency: caching, async loading, eviction and persistence

pub mod cache;
pub mod disk_io;
pub mod eviction;
pub mod loader;
pub mod persistence;
pub mod policy;
pub mod provider;
pub mod storage;

pub use cache::ResidencyCache;
pub use disk_io::{
    decode_objects, decode_tile, decode_tile_with_objects, encode_objects, encode_tile,
    objects_path, tile_path,
};
pub use eviction::EvictionQueue;
pub use loader::{AsyncLoader, LoadResult};
pub use persistence::PersistencePipeline;
pub use policy::{FocusPolicy, NoPolicy, ResidencyPolicy};
pub use provider::{AcquireStatus, Completion, ResidencyStats, TileProvider};
pub use storage::{DiskStorage, MemoryStorage, TileStorage, SESSION_LOCK_FILE};
