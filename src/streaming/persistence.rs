//! Soft-failing facade over a [`TileStorage`] backend
//!
//! Storage errors stop here: they are logged and turned into "absent" for
//! loads and `false` for saves so the residency manager keeps running.

use std::sync::Arc;

use crate::core::error::StorageError;
use crate::streaming::storage::TileStorage;
use crate::tile::{TileCoord, TileEntity};

/// Shared handle to the storage backend, cloned into load workers
#[derive(Clone)]
pub struct PersistencePipeline {
    storage: Arc<dyn TileStorage>,
}

impl PersistencePipeline {
    pub fn new(storage: Arc<dyn TileStorage>) -> Self {
        Self { storage }
    }

    /// Whether a tile has been persisted
    pub fn exists(&self, coord: TileCoord) -> bool {
        self.storage.exists(coord)
    }

    /// Load a tile; failures are logged and reported as absent
    pub fn load(&self, coord: TileCoord) -> Option<TileEntity> {
        match self.storage.load(coord) {
            Ok(tile) => tile,
            Err(e) => {
                log::error!("Couldn't load tile {}: {}", coord, e);
                None
            }
        }
    }

    /// Save tile data and objects; returns false on failure (tile stays dirty)
    pub fn save(&self, tile: &TileEntity) -> bool {
        match self.storage.save(tile) {
            Ok(()) => {
                log::trace!("Saved tile {}", tile.coord());
                true
            }
            Err(e) => {
                Self::report_save_error(tile.coord(), &e);
                false
            }
        }
    }

    /// Save only the dynamic objects of a tile
    pub fn save_dynamic_objects(&self, tile: &TileEntity) -> bool {
        match self.storage.save_dynamic_objects(tile) {
            Ok(()) => true,
            Err(e) => {
                Self::report_save_error(tile.coord(), &e);
                false
            }
        }
    }

    pub fn flush(&self) {
        if let Err(e) = self.storage.flush() {
            log::error!("Couldn't flush tile storage: {}", e);
        }
    }

    pub fn close(&self) {
        if let Err(e) = self.storage.close() {
            log::error!("Couldn't close tile storage: {}", e);
        }
    }

    fn report_save_error(coord: TileCoord, err: &StorageError) {
        match err {
            StorageError::LockContention(detail) => {
                log::error!(
                    "Couldn't save tile {}; already in use by another instance? ({})",
                    coord,
                    detail
                );
            }
            other => log::error!("Couldn't save tile {}: {}", coord, other),
        }
    }
}
