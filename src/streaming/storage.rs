//! Storage backends for tile persistence
//!
//! Backends are shared between the primary context and the load workers, so
//! they are `Send + Sync` and serialize writes internally.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::core::error::StorageError;
use crate::streaming::disk_io::{
    decode_tile_with_objects, encode_objects, encode_tile, objects_path, tile_path,
};
use crate::tile::{TileCoord, TileEntity};

/// Name of the session stamp file guarding a disk world
pub const SESSION_LOCK_FILE: &str = "session.lock";

static SESSION_SEQ: AtomicU64 = AtomicU64::new(0);

/// Persisted tile store consumed by the persistence pipeline
pub trait TileStorage: Send + Sync {
    /// Whether a tile has been persisted (content is not read)
    fn exists(&self, coord: TileCoord) -> bool;

    /// Read and decode a tile; `Ok(None)` when nothing is stored
    fn load(&self, coord: TileCoord) -> Result<Option<TileEntity>, StorageError>;

    /// Persist tile data and its dynamic objects
    fn save(&self, tile: &TileEntity) -> Result<(), StorageError>;

    /// Persist only the dynamic objects of a tile
    fn save_dynamic_objects(&self, tile: &TileEntity) -> Result<(), StorageError>;

    /// Push buffered writes to the medium
    fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }

    /// Flush and release the store
    fn close(&self) -> Result<(), StorageError> {
        self.flush()
    }
}

/// Encoded tile data plus its optional object record
#[derive(Clone, Default)]
struct StoredTile {
    data: Vec<u8>,
    objects: Option<Vec<u8>>,
}

/// In-memory backend holding encoded records
#[derive(Default)]
pub struct MemoryStorage {
    tiles: Mutex<HashMap<TileCoord, StoredTile>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a tile as if it had been saved earlier
    pub fn insert(&self, tile: &TileEntity) -> Result<(), StorageError> {
        self.save(tile)
    }

    /// Replace the stored data of a tile with raw bytes
    pub fn insert_raw(&self, coord: TileCoord, data: Vec<u8>) {
        self.lock().insert(coord, StoredTile { data, objects: None });
    }

    /// Number of stored tiles
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TileCoord, StoredTile>> {
        self.tiles.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TileStorage for MemoryStorage {
    fn exists(&self, coord: TileCoord) -> bool {
        self.lock().contains_key(&coord)
    }

    fn load(&self, coord: TileCoord) -> Result<Option<TileEntity>, StorageError> {
        let stored = match self.lock().get(&coord) {
            Some(stored) => stored.clone(),
            None => return Ok(None),
        };
        decode_tile_with_objects(coord, &stored.data, stored.objects.as_deref()).map(Some)
    }

    fn save(&self, tile: &TileEntity) -> Result<(), StorageError> {
        let data = encode_tile(tile)?;
        let objects = encode_objects(tile.coord(), tile.dynamic_objects())?;
        self.lock().insert(
            tile.coord(),
            StoredTile {
                data,
                objects: Some(objects),
            },
        );
        Ok(())
    }

    fn save_dynamic_objects(&self, tile: &TileEntity) -> Result<(), StorageError> {
        let objects = encode_objects(tile.coord(), tile.dynamic_objects())?;
        // Objects of a tile that was never fully saved have nothing to attach to
        if let Some(stored) = self.lock().get_mut(&tile.coord()) {
            stored.objects = Some(objects);
        }
        Ok(())
    }
}

/// File-per-tile backend
///
/// A session stamp is written to `session.lock` when the store is opened.
/// Saves re-read the stamp and refuse to write once another process has
/// opened the same world.
pub struct DiskStorage {
    base_dir: PathBuf,
    session: u64,
    write_lock: Mutex<()>,
}

impl DiskStorage {
    /// Open (creating if needed) a world directory and claim its session lock
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        // Distinct per open even when the clock does not advance
        let session = (nanos ^ ((std::process::id() as u64) << 40))
            .wrapping_mul(0x9e37_79b9_7f4a_7c15)
            .wrapping_add(SESSION_SEQ.fetch_add(1, Ordering::Relaxed));
        std::fs::write(base_dir.join(SESSION_LOCK_FILE), session.to_le_bytes())?;

        log::info!("Opened tile storage at {} (session {})", base_dir.display(), session);

        Ok(Self {
            base_dir,
            session,
            write_lock: Mutex::new(()),
        })
    }

    /// World directory
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Session stamp written at open
    pub fn session(&self) -> u64 {
        self.session
    }

    fn check_session(&self) -> Result<(), StorageError> {
        let path = self.base_dir.join(SESSION_LOCK_FILE);
        let stamp = std::fs::read(&path)
            .map_err(|e| StorageError::LockContention(format!("{}: {}", path.display(), e)))?;
        if stamp.as_slice() != self.session.to_le_bytes() {
            return Err(StorageError::LockContention(format!(
                "{} was claimed by another session",
                path.display()
            )));
        }
        Ok(())
    }

    /// Write via a temporary file so readers never observe a torn record
    fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl TileStorage for DiskStorage {
    fn exists(&self, coord: TileCoord) -> bool {
        tile_path(&self.base_dir, coord).exists()
    }

    fn load(&self, coord: TileCoord) -> Result<Option<TileEntity>, StorageError> {
        let path = tile_path(&self.base_dir, coord);
        if !path.exists() {
            return Ok(None);
        }

        let data = std::fs::read(&path)?;
        let objects_file = objects_path(&self.base_dir, coord);
        let objects = if objects_file.exists() {
            Some(std::fs::read(&objects_file)?)
        } else {
            None
        };

        decode_tile_with_objects(coord, &data, objects.as_deref()).map(Some)
    }

    fn save(&self, tile: &TileEntity) -> Result<(), StorageError> {
        let data = encode_tile(tile)?;
        let objects = encode_objects(tile.coord(), tile.dynamic_objects())?;

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.check_session()?;
        Self::write_atomic(&tile_path(&self.base_dir, tile.coord()), &data)?;
        Self::write_atomic(&objects_path(&self.base_dir, tile.coord()), &objects)?;
        Ok(())
    }

    fn save_dynamic_objects(&self, tile: &TileEntity) -> Result<(), StorageError> {
        let objects = encode_objects(tile.coord(), tile.dynamic_objects())?;

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.check_session()?;
        Self::write_atomic(&objects_path(&self.base_dir, tile.coord()), &objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::{DynamicObject, NibbleArray};
    use glam::DVec3;

    fn sample_tile(x: i32, z: i32) -> TileEntity {
        let mut sky = NibbleArray::new();
        sky.fill(15);
        let mut tile = TileEntity::with_attributes(TileCoord::new(x, z), vec![sky]);
        tile.add_object(DynamicObject::new(1, "minecart", DVec3::new(1.0, 2.0, 3.0)));
        tile
    }

    #[test]
    fn test_memory_save_load() {
        let storage = MemoryStorage::new();
        let coord = TileCoord::new(2, 2);
        assert!(!storage.exists(coord));
        assert!(storage.load(coord).expect("load").is_none());

        storage.save(&sample_tile(2, 2)).expect("save");
        assert!(storage.exists(coord));

        let loaded = storage.load(coord).expect("load").expect("present");
        assert_eq!(loaded.coord(), coord);
        assert_eq!(loaded.dynamic_objects().len(), 1);
        assert_eq!(loaded.attributes[0].get(100), 15);
    }

    #[test]
    fn test_memory_objects_only_pass() {
        let storage = MemoryStorage::new();
        let mut tile = sample_tile(0, 0);
        storage.save(&tile).expect("save");

        tile.add_object(DynamicObject::new(2, "boat", DVec3::ZERO));
        storage.save_dynamic_objects(&tile).expect("save objects");

        let loaded = storage.load(tile.coord()).expect("load").expect("present");
        assert_eq!(loaded.dynamic_objects().len(), 2);
    }

    #[test]
    fn test_memory_corrupt_record_is_error() {
        let storage = MemoryStorage::new();
        storage.insert_raw(TileCoord::new(1, 1), vec![0xde, 0xad]);
        assert!(storage.exists(TileCoord::new(1, 1)));
        assert!(storage.load(TileCoord::new(1, 1)).is_err());
    }

    #[test]
    fn test_disk_save_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = DiskStorage::open(dir.path()).expect("open");
        let coord = TileCoord::new(-4, 9);

        assert!(!storage.exists(coord));
        storage.save(&sample_tile(-4, 9)).expect("save");
        assert!(storage.exists(coord));

        let loaded = storage.load(coord).expect("load").expect("present");
        assert_eq!(loaded.coord(), coord);
        assert_eq!(loaded.dynamic_objects()[0].kind, "minecart");
    }

    #[test]
    fn test_disk_reopen_keeps_tiles() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let storage = DiskStorage::open(dir.path()).expect("open");
            storage.save(&sample_tile(3, 3)).expect("save");
            storage.close().expect("close");
        }
        let storage = DiskStorage::open(dir.path()).expect("reopen");
        assert!(storage.load(TileCoord::new(3, 3)).expect("load").is_some());
    }

    #[test]
    fn test_disk_lock_contention() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = DiskStorage::open(dir.path()).expect("open");
        first.save(&sample_tile(0, 0)).expect("save before takeover");

        // Another session claims the world
        std::fs::write(
            dir.path().join(SESSION_LOCK_FILE),
            first.session().wrapping_add(1).to_le_bytes(),
        )
        .expect("overwrite stamp");

        let err = first.save(&sample_tile(0, 0)).unwrap_err();
        assert!(matches!(err, StorageError::LockContention(_)));
        let err = first.save_dynamic_objects(&sample_tile(0, 0)).unwrap_err();
        assert!(matches!(err, StorageError::LockContention(_)));

        // Reads are not guarded
        assert!(first.load(TileCoord::new(0, 0)).expect("load").is_some());
    }
}
