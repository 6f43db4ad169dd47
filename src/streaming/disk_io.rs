//! Tile record serialization
//!
//! Tiles are stored as two records: the tile data (attribute layers and
//! population state) and a side record holding its dynamic objects, so the
//! objects can be written without re-encoding the attribute layers.
//! Both are rkyv archives compressed with LZ4.

use glam::DVec3;
use rkyv::{Archive, Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::error::StorageError;
use crate::tile::{DynamicObject, NibbleArray, TileCoord, TileEntity};

/// Serializable tile data
#[derive(Archive, Deserialize, Serialize)]
pub struct TileRecord {
    pub coord_x: i32,
    pub coord_z: i32,
    pub populated: bool,
    pub last_saved: u64,
    /// Packed nibble buffers, 2048 bytes each
    pub attributes: Vec<Vec<u8>>,
}

/// Serializable dynamic object
#[derive(Archive, Deserialize, Serialize)]
pub struct ObjectRecord {
    pub id: u64,
    pub kind: String,
    pub position: [f64; 3],
    pub keeps_region_loaded: bool,
    pub payload: Vec<u8>,
}

/// Serializable object list of one tile
#[derive(Archive, Deserialize, Serialize)]
pub struct ObjectsRecord {
    pub coord_x: i32,
    pub coord_z: i32,
    pub objects: Vec<ObjectRecord>,
}

impl From<&DynamicObject> for ObjectRecord {
    fn from(object: &DynamicObject) -> Self {
        Self {
            id: object.id,
            kind: object.kind.clone(),
            position: object.position.to_array(),
            keeps_region_loaded: object.keeps_region_loaded,
            payload: object.payload.clone(),
        }
    }
}

impl From<ObjectRecord> for DynamicObject {
    fn from(record: ObjectRecord) -> Self {
        Self {
            id: record.id,
            kind: record.kind,
            position: DVec3::from_array(record.position),
            keeps_region_loaded: record.keeps_region_loaded,
            payload: record.payload,
        }
    }
}

fn decompress_aligned(data: &[u8]) -> Result<rkyv::util::AlignedVec, StorageError> {
    let decompressed = lz4_flex::decompress_size_prepended(data)
        .map_err(|e| StorageError::Decode(format!("LZ4 decompression failed: {}", e)))?;
    // rkyv validation requires an aligned buffer
    let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(decompressed.len());
    aligned.extend_from_slice(&decompressed);
    Ok(aligned)
}

/// Encode tile data (objects excluded) to compressed bytes
pub fn encode_tile(tile: &TileEntity) -> Result<Vec<u8>, StorageError> {
    let record = TileRecord {
        coord_x: tile.coord().x,
        coord_z: tile.coord().z,
        populated: tile.is_populated(),
        last_saved: tile.last_saved(),
        attributes: tile.attributes.iter().map(|a| a.as_bytes().to_vec()).collect(),
    };
    let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(&record)
        .map_err(|e| StorageError::Decode(e.to_string()))?;
    Ok(lz4_flex::compress_prepend_size(&bytes))
}

/// Decode compressed tile data
///
/// Fails with [`StorageError::SizeMismatch`] if any attribute buffer is not
/// exactly one nibble array long.
pub fn decode_tile(data: &[u8]) -> Result<TileEntity, StorageError> {
    let aligned = decompress_aligned(data)?;
    let record = rkyv::from_bytes::<TileRecord, rkyv::rancor::Error>(&aligned)
        .map_err(|e| StorageError::Decode(e.to_string()))?;

    let attributes = record
        .attributes
        .into_iter()
        .map(NibbleArray::from_bytes)
        .collect::<Result<Vec<_>, _>>()?;

    let mut tile =
        TileEntity::with_attributes(TileCoord::new(record.coord_x, record.coord_z), attributes);
    tile.set_populated(record.populated);
    tile.set_last_saved(record.last_saved);
    Ok(tile)
}

/// Encode a tile's dynamic objects to compressed bytes
pub fn encode_objects(coord: TileCoord, objects: &[DynamicObject]) -> Result<Vec<u8>, StorageError> {
    let record = ObjectsRecord {
        coord_x: coord.x,
        coord_z: coord.z,
        objects: objects.iter().map(ObjectRecord::from).collect(),
    };
    let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(&record)
        .map_err(|e| StorageError::Decode(e.to_string()))?;
    Ok(lz4_flex::compress_prepend_size(&bytes))
}

/// Decode compressed dynamic objects
pub fn decode_objects(data: &[u8]) -> Result<(TileCoord, Vec<DynamicObject>), StorageError> {
    let aligned = decompress_aligned(data)?;
    let record = rkyv::from_bytes::<ObjectsRecord, rkyv::rancor::Error>(&aligned)
        .map_err(|e| StorageError::Decode(e.to_string()))?;
    let coord = TileCoord::new(record.coord_x, record.coord_z);
    Ok((coord, record.objects.into_iter().map(DynamicObject::from).collect()))
}

/// Decode a tile and its optional object record, checking both belong to `coord`
pub fn decode_tile_with_objects(
    coord: TileCoord,
    tile_data: &[u8],
    objects_data: Option<&[u8]>,
) -> Result<TileEntity, StorageError> {
    let mut tile = decode_tile(tile_data)?;
    if tile.coord() != coord {
        return Err(StorageError::Decode(format!(
            "tile record for {} stored at {}",
            tile.coord(),
            coord
        )));
    }
    if let Some(data) = objects_data {
        let (owner, objects) = decode_objects(data)?;
        if owner != coord {
            return Err(StorageError::Decode(format!(
                "object record for {} stored at {}",
                owner, coord
            )));
        }
        tile.set_objects(objects);
    }
    Ok(tile)
}

/// Get the file path for a tile's data
pub fn tile_path(base_dir: &Path, coord: TileCoord) -> PathBuf {
    // Group by x so a single directory does not collect the whole world
    // Format: base_dir/tiles/x_{x}/tile_{x}_{z}.ckt
    base_dir
        .join("tiles")
        .join(format!("x_{}", coord.x))
        .join(format!("tile_{}_{}.ckt", coord.x, coord.z))
}

/// Get the file path for a tile's object record
pub fn objects_path(base_dir: &Path, coord: TileCoord) -> PathBuf {
    tile_path(base_dir, coord).with_extension("cko")
}
