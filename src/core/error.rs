//! Error types for the residency engine

use thiserror::Error;

use crate::tile::TileCoord;

/// Error produced by a generator collaborator while synthesizing a tile.
pub type GeneratorError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by the 4-bit tile codec
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NibbleError {
    #[error("nibble arrays should be {expected} bytes, not {actual}")]
    SizeMismatch { expected: usize, actual: usize },
}

/// Errors raised by a storage backend
///
/// These never leave the persistence pipeline: they are logged there and
/// turned into "absent" (loads) or "still dirty" (saves).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("attribute buffer: {0}")]
    SizeMismatch(#[from] NibbleError),

    #[error("storage is locked by another session: {0}")]
    LockContention(String),
}

/// A tile could not be synthesized. Always fatal.
#[derive(Debug, Error)]
#[error("exception generating new tile at {}, {} (position hash {key}, generator {generator}): {source}", coord.x, coord.z)]
pub struct GenerationFailure {
    pub coord: TileCoord,
    pub key: u64,
    pub generator: String,
    #[source]
    pub source: GeneratorError,
}

/// Main error type for the engine
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationFailure),

    #[error("Tile {0} is not resident")]
    NotResident(TileCoord),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the process can continue after this error.
    ///
    /// Only generation failures are fatal: a requested coordinate cannot be
    /// served and callers have no tile to fall back on.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Generation(_))
    }
}
