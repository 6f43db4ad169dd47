//! Residency cache for tiles
//!
//! The authoritative map from tile coordinate to resident [`TileEntity`].
//! Entities live in a slab indexed by packed coordinate keys. The slot of the
//! most recently looked-up tile is remembered so that repeated access to the
//! same tile (the focal tile, in practice) skips the hash lookup.

use std::cell::Cell;
use std::collections::HashMap;

use crate::tile::{TileCoord, TileEntity};

/// Map of resident tiles with a single-slot fast path
pub struct ResidencyCache {
    /// Packed key -> slab slot
    index: HashMap<u64, usize>,
    /// Entity storage; `None` marks a free slot
    slots: Vec<Option<TileEntity>>,
    /// Free slots available for reuse
    free: Vec<usize>,
    /// Last (key, slot) returned by a lookup
    last: Cell<Option<(u64, usize)>>,
}

impl ResidencyCache {
    /// Create an empty cache sized for `capacity` tiles
    pub fn new(capacity: usize) -> Self {
        Self {
            index: HashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            last: Cell::new(None),
        }
    }

    /// Slot for a key, trying the fast path first
    ///
    /// The remembered slot is only a hint: it is trusted after checking that
    /// it is still occupied by the same coordinate.
    fn slot_of(&self, coord: TileCoord) -> Option<usize> {
        let key = coord.key();
        if let Some((last_key, slot)) = self.last.get() {
            if last_key == key
                && self
                    .slots
                    .get(slot)
                    .and_then(Option::as_ref)
                    .is_some_and(|tile| tile.coord() == coord)
            {
                return Some(slot);
            }
        }
        let slot = *self.index.get(&key)?;
        self.last.set(Some((key, slot)));
        Some(slot)
    }

    /// Get a resident tile
    pub fn get(&self, coord: TileCoord) -> Option<&TileEntity> {
        let slot = self.slot_of(coord)?;
        self.slots[slot].as_ref()
    }

    /// Get a resident tile mutably
    pub fn get_mut(&mut self, coord: TileCoord) -> Option<&mut TileEntity> {
        let slot = self.slot_of(coord)?;
        self.slots[slot].as_mut()
    }

    /// Insert a tile, returning the tile it replaced
    pub fn put(&mut self, coord: TileCoord, tile: TileEntity) -> Option<TileEntity> {
        debug_assert_eq!(coord, tile.coord(), "tile stored under a foreign coordinate");
        let key = coord.key();

        if let Some(&slot) = self.index.get(&key) {
            return self.slots[slot].replace(tile);
        }

        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(tile);
                slot
            }
            None => {
                self.slots.push(Some(tile));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, slot);
        None
    }

    /// Remove a tile
    ///
    /// Clears the fast-path slot when it points at this tile.
    pub fn remove(&mut self, coord: TileCoord) -> Option<TileEntity> {
        let key = coord.key();
        if matches!(self.last.get(), Some((last_key, _)) if last_key == key) {
            self.last.set(None);
        }

        let slot = self.index.remove(&key)?;
        let tile = self.slots[slot].take();
        self.free.push(slot);
        tile
    }

    /// Check if a tile is resident
    ///
    /// Goes through the fast path, so a following `get_mut` of the same
    /// coordinate skips the hash lookup.
    pub fn contains_key(&self, coord: TileCoord) -> bool {
        self.slot_of(coord).is_some()
    }

    /// Number of resident tiles
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Check if no tile is resident
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Iterate over resident tiles
    pub fn values(&self) -> impl Iterator<Item = &TileEntity> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    /// Snapshot of resident coordinates
    ///
    /// Safe to iterate while tiles are removed through `remove`.
    pub fn coords(&self) -> Vec<TileCoord> {
        self.index.keys().map(|&key| TileCoord::from_key(key)).collect()
    }
}

impl Default for ResidencyCache {
    fn default() -> Self {
        Self::new(0)
    }
}
