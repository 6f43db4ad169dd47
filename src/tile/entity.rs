//! In-memory tile state

use glam::DVec3;

use super::coord::TileCoord;
use super::nibble::NibbleArray;

/// Reach of the neighbor mask in tiles (5x5 square around the tile)
pub const NEIGHBOR_RADIUS: i32 = 2;

/// Bits of the neighbor mask that represent real neighbors (center excluded)
pub const ALL_NEIGHBORS: u32 = ((1 << 25) - 1) & !(1 << 12);

/// Bit index for a neighbor offset, or `None` when outside the mask
#[inline]
fn neighbor_bit(dx: i32, dz: i32) -> Option<u32> {
    if dx.abs() > NEIGHBOR_RADIUS || dz.abs() > NEIGHBOR_RADIUS {
        return None;
    }
    Some(((dx + NEIGHBOR_RADIUS) * 5 + (dz + NEIGHBOR_RADIUS)) as u32)
}

/// A mutable object spatially bound to a tile
///
/// Objects are opaque to the residency engine apart from the
/// `keeps_region_loaded` flag, which pins their tile in memory.
#[derive(Clone, Debug, PartialEq)]
pub struct DynamicObject {
    pub id: u64,
    pub kind: String,
    pub position: DVec3,
    /// Object forces permanent residency of its tile
    pub keeps_region_loaded: bool,
    /// Opaque serialized payload
    pub payload: Vec<u8>,
}

impl DynamicObject {
    /// Create an object with an empty payload
    pub fn new(id: u64, kind: impl Into<String>, position: DVec3) -> Self {
        Self {
            id,
            kind: kind.into(),
            position,
            keeps_region_loaded: false,
            payload: Vec::new(),
        }
    }
}

/// One resident (or about to be resident) tile
#[derive(Clone, Debug)]
pub struct TileEntity {
    coord: TileCoord,
    /// Per-cell attribute layers
    pub attributes: Vec<NibbleArray>,
    objects: Vec<DynamicObject>,
    dirty: bool,
    must_save: bool,
    neighbor_mask: u32,
    pending_updates: u32,
    /// World time the last deferred update finished
    last_update_time: Option<u64>,
    populated: bool,
    last_saved: u64,
    attached: bool,
}

impl TileEntity {
    /// Create an empty, unpopulated tile
    pub fn new(coord: TileCoord) -> Self {
        Self {
            coord,
            attributes: Vec::new(),
            objects: Vec::new(),
            dirty: false,
            must_save: false,
            neighbor_mask: 0,
            pending_updates: 0,
            last_update_time: None,
            populated: false,
            last_saved: 0,
            attached: false,
        }
    }

    /// Create a tile with the given attribute layers
    pub fn with_attributes(coord: TileCoord, attributes: Vec<NibbleArray>) -> Self {
        Self {
            attributes,
            ..Self::new(coord)
        }
    }

    /// Tile coordinate
    pub fn coord(&self) -> TileCoord {
        self.coord
    }

    // --- Dynamic objects ---

    /// Objects bound to this tile, in insertion order
    pub fn dynamic_objects(&self) -> &[DynamicObject] {
        &self.objects
    }

    /// Bind an object to this tile
    pub fn add_object(&mut self, object: DynamicObject) {
        self.objects.push(object);
        self.dirty = true;
    }

    /// Unbind an object by id
    pub fn remove_object(&mut self, id: u64) -> Option<DynamicObject> {
        let pos = self.objects.iter().position(|o| o.id == id)?;
        self.dirty = true;
        Some(self.objects.remove(pos))
    }

    /// Replace the object list without touching the dirty flag (used by decoders)
    pub fn set_objects(&mut self, objects: Vec<DynamicObject>) {
        self.objects = objects;
    }

    /// Whether any object pins this tile in memory
    pub fn keeps_region_loaded(&self) -> bool {
        self.objects.iter().any(|o| o.keeps_region_loaded)
    }

    /// Attach objects to the world (tile became resident)
    pub fn attach_objects(&mut self) {
        self.attached = true;
    }

    /// Detach objects from the world (tile is being unloaded)
    pub fn detach_objects(&mut self) {
        self.attached = false;
    }

    /// Whether objects are currently attached
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    // --- Save state ---

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Force the next flush to save this tile
    pub fn mark_must_save(&mut self) {
        self.must_save = true;
    }

    pub fn must_save(&self) -> bool {
        self.must_save
    }

    /// Clear dirty and must-save after a successful full save
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
        self.must_save = false;
    }

    pub fn last_saved(&self) -> u64 {
        self.last_saved
    }

    pub fn set_last_saved(&mut self, time: u64) {
        self.last_saved = time;
    }

    /// Whether a flush at `now` should write this tile
    ///
    /// A forced flush saves any tile holding objects that changed since the
    /// last save tick; a periodic one waits `autosave_interval` ticks.
    pub fn needs_save(&self, force: bool, now: u64, autosave_interval: u64) -> bool {
        if self.dirty || self.must_save {
            return true;
        }
        if self.objects.is_empty() {
            return false;
        }
        if force {
            now != self.last_saved
        } else {
            now >= self.last_saved.saturating_add(autosave_interval)
        }
    }

    // --- Neighbors ---

    /// Record that the neighbor at `(dx, dz)` is resident
    pub fn set_neighbor_loaded(&mut self, dx: i32, dz: i32) {
        if let Some(bit) = neighbor_bit(dx, dz) {
            self.neighbor_mask |= 1 << bit;
        }
    }

    /// Record that the neighbor at `(dx, dz)` left residency
    pub fn set_neighbor_unloaded(&mut self, dx: i32, dz: i32) {
        if let Some(bit) = neighbor_bit(dx, dz) {
            self.neighbor_mask &= !(1 << bit);
        }
    }

    /// Whether the neighbor at `(dx, dz)` is resident
    pub fn is_neighbor_loaded(&self, dx: i32, dz: i32) -> bool {
        neighbor_bit(dx, dz).is_some_and(|bit| self.neighbor_mask & (1 << bit) != 0)
    }

    /// Whether every neighbor within `radius` (at most 2) is resident
    pub fn are_neighbors_loaded(&self, radius: i32) -> bool {
        let radius = radius.clamp(0, NEIGHBOR_RADIUS);
        (-radius..=radius).all(|dx| {
            (-radius..=radius).all(|dz| (dx == 0 && dz == 0) || self.is_neighbor_loaded(dx, dz))
        })
    }

    /// Number of resident neighbors
    pub fn neighbor_count(&self) -> u32 {
        (self.neighbor_mask & ALL_NEIGHBORS).count_ones()
    }

    /// Raw 5x5 neighbor mask
    pub fn neighbor_mask(&self) -> u32 {
        self.neighbor_mask
    }

    // --- Deferred recomputation ---

    /// A deferred recomputation (e.g. lighting) was scheduled
    pub fn begin_deferred_update(&mut self) {
        self.pending_updates += 1;
    }

    /// A deferred recomputation finished at `now`
    pub fn finish_deferred_update(&mut self, now: u64) {
        self.pending_updates = self.pending_updates.saturating_sub(1);
        self.last_update_time = Some(now);
    }

    pub fn pending_updates(&self) -> u32 {
        self.pending_updates
    }

    pub fn last_update_time(&self) -> Option<u64> {
        self.last_update_time
    }

    /// Pending recomputation, or one finished within `window` ticks of `now`
    pub fn has_recent_update(&self, now: u64, window: u64) -> bool {
        self.pending_updates > 0
            || self
                .last_update_time
                .is_some_and(|finished| now.saturating_sub(finished) < window)
    }

    // --- Population ---

    pub fn is_populated(&self) -> bool {
        self.populated
    }

    pub fn set_populated(&mut self, populated: bool) {
        self.populated = populated;
    }
}
