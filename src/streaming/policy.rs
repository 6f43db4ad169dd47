//! Caller-supplied residency predicates

use crate::tile::TileCoord;

/// Decides which tiles must stay resident
///
/// Both predicates default to false, so an empty impl never pins anything.
pub trait ResidencyPolicy {
    /// Tile is needed right now (near a player, a spawn anchor, ...)
    fn in_use(&self, _coord: TileCoord) -> bool {
        false
    }

    /// Tile lies in a region that is never unloaded
    fn in_protected_region(&self, _coord: TileCoord) -> bool {
        false
    }
}

/// Policy that exempts nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPolicy;

impl ResidencyPolicy for NoPolicy {}

/// Keeps a square of tiles around a focal tile in use
#[derive(Debug, Clone, Copy)]
pub struct FocusPolicy {
    pub focus: TileCoord,
    /// Chebyshev radius of the in-use square
    pub radius: u32,
    /// Chebyshev radius of the protected square around the origin
    pub protected_radius: Option<u32>,
}

impl FocusPolicy {
    pub fn new(focus: TileCoord, radius: u32) -> Self {
        Self {
            focus,
            radius,
            protected_radius: None,
        }
    }

    /// Protect every tile within `radius` of the origin tile
    pub fn with_protected_origin(mut self, radius: u32) -> Self {
        self.protected_radius = Some(radius);
        self
    }
}

impl ResidencyPolicy for FocusPolicy {
    fn in_use(&self, coord: TileCoord) -> bool {
        self.focus.distance(coord) <= self.radius
    }

    fn in_protected_region(&self, coord: TileCoord) -> bool {
        self.protected_radius
            .is_some_and(|r| TileCoord::new(0, 0).distance(coord) <= r)
    }
}
