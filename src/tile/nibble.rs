//! Packed 4-bit attribute storage
//!
//! A `NibbleArray` holds one 4-bit value for each of the 4096 cells of a
//! 16x16x16 section, two cells per byte. Even indices live in the low nibble,
//! odd indices in the high nibble.

use crate::core::error::NibbleError;

/// Number of cells in one array
pub const NIBBLE_CELLS: usize = 4096;

/// Backing buffer size in bytes
pub const NIBBLE_BYTES: usize = NIBBLE_CELLS / 2;

/// Fixed-size 4-bit-per-cell array
#[derive(Clone, PartialEq, Eq)]
pub struct NibbleArray {
    data: Box<[u8; NIBBLE_BYTES]>,
}

impl NibbleArray {
    /// Create a zero-filled array
    pub fn new() -> Self {
        Self {
            data: Box::new([0; NIBBLE_BYTES]),
        }
    }

    /// Wrap a raw buffer, which must be exactly [`NIBBLE_BYTES`] long
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, NibbleError> {
        let actual = bytes.len();
        let data: Box<[u8; NIBBLE_BYTES]> = bytes
            .into_boxed_slice()
            .try_into()
            .map_err(|_| NibbleError::SizeMismatch {
                expected: NIBBLE_BYTES,
                actual,
            })?;
        Ok(Self { data })
    }

    /// Linear index for a cell, `(y << 8) | (z << 4) | x`
    ///
    /// Each component is masked to `[0, 16)`.
    #[inline]
    pub fn index(x: usize, y: usize, z: usize) -> usize {
        ((y & 15) << 8) | ((z & 15) << 4) | (x & 15)
    }

    /// Value at a linear index
    #[inline]
    pub fn get(&self, index: usize) -> u8 {
        let index = index & (NIBBLE_CELLS - 1);
        let shift = (index & 1) << 2;
        (self.data[index >> 1] >> shift) & 0x0F
    }

    /// Store a value at a linear index; the value is truncated to 4 bits
    #[inline]
    pub fn set(&mut self, index: usize, value: u8) {
        let index = index & (NIBBLE_CELLS - 1);
        let shift = (index & 1) << 2;
        let byte = &mut self.data[index >> 1];
        *byte = (*byte & !(0x0F << shift)) | ((value & 0x0F) << shift);
    }

    /// Value at a cell position
    #[inline]
    pub fn get_xyz(&self, x: usize, y: usize, z: usize) -> u8 {
        self.get(Self::index(x, y, z))
    }

    /// Store a value at a cell position
    #[inline]
    pub fn set_xyz(&mut self, x: usize, y: usize, z: usize, value: u8) {
        self.set(Self::index(x, y, z), value);
    }

    /// Set every cell to `value`
    pub fn fill(&mut self, value: u8) {
        let v = value & 0x0F;
        self.data.fill(v | (v << 4));
    }

    /// Raw packed bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..]
    }

    /// Consume into the raw packed bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.data.to_vec()
    }
}

impl Default for NibbleArray {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for NibbleArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let non_zero = self.data.iter().filter(|&&b| b != 0).count();
        f.debug_struct("NibbleArray")
            .field("non_zero_bytes", &non_zero)
            .finish()
    }
}
