//! Optional per-detector pixel index remapping.
//!
//! A pixel map translates a detector-local pixel index to another index in
//! the same detector's local space, typically to reorder a vendor pixel
//! numbering into a row-major layout. The whole table is validated at load
//! time; a single out-of-range entry rejects the table, and the caller
//! falls back to identity mapping.

use nedhist_core::{Error, Result};

/// A validated pixel remapping table for one detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelMap {
    table: Vec<u32>,
}

impl PixelMap {
    /// Builds a map from a fully-parsed table.
    ///
    /// The table must have exactly one entry per local pixel, and every
    /// entry must itself be a valid local index (`< pixel_count`).
    ///
    /// # Errors
    /// Returns [`Error::PixelMapLength`] on a size mismatch, or
    /// [`Error::PixelMapOutOfRange`] naming the first offending entry. In
    /// both cases no partial table is retained.
    pub fn from_table(table: Vec<u32>, pixel_count: u32) -> Result<Self> {
        if table.len() != pixel_count as usize {
            return Err(Error::PixelMapLength {
                len: table.len(),
                size: pixel_count,
            });
        }
        for (index, &value) in table.iter().enumerate() {
            if value >= pixel_count {
                return Err(Error::PixelMapOutOfRange {
                    index,
                    value,
                    size: pixel_count,
                });
            }
        }
        Ok(Self { table })
    }

    /// Remaps a local pixel index. `local` must be below the pixel count
    /// the table was validated against.
    #[inline]
    #[must_use]
    pub fn map(&self, local: u32) -> u32 {
        self.table[local as usize]
    }

    /// Table length.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether the table is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_table_accepted() {
        let map = PixelMap::from_table(vec![3, 2, 1, 0], 4).unwrap();
        assert_eq!(map.map(0), 3);
        assert_eq!(map.map(3), 0);
        assert_eq!(map.len(), 4);
    }

    #[test]
    fn test_out_of_range_entry_rejects_whole_table() {
        let result = PixelMap::from_table(vec![0, 1, 4, 3], 4);
        assert!(matches!(
            result,
            Err(Error::PixelMapOutOfRange {
                index: 2,
                value: 4,
                size: 4
            })
        ));
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let result = PixelMap::from_table(vec![0, 1], 4);
        assert!(matches!(
            result,
            Err(Error::PixelMapLength { len: 2, size: 4 })
        ));
    }
}
