//! Label remapping: rename instance ids through a lookup table.
//!
//! A [`RemapTable`] is a function from old ids to new ids. Several old ids
//! may share a new id (that is how the stitcher expresses a merge), but one
//! old id never maps to two targets.
//!
//! The table is kept sorted by key, so applying it to `n` values costs
//! `O(n log |table|)` binary searches after the one-time sort.

use ndarray::{Array, ArrayView, Dimension};

use crate::types::{IdList, LabelError};

/// Sorted `old id -> new id` lookup table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemapTable {
    keys: Vec<u32>,
    values: Vec<u32>,
}

impl RemapTable {
    /// Build a table from `(old, new)` pairs.
    ///
    /// Repeated identical pairs are collapsed.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::DuplicateKey`] if one old id is paired with
    /// two different new ids.
    pub fn new(pairs: impl IntoIterator<Item = (u32, u32)>) -> Result<Self, LabelError> {
        let mut pairs: Vec<(u32, u32)> = pairs.into_iter().collect();
        pairs.sort_unstable_by_key(|&(old, _)| old);

        let mut keys = Vec::with_capacity(pairs.len());
        let mut values = Vec::with_capacity(pairs.len());
        for (old, new) in pairs {
            match (keys.last(), values.last()) {
                (Some(&prev_key), Some(&prev_value)) if prev_key == old => {
                    if prev_value != new {
                        return Err(LabelError::DuplicateKey {
                            key: old,
                            first: prev_value,
                            second: new,
                        });
                    }
                }
                _ => {
                    keys.push(old);
                    values.push(new);
                }
            }
        }
        Ok(Self { keys, values })
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if the table has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Look up the new id for `old`.
    #[must_use]
    pub fn get(&self, old: u32) -> Option<u32> {
        self.keys
            .binary_search(&old)
            .ok()
            .map(|index| self.values[index])
    }

    /// Returns `true` if `old` has an entry.
    #[must_use]
    pub fn contains_key(&self, old: u32) -> bool {
        self.keys.binary_search(&old).is_ok()
    }

    /// Keys in ascending order.
    #[must_use]
    pub fn keys(&self) -> &[u32] {
        &self.keys
    }

    /// Iterate `(old, new)` pairs in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.keys.iter().copied().zip(self.values.iter().copied())
    }

    /// Apply the table to every element of `values`.
    ///
    /// Every element must have an entry; the output keeps the input shape.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::UnmappedValue`] for the first element (in
    /// logical order) without an entry. No partial output is produced.
    pub fn remap<D: Dimension>(
        &self,
        values: ArrayView<'_, u32, D>,
    ) -> Result<Array<u32, D>, LabelError> {
        let mapped = values
            .iter()
            .map(|&v| self.get(v).ok_or(LabelError::UnmappedValue(v)))
            .collect::<Result<Vec<u32>, _>>()?;
        Ok(Array::from_shape_vec(values.raw_dim(), mapped)?)
    }

    /// Apply the table, passing values without an entry through unchanged.
    #[must_use]
    pub fn remap_or_keep<D: Dimension>(&self, values: ArrayView<'_, u32, D>) -> Array<u32, D> {
        values.map(|&v| self.get(v).unwrap_or(v))
    }
}

/// Compact positive ids to a contiguous `1..=K` range.
///
/// Unique positive values are sorted and renumbered in order; background
/// stays `0`. Returns the compacted array and the original id of each new
/// id (`ids[k - 1]` was renamed to `k`). Compacting an already compact
/// array returns it unchanged.
#[must_use]
pub fn fast_remap<D: Dimension>(labels: ArrayView<'_, u32, D>) -> (Array<u32, D>, IdList) {
    let ids = unique_ids(labels.iter().copied());
    let compact = labels.map(|&v| {
        if v == 0 {
            0
        } else {
            // Every positive value is present in `ids` by construction.
            ids.binary_search(&v).map_or(0, sequential_id)
        }
    });
    (compact, ids)
}

/// Sorted unique positive values.
pub(crate) fn unique_ids(values: impl Iterator<Item = u32>) -> IdList {
    let mut ids: Vec<u32> = values.filter(|&v| v > 0).collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

#[allow(clippy::cast_possible_truncation)]
const fn sequential_id(index: usize) -> u32 {
    // The number of distinct u32 ids always fits in u32.
    (index + 1) as u32
}
