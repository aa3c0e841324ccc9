//! Instance encoding: label map -> per-instance indicator rows.
//!
//! A label map with `K` instances becomes a `K × pixels` boolean matrix
//! whose row `k` marks the pixels of the `k`-th smallest id. Two storage
//! strategies share one [`InstanceSet`] interface:
//!
//! - [`SparseInstances`]: row-compressed pixel indices. Memory is
//!   proportional to the foreground, independent of `K`.
//! - [`DenseInstances`]: a `K × pixels` `f32` indicator matrix, suited to
//!   a handful of instances where a plain matrix product is cheapest.
//!
//! Ids are compacted to `1..=K` first (see [`fast_remap`]) so rows can be
//! indexed by `id - 1`. The original ids come back as an [`IdList`].

use std::borrow::Cow;

use ndarray::{Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::remap::fast_remap;
use crate::types::IdList;

/// Logical shape reported for a sparse instance set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Layout {
    /// `K × (H·W)`: what the overlap engine multiplies.
    #[default]
    Flat,
    /// `K × H × W`.
    Spatial,
}

/// Row-compressed sparse indicator matrix.
///
/// Row `k` holds the ascending flattened (row-major) pixel indices of one
/// instance. Rows built from a label map are disjoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseInstances {
    offsets: Vec<usize>,
    pixels: Vec<usize>,
    height: usize,
    width: usize,
    layout: Layout,
}

impl SparseInstances {
    /// Build from rows of flattened pixel indices on an `height × width`
    /// grid. Each row is sorted and deduplicated; indices outside the grid
    /// are dropped.
    #[must_use]
    pub fn from_rows(rows: Vec<Vec<usize>>, height: usize, width: usize) -> Self {
        let pixel_count = height * width;
        let mut offsets = Vec::with_capacity(rows.len() + 1);
        let mut pixels = Vec::new();
        offsets.push(0);
        for mut row in rows {
            row.retain(|&p| p < pixel_count);
            row.sort_unstable();
            row.dedup();
            pixels.extend(row);
            offsets.push(pixels.len());
        }
        Self {
            offsets,
            pixels,
            height,
            width,
            layout: Layout::Flat,
        }
    }

    /// Number of instances (rows).
    #[must_use]
    pub fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Returns `true` if there are no instances.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Image height the columns refer to.
    #[must_use]
    pub const fn height(&self) -> usize {
        self.height
    }

    /// Image width the columns refer to.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Number of columns (`H·W`).
    #[must_use]
    pub const fn pixel_count(&self) -> usize {
        self.height * self.width
    }

    /// The layout this set was encoded with.
    #[must_use]
    pub const fn layout(&self) -> Layout {
        self.layout
    }

    /// Logical matrix shape for the encoded layout.
    #[must_use]
    pub fn shape(&self) -> Vec<usize> {
        match self.layout {
            Layout::Flat => vec![self.len(), self.pixel_count()],
            Layout::Spatial => vec![self.len(), self.height, self.width],
        }
    }

    /// Number of stored (true) entries.
    #[must_use]
    pub fn nnz(&self) -> usize {
        self.pixels.len()
    }

    /// Flattened pixel indices of instance `k`.
    ///
    /// Returns an empty slice for an out-of-range row.
    #[must_use]
    pub fn row(&self, k: usize) -> &[usize] {
        match (self.offsets.get(k), self.offsets.get(k + 1)) {
            (Some(&start), Some(&end)) => &self.pixels[start..end],
            _ => &[],
        }
    }

    /// Iterate the `(row, col)` coordinates of instance `k`.
    pub fn coords(&self, k: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
        let width = self.width.max(1);
        self.row(k).iter().map(move |&p| (p / width, p % width))
    }

    /// Pixel count of every instance (row sums).
    #[must_use]
    pub fn areas(&self) -> Vec<usize> {
        self.offsets.windows(2).map(|w| w[1] - w[0]).collect()
    }

    /// Column-compressed view: for each pixel, the rows containing it.
    ///
    /// Returned as `(offsets, rows)` with `offsets.len() == pixel_count + 1`.
    #[must_use]
    pub fn transpose(&self) -> (Vec<usize>, Vec<usize>) {
        let mut counts = vec![0usize; self.pixel_count() + 1];
        for &p in &self.pixels {
            counts[p + 1] += 1;
        }
        for i in 1..counts.len() {
            counts[i] += counts[i - 1];
        }
        let offsets = counts.clone();
        let mut cursor = counts;
        let mut rows = vec![0usize; self.pixels.len()];
        for k in 0..self.len() {
            for &p in self.row(k) {
                rows[cursor[p]] = k;
                cursor[p] += 1;
            }
        }
        (offsets, rows)
    }

    /// Dense `K × (H·W)` boolean matrix.
    #[must_use]
    pub fn to_dense_flat(&self) -> Array2<bool> {
        let mut dense = Array2::from_elem((self.len(), self.pixel_count()), false);
        for k in 0..self.len() {
            for &p in self.row(k) {
                dense[[k, p]] = true;
            }
        }
        dense
    }

    /// Dense `K × H × W` boolean array.
    #[must_use]
    pub fn to_dense_spatial(&self) -> Array3<bool> {
        let mut dense = Array3::from_elem((self.len(), self.height, self.width), false);
        for k in 0..self.len() {
            for (r, c) in self.coords(k) {
                dense[[k, r, c]] = true;
            }
        }
        dense
    }

    /// Same rows, reported with another logical layout.
    #[must_use]
    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }
}

/// Dense `K × (H·W)` indicator matrix with `0.0`/`1.0` entries.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseInstances {
    indicator: Array2<f32>,
    height: usize,
    width: usize,
}

impl DenseInstances {
    /// Number of instances (rows).
    #[must_use]
    pub fn len(&self) -> usize {
        self.indicator.nrows()
    }

    /// Returns `true` if there are no instances.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `K × (H·W)` indicator matrix.
    #[must_use]
    pub const fn indicator(&self) -> &Array2<f32> {
        &self.indicator
    }

    /// Number of columns (`H·W`).
    #[must_use]
    pub fn pixel_count(&self) -> usize {
        self.indicator.ncols()
    }

    /// Pixel count of every instance.
    #[must_use]
    pub fn areas(&self) -> Vec<f32> {
        self.indicator.sum_axis(Axis(1)).to_vec()
    }

    /// Convert to the row-compressed representation.
    #[must_use]
    pub fn to_sparse(&self) -> SparseInstances {
        let rows = self
            .indicator
            .outer_iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .filter(|&(_, &v)| v > 0.5)
                    .map(|(p, _)| p)
                    .collect()
            })
            .collect();
        SparseInstances::from_rows(rows, self.height, self.width)
    }
}

/// Instance set in whichever representation was chosen.
#[derive(Debug, Clone, PartialEq)]
pub enum InstanceSet {
    /// Dense indicator matrix.
    Dense(DenseInstances),
    /// Row-compressed indices.
    Sparse(SparseInstances),
}

/// Selects how [`InstanceSet::from_labels`] stores instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Representation {
    /// Dense while `K · pixels` stays within [`InstanceSet::DENSE_CELL_BUDGET`].
    #[default]
    Auto,
    /// Always dense.
    Dense,
    /// Always sparse.
    Sparse,
}

impl InstanceSet {
    /// Largest `K · pixels` product stored densely under [`Representation::Auto`].
    pub const DENSE_CELL_BUDGET: usize = 1 << 20;

    /// Encode a label map with the requested representation.
    #[must_use]
    pub fn from_labels(
        labels: ArrayView2<'_, u32>,
        representation: Representation,
    ) -> (Self, IdList) {
        let (sparse, ids) = encode(labels, Layout::Flat);
        let dense = match representation {
            Representation::Dense => true,
            Representation::Sparse => false,
            Representation::Auto => {
                sparse.len().saturating_mul(sparse.pixel_count()) <= Self::DENSE_CELL_BUDGET
            }
        };
        if dense {
            let indicator = sparse.to_dense_flat().mapv(|v| if v { 1.0 } else { 0.0 });
            let set = Self::Dense(DenseInstances {
                indicator,
                height: sparse.height(),
                width: sparse.width(),
            });
            (set, ids)
        } else {
            (Self::Sparse(sparse), ids)
        }
    }

    /// Number of instances.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Dense(d) => d.len(),
            Self::Sparse(s) => s.len(),
        }
    }

    /// Returns `true` if there are no instances.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of columns (`H·W`).
    #[must_use]
    pub fn pixel_count(&self) -> usize {
        match self {
            Self::Dense(d) => d.pixel_count(),
            Self::Sparse(s) => s.pixel_count(),
        }
    }

    /// Borrow as sparse rows, converting a dense set on the fly.
    #[must_use]
    pub fn as_sparse(&self) -> Cow<'_, SparseInstances> {
        match self {
            Self::Dense(d) => Cow::Owned(d.to_sparse()),
            Self::Sparse(s) => Cow::Borrowed(s),
        }
    }
}

/// Encode a label map into sparse instance rows.
///
/// Row `k` holds the pixels of `ids[k]`; ids are ascending. A map without
/// foreground yields zero rows and an empty id list.
#[must_use]
pub fn encode(labels: ArrayView2<'_, u32>, layout: Layout) -> (SparseInstances, IdList) {
    let (height, width) = labels.dim();
    let (compact, ids) = fast_remap(labels);

    let mut counts = vec![0usize; ids.len() + 1];
    for &v in &compact {
        if v > 0 {
            counts[v as usize] += 1;
        }
    }
    for k in 1..counts.len() {
        counts[k] += counts[k - 1];
    }
    let offsets = counts.clone();
    let mut cursor = counts;
    let mut pixels = vec![0usize; offsets.last().copied().unwrap_or(0)];
    // Raster order keeps every row ascending without a sort.
    for (p, &v) in compact.iter().enumerate() {
        if v > 0 {
            let row = v as usize - 1;
            pixels[cursor[row]] = p;
            cursor[row] += 1;
        }
    }

    let set = SparseInstances {
        offsets,
        pixels,
        height,
        width,
        layout,
    };
    (set, ids)
}

/// Dense one-hot encoding: `K × H × W`, plane `k` marks `ids[k]`.
#[must_use]
pub fn one_hot(labels: ArrayView2<'_, u32>) -> (Array3<bool>, IdList) {
    let (set, ids) = encode(labels, Layout::Spatial);
    (set.to_dense_spatial(), ids)
}
