//! Pairwise overlap between two instance sets.
//!
//! With `A` (`Ka × P`) and `B` (`Kb × P`) as indicator matrices:
//!
//! ```text
//! intersection = A · Bᵀ
//! union        = area(A)ᵀ + area(B) - intersection
//! IoU          = intersection / union
//! IoMA         = intersection / min(area(A)ᵢ, area(B)ⱼ)
//! ```
//!
//! The sparse path walks each row of `A` against a column-compressed copy
//! of `B`, so the cost is proportional to the foreground, not to `Ka·Kb·P`.
//! The dense path is a plain matrix product and is numerically
//! equivalent.

use ndarray::{Array2, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::encode::{DenseInstances, InstanceSet, Layout, SparseInstances, encode};
use crate::types::{LabelError, OverlapMatrix, ensure_same_shape};

/// Which normalization to apply to pairwise intersections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OverlapMetric {
    /// Intersection over union.
    #[default]
    Iou,
    /// Intersection over the smaller of the two areas. Scores a small
    /// instance fully contained in a large one as `1.0`.
    IntersectionOverMinimumArea,
}

impl std::fmt::Display for OverlapMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Iou => f.write_str("IoU"),
            Self::IntersectionOverMinimumArea => f.write_str("IoMA"),
        }
    }
}

/// Raw intersection counts `A · Bᵀ` as `f32`.
///
/// # Errors
///
/// Returns [`LabelError::ShapeMismatch`] if the sets cover different
/// pixel grids.
pub fn intersection(a: &SparseInstances, b: &SparseInstances) -> Result<Array2<f32>, LabelError> {
    ensure_same_shape(&[a.height(), a.width()], &[b.height(), b.width()])?;
    let (b_offsets, b_rows) = b.transpose();
    let kb = b.len();

    let mut out = Array2::<f32>::zeros((a.len(), kb));
    if kb == 0 {
        return Ok(out);
    }
    out.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(i, mut row)| {
            for &p in a.row(i) {
                for &j in &b_rows[b_offsets[p]..b_offsets[p + 1]] {
                    row[j] += 1.0;
                }
            }
        });
    Ok(out)
}

/// Intersection over union between every instance of `a` and of `b`.
///
/// # Errors
///
/// Returns [`LabelError::ShapeMismatch`] if the sets cover different
/// pixel grids.
pub fn iou(a: &SparseInstances, b: &SparseInstances) -> Result<OverlapMatrix, LabelError> {
    let inter = intersection(a, b)?;
    Ok(normalize(inter, &areas_f32(a), &areas_f32(b), OverlapMetric::Iou))
}

/// Intersection over minimum area between every instance of `a` and of `b`.
///
/// # Errors
///
/// Returns [`LabelError::ShapeMismatch`] if the sets cover different
/// pixel grids.
pub fn intersection_over_minimum_area(
    a: &SparseInstances,
    b: &SparseInstances,
) -> Result<OverlapMatrix, LabelError> {
    let inter = intersection(a, b)?;
    Ok(normalize(
        inter,
        &areas_f32(a),
        &areas_f32(b),
        OverlapMetric::IntersectionOverMinimumArea,
    ))
}

/// Dispatch on `metric`.
///
/// # Errors
///
/// Returns [`LabelError::ShapeMismatch`] if the sets cover different
/// pixel grids.
pub fn overlap(
    a: &SparseInstances,
    b: &SparseInstances,
    metric: OverlapMetric,
) -> Result<OverlapMatrix, LabelError> {
    let inter = intersection(a, b)?;
    Ok(normalize(inter, &areas_f32(a), &areas_f32(b), metric))
}

/// Dense counterpart of [`overlap`]: one matrix product of the indicators.
///
/// # Errors
///
/// Returns [`LabelError::ShapeMismatch`] if the sets have a different
/// number of columns.
pub fn dense_overlap(
    a: &DenseInstances,
    b: &DenseInstances,
    metric: OverlapMetric,
) -> Result<OverlapMatrix, LabelError> {
    ensure_same_shape(&[a.pixel_count()], &[b.pixel_count()])?;
    let inter = a.indicator().dot(&b.indicator().t());
    Ok(normalize(inter, &a.areas(), &b.areas(), metric))
}

impl InstanceSet {
    /// Overlap against `other`, using the dense product when both sides
    /// are dense and the sparse product otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::ShapeMismatch`] if the sets cover different
    /// pixel grids.
    pub fn overlap(
        &self,
        other: &Self,
        metric: OverlapMetric,
    ) -> Result<OverlapMatrix, LabelError> {
        match (self, other) {
            (Self::Dense(a), Self::Dense(b)) => dense_overlap(a, b, metric),
            _ => overlap(&self.as_sparse(), &other.as_sparse(), metric),
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn areas_f32(set: &SparseInstances) -> Vec<f32> {
    set.areas().into_iter().map(|a| a as f32).collect()
}

fn normalize(
    mut inter: Array2<f32>,
    areas_a: &[f32],
    areas_b: &[f32],
    metric: OverlapMetric,
) -> OverlapMatrix {
    for ((i, j), value) in inter.indexed_iter_mut() {
        let denominator = match metric {
            OverlapMetric::Iou => areas_a[i] + areas_b[j] - *value,
            OverlapMetric::IntersectionOverMinimumArea => areas_a[i].min(areas_b[j]),
        };
        *value /= denominator;
    }
    inter
}

/// Per-pixel overlap quality of `x` against `y`.
///
/// Each instance of `x` is painted with the sum of its IoUs against every
/// instance of `y`. Background, and every pixel when either map is empty,
/// is `0.0`.
///
/// # Errors
///
/// Returns [`LabelError::ShapeMismatch`] if the maps differ in shape.
pub fn iou_heatmap(
    x: ArrayView2<'_, u32>,
    y: ArrayView2<'_, u32>,
) -> Result<Array2<f32>, LabelError> {
    ensure_same_shape(x.shape(), y.shape())?;
    let (x_set, _) = encode(x, Layout::Flat);
    let (y_set, _) = encode(y, Layout::Flat);
    let mut heat = Array2::<f32>::zeros(x.raw_dim());
    if x_set.is_empty() || y_set.is_empty() {
        return Ok(heat);
    }

    let scores = iou(&x_set, &y_set)?;
    let totals = scores.sum_axis(Axis(1));
    for (k, &total) in totals.iter().enumerate() {
        for (r, c) in x_set.coords(k) {
            heat[[r, c]] = total;
        }
    }
    Ok(heat)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ndarray::{Array2, arr2};

    use super::*;
    use crate::encode::Representation;

    fn labels_a() -> Array2<u32> {
        arr2(&[
            [1, 1, 0, 0],
            [1, 1, 0, 0],
            [0, 0, 2, 2],
            [0, 0, 2, 2],
        ])
    }

    fn labels_b() -> Array2<u32> {
        arr2(&[
            [5, 5, 5, 0],
            [5, 5, 5, 0],
            [0, 0, 0, 0],
            [0, 0, 0, 8],
        ])
    }

    /// Deterministic pseudo-random label map with up to `max_id` instances.
    fn scrambled(height: usize, width: usize, seed: u32, max_id: u32) -> Array2<u32> {
        let mut state = seed;
        Array2::from_shape_fn((height, width), |_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 16) % (max_id + 1)
        })
    }

    #[test]
    fn iou_of_known_overlap() {
        let (a, _) = encode(labels_a().view(), Layout::Flat);
        let (b, _) = encode(labels_b().view(), Layout::Flat);
        let m = iou(&a, &b).unwrap();
        assert_eq!(m.dim(), (2, 2));
        // Instance 1 (4 px) vs 5 (6 px): intersection 4, union 6.
        assert!((m[[0, 0]] - 4.0 / 6.0).abs() < 1e-6);
        // Instance 2 (4 px) vs 8 (1 px): intersection 1, union 4.
        assert!((m[[1, 1]] - 0.25).abs() < 1e-6);
        assert!(m[[0, 1]].abs() < 1e-6);
        assert!(m[[1, 0]].abs() < 1e-6);
    }

    #[test]
    fn ioma_scores_containment_as_one() {
        let (a, _) = encode(labels_a().view(), Layout::Flat);
        let (b, _) = encode(labels_b().view(), Layout::Flat);
        let m = intersection_over_minimum_area(&a, &b).unwrap();
        assert!((m[[0, 0]] - 1.0).abs() < 1e-6);
        assert!((m[[1, 1]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn self_iou_has_unit_diagonal() {
        let labels = scrambled(12, 9, 7, 6);
        let (set, ids) = encode(labels.view(), Layout::Flat);
        let m = iou(&set, &set).unwrap();
        for k in 0..ids.len() {
            assert!((m[[k, k]] - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn dense_and_sparse_iou_agree() {
        let x = scrambled(31, 64, 1, 49);
        let y = scrambled(31, 64, 2, 49);
        for metric in [OverlapMetric::Iou, OverlapMetric::IntersectionOverMinimumArea] {
            let (xd, _) = InstanceSet::from_labels(x.view(), Representation::Dense);
            let (yd, _) = InstanceSet::from_labels(y.view(), Representation::Dense);
            let (xs, _) = InstanceSet::from_labels(x.view(), Representation::Sparse);
            let (ys, _) = InstanceSet::from_labels(y.view(), Representation::Sparse);
            let dense = xd.overlap(&yd, metric).unwrap();
            let sparse = xs.overlap(&ys, metric).unwrap();
            assert_eq!(dense.dim(), sparse.dim());
            for (d, s) in dense.iter().zip(sparse.iter()) {
                assert!((d - s).abs() < 1e-5, "dense {d} vs sparse {s} ({metric})");
            }
        }
    }

    #[test]
    fn intersection_counts_shared_pixels() {
        let (a, _) = encode(labels_a().view(), Layout::Flat);
        let (b, _) = encode(labels_b().view(), Layout::Flat);
        let inter = intersection(&a, &b).unwrap();
        assert_eq!(inter, arr2(&[[4.0, 0.0], [0.0, 1.0]]));
    }

    #[test]
    fn mixed_representations_use_sparse_path() {
        let (xd, _) = InstanceSet::from_labels(labels_a().view(), Representation::Dense);
        let (ys, _) = InstanceSet::from_labels(labels_b().view(), Representation::Sparse);
        let m = xd.overlap(&ys, OverlapMetric::Iou).unwrap();
        assert!((m[[0, 0]] - 4.0 / 6.0).abs() < 1e-6);
    }

    #[test]
    fn mismatched_grids_are_rejected() {
        let (a, _) = encode(labels_a().view(), Layout::Flat);
        let (b, _) = encode(Array2::<u32>::ones((3, 3)).view(), Layout::Flat);
        assert!(matches!(iou(&a, &b), Err(LabelError::ShapeMismatch { .. })));
    }

    #[test]
    fn empty_set_gives_empty_matrix() {
        let (a, _) = encode(labels_a().view(), Layout::Flat);
        let (b, _) = encode(Array2::<u32>::zeros((4, 4)).view(), Layout::Flat);
        let m = iou(&a, &b).unwrap();
        assert_eq!(m.dim(), (2, 0));
    }

    #[test]
    fn heatmap_paints_iou_sums() {
        let heat = iou_heatmap(labels_a().view(), labels_b().view()).unwrap();
        assert!((heat[[0, 0]] - 4.0 / 6.0).abs() < 1e-6);
        assert!((heat[[3, 3]] - 0.25).abs() < 1e-6);
        assert!(heat[[0, 3]].abs() < 1e-6);
    }

    #[test]
    fn heatmap_of_empty_map_is_zero() {
        let empty = Array2::<u32>::zeros((4, 4));
        let heat = iou_heatmap(labels_a().view(), empty.view()).unwrap();
        assert!(heat.iter().all(|&v| v == 0.0));
    }
}
