//! Shared types for the segstitch label algebra.

use ndarray::{Array2, Array3, Array4};
use serde::{Deserialize, Serialize};

/// A 2-D instance label map. `0` is background, every positive value
/// identifies one instance. Ids need not be contiguous.
pub type LabelMap = Array2<u32>;

/// Original label values in ascending order, one per instance row.
pub type IdList = Vec<u32>;

/// Dense pairwise overlap scores (instances of A × instances of B).
///
/// Entries are `NaN` only when both instances of a pair are empty, which
/// cannot happen for instance sets built from a label map.
pub type OverlapMatrix = Array2<f32>;

/// Mean pixel location of one instance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Centroid {
    /// Row coordinate (pixels from the top edge).
    pub row: f32,
    /// Column coordinate (pixels from the left edge).
    pub col: f32,
}

impl Centroid {
    /// Create a new centroid.
    #[must_use]
    pub const fn new(row: f32, col: f32) -> Self {
        Self { row, col }
    }
}

/// Instance-centred crops of an intensity array.
///
/// `patches` is N × C × S × S, `masks` is N × S × S where each mask marks
/// the pixels of the instance the patch was centred on, and `ids` holds the
/// label value of each instance in the same order.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchBatch {
    /// Cropped intensity windows.
    pub patches: Array4<f32>,
    /// Indicator of the centred instance within each window.
    pub masks: Array3<bool>,
    /// Label value of each patch's instance.
    pub ids: IdList,
}

impl PatchBatch {
    /// Number of patches in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns `true` if the batch holds no patches.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Edge length of every patch in pixels.
    #[must_use]
    pub fn patch_size(&self) -> usize {
        self.masks.dim().1
    }
}

/// Outcome of a bounded fixed-point iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Convergence {
    /// Rounds actually executed.
    pub iterations: usize,
    /// Whether a round produced no change before the cap was reached.
    pub converged: bool,
}

/// Errors that can occur in label-map operations.
///
/// Shape and configuration problems are fatal. Non-convergence of the
/// iterative operators is not an error: it is logged and reported through
/// [`Convergence`] alongside a best-effort result.
#[derive(Debug, thiserror::Error)]
pub enum LabelError {
    /// Input rank or shape cannot be reconciled with what the operation needs.
    #[error("array of shape {shape:?} is not usable here: {reason}")]
    Shape {
        /// Shape of the offending array.
        shape: Vec<usize>,
        /// What the operation expected.
        reason: String,
    },

    /// Two inputs that must agree in shape do not.
    #[error("shape mismatch: {left:?} vs {right:?}")]
    ShapeMismatch {
        /// Shape of the first input.
        left: Vec<usize>,
        /// Shape of the second input.
        right: Vec<usize>,
    },

    /// A value passed to a remapping table has no entry.
    #[error("value {0} has no entry in the remapping table")]
    UnmappedValue(u32),

    /// A remapping table was built with one key mapped to two targets.
    #[error("remapping key {key} maps to both {first} and {second}")]
    DuplicateKey {
        /// The conflicting key.
        key: u32,
        /// Target seen first.
        first: u32,
        /// Conflicting target.
        second: u32,
    },

    /// A configuration mode string was not recognized.
    #[error("unsupported mode: {0}")]
    UnsupportedMode(String),

    /// The requested patch cannot fit inside the image.
    #[error("patch size {patch_size} does not fit in a {height}x{width} image")]
    PatchTooLarge {
        /// Requested patch edge length.
        patch_size: usize,
        /// Image height.
        height: usize,
        /// Image width.
        width: usize,
    },

    /// Post-processing configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl LabelError {
    pub(crate) fn shape(shape: &[usize], reason: impl Into<String>) -> Self {
        Self::Shape {
            shape: shape.to_vec(),
            reason: reason.into(),
        }
    }

    pub(crate) fn mismatch(left: &[usize], right: &[usize]) -> Self {
        Self::ShapeMismatch {
            left: left.to_vec(),
            right: right.to_vec(),
        }
    }
}

impl From<ndarray::ShapeError> for LabelError {
    fn from(e: ndarray::ShapeError) -> Self {
        Self::Shape {
            shape: Vec::new(),
            reason: e.to_string(),
        }
    }
}

/// Require two 2-D arrays to share a shape.
pub(crate) fn ensure_same_shape(left: &[usize], right: &[usize]) -> Result<(), LabelError> {
    if left == right {
        Ok(())
    } else {
        Err(LabelError::mismatch(left, right))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_patch_batch_reports_empty() {
        let batch = PatchBatch {
            patches: Array4::zeros((0, 1, 8, 8)),
            masks: Array3::from_elem((0, 8, 8), false),
            ids: Vec::new(),
        };
        assert!(batch.is_empty());
        assert_eq!(batch.len(), 0);
        assert_eq!(batch.patch_size(), 8);
    }

    #[test]
    fn mismatch_error_mentions_both_shapes() {
        let err = LabelError::mismatch(&[4, 4], &[4, 5]);
        let msg = err.to_string();
        assert!(msg.contains("[4, 4]"), "unexpected message: {msg}");
        assert!(msg.contains("[4, 5]"), "unexpected message: {msg}");
    }

    #[test]
    fn ensure_same_shape_accepts_equal() {
        assert!(ensure_same_shape(&[3, 7], &[3, 7]).is_ok());
        assert!(matches!(
            ensure_same_shape(&[3, 7], &[7, 3]),
            Err(LabelError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn convergence_serializes_round_trip() {
        let c = Convergence {
            iterations: 12,
            converged: true,
        };
        let json = serde_json::to_string(&c).unwrap();
        let back: Convergence = serde_json::from_str(&json).unwrap();
        assert_eq!(c, back);
    }
}
