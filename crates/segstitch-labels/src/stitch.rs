//! Identity reconciliation between two overlapping tiles.
//!
//! Tile B's instances are renamed to the ids of the tile A instances they
//! overlap. Several B instances may land on one A instance (a merge); one
//! B instance never lands on two A instances.

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::encode::{Layout, encode};
use crate::overlap::{OverlapMetric, overlap};
use crate::remap::RemapTable;
use crate::types::{LabelError, LabelMap, OverlapMatrix, ensure_same_shape};

/// Default overlap threshold for a match.
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// What happens to instances without a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StitchMode {
    /// Unmatched instances are kept as they are.
    #[default]
    Lenient,
    /// Unmatched instances in either tile are erased.
    Strict,
}

/// One accepted `B -> A` identity match.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchedPair {
    /// Instance id in tile A.
    pub a: u32,
    /// Instance id in tile B, renamed to `a`.
    pub b: u32,
    /// Overlap score between the two.
    pub score: f32,
}

/// Both tiles after stitching, plus the matches that were applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Stitched {
    /// Tile A; changed only in strict mode.
    pub tile_a: LabelMap,
    /// Tile B with matched instances renamed.
    pub tile_b: LabelMap,
    /// Accepted matches in ascending `(a, b)` order.
    pub pairs: Vec<MatchedPair>,
}

impl Stitched {
    fn untouched(
        tile_a: ArrayView2<'_, u32>,
        tile_b: ArrayView2<'_, u32>,
        mode: StitchMode,
    ) -> Self {
        match mode {
            StitchMode::Lenient => Self {
                tile_a: tile_a.to_owned(),
                tile_b: tile_b.to_owned(),
                pairs: Vec::new(),
            },
            StitchMode::Strict => Self {
                tile_a: Array2::zeros(tile_a.raw_dim()),
                tile_b: Array2::zeros(tile_b.raw_dim()),
                pairs: Vec::new(),
            },
        }
    }
}

/// For each column of `scores`, the row with the highest score strictly
/// above `threshold`. Ties keep the lowest row.
fn best_rows(scores: &OverlapMatrix, threshold: f32) -> Vec<Option<(usize, f32)>> {
    scores
        .columns()
        .into_iter()
        .map(|column| {
            let mut best: Option<(usize, f32)> = None;
            for (i, &score) in column.iter().enumerate() {
                if score > threshold && best.is_none_or(|(_, s)| score > s) {
                    best = Some((i, score));
                }
            }
            best
        })
        .collect()
}

/// Match the instances of `tile_b` onto those of `tile_a`.
///
/// A pair is accepted when its overlap is strictly greater than
/// `threshold`. When one B instance clears the threshold against several
/// A instances (only possible below `0.5` for IoU), the best-scoring A
/// instance wins and ties go to the lowest A id.
///
/// In strict mode every A instance that clears the threshold against some
/// B instance is kept, even when that B instance was renamed to a
/// better-scoring A instance.
///
/// If either tile has no foreground, or no pair is accepted, both tiles
/// are returned unchanged in lenient mode and zeroed in strict mode.
///
/// # Errors
///
/// Returns [`LabelError::ShapeMismatch`] if the tiles differ in shape.
pub fn stitch_tiles(
    tile_a: ArrayView2<'_, u32>,
    tile_b: ArrayView2<'_, u32>,
    threshold: f32,
    mode: StitchMode,
    metric: OverlapMetric,
) -> Result<Stitched, LabelError> {
    ensure_same_shape(tile_a.shape(), tile_b.shape())?;
    let (set_a, ids_a) = encode(tile_a, Layout::Flat);
    let (set_b, ids_b) = encode(tile_b, Layout::Flat);
    if set_a.is_empty() || set_b.is_empty() {
        log::debug!("stitch: empty tile, nothing to match");
        return Ok(Stitched::untouched(tile_a, tile_b, mode));
    }

    let scores = overlap(&set_a, &set_b, metric)?;
    let mut pairs: Vec<MatchedPair> = best_rows(&scores, threshold)
        .into_iter()
        .enumerate()
        .filter_map(|(j, best)| {
            best.map(|(i, score)| MatchedPair {
                a: ids_a[i],
                b: ids_b[j],
                score,
            })
        })
        .collect();
    pairs.sort_by_key(|pair| (pair.a, pair.b));
    log::debug!(
        "stitch: {} A instances, {} B instances, {} matches above {metric} {threshold}",
        ids_a.len(),
        ids_b.len(),
        pairs.len(),
    );
    if pairs.is_empty() {
        return Ok(Stitched::untouched(tile_a, tile_b, mode));
    }

    let b_to_a = RemapTable::new(pairs.iter().map(|pair| (pair.b, pair.a)))?;
    let (tile_a, tile_b) = match mode {
        StitchMode::Lenient => (tile_a.to_owned(), b_to_a.remap_or_keep(tile_b)),
        StitchMode::Strict => {
            // An A instance survives if it clears the threshold against
            // any B instance, not only the one that B was renamed to.
            let keep_a = RemapTable::new(std::iter::once((0, 0)).chain(
                scores.rows().into_iter().zip(&ids_a).map(|(row, &id)| {
                    let kept = row.iter().any(|&score| score > threshold);
                    (id, if kept { id } else { 0 })
                }),
            ))?;
            let keep_b = RemapTable::new(
                std::iter::once((0, 0))
                    .chain(ids_b.iter().map(|&id| (id, b_to_a.get(id).unwrap_or(0)))),
            )?;
            (keep_a.remap(tile_a)?, keep_b.remap(tile_b)?)
        }
    };
    Ok(Stitched {
        tile_a,
        tile_b,
        pairs,
    })
}

/// Stitch with IoU, returning only the two tiles.
///
/// # Errors
///
/// Returns [`LabelError::ShapeMismatch`] if the tiles differ in shape.
pub fn match_labels(
    tile_a: ArrayView2<'_, u32>,
    tile_b: ArrayView2<'_, u32>,
    threshold: f32,
    strict: bool,
) -> Result<(LabelMap, LabelMap), LabelError> {
    let mode = if strict {
        StitchMode::Strict
    } else {
        StitchMode::Lenient
    };
    let stitched = stitch_tiles(tile_a, tile_b, threshold, mode, OverlapMetric::Iou)?;
    Ok((stitched.tile_a, stitched.tile_b))
}
