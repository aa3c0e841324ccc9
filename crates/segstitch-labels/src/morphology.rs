//! Morphological operators over label maps and binary masks.
//!
//! Every operator here is a loop over [`propagate::max_step`] with a
//! different "allowed" mask, so they share the same border handling and
//! double-buffered rounds.

use ndarray::{Array2, ArrayView2, Zip};

use crate::propagate;
use crate::types::{Convergence, LabelError, LabelMap, ensure_same_shape};

/// Default number of dilation rounds.
pub const DEFAULT_DILATE_ITERATIONS: usize = 3;

/// Default number of label expansion rounds.
pub const DEFAULT_EXPAND_ITERATIONS: usize = 5;

/// Rounds used to grow the border seed before hole filling.
pub const HOLE_SEED_ITERATIONS: usize = 3;

/// Grow `values` into the pixels allowed by `mask` for `iterations` rounds.
///
/// Pixels outside `mask` are never written. The growth radius is
/// `iterations` pixels (Chebyshev distance).
///
/// # Errors
///
/// Returns [`LabelError::ShapeMismatch`] if `values` and `mask` differ in
/// shape.
pub fn dilate<T>(
    values: ArrayView2<'_, T>,
    mask: ArrayView2<'_, bool>,
    iterations: usize,
) -> Result<Array2<T>, LabelError>
where
    T: Copy + Ord + Send + Sync,
{
    ensure_same_shape(values.shape(), mask.shape())?;
    let (out, _) = propagate::iterate(values.to_owned(), iterations, |current| {
        propagate::max_step(current, mask)
    });
    Ok(out)
}

/// Result of [`flood_fill`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloodFill {
    /// Pixels of `mask` reachable from the seed.
    pub filled: Array2<bool>,
    /// Round count and whether a fixed point was reached.
    pub convergence: Convergence,
}

/// Grow `seed` through `mask` until nothing changes.
///
/// Each round takes the 3×3 maximum of the current seed and keeps only
/// pixels inside `mask`. The loop is capped at `max(height, width)`
/// rounds; hitting the cap logs a warning and returns the partial fill.
///
/// # Errors
///
/// Returns [`LabelError::ShapeMismatch`] if `mask` and `seed` differ in
/// shape.
pub fn flood_fill(
    mask: ArrayView2<'_, bool>,
    seed: ArrayView2<'_, bool>,
) -> Result<FloodFill, LabelError> {
    ensure_same_shape(mask.shape(), seed.shape())?;
    let (height, width) = mask.dim();
    if mask.is_empty() {
        return Ok(FloodFill {
            filled: mask.to_owned(),
            convergence: Convergence {
                iterations: 0,
                converged: true,
            },
        });
    }

    let cap = height.max(width);
    let (filled, convergence) = propagate::iterate(seed.to_owned(), cap, |current| {
        let mut grown = propagate::max_filter(current);
        Zip::from(&mut grown).and(&mask).for_each(|g, &m| *g &= m);
        grown
    });
    if !convergence.converged {
        log::warn!("flood fill reached its {cap}-round cap on a {height}x{width} mask");
    }
    Ok(FloodFill {
        filled,
        convergence,
    })
}

/// Background pixels on the image border.
fn border_background(mask: ArrayView2<'_, bool>) -> Array2<bool> {
    let (height, width) = mask.dim();
    Array2::from_shape_fn(mask.raw_dim(), |(r, c)| {
        let on_border = r == 0 || c == 0 || r + 1 == height || c + 1 == width;
        on_border && !mask[[r, c]]
    })
}

/// Fill every background region not connected to the image border.
///
/// Background connectivity is 8-connected. Foreground pixels are kept;
/// enclosed background of any size becomes foreground.
///
/// # Errors
///
/// Returns [`LabelError::ShapeMismatch`] only if an internal shape check
/// fails, which cannot happen for a well-formed mask.
pub fn fill_holes(mask: ArrayView2<'_, bool>) -> Result<Array2<bool>, LabelError> {
    let background = mask.map(|&m| !m);
    let seed = dilate(
        border_background(mask).view(),
        background.view(),
        HOLE_SEED_ITERATIONS,
    )?;
    let outside = flood_fill(background.view(), seed.view())?;
    Ok(outside.filled.map(|&reachable| !reachable))
}

/// Fill enclosed holes of each instance with the surrounding label.
///
/// Hole pixels are background pixels not reachable from the image
/// border. Labels propagate into hole pixels only; a hole bordered by
/// several instances takes the largest of their ids.
///
/// # Errors
///
/// Returns [`LabelError::ShapeMismatch`] only if an internal shape check
/// fails.
pub fn fill_label_holes(labels: ArrayView2<'_, u32>) -> Result<LabelMap, LabelError> {
    let foreground = labels.map(|&v| v > 0);
    let filled = fill_holes(foreground.view())?;
    let holes = Zip::from(&filled)
        .and(&foreground)
        .map_collect(|&f, &fg| f && !fg);
    let hole_count = holes.iter().filter(|&&h| h).count();
    if hole_count == 0 {
        return Ok(labels.to_owned());
    }
    // Each round reaches at least one new hole pixel until the fixed point.
    let (out, _) = propagate::iterate(labels.to_owned(), hole_count + 1, |current| {
        propagate::max_step(current, holes.view())
    });
    log::debug!("filled {hole_count} hole pixels");
    Ok(out)
}

/// Pixels whose 3×3 maximum differs from their own label.
#[must_use]
pub fn find_boundaries(labels: ArrayView2<'_, u32>) -> Array2<bool> {
    let pooled = propagate::max_filter(labels);
    Zip::from(&pooled)
        .and(&labels)
        .map_collect(|&p, &v| p != v)
}

/// Foreground boundary pixels: a neighbour carries a larger label.
#[must_use]
pub fn find_hard_boundaries(labels: ArrayView2<'_, u32>) -> Array2<bool> {
    let mut boundaries = find_boundaries(labels);
    Zip::from(&mut boundaries)
        .and(&labels)
        .for_each(|b, &v| *b &= v > 0);
    boundaries
}

/// Grow labels into the background for `iterations` rounds.
///
/// Each round every pixel that is not a hard boundary takes its 3×3
/// maximum, so labels spread into background while touching instances
/// keep their own pixels. Where two labels compete for a background
/// pixel the larger id wins.
#[must_use]
pub fn expand_labels(labels: ArrayView2<'_, u32>, iterations: usize) -> LabelMap {
    let (out, _) = propagate::iterate(labels.to_owned(), iterations, |current| {
        let allowed = find_hard_boundaries(current).map(|&b| !b);
        propagate::max_step(current, allowed.view())
    });
    out
}
