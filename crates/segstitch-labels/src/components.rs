//! Connected components of a binary mask.
//!
//! This module defines the [`ComponentLabeler`] trait for pluggable
//! labelling strategies and the [`Connectivity`] enum for selecting one at
//! runtime.
//!
//! # Propagation
//!
//! Every foreground pixel is seeded with its raster index plus one, then
//! each round replaces every foreground pixel with the 3×3 maximum of its
//! foreground neighbours. At the fixed point all pixels of an
//! 8-connected component share the component's largest seed. The number
//! of rounds is a fixed bound ([`DEFAULT_ITERATIONS`]): a component whose
//! 8-connected geodesic diameter exceeds it ends up split into several
//! ids. That case is logged and reported, never silently extended.
//!
//! # Exact
//!
//! Union-find labelling via `imageproc`, relabelled to the same
//! max-seed convention so both strategies agree whenever propagation
//! converges.

use std::collections::HashMap;

use image::{GrayImage, Luma};
use imageproc::region_labelling::Connectivity as PixelConnectivity;
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

use crate::propagate;
use crate::types::{Convergence, LabelError, LabelMap};

/// Default number of propagation rounds.
pub const DEFAULT_ITERATIONS: usize = 32;

/// Selects which connected-components algorithm to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connectivity {
    /// Fixed-round 3×3 max propagation.
    Propagation {
        /// Round cap.
        iterations: usize,
    },
    /// Exact 8-connected union-find labelling.
    Exact,
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::Propagation {
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

impl std::fmt::Display for Connectivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Propagation { iterations } => write!(f, "propagation({iterations})"),
            Self::Exact => f.write_str("exact"),
        }
    }
}

/// Labelled components plus how the labelling loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Components {
    /// One id per component; background is `0`.
    pub labels: LabelMap,
    /// Round count and whether a fixed point was reached.
    pub convergence: Convergence,
}

/// Trait for connected-components strategies.
pub trait ComponentLabeler {
    /// Label the 8-connected components of `mask`.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError::Shape`] if the mask has too many pixels for
    /// `u32` ids.
    fn label(&self, mask: ArrayView2<'_, bool>) -> Result<Components, LabelError>;
}

impl ComponentLabeler for Connectivity {
    fn label(&self, mask: ArrayView2<'_, bool>) -> Result<Components, LabelError> {
        match *self {
            Self::Propagation { iterations } => connected_components(mask, iterations),
            Self::Exact => exact_components(mask),
        }
    }
}

/// Raster seeds: `index + offset + 1` on foreground, `0` on background.
#[allow(clippy::cast_possible_truncation)]
fn seeds(mask: ArrayView2<'_, bool>, offset: usize) -> Result<Array2<u32>, LabelError> {
    let width = mask.ncols();
    let last = (offset + mask.len()).max(1);
    if u32::try_from(last).is_err() {
        return Err(LabelError::shape(
            mask.shape(),
            "too many pixels for 32-bit component ids",
        ));
    }
    Ok(Array2::from_shape_fn(mask.raw_dim(), |(r, c)| {
        if mask[[r, c]] {
            // Bounded by `last`, checked above.
            (offset + r * width + c + 1) as u32
        } else {
            0
        }
    }))
}

fn propagate_plane(
    mask: ArrayView2<'_, bool>,
    offset: usize,
    iterations: usize,
) -> Result<(LabelMap, Convergence), LabelError> {
    let initial = seeds(mask, offset)?;
    Ok(propagate::iterate(initial, iterations, |current| {
        propagate::max_step(current, mask)
    }))
}

fn warn_if_unconverged(convergence: Convergence, shape: &[usize]) {
    if !convergence.converged {
        log::warn!(
            "connected components did not converge within {} rounds on a {:?} mask; \
             long components may carry several ids",
            convergence.iterations,
            shape,
        );
    }
}

/// Label components by fixed-round max propagation.
///
/// # Errors
///
/// Returns [`LabelError::Shape`] if the mask has too many pixels for
/// `u32` ids.
pub fn connected_components(
    mask: ArrayView2<'_, bool>,
    iterations: usize,
) -> Result<Components, LabelError> {
    let (labels, convergence) = propagate_plane(mask, 0, iterations)?;
    warn_if_unconverged(convergence, mask.shape());
    log::debug!(
        "connected components: {} rounds, converged={}",
        convergence.iterations,
        convergence.converged
    );
    Ok(Components {
        labels,
        convergence,
    })
}

/// Label components of a `B × H × W` batch of masks.
///
/// Seeds are raster indices over the whole batch, so ids are unique
/// across planes. Components never cross planes. The reported
/// convergence is the worst over all planes.
///
/// # Errors
///
/// Returns [`LabelError::Shape`] if the batch has too many pixels for
/// `u32` ids.
pub fn connected_components_batch(
    masks: ArrayView3<'_, bool>,
    iterations: usize,
) -> Result<(Array3<u32>, Convergence), LabelError> {
    let (_, height, width) = masks.dim();
    let mut labels = Array3::<u32>::zeros(masks.raw_dim());
    let mut overall = Convergence {
        iterations: 0,
        converged: true,
    };
    for (b, (mask, mut out)) in masks
        .axis_iter(Axis(0))
        .zip(labels.axis_iter_mut(Axis(0)))
        .enumerate()
    {
        let (plane, convergence) = propagate_plane(mask, b * height * width, iterations)?;
        out.assign(&plane);
        overall.iterations = overall.iterations.max(convergence.iterations);
        overall.converged &= convergence.converged;
    }
    warn_if_unconverged(overall, masks.shape());
    Ok((labels, overall))
}

/// Exact 8-connected labelling, relabelled so each component carries its
/// largest raster index plus one.
///
/// # Errors
///
/// Returns [`LabelError::Shape`] if the mask dimensions do not fit in
/// `u32`.
pub fn exact_components(mask: ArrayView2<'_, bool>) -> Result<Components, LabelError> {
    let (height, width) = mask.dim();
    let too_large = || LabelError::shape(mask.shape(), "mask dimensions exceed u32");
    let w = u32::try_from(width).map_err(|_| too_large())?;
    let h = u32::try_from(height).map_err(|_| too_large())?;
    let seeds = seeds(mask, 0)?;

    let image = GrayImage::from_fn(w, h, |x, y| {
        Luma([if mask[[y as usize, x as usize]] { 255 } else { 0 }])
    });
    let regions = imageproc::region_labelling::connected_components(
        &image,
        PixelConnectivity::Eight,
        Luma([0u8]),
    );

    // Raster order visits seeds in ascending order, so the last seed seen
    // per region is its maximum.
    let mut region_max: HashMap<u32, u32> = HashMap::new();
    for (x, y, region) in regions.enumerate_pixels() {
        let region = region.0[0];
        if region > 0 {
            region_max.insert(region, seeds[[y as usize, x as usize]]);
        }
    }
    let labels = Array2::from_shape_fn((height, width), |(r, c)| {
        #[allow(clippy::cast_possible_truncation)]
        let region = regions.get_pixel(c as u32, r as u32).0[0];
        region_max.get(&region).copied().unwrap_or(0)
    });

    Ok(Components {
        labels,
        convergence: Convergence {
            iterations: 1,
            converged: true,
        },
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    /// Two 3×3 squares separated by a background gap.
    fn two_squares() -> Array2<bool> {
        Array2::from_shape_fn((7, 10), |(r, c)| {
            (1..4).contains(&r) && ((1..4).contains(&c) || (6..9).contains(&c))
        })
    }

    fn ids(labels: &LabelMap) -> BTreeSet<u32> {
        labels.iter().copied().filter(|&v| v > 0).collect()
    }

    #[test]
    fn two_squares_get_two_ids() {
        let mask = two_squares();
        let result = connected_components(mask.view(), 2).unwrap();
        let labels = result.labels;
        let left = labels[[1, 1]];
        let right = labels[[1, 6]];
        assert_ne!(left, right);
        assert_eq!(ids(&labels).len(), 2);
        for ((r, c), &v) in labels.indexed_iter() {
            if !mask[[r, c]] {
                assert_eq!(v, 0, "background at ({r}, {c}) was overwritten");
            } else if c < 5 {
                assert_eq!(v, left);
            } else {
                assert_eq!(v, right);
            }
        }
    }

    #[test]
    fn fixed_point_on_last_round_counts_as_converged() {
        // Each 3×3 square settles in exactly two rounds.
        let mask = two_squares();
        let capped = connected_components(mask.view(), 2).unwrap();
        assert!(capped.convergence.converged);
        assert_eq!(capped.convergence.iterations, 2);
        let roomy = connected_components(mask.view(), 3).unwrap();
        assert_eq!(capped.labels, roomy.labels);

        let one_short = connected_components(mask.view(), 1).unwrap();
        assert!(!one_short.convergence.converged);
    }

    #[test]
    fn component_id_is_max_raster_index_plus_one() {
        let mask = two_squares();
        let labels = connected_components(mask.view(), 4).unwrap().labels;
        // Bottom-right pixel of the left square is (3, 3).
        assert_eq!(labels[[1, 1]], 3 * 10 + 3 + 1);
        assert_eq!(labels[[1, 6]], 3 * 10 + 8 + 1);
    }

    #[test]
    fn isolated_origin_pixel_is_not_background() {
        let mut mask = Array2::from_elem((3, 3), false);
        mask[[0, 0]] = true;
        let labels = connected_components(mask.view(), 1).unwrap().labels;
        assert_eq!(labels[[0, 0]], 1);
    }

    #[test]
    fn empty_mask_stays_empty() {
        let mask = Array2::from_elem((4, 4), false);
        let result = connected_components(mask.view(), DEFAULT_ITERATIONS).unwrap();
        assert!(result.labels.iter().all(|&v| v == 0));
        assert!(result.convergence.converged);
    }

    #[test]
    fn long_component_is_split_when_rounds_run_out() {
        // A 1×80 line needs 79 rounds; the default 32 leaves it split.
        let mask = Array2::from_elem((1, 80), true);
        let result = connected_components(mask.view(), DEFAULT_ITERATIONS).unwrap();
        assert!(!result.convergence.converged);
        assert!(ids(&result.labels).len() > 1);

        let exact = exact_components(mask.view()).unwrap();
        assert_eq!(ids(&exact.labels).len(), 1);
    }

    #[test]
    fn exact_matches_converged_propagation() {
        let mask = Array2::from_shape_fn((12, 12), |(r, c)| (r * 7 + c * 3) % 5 < 2);
        let propagated = connected_components(mask.view(), 200).unwrap();
        assert!(propagated.convergence.converged);
        let exact = exact_components(mask.view()).unwrap();
        assert_eq!(propagated.labels, exact.labels);
    }

    #[test]
    fn diagonal_neighbours_are_connected() {
        let mask = Array2::from_shape_fn((4, 4), |(r, c)| r == c);
        let labels = Connectivity::Exact.label(mask.view()).unwrap().labels;
        assert_eq!(ids(&labels).len(), 1);
        let labels = Connectivity::default().label(mask.view()).unwrap().labels;
        assert_eq!(ids(&labels).len(), 1);
    }

    #[test]
    fn batch_ids_are_unique_across_planes() {
        let plane = two_squares();
        let masks = ndarray::stack(Axis(0), &[plane.view(), plane.view()]).unwrap();
        let (labels, convergence) = connected_components_batch(masks.view(), 8).unwrap();
        assert!(convergence.converged);
        let first = ids(&labels.index_axis(Axis(0), 0).to_owned());
        let second = ids(&labels.index_axis(Axis(0), 1).to_owned());
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        assert!(first.is_disjoint(&second));
    }
}
