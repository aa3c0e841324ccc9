//! Per-instance centroids and fixed-size, instance-centred patches.

use ndarray::{Array3, Array4, ArrayView2, ArrayView3, Axis, Zip, s};
use rayon::prelude::*;

use crate::encode::{Layout, SparseInstances, encode};
use crate::types::{Centroid, IdList, LabelError, PatchBatch, ensure_same_shape};

/// Default patch edge length in pixels.
pub const DEFAULT_PATCH_SIZE: usize = 64;

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn centroids_of(set: &SparseInstances) -> Vec<Centroid> {
    (0..set.len())
        .map(|k| {
            let (mut rows, mut cols, mut area) = (0.0f64, 0.0f64, 0.0f64);
            for (r, c) in set.coords(k) {
                rows += r as f64;
                cols += c as f64;
                area += 1.0;
            }
            Centroid::new((rows / area) as f32, (cols / area) as f32)
        })
        .collect()
}

/// Mean pixel location of every instance, in ascending id order.
#[must_use]
pub fn centroids(labels: ArrayView2<'_, u32>) -> (Vec<Centroid>, IdList) {
    let (set, ids) = encode(labels, Layout::Flat);
    (centroids_of(&set), ids)
}

/// First row (or column) of a window of `patch_size` centred on `centre`,
/// shifted so the window stays inside `0..extent`.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn window_start(centre: f32, patch_size: usize, extent: usize) -> usize {
    let half = (patch_size / 2) as f32;
    let start = (centre.round() - half).max(0.0) as usize;
    start.min(extent - patch_size)
}

/// Crop a `patch_size × patch_size` window around every instance.
///
/// `image` is channel-first (C × H × W) over the same grid as `labels`.
/// Windows are centred on the rounded centroid and shifted inward at the
/// borders, so every patch is complete and in bounds. Masks mark the
/// pixels of the centred instance only.
///
/// # Errors
///
/// Returns [`LabelError::ShapeMismatch`] if `image` and `labels` cover
/// different grids, [`LabelError::PatchTooLarge`] if the window cannot fit
/// in the image, and [`LabelError::InvalidConfig`] for a zero patch size.
pub fn extract_patches(
    labels: ArrayView2<'_, u32>,
    image: ArrayView3<'_, f32>,
    patch_size: usize,
) -> Result<PatchBatch, LabelError> {
    ensure_same_shape(&image.shape()[1..], labels.shape())?;
    let (height, width) = labels.dim();
    if patch_size == 0 {
        return Err(LabelError::InvalidConfig(
            "patch size must be positive".to_owned(),
        ));
    }
    if patch_size > height || patch_size > width {
        return Err(LabelError::PatchTooLarge {
            patch_size,
            height,
            width,
        });
    }

    let (set, ids) = encode(labels, Layout::Flat);
    let origins: Vec<(usize, usize)> = centroids_of(&set)
        .into_iter()
        .map(|centroid| {
            (
                window_start(centroid.row, patch_size, height),
                window_start(centroid.col, patch_size, width),
            )
        })
        .collect();

    let channels = image.len_of(Axis(0));
    let mut patches = Array4::<f32>::zeros((ids.len(), channels, patch_size, patch_size));
    let mut masks = Array3::from_elem((ids.len(), patch_size, patch_size), false);
    patches
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip(masks.axis_iter_mut(Axis(0)))
        .zip(origins.par_iter().zip(ids.par_iter()))
        .for_each(|((mut patch, mut mask), (&(r0, c0), &id))| {
            let rows = r0..r0 + patch_size;
            let cols = c0..c0 + patch_size;
            patch.assign(&image.slice(s![.., rows.clone(), cols.clone()]));
            Zip::from(&mut mask)
                .and(labels.slice(s![rows, cols]))
                .for_each(|m, &v| *m = v == id);
        });

    log::debug!(
        "extracted {} patches of {patch_size}x{patch_size} over {channels} channels",
        ids.len()
    );
    Ok(PatchBatch {
        patches,
        masks,
        ids,
    })
}

/// Like [`extract_patches`], with every intensity outside the centred
/// instance replaced by `fill`.
///
/// # Errors
///
/// Same as [`extract_patches`].
pub fn masked_patches(
    labels: ArrayView2<'_, u32>,
    image: ArrayView3<'_, f32>,
    patch_size: usize,
    fill: f32,
) -> Result<PatchBatch, LabelError> {
    let mut batch = extract_patches(labels, image, patch_size)?;
    for (mut patch, mask) in batch
        .patches
        .axis_iter_mut(Axis(0))
        .zip(batch.masks.axis_iter(Axis(0)))
    {
        for mut channel in patch.axis_iter_mut(Axis(0)) {
            Zip::from(&mut channel).and(&mask).for_each(|v, &inside| {
                if !inside {
                    *v = fill;
                }
            });
        }
    }
    Ok(batch)
}
