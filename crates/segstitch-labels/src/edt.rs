//! Instance-normalized Euclidean distance transform.

use image::{GrayImage, Luma};
use imageproc::distance_transform::euclidean_squared_distance_transform;
use ndarray::{Array2, ArrayView2};

use crate::encode::{Layout, encode};
use crate::types::LabelError;

/// Distance of every instance pixel to the nearest pixel with another
/// label, scaled so each instance peaks at `1.0`.
///
/// The image border is not a boundary: an instance touching the border
/// only measures distance to pixels inside the image. Each instance is
/// transformed on its bounding box grown by one pixel (clipped to the
/// image). An instance with no other label in that box, such as one
/// covering the whole image, is `1.0` everywhere. Background stays `0.0`.
///
/// # Errors
///
/// Returns [`LabelError::Shape`] if the label map is too large for the
/// `u32` image dimensions used by the transform.
#[allow(clippy::cast_possible_truncation)]
pub fn instance_edt(labels: ArrayView2<'_, u32>) -> Result<Array2<f32>, LabelError> {
    let (height, width) = labels.dim();
    if u32::try_from(height).is_err() || u32::try_from(width).is_err() {
        return Err(LabelError::shape(
            labels.shape(),
            "label map dimensions exceed u32",
        ));
    }
    let (set, ids) = encode(labels, Layout::Flat);
    let mut out = Array2::<f32>::zeros(labels.raw_dim());

    for (k, &id) in ids.iter().enumerate() {
        let (mut r0, mut c0, mut r1, mut c1) = (usize::MAX, usize::MAX, 0, 0);
        for (r, c) in set.coords(k) {
            r0 = r0.min(r);
            c0 = c0.min(c);
            r1 = r1.max(r);
            c1 = c1.max(c);
        }
        let top = r0.saturating_sub(1);
        let left = c0.saturating_sub(1);
        let bottom = (r1 + 1).min(height - 1);
        let right = (c1 + 1).min(width - 1);

        // Other labels are the "foreground" the transform measures to.
        // Both extents are bounded by the image dimensions checked above.
        let crop = GrayImage::from_fn(
            (right - left + 1) as u32,
            (bottom - top + 1) as u32,
            |x, y| {
                let v = labels[[top + y as usize, left + x as usize]];
                Luma([if v == id { 0 } else { 255 }])
            },
        );
        let squared = euclidean_squared_distance_transform(&crop);

        let distances: Vec<(usize, usize, f64)> = set
            .coords(k)
            .map(|(r, c)| {
                let d = squared.get_pixel((c - left) as u32, (r - top) as u32).0[0];
                (r, c, d.sqrt())
            })
            .collect();
        let peak = distances
            .iter()
            .map(|&(_, _, d)| d)
            .filter(|d| d.is_finite())
            .fold(0.0f64, f64::max);
        for (r, c, d) in distances {
            out[[r, c]] = if d.is_finite() && peak > 0.0 {
                (d / peak) as f32
            } else {
                1.0
            };
        }
    }
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ndarray::{arr2, s};

    use super::*;

    #[test]
    fn empty_map_is_all_zero() {
        let labels = Array2::<u32>::zeros((5, 5));
        let out = instance_edt(labels.view()).unwrap();
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn each_instance_peaks_at_one() {
        let mut labels = Array2::<u32>::zeros((12, 12));
        labels.slice_mut(s![1..6, 1..6]).fill(3);
        labels.slice_mut(s![7..10, 2..11]).fill(8);
        let out = instance_edt(labels.view()).unwrap();
        for id in [3, 8] {
            let peak = out
                .iter()
                .zip(labels.iter())
                .filter(|&(_, &l)| l == id)
                .map(|(&v, _)| v)
                .fold(0.0f32, f32::max);
            assert!((peak - 1.0).abs() < 1e-6, "instance {id} peaks at {peak}");
        }
        assert!((out[[3, 3]] - 1.0).abs() < 1e-6, "centre of the square");
        assert!(out[[1, 1]] < out[[3, 3]]);
        assert_eq!(out[[0, 0]], 0.0);
    }

    #[test]
    fn touching_instances_measure_to_each_other() {
        let labels = arr2(&[[1u32, 1, 1, 2, 2, 2]]);
        let out = instance_edt(labels.view()).unwrap();
        // Distances to the other label are 3, 2, 1 on the left.
        assert!((out[[0, 2]] - 1.0 / 3.0).abs() < 1e-6);
        assert!((out[[0, 0]] - 1.0).abs() < 1e-6);
        assert!((out[[0, 3]] - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn instance_filling_the_image_is_one() {
        let labels = Array2::<u32>::from_elem((3, 4), 6);
        let out = instance_edt(labels.view()).unwrap();
        assert!(out.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }
}
