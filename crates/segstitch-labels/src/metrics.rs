//! Shape metrics from second-order central moments.

use ndarray::{ArrayView2, ArrayView3, Axis};
use rayon::prelude::*;

use crate::encode::{Layout, encode};
use crate::types::IdList;

/// Eccentricity of a point set given by its pixel coordinates.
///
/// `sqrt(1 - λmin / λmax)` of the 2×2 central moment matrix. Zero for a
/// disk, approaching one for a line. `NaN` for an empty set or a single
/// pixel (both eigenvalues are zero).
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn eccentricity_of(coords: &[(usize, usize)]) -> f32 {
    let mass = coords.len() as f64;
    let (sum_r, sum_c) = coords
        .iter()
        .fold((0.0, 0.0), |(sr, sc), &(r, c)| (sr + r as f64, sc + c as f64));
    let (mean_r, mean_c) = (sum_r / mass, sum_c / mass);

    let (mut m_rr, mut m_cc, mut m_rc) = (0.0f64, 0.0f64, 0.0f64);
    for &(r, c) in coords {
        let dr = r as f64 - mean_r;
        let dc = c as f64 - mean_c;
        m_rr += dr * dr;
        m_cc += dc * dc;
        m_rc += dr * dc;
    }

    let half_trace = (m_rr + m_cc) / 2.0;
    let spread = ((m_rr - m_cc) / 2.0).hypot(m_rc);
    let lambda_max = half_trace + spread;
    let lambda_min = half_trace - spread;
    (1.0 - lambda_min / lambda_max).clamp(0.0, 1.0).sqrt() as f32
}

/// Eccentricity of each mask in a `B × H × W` batch.
#[must_use]
pub fn eccentricity(masks: ArrayView3<'_, bool>) -> Vec<f32> {
    masks
        .axis_iter(Axis(0))
        .into_par_iter()
        .map(|mask| {
            let coords: Vec<(usize, usize)> = mask
                .indexed_iter()
                .filter_map(|(at, &m)| m.then_some(at))
                .collect();
            eccentricity_of(&coords)
        })
        .collect()
}

/// Eccentricity of every instance of a label map, in ascending id order.
#[must_use]
pub fn instance_eccentricity(labels: ArrayView2<'_, u32>) -> (Vec<f32>, IdList) {
    let (set, ids) = encode(labels, Layout::Flat);
    let values = (0..set.len())
        .into_par_iter()
        .map(|k| eccentricity_of(&set.coords(k).collect::<Vec<_>>()))
        .collect();
    (values, ids)
}
