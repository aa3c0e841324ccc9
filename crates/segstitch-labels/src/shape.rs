//! Rank normalization for arrays handed in by loaders.
//!
//! Loaders produce label maps and images with stray singleton axes
//! (`1×1×H×W`, `H×W×1`, ...). These helpers squeeze or unsqueeze to the
//! rank an operation needs and fail only when that is impossible.

use ndarray::{Array2, Array3, ArrayD, Axis, Ix2, Ix3};

use crate::types::LabelError;

/// Bring `array` to exactly `n` dimensions.
///
/// Returned unchanged when the rank already matches. A larger rank is
/// squeezed (all length-1 axes removed); a smaller rank gets leading
/// length-1 axes.
///
/// # Errors
///
/// Returns [`LabelError::Shape`] if the squeezed array still has more
/// than `n` dimensions.
pub fn to_ndim<T>(array: ArrayD<T>, n: usize) -> Result<ArrayD<T>, LabelError> {
    if array.ndim() == n {
        return Ok(array);
    }
    let array = if array.ndim() > n {
        squeeze(array)
    } else {
        array
    };
    if array.ndim() > n {
        return Err(LabelError::shape(
            array.shape(),
            format!("cannot be reduced to {n} dimensions"),
        ));
    }
    let mut array = array;
    while array.ndim() < n {
        array = array.insert_axis(Axis(0));
    }
    Ok(array)
}

/// Remove every length-1 axis.
fn squeeze<T>(mut array: ArrayD<T>) -> ArrayD<T> {
    for axis in (0..array.ndim()).rev() {
        if array.len_of(Axis(axis)) == 1 {
            array = array.index_axis_move(Axis(axis), 0);
        }
    }
    array
}

/// Normalize a label array of any rank to a single 2-D plane.
///
/// # Errors
///
/// Returns [`LabelError::Shape`] if the array has more than two
/// non-singleton axes.
pub fn to_label_plane(labels: ArrayD<u32>) -> Result<Array2<u32>, LabelError> {
    let shape = labels.shape().to_vec();
    to_ndim(labels, 2)?
        .into_dimensionality::<Ix2>()
        .map_err(|_| LabelError::shape(&shape, "expected a 2-D label map"))
}

/// Normalize an intensity image to channel-first `C×H×W`.
///
/// The image is squeezed, must then have 2 or 3 dimensions, gains a
/// channel axis if it is 2-D, and has its shortest axis moved to the
/// front. The shortest-axis rule mirrors how loaders hand over both
/// `H×W×C` and `C×H×W` data; it misreads tiny images with many channels.
///
/// # Errors
///
/// Returns [`LabelError::Shape`] for anything that is not 2-D or 3-D
/// after squeezing.
pub fn to_channel_first(image: ArrayD<f32>) -> Result<Array3<f32>, LabelError> {
    let image = squeeze(image);
    if !(2..=3).contains(&image.ndim()) {
        return Err(LabelError::shape(
            image.shape(),
            "expected a 2-D or 3-D intensity image",
        ));
    }
    let shape = image.shape().to_vec();
    let image = to_ndim(image, 3)?
        .into_dimensionality::<Ix3>()
        .map_err(|_| LabelError::shape(&shape, "expected a 3-D intensity image"))?;

    let dims = [image.dim().0, image.dim().1, image.dim().2];
    let channel_axis = (0..3).min_by_key(|&i| dims[i]).unwrap_or(0);
    let image = match channel_axis {
        1 => image.permuted_axes([1, 0, 2]),
        2 => image.permuted_axes([2, 0, 1]),
        _ => image,
    };
    Ok(image.as_standard_layout().into_owned())
}
