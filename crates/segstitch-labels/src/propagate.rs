//! Local 3×3 maximum propagation, the primitive under every iterative
//! operator in this crate.
//!
//! One round reads a complete snapshot of the previous round and writes a
//! fresh array, so rows can be computed in parallel without any
//! order dependence. Pixels outside the image never contribute (the
//! window is clipped at the border).

use ndarray::{Array2, ArrayView2, Zip};

use crate::types::Convergence;

/// Maximum over the clipped 3×3 window centred on `(r, c)`.
fn window_max<T: Copy + Ord>(values: &ArrayView2<'_, T>, r: usize, c: usize) -> T {
    let (height, width) = values.dim();
    let rows = r.saturating_sub(1)..=(r + 1).min(height - 1);
    let mut best = values[[r, c]];
    for rr in rows {
        for cc in c.saturating_sub(1)..=(c + 1).min(width - 1) {
            best = best.max(values[[rr, cc]]);
        }
    }
    best
}

/// 3×3 maximum filter over the whole array.
#[must_use]
pub fn max_filter<T>(values: ArrayView2<'_, T>) -> Array2<T>
where
    T: Copy + Ord + Send + Sync,
{
    let mut out = values.to_owned();
    Zip::indexed(&mut out).par_for_each(|(r, c), v| *v = window_max(&values, r, c));
    out
}

/// One propagation round: pixels where `allowed` is set take their 3×3
/// maximum, every other pixel keeps its value.
///
/// `allowed` must have the same shape as `values`; callers check this.
#[must_use]
pub fn max_step<T>(values: ArrayView2<'_, T>, allowed: ArrayView2<'_, bool>) -> Array2<T>
where
    T: Copy + Ord + Send + Sync,
{
    let mut out = values.to_owned();
    Zip::indexed(&mut out)
        .and(&allowed)
        .par_for_each(|(r, c), v, &ok| {
            if ok {
                *v = window_max(&values, r, c);
            }
        });
    out
}

/// Repeat `step` until it stops changing the array or `max_rounds` is hit.
///
/// Returns the last array and how the loop ended. Stopping early at a
/// fixed point gives the same result as running all rounds. When the cap
/// is hit, one more step is evaluated (and discarded) to tell whether the
/// final round already reached the fixed point.
pub fn iterate<T, F>(
    initial: Array2<T>,
    max_rounds: usize,
    mut step: F,
) -> (Array2<T>, Convergence)
where
    T: PartialEq,
    F: FnMut(ArrayView2<'_, T>) -> Array2<T>,
{
    let mut current = initial;
    for round in 0..max_rounds {
        let next = step(current.view());
        if next == current {
            return (
                current,
                Convergence {
                    iterations: round + 1,
                    converged: true,
                },
            );
        }
        current = next;
    }
    let converged = step(current.view()) == current;
    (
        current,
        Convergence {
            iterations: max_rounds,
            converged,
        },
    )
}
