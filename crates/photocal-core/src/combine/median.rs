use ndarray::Array2;
use rayon::prelude::*;

use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::error::{CalError, Result};

/// Combine frames by the per-pixel median, ignoring non-finite values.
///
/// A pixel with no finite value in any frame comes out as NaN, matching
/// the mask sentinel used downstream.
pub fn median_combine(frames: &[Array2<f32>]) -> Result<Array2<f32>> {
    if frames.is_empty() {
        return Err(CalError::EmptySequence);
    }
    let (h, w) = frames[0].dim();

    let median_row = |row: usize| -> Vec<f32> {
        let mut stack = Vec::with_capacity(frames.len());
        (0..w)
            .map(|col| {
                stack.clear();
                stack.extend(
                    frames
                        .iter()
                        .map(|frame| frame[[row, col]])
                        .filter(|v| v.is_finite()),
                );
                if stack.is_empty() {
                    f32::NAN
                } else {
                    compute_median(&mut stack)
                }
            })
            .collect()
    };

    let rows: Vec<Vec<f32>> = if h * w >= PARALLEL_PIXEL_THRESHOLD && frames.len() > 1 {
        (0..h).into_par_iter().map(median_row).collect()
    } else {
        (0..h).map(median_row).collect()
    };

    let mut result = Array2::<f32>::zeros((h, w));
    for (mut out_row, values) in result.rows_mut().into_iter().zip(rows) {
        for (out, v) in out_row.iter_mut().zip(values) {
            *out = v;
        }
    }
    Ok(result)
}

/// Median of a non-empty scratch slice, reordered in place.
///
/// One selection puts the upper middle in place; for even lengths the
/// lower middle is the maximum of the partition below it, so no second
/// selection is needed.
pub(super) fn compute_median(values: &mut [f32]) -> f32 {
    let n = values.len();
    let mid = n / 2;
    let (below, upper, _) = values.select_nth_unstable_by(mid, f32::total_cmp);
    if n % 2 == 1 {
        *upper
    } else {
        let lower = below.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        (lower + *upper) / 2.0
    }
}
