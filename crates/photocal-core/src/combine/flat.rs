use ndarray::Array2;

use crate::error::{CalError, Result};

/// Remove the instrumental signature from one flat frame: subtract the
/// master bias and the (bias-subtracted) master dark at the flat's
/// exposure time.
pub fn correct_flat(
    flat: &Array2<f32>,
    master_bias: &Array2<f32>,
    master_dark: &Array2<f32>,
) -> Array2<f32> {
    let mut out = flat.clone();
    out -= master_bias;
    out -= master_dark;
    out
}

/// Median of a scratch buffer of values (reordered in place).
pub fn median_of(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return f32::NAN;
    }
    super::median::compute_median(values)
}

/// Median over pixels not flagged in `mask` (all pixels when `mask` is
/// `None`).
pub fn masked_median(data: &Array2<f32>, mask: Option<&Array2<bool>>) -> f32 {
    let mut values: Vec<f32> = match mask {
        Some(m) => data
            .iter()
            .zip(m.iter())
            .filter(|(_, &bad)| !bad)
            .map(|(&v, _)| v)
            .collect(),
        None => data.iter().copied().collect(),
    };
    if values.is_empty() {
        return f32::NAN;
    }
    super::median::compute_median(&mut values)
}

/// Scale a corrected flat by the inverse of its own median so that flats
/// taken under varying sky brightness combine to a flat-field shape
/// rather than an absolute brightness. Returns the median used.
///
/// Pixels flagged in `mask` never contribute to the normalization
/// statistic.
pub fn normalize_flat(data: &mut Array2<f32>, mask: Option<&Array2<bool>>) -> Result<f32> {
    let median = masked_median(data, mask);
    if !median.is_finite() || median.abs() < f32::EPSILON {
        return Err(CalError::FlatNormalization(format!(
            "corrected flat has degenerate median {median}"
        )));
    }
    *data /= median;
    Ok(median)
}
