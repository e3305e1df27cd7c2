use ndarray::Array2;
use tracing::info;

use crate::frame::{BadPixelMask, MasterFrame};

/// Derive a bad-pixel mask from a master frame.
///
/// Flags pixels whose value falls outside `median ± threshold_sigma *
/// stddev` of the frame. On a normalized master flat this catches dead
/// and unstable pixels; hot-pixel-specific masking is deferred and
/// mitigated by cosmic-ray clipping downstream.
pub fn generate_mask(master: &MasterFrame, threshold_sigma: f32) -> BadPixelMask {
    let data = &master.data;
    let mask = statistical_mask(data, threshold_sigma);
    let bad = mask.iter().filter(|&&b| b).count();
    info!(
        bad_pixels = bad,
        total = data.len(),
        sigma = threshold_sigma,
        "generated bad-pixel mask"
    );
    BadPixelMask { mask }
}

fn statistical_mask(data: &Array2<f32>, threshold_sigma: f32) -> Array2<bool> {
    let mut values: Vec<f32> = data.iter().copied().filter(|v| v.is_finite()).collect();
    if values.is_empty() {
        return Array2::from_elem(data.dim(), true);
    }

    let n = values.len();
    let median = crate::combine::flat::median_of(&mut values);
    let mean = values.iter().sum::<f32>() / n as f32;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n as f32;
    let stddev = var.sqrt();

    let lo = median - threshold_sigma * stddev;
    let hi = median + threshold_sigma * stddev;

    data.mapv(|v| !v.is_finite() || v < lo || v > hi)
}
