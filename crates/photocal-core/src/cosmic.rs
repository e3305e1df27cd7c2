use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::consts::{
    DEFAULT_CR_MAX_ITERATIONS, DEFAULT_CR_OBJLIM, DEFAULT_CR_SIGCLIP, DEFAULT_READNOISE,
};
use crate::frame::CalibratedFrame;

/// Thresholds for Laplacian-edge cosmic-ray detection. The input image
/// must already be in electrons; the noise model is Poisson plus read
/// noise and assumes that unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CosmicRayParams {
    /// Laplacian signal-to-noise threshold; pixels above it are
    /// cosmic-ray candidates.
    pub sigclip: f32,
    /// Contrast limit between the Laplacian response and the local fine
    /// structure; candidates below it are treated as real (stellar)
    /// signal and kept.
    pub objlim: f32,
    /// Detection/replacement passes before giving up on convergence.
    pub max_iterations: usize,
    /// Detector read noise in electrons.
    pub readnoise: f32,
}

impl Default for CosmicRayParams {
    fn default() -> Self {
        Self {
            sigclip: DEFAULT_CR_SIGCLIP,
            objlim: DEFAULT_CR_OBJLIM,
            max_iterations: DEFAULT_CR_MAX_ITERATIONS,
            readnoise: DEFAULT_READNOISE,
        }
    }
}

/// Outcome of the cosmic-ray stage for one frame.
#[derive(Clone, Debug)]
pub struct CosmicRayReport {
    pub iterations: usize,
    pub flagged_pixels: usize,
    /// False when the pass limit was hit while pixels were still being
    /// flagged; the frame still carries the best-effort cleaned data.
    pub converged: bool,
}

impl Default for CosmicRayReport {
    fn default() -> Self {
        Self {
            iterations: 0,
            flagged_pixels: 0,
            converged: true,
        }
    }
}

/// Detect and replace cosmic-ray pixels in a calibrated frame.
///
/// Iterative L.A.Cosmic-style loop: compute the positive Laplacian
/// response, compare it against the Poisson/read-noise model, reject
/// candidates that look like stellar cores via the fine-structure ratio,
/// replace surviving hits with the local median, and repeat until no new
/// pixels are flagged or the pass limit is reached. Non-convergence is
/// reported on the frame, never an error.
pub fn remove_cosmic_rays(frame: &mut CalibratedFrame, params: &CosmicRayParams) {
    let report = clean_image(&mut frame.data, params);
    if !report.converged {
        warn!(
            source = %frame.source.display(),
            flagged = report.flagged_pixels,
            "cosmic-ray removal did not converge; emitting best-effort frame"
        );
    }
    frame.cosmic = report;
}

/// Lower-level entry point operating on a bare image in electrons.
pub fn clean_image(data: &mut Array2<f32>, params: &CosmicRayParams) -> CosmicRayReport {
    let (h, w) = data.dim();
    let mut total_flagged = 0usize;
    let mut iterations = 0usize;
    let mut converged = false;

    if h < 5 || w < 5 {
        // Too small for the 5x5 neighbourhood model; nothing to do.
        return CosmicRayReport::default();
    }

    for _ in 0..params.max_iterations {
        iterations += 1;
        let flagged = detect_and_replace(data, params);
        total_flagged += flagged;
        debug!(iteration = iterations, flagged, "cosmic-ray pass");
        if flagged == 0 {
            converged = true;
            break;
        }
    }

    CosmicRayReport {
        iterations,
        flagged_pixels: total_flagged,
        converged,
    }
}

/// One detection pass. Returns the number of pixels replaced.
fn detect_and_replace(data: &mut Array2<f32>, params: &CosmicRayParams) -> usize {
    let (h, w) = data.dim();

    let smooth = median_filter(data, 2);
    let med3 = median_filter(data, 1);
    let med3_smooth = median_filter(&med3, 3);

    let rn2 = params.readnoise * params.readnoise;
    let mut hits: Vec<(usize, usize)> = Vec::new();

    for row in 2..h - 2 {
        for col in 2..w - 2 {
            let c = data[[row, col]];
            let up = data[[row - 1, col]];
            let down = data[[row + 1, col]];
            let left = data[[row, col - 1]];
            let right = data[[row, col + 1]];
            if !c.is_finite()
                || !up.is_finite()
                || !down.is_finite()
                || !left.is_finite()
                || !right.is_finite()
            {
                continue;
            }

            // Positive Laplacian response: sharp single-pixel events
            // stand far above their four neighbours.
            let lap = (4.0 * c - (up + down + left + right)).max(0.0);
            if lap <= 0.0 {
                continue;
            }

            let background = smooth[[row, col]];
            let noise = (background.max(0.0) + rn2).sqrt();
            let snr = lap / noise;
            if snr <= params.sigclip {
                continue;
            }

            // Fine-structure contrast: stellar cores carry power at the
            // median-filter scale, cosmic rays do not.
            let fine = (med3[[row, col]] - med3_smooth[[row, col]]).max(0.01 * noise);
            if lap / fine <= params.objlim {
                continue;
            }

            hits.push((row, col));
        }
    }

    for &(row, col) in &hits {
        if let Some(replacement) = neighbourhood_median(data, row, col, 2, &hits) {
            data[[row, col]] = replacement;
        }
    }

    hits.len()
}

/// Median of the finite, unflagged pixels in the (2r+1)^2 box around
/// (row, col), excluding the centre.
fn neighbourhood_median(
    data: &Array2<f32>,
    row: usize,
    col: usize,
    radius: usize,
    flagged: &[(usize, usize)],
) -> Option<f32> {
    let (h, w) = data.dim();
    let mut values: Vec<f32> = Vec::with_capacity((2 * radius + 1) * (2 * radius + 1));

    for r in row.saturating_sub(radius)..=(row + radius).min(h - 1) {
        for c in col.saturating_sub(radius)..=(col + radius).min(w - 1) {
            if r == row && c == col {
                continue;
            }
            let v = data[[r, c]];
            if v.is_finite() && !flagged.contains(&(r, c)) {
                values.push(v);
            }
        }
    }

    if values.is_empty() {
        return None;
    }
    Some(crate::combine::flat::median_of(&mut values))
}

/// NaN-ignoring square median filter with the given radius.
fn median_filter(data: &Array2<f32>, radius: usize) -> Array2<f32> {
    let (h, w) = data.dim();
    let mut out = Array2::<f32>::zeros((h, w));
    let mut values: Vec<f32> = Vec::with_capacity((2 * radius + 1) * (2 * radius + 1));

    for row in 0..h {
        for col in 0..w {
            values.clear();
            for r in row.saturating_sub(radius)..=(row + radius).min(h - 1) {
                for c in col.saturating_sub(radius)..=(col + radius).min(w - 1) {
                    let v = data[[r, c]];
                    if v.is_finite() {
                        values.push(v);
                    }
                }
            }
            out[[row, col]] = if values.is_empty() {
                f32::NAN
            } else {
                crate::combine::flat::median_of(&mut values)
            };
        }
    }
    out
}
