use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_COMBINE_ITERATIONS, DEFAULT_COMBINE_SIGMA, PARALLEL_PIXEL_THRESHOLD};
use crate::error::{CalError, Result};

use super::median::compute_median;

/// Parameters for sigma-clipped combination.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SigmaClipParams {
    /// Rejection iterations.
    pub iterations: usize,
    /// Values beyond mean +/- sigma*stddev are rejected.
    pub sigma: f32,
}

impl Default for SigmaClipParams {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_COMBINE_ITERATIONS,
            sigma: DEFAULT_COMBINE_SIGMA,
        }
    }
}

#[derive(Clone, Copy)]
enum ClipStat {
    Mean,
    Median,
}

/// Sigma-clipped mean: per pixel, reject outliers beyond the sigma band
/// across the group, then average the survivors. Suppresses read-noise
/// excursions and cosmic-ray hits in individual calibration frames.
pub fn sigma_clipped_mean(frames: &[Array2<f32>], params: &SigmaClipParams) -> Result<Array2<f32>> {
    clipped_combine(frames, params, ClipStat::Mean)
}

/// Sigma-clipped median: as above but the surviving values are reduced
/// with the median. Used for flat combination.
pub fn sigma_clipped_median(
    frames: &[Array2<f32>],
    params: &SigmaClipParams,
) -> Result<Array2<f32>> {
    clipped_combine(frames, params, ClipStat::Median)
}

fn clipped_combine(
    frames: &[Array2<f32>],
    params: &SigmaClipParams,
    stat: ClipStat,
) -> Result<Array2<f32>> {
    if frames.is_empty() {
        return Err(CalError::EmptySequence);
    }

    let (h, w) = frames[0].dim();
    let n = frames.len();

    if h * w >= PARALLEL_PIXEL_THRESHOLD && n > 1 {
        let rows: Vec<Vec<f32>> = (0..h)
            .into_par_iter()
            .map(|row| {
                let mut pixel_values = vec![0.0f32; n];
                let mut mask = vec![true; n];
                let mut row_result = vec![0.0f32; w];
                for (col, result) in row_result.iter_mut().enumerate() {
                    gather(frames, row, col, &mut pixel_values, &mut mask);
                    *result = clip_pixel(&mut pixel_values, &mut mask, params, stat);
                }
                row_result
            })
            .collect();

        let mut result = Array2::<f32>::zeros((h, w));
        for (row, row_data) in rows.into_iter().enumerate() {
            for (col, val) in row_data.into_iter().enumerate() {
                result[[row, col]] = val;
            }
        }
        Ok(result)
    } else {
        let mut result = Array2::<f32>::zeros((h, w));
        let mut pixel_values = vec![0.0f32; n];
        let mut mask = vec![true; n];

        for row in 0..h {
            for col in 0..w {
                gather(frames, row, col, &mut pixel_values, &mut mask);
                result[[row, col]] = clip_pixel(&mut pixel_values, &mut mask, params, stat);
            }
        }
        Ok(result)
    }
}

fn gather(
    frames: &[Array2<f32>],
    row: usize,
    col: usize,
    pixel_values: &mut [f32],
    mask: &mut [bool],
) {
    for (i, frame) in frames.iter().enumerate() {
        pixel_values[i] = frame[[row, col]];
        mask[i] = true;
    }
}

fn clip_pixel(
    pixel_values: &mut [f32],
    mask: &mut [bool],
    params: &SigmaClipParams,
    stat: ClipStat,
) -> f32 {
    let n = pixel_values.len();

    for _ in 0..params.iterations {
        let (mean, stddev) = mean_stddev(pixel_values, mask);
        if stddev < 1e-10 {
            break;
        }
        let lo = mean - params.sigma * stddev;
        let hi = mean + params.sigma * stddev;
        for i in 0..n {
            if mask[i] && (pixel_values[i] < lo || pixel_values[i] > hi) {
                mask[i] = false;
            }
        }
    }

    let mut kept: Vec<f32> = Vec::with_capacity(n);
    for i in 0..n {
        if mask[i] {
            kept.push(pixel_values[i]);
        }
    }
    if kept.is_empty() {
        // All values rejected: fall back to the full set.
        kept.extend_from_slice(pixel_values);
    }

    match stat {
        ClipStat::Mean => kept.iter().sum::<f32>() / kept.len() as f32,
        ClipStat::Median => compute_median(&mut kept),
    }
}

fn mean_stddev(values: &[f32], mask: &[bool]) -> (f32, f32) {
    let mut sum = 0.0f32;
    let mut count = 0u32;
    for (i, &v) in values.iter().enumerate() {
        if mask[i] {
            sum += v;
            count += 1;
        }
    }
    if count == 0 {
        return (0.0, 0.0);
    }
    let mean = sum / count as f32;

    let mut var_sum = 0.0f32;
    for (i, &v) in values.iter().enumerate() {
        if mask[i] {
            let d = v - mean;
            var_sum += d * d;
        }
    }
    let stddev = (var_sum / count as f32).sqrt();
    (mean, stddev)
}
