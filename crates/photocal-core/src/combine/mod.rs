pub mod flat;
mod mean;
mod median;
mod sigma_clip;

use std::fmt;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

pub use mean::{mean_combine, WeightedMeanAccumulator};
pub use median::median_combine;
pub use sigma_clip::{sigma_clipped_mean, sigma_clipped_median, SigmaClipParams};

use crate::error::Result;

/// Pixel-wise statistic used to combine a frame group into a master.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CombineMethod {
    Mean,
    Median,
    SigmaClippedMean(SigmaClipParams),
    SigmaClippedMedian(SigmaClipParams),
}

impl fmt::Display for CombineMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mean => write!(f, "mean"),
            Self::Median => write!(f, "median"),
            Self::SigmaClippedMean(p) => write!(f, "sigma-clipped mean ({} sigma)", p.sigma),
            Self::SigmaClippedMedian(p) => write!(f, "sigma-clipped median ({} sigma)", p.sigma),
        }
    }
}

/// Combine same-shape frames with the given statistic.
///
/// All arithmetic is floating point regardless of the source encoding;
/// a group of one is passed through unchanged, a group of zero is an
/// error.
pub fn combine(frames: &[Array2<f32>], method: &CombineMethod) -> Result<Array2<f32>> {
    match method {
        CombineMethod::Mean => mean_combine(frames),
        CombineMethod::Median => median_combine(frames),
        CombineMethod::SigmaClippedMean(params) => sigma_clipped_mean(frames, params),
        CombineMethod::SigmaClippedMedian(params) => sigma_clipped_median(frames, params),
    }
}
