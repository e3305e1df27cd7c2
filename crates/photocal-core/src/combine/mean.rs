use ndarray::Array2;

use crate::error::{CalError, Result};

/// Combine frames by computing the mean at each pixel.
pub fn mean_combine(frames: &[Array2<f32>]) -> Result<Array2<f32>> {
    if frames.is_empty() {
        return Err(CalError::EmptySequence);
    }

    let (h, w) = frames[0].dim();
    let n = frames.len() as f32;

    let mut sum = Array2::<f32>::zeros((h, w));
    for frame in frames {
        sum += frame;
    }
    sum /= n;

    Ok(sum)
}

/// Running mean accumulator for merging chunk masters without holding
/// every chunk result at once.
pub struct WeightedMeanAccumulator {
    sum: Array2<f32>,
    total_weight: f32,
}

impl WeightedMeanAccumulator {
    pub fn new(height: usize, width: usize) -> Self {
        Self {
            sum: Array2::zeros((height, width)),
            total_weight: 0.0,
        }
    }

    /// Add a partial result carrying `weight` source frames.
    pub fn add(&mut self, partial: &Array2<f32>, weight: usize) {
        let w = weight as f32;
        ndarray::Zip::from(&mut self.sum)
            .and(partial)
            .for_each(|acc, &v| *acc += v * w);
        self.total_weight += w;
    }

    pub fn finalize(self) -> Result<Array2<f32>> {
        if self.total_weight == 0.0 {
            return Err(CalError::EmptySequence);
        }
        Ok(self.sum / self.total_weight)
    }
}
