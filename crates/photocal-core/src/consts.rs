/// FITS logical record size in bytes. Headers and data are padded to this.
pub const FITS_BLOCK_SIZE: usize = 2880;

/// FITS header card size in bytes (36 cards per block).
pub const FITS_CARD_SIZE: usize = 80;

/// Minimum pixel count (h*w) to use row-level Rayon parallelism.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Fallback detector gain in electrons per ADU when the GAIN header key
/// is absent.
pub const DEFAULT_GAIN: f32 = 2.0;

/// Fallback read noise in electrons when the RDNOISE header key is absent.
pub const DEFAULT_READNOISE: f32 = 9.0;

/// Sigma threshold for sigma-clipped combination of calibration frames.
pub const DEFAULT_COMBINE_SIGMA: f32 = 3.0;

/// Rejection iterations for sigma-clipped combination.
pub const DEFAULT_COMBINE_ITERATIONS: usize = 2;

/// Sigma multiple around the master-flat median beyond which a pixel is
/// flagged bad.
pub const DEFAULT_MASK_SIGMA: f32 = 5.0;

/// Laplacian signal-to-noise threshold for cosmic-ray detection.
pub const DEFAULT_CR_SIGCLIP: f32 = 7.0;

/// Laplacian-to-fine-structure contrast limit protecting stellar cores
/// from cosmic-ray rejection.
pub const DEFAULT_CR_OBJLIM: f32 = 5.0;

/// Maximum detect-and-replace passes for cosmic-ray removal.
pub const DEFAULT_CR_MAX_ITERATIONS: usize = 4;

/// Default memory budget for frame combination, in GB.
pub const DEFAULT_MEM_LIMIT_GB: f64 = 2.0;

/// Working-memory multiplier per decoded frame during combination
/// (decoded pixels plus per-pixel scratch columns).
pub const MEM_SAFETY_FACTOR: f64 = 3.0;

/// Normalized flat pixels below this value are treated as dead and
/// unioned into the bad-pixel mask instead of divided by.
pub const FLAT_MIN_VALUE: f32 = 1e-2;

/// Field-of-view width hints passed to the external WCS solver, degrees.
pub const SOLVER_FOV_LOW_DEG: f64 = 0.9;
pub const SOLVER_FOV_HIGH_DEG: f64 = 1.1;
