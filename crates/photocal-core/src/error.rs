use std::path::PathBuf;

use thiserror::Error;

use crate::frame::{ExposureTime, Filter, FrameKind};

#[derive(Error, Debug)]
pub enum CalError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid FITS file {path}: {reason}")]
    InvalidFits { path: PathBuf, reason: String },

    #[error("Classification error for {path}: {reason}")]
    Classification { path: PathBuf, reason: String },

    #[error("Frame {path} is {got_height}x{got_width}, group expects {height}x{width}")]
    DimensionMismatch {
        path: PathBuf,
        height: usize,
        width: usize,
        got_height: usize,
        got_width: usize,
    },

    #[error("No {kind} frames available for {date}")]
    EmptyGroup { kind: FrameKind, date: String },

    #[error("Cannot combine an empty frame list")]
    EmptySequence,

    #[error("Flat normalization failed: {0}")]
    FlatNormalization(String),

    #[error("No master dark at {exptime} for {path}")]
    MissingMasterDark {
        path: PathBuf,
        exptime: ExposureTime,
    },

    #[error("No master flat for filter {filter} for {path}")]
    MissingMasterFlat { path: PathBuf, filter: Filter },

    #[error("Science directory not found: {0}")]
    MissingScienceDir(PathBuf),
}

pub type Result<T> = std::result::Result<T, CalError>;
