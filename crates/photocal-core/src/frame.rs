use std::fmt;
use std::path::PathBuf;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::combine::CombineMethod;
use crate::cosmic::CosmicRayReport;
use crate::io::fits::FitsHeader;

/// Closed set of frame types produced by classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameKind {
    Bias,
    Dark,
    Flat,
    Science,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bias => write!(f, "bias"),
            Self::Dark => write!(f, "dark"),
            Self::Flat => write!(f, "flat"),
            Self::Science => write!(f, "science"),
        }
    }
}

/// Exposure time quantised to milliseconds so it can key a group map.
///
/// Dark matching requires exact equality; there is no rescaling for
/// mismatched exposure times, so sub-millisecond differences are
/// intentionally collapsed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExposureTime(u64);

impl ExposureTime {
    pub fn from_secs(secs: f64) -> Self {
        Self((secs * 1000.0).round().max(0.0) as u64)
    }

    pub fn secs(&self) -> f64 {
        self.0 as f64 / 1000.0
    }

    pub fn millis(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ExposureTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 % 1000 == 0 {
            write!(f, "{}s", self.0 / 1000)
        } else {
            write!(f, "{:.3}s", self.secs())
        }
    }
}

/// Filter band name from the FILTER header key; frames without one share
/// the `NONE` band.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Filter(String);

impl Filter {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn none() -> Self {
        Self("NONE".into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Classification result for one file: everything needed to group and
/// schedule a frame without decoding its pixels.
#[derive(Clone, Debug)]
pub struct FrameInfo {
    pub path: PathBuf,
    pub kind: FrameKind,
    pub exptime: ExposureTime,
    pub filter: Filter,
    pub height: usize,
    pub width: usize,
}

/// A decoded exposure: ADU pixels plus its header. Immutable once loaded.
#[derive(Clone, Debug)]
pub struct RawFrame {
    pub data: Array2<f32>,
    pub header: FitsHeader,
    pub info: FrameInfo,
}

impl RawFrame {
    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }
}

/// How a master frame was produced.
#[derive(Clone, Debug)]
pub struct MasterProvenance {
    pub kind: FrameKind,
    pub input_count: usize,
    pub method: CombineMethod,
    pub exptime: Option<ExposureTime>,
    pub filter: Option<Filter>,
    /// Number of memory-budget chunks the group was combined in.
    pub chunks: usize,
}

/// Result of combining one frame group.
#[derive(Clone, Debug)]
pub struct MasterFrame {
    pub data: Array2<f32>,
    pub provenance: MasterProvenance,
}

impl MasterFrame {
    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }
}

/// Boolean bad-pixel map, `true` = excluded from science use.
#[derive(Clone, Debug)]
pub struct BadPixelMask {
    pub mask: Array2<bool>,
}

impl BadPixelMask {
    pub fn all_good(height: usize, width: usize) -> Self {
        Self {
            mask: Array2::from_elem((height, width), false),
        }
    }

    pub fn bad_count(&self) -> usize {
        self.mask.iter().filter(|&&b| b).count()
    }

    /// Union another mask in place. Dimensions must already match.
    pub fn union(&mut self, other: &BadPixelMask) {
        ndarray::Zip::from(&mut self.mask)
            .and(&other.mask)
            .for_each(|a, &b| *a |= b);
    }
}

/// A science frame after the full reduction chain. Pixels are electrons;
/// masked pixels hold NaN.
#[derive(Clone, Debug)]
pub struct CalibratedFrame {
    pub data: Array2<f32>,
    pub header: FitsHeader,
    pub source: PathBuf,
    pub gain: f32,
    pub cosmic: CosmicRayReport,
}
