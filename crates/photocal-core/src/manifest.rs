use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::frame::{ExposureTime, Filter};

/// Suffixes of the fixed per-date directory naming contract.
pub const SCIENCE_DIR_SUFFIX: &str = "-CAMS";
pub const FLAT_DIR_SUFFIX: &str = "-CAMS_SKYFLAT";
pub const CAL_DIR_SUFFIX: &str = "-CAMS_CAL";

/// Filesystem existence abstraction so the idempotence predicate can be
/// tested without a real tree.
pub trait Storage {
    fn exists(&self, path: &Path) -> bool;
}

/// The real filesystem.
pub struct FsStorage;

impl Storage for FsStorage {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

/// Derived paths for one observing date.
#[derive(Clone, Debug)]
pub struct DateLayout {
    pub date: String,
    pub date_dir: PathBuf,
    /// `<date>-CAMS`: science frames and their darks.
    pub science_dir: PathBuf,
    /// `<date>-CAMS_SKYFLAT`: sky flats and their darks.
    pub flat_dir: PathBuf,
    /// `<date>-CAMS_CAL`: calibrated outputs and cached masters.
    pub cal_dir: PathBuf,
}

impl DateLayout {
    pub fn new(date_dir: &Path) -> Self {
        let date = date_dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        Self {
            science_dir: date_dir.join(format!("{date}{SCIENCE_DIR_SUFFIX}")),
            flat_dir: date_dir.join(format!("{date}{FLAT_DIR_SUFFIX}")),
            cal_dir: date_dir.join(format!("{date}{CAL_DIR_SUFFIX}")),
            date,
            date_dir: date_dir.to_path_buf(),
        }
    }

    /// Whether a directory name is a `YYYY-MM-DD` date.
    pub fn is_date_name(name: &str) -> bool {
        let bytes = name.as_bytes();
        bytes.len() == 10
            && bytes.iter().enumerate().all(|(i, &b)| match i {
                4 | 7 => b == b'-',
                _ => b.is_ascii_digit(),
            })
    }

    /// Output path for one science input: `<stem>_CAL.fits` in the
    /// calibrated directory.
    pub fn calibrated_path(&self, science_path: &Path) -> PathBuf {
        let stem = science_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        self.cal_dir.join(format!("{stem}_CAL.fits"))
    }

    pub fn master_bias_path(&self) -> PathBuf {
        self.cal_dir.join(format!("{}_MASTERBIAS.fits", self.date))
    }

    pub fn master_dark_path(&self, exptime: ExposureTime) -> PathBuf {
        self.cal_dir
            .join(format!("{}_MASTERDARK_{}.fits", self.date, exptime))
    }

    pub fn master_flat_path(&self, filter: &Filter) -> PathBuf {
        self.cal_dir
            .join(format!("{}_MASTERFLAT_{}.fits", self.date, filter))
    }

    pub fn mask_path(&self) -> PathBuf {
        self.cal_dir.join(format!("{}_MASK.fits", self.date))
    }
}

/// Science input files for a date, by filename pattern alone (no header
/// reads): the cheap enumeration the idempotence check is based on.
pub fn expected_science_inputs(layout: &DateLayout) -> Result<Vec<PathBuf>> {
    let mut inputs: Vec<PathBuf> = std::fs::read_dir(&layout.science_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension().and_then(|e| e.to_str()) == Some("fits")
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.contains("_SCIENCE") && !n.contains("_CAL"))
        })
        .collect();
    inputs.sort();
    Ok(inputs)
}

/// Idempotence predicate: a date is done when a calibrated output exists
/// for every expected science input. An empty input set is never "done";
/// that case is diagnosed during the real scan.
pub fn is_date_done(
    layout: &DateLayout,
    science_inputs: &[PathBuf],
    storage: &dyn Storage,
) -> bool {
    !science_inputs.is_empty()
        && science_inputs
            .iter()
            .all(|input| storage.exists(&layout.calibrated_path(input)))
}
