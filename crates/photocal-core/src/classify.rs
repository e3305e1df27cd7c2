use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{CalError, Result};
use crate::frame::{ExposureTime, Filter, FrameInfo, FrameKind, RawFrame};
use crate::io::fits::FitsReader;
use crate::manifest::DateLayout;

/// Filename substring patterns mapped to frame kinds, checked in order.
/// `_SKYFLAT` must precede nothing here, but keep the table ordered by
/// specificity so future patterns stay unambiguous.
pub const KIND_PATTERNS: [(&str, FrameKind); 4] = [
    ("_BIAS", FrameKind::Bias),
    ("_DARK", FrameKind::Dark),
    ("_SKYFLAT", FrameKind::Flat),
    ("_SCIENCE", FrameKind::Science),
];

/// Classify a file name against the pattern table.
pub fn classify_name(file_name: &str) -> Option<FrameKind> {
    KIND_PATTERNS
        .iter()
        .find(|(pat, _)| file_name.contains(pat))
        .map(|&(_, kind)| kind)
}

/// Classify one FITS file from its name and header, without decoding
/// pixel data.
///
/// The filename pattern decides the kind; the header must confirm it with
/// an exposure time (bias frames may omit EXPTIME and default to zero).
pub fn classify_file(path: &Path) -> Result<FrameInfo> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();

    let kind = classify_name(file_name).ok_or_else(|| CalError::Classification {
        path: path.to_path_buf(),
        reason: "file name matches no known frame pattern".into(),
    })?;

    let header = FitsReader::read_header(path)?;

    let exptime = match header.get_f64("EXPTIME") {
        Some(secs) => ExposureTime::from_secs(secs),
        None if kind == FrameKind::Bias => ExposureTime::from_secs(0.0),
        None => {
            return Err(CalError::Classification {
                path: path.to_path_buf(),
                reason: format!("{kind} frame has no EXPTIME header key"),
            })
        }
    };

    let filter = header
        .get_str("FILTER")
        .map(|f| Filter::new(f.trim()))
        .unwrap_or_else(Filter::none);

    let width = header.get_i64("NAXIS1").unwrap_or(0) as usize;
    let height = header.get_i64("NAXIS2").unwrap_or(0) as usize;
    if width == 0 || height == 0 {
        return Err(CalError::Classification {
            path: path.to_path_buf(),
            reason: "header reports a zero-sized image".into(),
        });
    }

    Ok(FrameInfo {
        path: path.to_path_buf(),
        kind,
        exptime,
        filter,
        height,
        width,
    })
}

/// Everything one date's input directories contain, grouped for
/// combination. Pixel data is not loaded here; the batch controller
/// decides when frames enter memory.
#[derive(Debug, Default)]
pub struct FrameInventory {
    pub height: usize,
    pub width: usize,
    pub biases: Vec<FrameInfo>,
    /// Darks keyed by exposure time, merged across the science and flat
    /// directories (exact exposure match makes them interchangeable).
    pub darks: BTreeMap<ExposureTime, Vec<FrameInfo>>,
    /// Flats keyed by filter band.
    pub flats: BTreeMap<Filter, Vec<FrameInfo>>,
    pub science: Vec<FrameInfo>,
    /// Files excluded during the scan, with the reason (logged, not fatal).
    pub excluded: Vec<(std::path::PathBuf, String)>,
}

impl FrameInventory {
    /// Distinct exposure times for which a dark group exists.
    pub fn dark_exptimes(&self) -> Vec<ExposureTime> {
        self.darks.keys().copied().collect()
    }

    fn accept(&mut self, info: FrameInfo) {
        // First accepted frame fixes the reference dimensions.
        if self.height == 0 {
            self.height = info.height;
            self.width = info.width;
        } else if info.height != self.height || info.width != self.width {
            warn!(
                path = %info.path.display(),
                "excluding frame: dimensions {}x{} do not match group {}x{}",
                info.height, info.width, self.height, self.width
            );
            self.excluded.push((
                info.path,
                format!(
                    "dimensions {}x{} do not match group {}x{}",
                    info.height, info.width, self.height, self.width
                ),
            ));
            return;
        }

        match info.kind {
            FrameKind::Bias => self.biases.push(info),
            FrameKind::Dark => self.darks.entry(info.exptime).or_default().push(info),
            FrameKind::Flat => self
                .flats
                .entry(info.filter.clone())
                .or_default()
                .push(info),
            FrameKind::Science => self.science.push(info),
        }
    }
}

/// Scan a date's science and flat directories into a grouped inventory.
///
/// Unreadable or unclassifiable files are excluded with a warning; the
/// caller re-checks group invariants afterwards (an exclusion that
/// empties a required group becomes a fatal error there).
pub fn scan_date(layout: &DateLayout) -> Result<FrameInventory> {
    let mut inventory = FrameInventory::default();

    if !layout.science_dir.is_dir() {
        return Err(CalError::MissingScienceDir(layout.science_dir.clone()));
    }

    scan_dir(&layout.science_dir, &mut inventory)?;

    if layout.flat_dir.is_dir() {
        let darks_before = inventory.darks.len();
        scan_dir(&layout.flat_dir, &mut inventory)?;
        if darks_before == 0 && !inventory.darks.is_empty() {
            debug!("science directory had no darks; using flat-directory darks");
        }
    } else {
        warn!(
            dir = %layout.flat_dir.display(),
            "flat directory not found; no flat correction possible for this date"
        );
    }

    // Flats whose exposure time has no dark group cannot be dark-corrected;
    // dark rescaling is out of scope, so they are dropped from combination.
    for (filter, frames) in inventory.flats.iter_mut() {
        let darks = &inventory.darks;
        let mut kept = Vec::with_capacity(frames.len());
        for info in frames.drain(..) {
            if darks.contains_key(&info.exptime) {
                kept.push(info);
            } else {
                warn!(
                    path = %info.path.display(),
                    filter = %filter,
                    exptime = %info.exptime,
                    "excluding flat: no dark group at its exposure time"
                );
                inventory.excluded.push((
                    info.path,
                    format!("flat has no matching dark group at {}", info.exptime),
                ));
            }
        }
        *frames = kept;
    }
    inventory.flats.retain(|_, frames| !frames.is_empty());

    debug!(
        biases = inventory.biases.len(),
        dark_groups = inventory.darks.len(),
        flat_filters = inventory.flats.len(),
        science = inventory.science.len(),
        excluded = inventory.excluded.len(),
        "date scan complete"
    );

    Ok(inventory)
}

fn scan_dir(dir: &Path, inventory: &mut FrameInventory) -> Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension().and_then(|e| e.to_str()) == Some("fits")
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| !n.contains("_MASTER") && !n.contains("_MASK"))
        })
        .collect();
    entries.sort();

    for path in entries {
        match classify_file(&path) {
            Ok(info) => inventory.accept(info),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "excluding unclassifiable file");
                inventory.excluded.push((path, e.to_string()));
            }
        }
    }
    Ok(())
}

/// Load and decode one frame, confirming its dimensions against the
/// header-derived values recorded at classification time.
pub fn load_raw(info: &FrameInfo) -> Result<RawFrame> {
    let reader = FitsReader::open(&info.path)?;
    let (h, w) = reader.dimensions();
    if h != info.height || w != info.width {
        return Err(CalError::DimensionMismatch {
            path: info.path.clone(),
            height: info.height,
            width: info.width,
            got_height: h,
            got_width: w,
        });
    }
    let data = reader.read_image()?;
    Ok(RawFrame {
        data,
        header: reader.header.clone(),
        info: info.clone(),
    })
}
