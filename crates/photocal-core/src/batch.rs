use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::calibrate::{calibrate, Masters};
use crate::classify::{load_raw, scan_date, FrameInventory};
use crate::combine::{
    self,
    flat::{correct_flat, normalize_flat},
    CombineMethod, SigmaClipParams, WeightedMeanAccumulator,
};
use crate::consts::{DEFAULT_MASK_SIGMA, DEFAULT_MEM_LIMIT_GB, MEM_SAFETY_FACTOR};
use crate::cosmic::{remove_cosmic_rays, CosmicRayParams};
use crate::error::{CalError, Result};
use crate::frame::{
    BadPixelMask, ExposureTime, Filter, FrameInfo, FrameKind, MasterFrame, MasterProvenance,
};
use crate::io::fits::{CardValue, FitsHeader, FitsReader};
use crate::io::fits_writer::{write_f32_image, write_mask_image};
use crate::manifest::{self, DateLayout, FsStorage};
use crate::mask::generate_mask;

/// Everything the reduction engine needs to know, threaded explicitly
/// through every stage. Loadable from TOML; no ambient state.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReductionConfig {
    /// Memory budget for frame combination, in GB.
    pub mem_limit_gb: f64,
    /// Re-run dates and rebuild masters even when outputs exist.
    pub force: bool,
    /// Override the per-frame GAIN header key (electrons per ADU).
    pub gain: Option<f32>,
    /// Override the per-frame RDNOISE header key (electrons).
    pub readnoise: Option<f32>,
    /// Sigma clipping applied while combining calibration frames.
    pub combine: SigmaClipParams,
    /// Sigma multiple for the bad-pixel mask bounds.
    pub mask_sigma: f32,
    pub cosmic: CosmicRayParams,
}

impl Default for ReductionConfig {
    fn default() -> Self {
        Self {
            mem_limit_gb: DEFAULT_MEM_LIMIT_GB,
            force: false,
            gain: None,
            readnoise: None,
            combine: SigmaClipParams::default(),
            mask_sigma: DEFAULT_MASK_SIGMA,
            cosmic: CosmicRayParams::default(),
        }
    }
}

impl ReductionConfig {
    /// Frames that may be held decoded at once during combination.
    pub fn max_frames_in_memory(&self, height: usize, width: usize) -> usize {
        let frame_bytes =
            height as f64 * width as f64 * std::mem::size_of::<f32>() as f64 * MEM_SAFETY_FACTOR;
        let budget = self.mem_limit_gb * 1024.0 * 1024.0 * 1024.0;
        ((budget / frame_bytes) as usize).max(1)
    }
}

/// Terminal state of one date.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DateStatus {
    /// Every science frame calibrated.
    Done,
    /// Outputs already existed and `force` was not set.
    SkipAlreadyDone,
    /// Some frames failed (missing master, decode error); the rest were
    /// calibrated and written.
    PartialFailure,
    /// A required frame group was empty or the date could not be
    /// processed at all; no outputs were written.
    FatalError,
}

impl fmt::Display for DateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done => write!(f, "done"),
            Self::SkipAlreadyDone => write!(f, "already calibrated"),
            Self::PartialFailure => write!(f, "partial failure"),
            Self::FatalError => write!(f, "fatal error"),
        }
    }
}

/// One science frame that could not be calibrated.
#[derive(Clone, Debug)]
pub struct FrameFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// Structural result of `calibrate_date`, the invocation contract the
/// date orchestrator consumes.
#[derive(Debug)]
pub struct DateReport {
    pub date: String,
    pub status: DateStatus,
    /// Calibrated outputs written this run.
    pub outputs: Vec<PathBuf>,
    pub failures: Vec<FrameFailure>,
    /// Files dropped during the scan (unreadable, unclassifiable, or
    /// otherwise unusable). These never count against the status.
    pub excluded: Vec<FrameFailure>,
    /// Present iff `status == FatalError`.
    pub fatal: Option<String>,
}

impl DateReport {
    fn skipped(date: String) -> Self {
        Self {
            date,
            status: DateStatus::SkipAlreadyDone,
            outputs: Vec::new(),
            failures: Vec::new(),
            excluded: Vec::new(),
            fatal: None,
        }
    }

    fn fatal(date: String, error: &CalError) -> Self {
        Self {
            date,
            status: DateStatus::FatalError,
            outputs: Vec::new(),
            failures: Vec::new(),
            excluded: Vec::new(),
            fatal: Some(error.to_string()),
        }
    }
}

/// Pipeline stage, used for progress reporting.
#[derive(Clone, Copy, Debug)]
pub enum ReductionStage {
    Scanning,
    BuildingMasters,
    Calibrating,
}

impl fmt::Display for ReductionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scanning => write!(f, "Scanning frames"),
            Self::BuildingMasters => write!(f, "Building masters"),
            Self::Calibrating => write!(f, "Calibrating"),
        }
    }
}

/// Progress feedback for UI layers. All methods default to no-ops.
pub trait ProgressReporter {
    fn begin_stage(&self, _stage: ReductionStage, _total_items: Option<usize>) {}
    fn advance(&self, _items_done: usize) {}
    fn finish_stage(&self) {}
}

struct NoOpReporter;
impl ProgressReporter for NoOpReporter {}

/// Reduce one date directory: build masters and the mask, calibrate and
/// clean every science frame, and report the terminal state.
///
/// Idempotent: when every expected output already exists and `force` is
/// not set, the date is skipped and reported as such.
pub fn calibrate_date(date_dir: &Path, config: &ReductionConfig) -> DateReport {
    calibrate_date_reported(date_dir, config, &NoOpReporter)
}

pub fn calibrate_date_reported(
    date_dir: &Path,
    config: &ReductionConfig,
    reporter: &dyn ProgressReporter,
) -> DateReport {
    let layout = DateLayout::new(date_dir);
    let date = layout.date.clone();

    if !config.force {
        if let Ok(inputs) = manifest::expected_science_inputs(&layout) {
            if manifest::is_date_done(&layout, &inputs, &FsStorage) {
                info!(
                    date,
                    files = inputs.len(),
                    "calibration already exists, skipping (use force to recalibrate)"
                );
                return DateReport::skipped(date);
            }
        }
    }

    match run_date(&layout, config, reporter) {
        Ok(report) => report,
        Err(e) => {
            warn!(date, error = %e, "date aborted");
            DateReport::fatal(date, &e)
        }
    }
}

/// Build and persist the masters and mask for one date without touching
/// its science frames. Respects the same cache/force semantics as a full
/// run.
pub fn build_date_masters(
    date_dir: &Path,
    config: &ReductionConfig,
) -> Result<(Masters, BadPixelMask)> {
    let layout = DateLayout::new(date_dir);
    let inventory = scan_date(&layout)?;
    if inventory.biases.is_empty() {
        return Err(CalError::EmptyGroup {
            kind: FrameKind::Bias,
            date: layout.date.clone(),
        });
    }
    if inventory.flats.is_empty() {
        return Err(CalError::EmptyGroup {
            kind: FrameKind::Flat,
            date: layout.date.clone(),
        });
    }
    let (masters, mask) = build_masters(&layout, &inventory, config)?;
    persist_masters(&layout, &masters, &mask)?;
    Ok((masters, mask))
}

fn run_date(
    layout: &DateLayout,
    config: &ReductionConfig,
    reporter: &dyn ProgressReporter,
) -> Result<DateReport> {
    info!(date = layout.date, "processing date");

    reporter.begin_stage(ReductionStage::Scanning, None);
    let inventory = scan_date(layout)?;
    reporter.finish_stage();

    let empty_group = |kind: FrameKind| CalError::EmptyGroup {
        kind,
        date: layout.date.clone(),
    };
    if inventory.biases.is_empty() {
        return Err(empty_group(FrameKind::Bias));
    }
    if inventory.flats.is_empty() {
        return Err(empty_group(FrameKind::Flat));
    }
    if inventory.science.is_empty() {
        return Err(empty_group(FrameKind::Science));
    }

    reporter.begin_stage(ReductionStage::BuildingMasters, None);
    let (masters, mask) = build_masters(layout, &inventory, config)?;
    persist_masters(layout, &masters, &mask)?;
    reporter.finish_stage();

    // Science frames one at a time: the masters dominate resident memory.
    let total = inventory.science.len();
    reporter.begin_stage(ReductionStage::Calibrating, Some(total));
    let mut outputs = Vec::new();
    let mut failures = Vec::new();

    for (idx, info) in inventory.science.iter().enumerate() {
        match calibrate_one(info, &masters, &mask, layout, config) {
            Ok(output) => outputs.push(output),
            Err(e) => {
                warn!(path = %info.path.display(), error = %e, "science frame failed");
                failures.push(FrameFailure {
                    path: info.path.clone(),
                    reason: e.to_string(),
                });
            }
        }
        reporter.advance(idx + 1);
    }
    reporter.finish_stage();

    let status = if failures.is_empty() {
        DateStatus::Done
    } else {
        DateStatus::PartialFailure
    };
    info!(
        date = layout.date,
        calibrated = outputs.len(),
        failed = failures.len(),
        excluded = inventory.excluded.len(),
        %status,
        "date complete"
    );

    let excluded = inventory
        .excluded
        .into_iter()
        .map(|(path, reason)| FrameFailure { path, reason })
        .collect();

    Ok(DateReport {
        date: layout.date.clone(),
        status,
        outputs,
        failures,
        excluded,
        fatal: None,
    })
}

fn calibrate_one(
    info: &FrameInfo,
    masters: &Masters,
    mask: &BadPixelMask,
    layout: &DateLayout,
    config: &ReductionConfig,
) -> Result<PathBuf> {
    let raw = load_raw(info)?;

    let gain = config
        .gain
        .or_else(|| raw.header.get_f64("GAIN").map(|g| g as f32))
        .unwrap_or(crate::consts::DEFAULT_GAIN);
    let readnoise = config
        .readnoise
        .or_else(|| raw.header.get_f64("RDNOISE").map(|r| r as f32))
        .unwrap_or(crate::consts::DEFAULT_READNOISE);

    let mut calibrated = calibrate(&raw, masters, mask, gain)?;

    let cr_params = CosmicRayParams {
        readnoise,
        ..config.cosmic.clone()
    };
    remove_cosmic_rays(&mut calibrated, &cr_params);

    // Calibration provenance, on top of the preserved original header.
    let header = &mut calibrated.header;
    header.set_str("ACQTYPE", "SCIENCE_CAL");
    header.set_str(
        "CALBIAS",
        &file_name(&layout.master_bias_path()),
    );
    header.set_str(
        "CALDARK",
        &file_name(&layout.master_dark_path(info.exptime)),
    );
    header.set_str(
        "CALFLAT",
        &file_name(&layout.master_flat_path(&info.filter)),
    );
    header.set_str("CALMASK", &file_name(&layout.mask_path()));
    header.set_with_comment(
        "CRCLEAN",
        CardValue::Logical(calibrated.cosmic.converged),
        Some("cosmic-ray removal converged"),
    );
    header.set_i64("CRITER", calibrated.cosmic.iterations as i64);
    header.set_i64("CRCOUNT", calibrated.cosmic.flagged_pixels as i64);

    let output = layout.calibrated_path(&info.path);
    write_f32_image(&output, &calibrated.data, &calibrated.header)?;
    Ok(output)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string()
}

// ---------------------------------------------------------------------------
// Master construction
// ---------------------------------------------------------------------------

fn build_masters(
    layout: &DateLayout,
    inventory: &FrameInventory,
    config: &ReductionConfig,
) -> Result<(Masters, BadPixelMask)> {
    let capacity = config.max_frames_in_memory(inventory.height, inventory.width);
    info!(
        capacity,
        mem_limit_gb = config.mem_limit_gb,
        "combination memory budget"
    );

    // Cached artifacts from an earlier interrupted run are reused unless
    // the caller forces a rebuild.
    let reuse = !config.force;

    let clip_mean = CombineMethod::SigmaClippedMean(config.combine.clone());
    let clip_median = CombineMethod::SigmaClippedMedian(config.combine.clone());

    // Master bias.
    let bias = match load_cached(layout.master_bias_path(), reuse, FrameKind::Bias, None, None, &clip_mean) {
        Some(m) => m,
        None => {
            let (data, count, chunks) =
                combine_chunked(&inventory.biases, &clip_mean, capacity, |raw| Ok(raw.data))?;
            MasterFrame {
                data,
                provenance: MasterProvenance {
                    kind: FrameKind::Bias,
                    input_count: count,
                    method: clip_mean.clone(),
                    exptime: None,
                    filter: None,
                    chunks,
                },
            }
        }
    };

    // Bias-subtracted master darks, one per exposure time.
    let mut darks: BTreeMap<ExposureTime, MasterFrame> = BTreeMap::new();
    for (&exptime, group) in &inventory.darks {
        let cached = load_cached(
            layout.master_dark_path(exptime),
            reuse,
            FrameKind::Dark,
            Some(exptime),
            None,
            &clip_mean,
        );
        let master = match cached {
            Some(m) => m,
            None => {
                let bias_data = &bias.data;
                let (data, count, chunks) =
                    combine_chunked(group, &clip_mean, capacity, |raw| Ok(raw.data - bias_data))?;
                MasterFrame {
                    data,
                    provenance: MasterProvenance {
                        kind: FrameKind::Dark,
                        input_count: count,
                        method: clip_mean.clone(),
                        exptime: Some(exptime),
                        filter: None,
                        chunks,
                    },
                }
            }
        };
        darks.insert(exptime, master);
    }

    // Master flats. Two passes: a provisional flat fixes the bad-pixel
    // mask, then normalization is redone with masked pixels excluded
    // from the statistics.
    let mut cached_flats: BTreeMap<Filter, MasterFrame> = BTreeMap::new();
    let mut all_cached = true;
    for filter in inventory.flats.keys() {
        match load_cached(
            layout.master_flat_path(filter),
            reuse,
            FrameKind::Flat,
            None,
            Some(filter.clone()),
            &clip_median,
        ) {
            Some(m) => {
                cached_flats.insert(filter.clone(), m);
            }
            None => {
                all_cached = false;
                break;
            }
        }
    }
    let cached_mask = load_cached_mask(layout, reuse, inventory.height, inventory.width);

    let (flats, mask) = match (all_cached, cached_mask) {
        (true, Some(mask)) => (cached_flats, mask),
        _ => {
            let provisional = build_flats(inventory, &bias, &darks, None, &clip_median, capacity)?;
            let mut mask = BadPixelMask::all_good(inventory.height, inventory.width);
            for master in provisional.values() {
                mask.union(&generate_mask(master, config.mask_sigma));
            }
            let flats = build_flats(
                inventory,
                &bias,
                &darks,
                Some(&mask.mask),
                &clip_median,
                capacity,
            )?;
            (flats, mask)
        }
    };

    Ok((Masters { bias, darks, flats }, mask))
}

fn build_flats(
    inventory: &FrameInventory,
    bias: &MasterFrame,
    darks: &BTreeMap<ExposureTime, MasterFrame>,
    mask: Option<&Array2<bool>>,
    method: &CombineMethod,
    capacity: usize,
) -> Result<BTreeMap<Filter, MasterFrame>> {
    let mut flats = BTreeMap::new();
    for (filter, group) in &inventory.flats {
        let (data, count, chunks) = combine_chunked(group, method, capacity, |raw| {
            // Scan-time filtering guarantees a dark group at every
            // retained flat's exposure time.
            let dark = darks
                .get(&raw.info.exptime)
                .ok_or_else(|| CalError::MissingMasterDark {
                    path: raw.info.path.clone(),
                    exptime: raw.info.exptime,
                })?;
            let mut corrected = correct_flat(&raw.data, &bias.data, &dark.data);
            normalize_flat(&mut corrected, mask)?;
            Ok(corrected)
        })?;
        info!(filter = %filter, frames = count, chunks, "master flat combined");
        flats.insert(
            filter.clone(),
            MasterFrame {
                data,
                provenance: MasterProvenance {
                    kind: FrameKind::Flat,
                    input_count: count,
                    method: method.clone(),
                    exptime: None,
                    filter: Some(filter.clone()),
                    chunks,
                },
            },
        );
    }
    Ok(flats)
}

/// Combine a group under the memory budget.
///
/// When the group exceeds `capacity` frames, it is processed in
/// sequential chunks whose partial masters are merged by frame-count
/// weighted mean. Individual frames that fail to load or preprocess are
/// logged and excluded; a group that loses every member is an error for
/// the caller to escalate.
///
/// Returns (combined, frames used, chunk count).
fn combine_chunked<F>(
    group: &[FrameInfo],
    method: &CombineMethod,
    capacity: usize,
    mut prep: F,
) -> Result<(Array2<f32>, usize, usize)>
where
    F: FnMut(crate::frame::RawFrame) -> Result<Array2<f32>>,
{
    if group.is_empty() {
        return Err(CalError::EmptySequence);
    }
    let (h, w) = (group[0].height, group[0].width);

    let mut acc = WeightedMeanAccumulator::new(h, w);
    let mut used = 0usize;
    let mut chunks = 0usize;
    let mut single_chunk_result: Option<Array2<f32>> = None;
    let n_chunks_planned = group.len().div_ceil(capacity);

    for chunk in group.chunks(capacity) {
        let mut arrays: Vec<Array2<f32>> = Vec::with_capacity(chunk.len());
        for info in chunk {
            match load_raw(info).and_then(&mut prep) {
                Ok(data) => arrays.push(data),
                Err(e) => {
                    warn!(path = %info.path.display(), error = %e, "excluding frame from combination");
                }
            }
        }
        if arrays.is_empty() {
            continue;
        }
        let partial = combine::combine(&arrays, method)?;
        used += arrays.len();
        chunks += 1;
        if n_chunks_planned == 1 {
            single_chunk_result = Some(partial);
        } else {
            acc.add(&partial, arrays.len());
        }
    }

    if used == 0 {
        return Err(CalError::EmptySequence);
    }

    let combined = match single_chunk_result {
        Some(result) => result,
        None => acc.finalize()?,
    };
    Ok((combined, used, chunks))
}

// ---------------------------------------------------------------------------
// Master persistence and cache
// ---------------------------------------------------------------------------

fn persist_masters(layout: &DateLayout, masters: &Masters, mask: &BadPixelMask) -> Result<()> {
    std::fs::create_dir_all(&layout.cal_dir)?;

    write_master(
        &layout.master_bias_path(),
        &masters.bias,
        "MASTERBIAS",
    )?;
    for (&exptime, master) in &masters.darks {
        write_master(&layout.master_dark_path(exptime), master, "MASTERDARK")?;
    }
    for (filter, master) in &masters.flats {
        write_master(&layout.master_flat_path(filter), master, "MASTERFLAT")?;
    }

    let mut header = FitsHeader::new();
    header.set_str("ACQTYPE", "MASK");
    write_mask_image(&layout.mask_path(), &mask.mask, &header)?;
    Ok(())
}

fn write_master(path: &Path, master: &MasterFrame, acqtype: &str) -> Result<()> {
    let mut header = FitsHeader::new();
    header.set_str("ACQTYPE", acqtype);
    header.set_with_comment(
        "NCOMBINE",
        CardValue::Int(master.provenance.input_count as i64),
        Some("frames combined"),
    );
    header.set_str("COMBMETH", &master.provenance.method.to_string());
    if master.provenance.chunks > 1 {
        header.set_i64("NCHUNKS", master.provenance.chunks as i64);
    }
    if let Some(exptime) = master.provenance.exptime {
        header.set_f64("EXPTIME", exptime.secs());
    }
    if let Some(ref filter) = master.provenance.filter {
        header.set_str("FILTER", filter.name());
    }
    write_f32_image(path, &master.data, &header)
}

fn load_cached(
    path: PathBuf,
    reuse: bool,
    kind: FrameKind,
    exptime: Option<ExposureTime>,
    filter: Option<Filter>,
    method: &CombineMethod,
) -> Option<MasterFrame> {
    if !reuse || !path.is_file() {
        return None;
    }
    let reader = FitsReader::open(&path).ok()?;
    let data = reader.read_image().ok()?;
    let input_count = reader.header.get_i64("NCOMBINE").unwrap_or(0) as usize;
    let chunks = reader.header.get_i64("NCHUNKS").unwrap_or(1) as usize;
    info!(path = %path.display(), "reusing cached master");
    Some(MasterFrame {
        data,
        provenance: MasterProvenance {
            kind,
            input_count,
            method: method.clone(),
            exptime,
            filter,
            chunks,
        },
    })
}

fn load_cached_mask(
    layout: &DateLayout,
    reuse: bool,
    height: usize,
    width: usize,
) -> Option<BadPixelMask> {
    if !reuse {
        return None;
    }
    let path = layout.mask_path();
    if !path.is_file() {
        return None;
    }
    let reader = FitsReader::open(&path).ok()?;
    let data = reader.read_image().ok()?;
    if data.dim() != (height, width) {
        return None;
    }
    info!(path = %path.display(), "reusing cached bad-pixel mask");
    Some(BadPixelMask {
        mask: data.mapv(|v| v != 0.0),
    })
}
