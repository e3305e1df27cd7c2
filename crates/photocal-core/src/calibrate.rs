use std::collections::BTreeMap;

use tracing::debug;

use crate::consts::FLAT_MIN_VALUE;
use crate::cosmic::CosmicRayReport;
use crate::error::{CalError, Result};
use crate::frame::{
    BadPixelMask, CalibratedFrame, ExposureTime, Filter, MasterFrame, RawFrame,
};
use crate::io::fits::CardValue;

/// The master calibration frames for one date, held in memory for the
/// duration of that date's processing.
pub struct Masters {
    pub bias: MasterFrame,
    /// Bias-subtracted master darks keyed by exposure time.
    pub darks: BTreeMap<ExposureTime, MasterFrame>,
    /// Normalized master flats keyed by filter.
    pub flats: BTreeMap<Filter, MasterFrame>,
}

impl Masters {
    pub fn dark_for(&self, exptime: ExposureTime) -> Option<&MasterFrame> {
        self.darks.get(&exptime)
    }

    pub fn flat_for(&self, filter: &Filter) -> Option<&MasterFrame> {
        self.flats.get(filter)
    }
}

/// Apply the full instrumental-signature correction to one science frame.
///
/// Fixed order: bias subtraction, dark subtraction at the frame's exact
/// exposure time, flat division for the frame's filter, bad-pixel mask
/// application, ADU-to-electron conversion. Later steps assume the
/// earlier corrections are already applied.
///
/// Flat pixels below `FLAT_MIN_VALUE` are not divided by; those pixels
/// are masked instead. Masked pixels are set to NaN so they cannot leak
/// into downstream statistics as raw values.
pub fn calibrate(
    raw: &RawFrame,
    masters: &Masters,
    mask: &BadPixelMask,
    gain: f32,
) -> Result<CalibratedFrame> {
    let master_dark =
        masters
            .dark_for(raw.info.exptime)
            .ok_or_else(|| CalError::MissingMasterDark {
                path: raw.info.path.clone(),
                exptime: raw.info.exptime,
            })?;
    let master_flat =
        masters
            .flat_for(&raw.info.filter)
            .ok_or_else(|| CalError::MissingMasterFlat {
                path: raw.info.path.clone(),
                filter: raw.info.filter.clone(),
            })?;

    let mut data = raw.data.clone();
    data -= &masters.bias.data;
    data -= &master_dark.data;

    // Flat division with the dead-pixel guard, then mask application and
    // gain conversion, in one pass.
    ndarray::Zip::from(&mut data)
        .and(&master_flat.data)
        .and(&mask.mask)
        .for_each(|px, &flat, &bad| {
            if bad || flat.abs() < FLAT_MIN_VALUE {
                *px = f32::NAN;
            } else {
                *px = *px / flat * gain;
            }
        });

    let mut header = raw.header.clone();
    header.set_with_comment(
        "BUNIT",
        CardValue::Str("electron".into()),
        Some("pixel units after gain conversion"),
    );
    header.set_with_comment(
        "GAINAPP",
        CardValue::Real(gain as f64),
        Some("gain applied, electrons per ADU"),
    );

    debug!(
        path = %raw.info.path.display(),
        exptime = %raw.info.exptime,
        filter = %raw.info.filter,
        gain,
        "calibrated science frame"
    );

    Ok(CalibratedFrame {
        data,
        header,
        source: raw.info.path.clone(),
        gain,
        cosmic: CosmicRayReport::default(),
    })
}
