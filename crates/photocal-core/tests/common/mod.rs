#![allow(dead_code)]

use std::path::{Path, PathBuf};

use ndarray::Array2;
use photocal_core::io::fits::FitsHeader;
use photocal_core::io::fits_writer::write_f32_image;
use photocal_core::manifest::{FLAT_DIR_SUFFIX, SCIENCE_DIR_SUFFIX};

pub fn uniform(height: usize, width: usize, fill: f32) -> Array2<f32> {
    Array2::from_elem((height, width), fill)
}

/// Write a synthetic BITPIX = -32 frame with the usual instrument keys.
pub fn write_image(path: &Path, data: &Array2<f32>, exptime: Option<f64>, filter: Option<&str>) {
    let mut header = FitsHeader::new();
    if let Some(e) = exptime {
        header.set_f64("EXPTIME", e);
    }
    if let Some(f) = filter {
        header.set_str("FILTER", f);
    }
    header.set_f64("GAIN", 2.0);
    header.set_f64("RDNOISE", 9.0);
    write_f32_image(path, data, &header).expect("write FITS");
}

pub fn card(text: &str) -> Vec<u8> {
    format!("{text:<80}").into_bytes()
}

/// Build a raw BITPIX = 16 FITS buffer byte by byte, bypassing the
/// writer, so the reader's integer decode path can be tested on its own.
pub fn build_i16_fits(height: usize, width: usize, values: &[i16], bzero: f64) -> Vec<u8> {
    assert_eq!(values.len(), height * width);

    let mut buf = Vec::new();
    buf.extend(card("SIMPLE  =                    T"));
    buf.extend(card("BITPIX  =                   16"));
    buf.extend(card("NAXIS   =                    2"));
    buf.extend(card(&format!("NAXIS1  = {width:>20}")));
    buf.extend(card(&format!("NAXIS2  = {height:>20}")));
    buf.extend(card(&format!("BZERO   = {:>20}", format!("{bzero:.1}"))));
    buf.extend(card("END"));
    while buf.len() % 2880 != 0 {
        buf.extend(card(""));
    }

    for &v in values {
        buf.extend_from_slice(&v.to_be_bytes());
    }
    while buf.len() % 2880 != 0 {
        buf.push(0);
    }
    buf
}

pub fn write_bytes(path: &Path, data: &[u8]) {
    std::fs::write(path, data).expect("write file");
}

/// A temporary observing-date tree following the directory contract:
/// `<date>/<date>-CAMS` for science frames and their darks,
/// `<date>/<date>-CAMS_SKYFLAT` for sky flats and their darks.
pub struct DateFixture {
    pub tmp: tempfile::TempDir,
    pub date_dir: PathBuf,
    pub science_dir: PathBuf,
    pub flat_dir: PathBuf,
}

impl DateFixture {
    pub fn new(date: &str) -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        let date_dir = tmp.path().join(date);
        let science_dir = date_dir.join(format!("{date}{SCIENCE_DIR_SUFFIX}"));
        let flat_dir = date_dir.join(format!("{date}{FLAT_DIR_SUFFIX}"));
        std::fs::create_dir_all(&science_dir).expect("create science dir");
        std::fs::create_dir_all(&flat_dir).expect("create flat dir");
        Self {
            tmp,
            date_dir,
            science_dir,
            flat_dir,
        }
    }

    pub fn add_bias(&self, idx: usize, data: &Array2<f32>) -> PathBuf {
        let path = self.science_dir.join(format!("{idx:03}_BIAS.fits"));
        write_image(&path, data, None, None);
        path
    }

    pub fn add_dark(&self, idx: usize, exptime: f64, data: &Array2<f32>) -> PathBuf {
        let path = self.science_dir.join(format!("{idx:03}_DARK.fits"));
        write_image(&path, data, Some(exptime), None);
        path
    }

    pub fn add_flat_dark(&self, idx: usize, exptime: f64, data: &Array2<f32>) -> PathBuf {
        let path = self.flat_dir.join(format!("{idx:03}_DARK.fits"));
        write_image(&path, data, Some(exptime), None);
        path
    }

    pub fn add_flat(&self, idx: usize, filter: &str, exptime: f64, data: &Array2<f32>) -> PathBuf {
        let path = self.flat_dir.join(format!("{idx:03}_SKYFLAT.fits"));
        write_image(&path, data, Some(exptime), Some(filter));
        path
    }

    pub fn add_science(&self, idx: usize, filter: &str, exptime: f64, data: &Array2<f32>) -> PathBuf {
        let path = self.science_dir.join(format!("{idx:03}_SCIENCE.fits"));
        write_image(&path, data, Some(exptime), Some(filter));
        path
    }
}
