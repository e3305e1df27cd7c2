use std::fs::File;
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder};
use memmap2::Mmap;
use ndarray::Array2;

use crate::consts::{FITS_BLOCK_SIZE, FITS_CARD_SIZE};
use crate::error::{CalError, Result};

/// A single FITS header value.
#[derive(Clone, Debug, PartialEq)]
pub enum CardValue {
    Str(String),
    Int(i64),
    Real(f64),
    Logical(bool),
    /// COMMENT / HISTORY / blank-keyword cards: raw text, no `=`.
    Commentary(String),
}

/// One 80-byte header card.
#[derive(Clone, Debug)]
pub struct Card {
    pub key: String,
    pub value: CardValue,
    pub comment: Option<String>,
}

/// FITS primary header, preserving card order for faithful rewrites.
#[derive(Clone, Debug, Default)]
pub struct FitsHeader {
    cards: Vec<Card>,
}

impl FitsHeader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    fn find(&self, key: &str) -> Option<&Card> {
        let key = key.to_ascii_uppercase();
        self.cards.iter().find(|c| c.key == key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.find(key).is_some()
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.find(key)?.value {
            CardValue::Str(ref s) => Some(s),
            _ => None,
        }
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.find(key)?.value {
            CardValue::Real(v) => Some(v),
            CardValue::Int(v) => Some(v as f64),
            _ => None,
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.find(key)?.value {
            CardValue::Int(v) => Some(v),
            CardValue::Real(v) => Some(v as i64),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.find(key)?.value {
            CardValue::Logical(v) => Some(v),
            _ => None,
        }
    }

    /// Replace the value of `key`, or append a new card at the end.
    pub fn set(&mut self, key: &str, value: CardValue) {
        self.set_with_comment(key, value, None);
    }

    pub fn set_with_comment(&mut self, key: &str, value: CardValue, comment: Option<&str>) {
        let key = key.to_ascii_uppercase();
        let comment = comment.map(|c| c.to_string());
        if let Some(card) = self.cards.iter_mut().find(|c| c.key == key) {
            card.value = value;
            if comment.is_some() {
                card.comment = comment;
            }
        } else {
            self.cards.push(Card {
                key,
                value,
                comment,
            });
        }
    }

    pub fn set_str(&mut self, key: &str, value: &str) {
        self.set(key, CardValue::Str(value.to_string()));
    }

    pub fn set_f64(&mut self, key: &str, value: f64) {
        self.set(key, CardValue::Real(value));
    }

    pub fn set_i64(&mut self, key: &str, value: i64) {
        self.set(key, CardValue::Int(value));
    }

    pub fn remove(&mut self, key: &str) {
        let key = key.to_ascii_uppercase();
        self.cards.retain(|c| c.key != key);
    }
}

/// Memory-mapped single-HDU FITS reader.
///
/// Supports the integer and float BITPIX values the instrument produces
/// (8, 16, 32, -32, -64) and applies BSCALE/BZERO, so unsigned-16 data
/// stored with BZERO = 32768 decodes to its physical ADU values.
pub struct FitsReader {
    mmap: Mmap,
    pub header: FitsHeader,
    path: PathBuf,
    data_offset: usize,
    bitpix: i32,
    height: usize,
    width: usize,
    bscale: f64,
    bzero: f64,
}

impl FitsReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        let (header, data_offset) = parse_header(&mmap, path)?;

        if header.get_bool("SIMPLE") != Some(true) {
            return Err(invalid(path, "not a standard FITS file (SIMPLE != T)"));
        }
        let bitpix = header
            .get_i64("BITPIX")
            .ok_or_else(|| invalid(path, "missing BITPIX"))? as i32;
        if !matches!(bitpix, 8 | 16 | 32 | -32 | -64) {
            return Err(invalid(path, &format!("unsupported BITPIX {bitpix}")));
        }
        let naxis = header.get_i64("NAXIS").unwrap_or(0);
        if naxis != 2 {
            return Err(invalid(path, &format!("unsupported NAXIS {naxis}")));
        }
        let width = header
            .get_i64("NAXIS1")
            .ok_or_else(|| invalid(path, "missing NAXIS1"))? as usize;
        let height = header
            .get_i64("NAXIS2")
            .ok_or_else(|| invalid(path, "missing NAXIS2"))? as usize;
        if width == 0 || height == 0 {
            return Err(invalid(path, "zero-sized image"));
        }

        let bscale = header.get_f64("BSCALE").unwrap_or(1.0);
        let bzero = header.get_f64("BZERO").unwrap_or(0.0);

        let bytes_per_pixel = (bitpix.unsigned_abs() / 8) as usize;
        let expected = data_offset + width * height * bytes_per_pixel;
        if mmap.len() < expected {
            return Err(invalid(
                path,
                &format!("truncated: expected {} bytes, got {}", expected, mmap.len()),
            ));
        }

        Ok(Self {
            mmap,
            header,
            path: path.to_path_buf(),
            data_offset,
            bitpix,
            height,
            width,
            bscale,
            bzero,
        })
    }

    /// Parse only the header of a FITS file, without validating the data
    /// section. Used for cheap classification scans.
    pub fn read_header(path: &Path) -> Result<FitsHeader> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let (header, _) = parse_header(&mmap, path)?;
        Ok(header)
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Decode the image to physical values as f32, row-major (height, width).
    pub fn read_image(&self) -> Result<Array2<f32>> {
        let n = self.height * self.width;
        let bpp = (self.bitpix.unsigned_abs() / 8) as usize;
        let raw = &self.mmap[self.data_offset..self.data_offset + n * bpp];

        let mut out = Vec::with_capacity(n);
        match self.bitpix {
            8 => out.extend(raw.iter().map(|&b| self.physical(b as f64))),
            16 => {
                for chunk in raw.chunks_exact(2) {
                    out.push(self.physical(BigEndian::read_i16(chunk) as f64));
                }
            }
            32 => {
                for chunk in raw.chunks_exact(4) {
                    out.push(self.physical(BigEndian::read_i32(chunk) as f64));
                }
            }
            -32 => {
                for chunk in raw.chunks_exact(4) {
                    out.push(self.physical(BigEndian::read_f32(chunk) as f64));
                }
            }
            -64 => {
                for chunk in raw.chunks_exact(8) {
                    out.push(self.physical(BigEndian::read_f64(chunk)));
                }
            }
            _ => unreachable!("BITPIX validated in open()"),
        }

        Array2::from_shape_vec((self.height, self.width), out)
            .map_err(|e| invalid(&self.path, &format!("shape error: {e}")))
    }

    fn physical(&self, stored: f64) -> f32 {
        (self.bzero + self.bscale * stored) as f32
    }
}

fn invalid(path: &Path, reason: &str) -> CalError {
    CalError::InvalidFits {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Parse header blocks up to the END card. Returns the header and the
/// offset of the first data byte (next 2880-byte boundary after END).
fn parse_header(buf: &[u8], path: &Path) -> Result<(FitsHeader, usize)> {
    let mut header = FitsHeader::new();
    let mut offset = 0;

    loop {
        if offset + FITS_BLOCK_SIZE > buf.len() {
            return Err(invalid(path, "header has no END card"));
        }
        let block = &buf[offset..offset + FITS_BLOCK_SIZE];
        for card_bytes in block.chunks_exact(FITS_CARD_SIZE) {
            // Cards are sliced by byte offset below; only ASCII keeps
            // those offsets on character boundaries.
            let card = std::str::from_utf8(card_bytes)
                .ok()
                .filter(|card| card.is_ascii())
                .ok_or_else(|| invalid(path, "non-ASCII header card"))?;
            let key = card[..8].trim_end().to_string();
            if key == "END" {
                return Ok((header, offset + FITS_BLOCK_SIZE));
            }
            if let Some(card) = parse_card(&key, card) {
                header.cards.push(card);
            }
        }
        offset += FITS_BLOCK_SIZE;
    }
}

fn parse_card(key: &str, card: &str) -> Option<Card> {
    if key.is_empty() {
        return None;
    }
    // Commentary cards and anything without the "= " value indicator.
    if key == "COMMENT" || key == "HISTORY" || &card[8..10] != "= " {
        return Some(Card {
            key: key.to_string(),
            value: CardValue::Commentary(card[8..].trim_end().to_string()),
            comment: None,
        });
    }

    let body = &card[10..];
    let trimmed = body.trim_start();

    if let Some(rest) = trimmed.strip_prefix('\'') {
        // Quoted string; '' is an escaped quote.
        let mut value = String::new();
        let mut chars = rest.chars().peekable();
        let mut consumed = 1; // opening quote
        while let Some(c) = chars.next() {
            consumed += c.len_utf8();
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    consumed += 1;
                    value.push('\'');
                } else {
                    break;
                }
            } else {
                value.push(c);
            }
        }
        let after = &trimmed[consumed..];
        let comment = after
            .split_once('/')
            .map(|(_, c)| c.trim().to_string())
            .filter(|c| !c.is_empty());
        return Some(Card {
            key: key.to_string(),
            value: CardValue::Str(value.trim_end().to_string()),
            comment,
        });
    }

    let (value_part, comment) = match trimmed.split_once('/') {
        Some((v, c)) => (v.trim(), Some(c.trim().to_string()).filter(|c| !c.is_empty())),
        None => (trimmed.trim_end(), None),
    };

    let value = match value_part {
        "T" => CardValue::Logical(true),
        "F" => CardValue::Logical(false),
        v => {
            if let Ok(i) = v.parse::<i64>() {
                CardValue::Int(i)
            } else if let Ok(r) = v.parse::<f64>() {
                CardValue::Real(r)
            } else {
                CardValue::Str(v.to_string())
            }
        }
    };

    Some(Card {
        key: key.to_string(),
        value,
        comment,
    })
}
