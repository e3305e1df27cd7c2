use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use ndarray::Array2;

use crate::consts::{FITS_BLOCK_SIZE, FITS_CARD_SIZE};
use crate::error::Result;
use crate::io::fits::{CardValue, FitsHeader};

/// Structural keys owned by the writer; never copied from a source header.
const RESERVED_KEYS: [&str; 8] = [
    "SIMPLE", "BITPIX", "NAXIS", "NAXIS1", "NAXIS2", "BSCALE", "BZERO", "END",
];

/// Write a 2-D f32 image as a BITPIX = -32 FITS file.
///
/// `header` cards are carried over after the mandatory structural cards,
/// so calibration outputs keep their original metadata plus whatever
/// provenance keys the caller added.
pub fn write_f32_image(path: &Path, data: &Array2<f32>, header: &FitsHeader) -> Result<()> {
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);

    let (h, width) = data.dim();
    write_header(&mut w, -32, h, width, header)?;

    let mut written = 0usize;
    for &v in data.iter() {
        w.write_all(&v.to_be_bytes())?;
        written += 4;
    }
    pad_to_block(&mut w, written)?;
    w.flush()?;
    Ok(())
}

/// Write a boolean mask as a BITPIX = 8 FITS file (bad = 1, good = 0).
pub fn write_mask_image(path: &Path, mask: &Array2<bool>, header: &FitsHeader) -> Result<()> {
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);

    let (h, width) = mask.dim();
    write_header(&mut w, 8, h, width, header)?;

    let mut written = 0usize;
    for &bad in mask.iter() {
        w.write_all(&[u8::from(bad)])?;
        written += 1;
    }
    pad_to_block(&mut w, written)?;
    w.flush()?;
    Ok(())
}

fn write_header(
    w: &mut impl Write,
    bitpix: i32,
    height: usize,
    width: usize,
    header: &FitsHeader,
) -> Result<()> {
    let mut cards: Vec<String> = vec![
        format_card("SIMPLE", &CardValue::Logical(true), Some("conforms to FITS standard")),
        format_card("BITPIX", &CardValue::Int(bitpix as i64), Some("bits per pixel")),
        format_card("NAXIS", &CardValue::Int(2), None),
        format_card("NAXIS1", &CardValue::Int(width as i64), None),
        format_card("NAXIS2", &CardValue::Int(height as i64), None),
    ];

    for card in header.cards() {
        if RESERVED_KEYS.contains(&card.key.as_str()) {
            continue;
        }
        cards.push(format_card(&card.key, &card.value, card.comment.as_deref()));
    }
    cards.push(format!("{:<80}", "END"));

    let mut written = 0usize;
    for card in &cards {
        debug_assert_eq!(card.len(), FITS_CARD_SIZE);
        w.write_all(card.as_bytes())?;
        written += FITS_CARD_SIZE;
    }
    // Pad the header out with blank cards to the block boundary.
    while written % FITS_BLOCK_SIZE != 0 {
        w.write_all(&[b' '; FITS_CARD_SIZE])?;
        written += FITS_CARD_SIZE;
    }
    Ok(())
}

fn format_card(key: &str, value: &CardValue, comment: Option<&str>) -> String {
    let mut card = match value {
        CardValue::Commentary(text) => format!("{:<8}{}", key, text),
        CardValue::Str(s) => {
            let quoted = format!("'{}'", s.replace('\'', "''"));
            format!("{:<8}= {:<20}", key, quoted)
        }
        CardValue::Int(i) => format!("{:<8}= {:>20}", key, i),
        CardValue::Real(r) => format!("{:<8}= {:>20}", key, format_real(*r)),
        CardValue::Logical(b) => format!("{:<8}= {:>20}", key, if *b { "T" } else { "F" }),
    };
    if let Some(c) = comment {
        if !matches!(value, CardValue::Commentary(_)) {
            card.push_str(" / ");
            card.push_str(c);
        }
    }
    // Header cards are fixed 80-byte records and the standard only
    // allows ASCII text, so anything wider would corrupt the layout.
    if !card.is_ascii() {
        card = card
            .chars()
            .map(|c| if c.is_ascii() { c } else { '?' })
            .collect();
    }
    card.truncate(FITS_CARD_SIZE);
    format!("{:<80}", card)
}

/// Real values need a decimal point or exponent to parse back as Real.
fn format_real(r: f64) -> String {
    let s = format!("{r}");
    if s.contains('.') || s.contains('e') || s.contains('E') {
        s
    } else {
        format!("{s}.0")
    }
}

fn pad_to_block(w: &mut impl Write, written: usize) -> Result<()> {
    let rem = written % FITS_BLOCK_SIZE;
    if rem != 0 {
        w.write_all(&vec![0u8; FITS_BLOCK_SIZE - rem])?;
    }
    Ok(())
}
