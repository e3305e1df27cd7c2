mod common;

use ndarray::Array2;
use photocal_core::io::fits::{CardValue, FitsHeader, FitsReader};
use photocal_core::io::fits_writer::{write_f32_image, write_mask_image};

// ---------------------------------------------------------------------------
// Writer → reader round trips
// ---------------------------------------------------------------------------

#[test]
fn test_f32_image_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("image.fits");

    let data = Array2::from_shape_fn((4, 6), |(r, c)| (r * 6 + c) as f32 * 0.5 - 3.0);
    let mut header = FitsHeader::new();
    header.set_f64("EXPTIME", 90.0);
    header.set_str("FILTER", "V");
    write_f32_image(&path, &data, &header).unwrap();

    let reader = FitsReader::open(&path).unwrap();
    assert_eq!(reader.dimensions(), (4, 6));
    assert_eq!(reader.header.get_f64("EXPTIME"), Some(90.0));
    assert_eq!(reader.header.get_str("FILTER"), Some("V"));

    let decoded = reader.read_image().unwrap();
    for (a, b) in data.iter().zip(decoded.iter()) {
        assert!((a - b).abs() < 1e-6, "expected {a}, got {b}");
    }
}

#[test]
fn test_header_cards_survive_rewrite() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("image.fits");

    let mut header = FitsHeader::new();
    header.set_str("OBJECT", "M 42");
    header.set_with_comment("CRCLEAN", CardValue::Logical(true), Some("removal converged"));
    header.set_i64("CRCOUNT", 17);
    // Reserved structural keys in the source header must not leak through.
    header.set_i64("NAXIS1", 9999);

    let data = common::uniform(3, 3, 1.0);
    write_f32_image(&path, &data, &header).unwrap();

    let reader = FitsReader::open(&path).unwrap();
    assert_eq!(reader.header.get_str("OBJECT"), Some("M 42"));
    assert_eq!(reader.header.get_bool("CRCLEAN"), Some(true));
    assert_eq!(reader.header.get_i64("CRCOUNT"), Some(17));
    assert_eq!(reader.header.get_i64("NAXIS1"), Some(3));
}

#[test]
fn test_string_value_with_quote() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("image.fits");

    let mut header = FitsHeader::new();
    header.set_str("OBSERVER", "O'Neill");
    write_f32_image(&path, &common::uniform(2, 2, 0.0), &header).unwrap();

    let reader = FitsReader::open(&path).unwrap();
    assert_eq!(reader.header.get_str("OBSERVER"), Some("O'Neill"));
}

#[test]
fn test_mask_image_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("mask.fits");

    let mut mask = Array2::from_elem((5, 5), false);
    mask[[1, 2]] = true;
    mask[[4, 4]] = true;
    write_mask_image(&path, &mask, &FitsHeader::new()).unwrap();

    let reader = FitsReader::open(&path).unwrap();
    assert_eq!(reader.header.get_i64("BITPIX"), Some(8));
    let decoded = reader.read_image().unwrap();
    for (expected, got) in mask.iter().zip(decoded.iter()) {
        assert_eq!(*expected, *got != 0.0);
    }
}

// ---------------------------------------------------------------------------
// Integer decode with BZERO (unsigned-16 convention)
// ---------------------------------------------------------------------------

#[test]
fn test_i16_with_bzero_decodes_physical_values() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("u16.fits");

    // Stored i16 plus BZERO = 32768 represents unsigned 16-bit counts.
    let stored: Vec<i16> = vec![-32768, -32767, 0, 32767];
    common::write_bytes(&path, &common::build_i16_fits(2, 2, &stored, 32768.0));

    let reader = FitsReader::open(&path).unwrap();
    let decoded = reader.read_image().unwrap();
    let expected = [0.0f32, 1.0, 32768.0, 65535.0];
    for (e, g) in expected.iter().zip(decoded.iter()) {
        assert!((e - g).abs() < 1e-3, "expected {e}, got {g}");
    }
}

#[test]
fn test_header_only_read() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("image.fits");

    let mut header = FitsHeader::new();
    header.set_f64("EXPTIME", 5.0);
    write_f32_image(&path, &common::uniform(2, 2, 1.0), &header).unwrap();

    let header = FitsReader::read_header(&path).unwrap();
    assert_eq!(header.get_f64("EXPTIME"), Some(5.0));
    assert_eq!(header.get_i64("NAXIS1"), Some(2));
}

#[test]
fn test_non_ascii_header_value_is_sanitized() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("image.fits");

    // A carried-over value with multibyte characters must still produce
    // valid fixed-width cards; the offending characters are replaced.
    let mut header = FitsHeader::new();
    header.set_str("COMBMETH", "m\u{e9}dian (3\u{3c3})");
    write_f32_image(&path, &common::uniform(2, 2, 1.0), &header).unwrap();

    let reader = FitsReader::open(&path).unwrap();
    assert_eq!(reader.header.get_str("COMBMETH"), Some("m?dian (3?)"));
}

// ---------------------------------------------------------------------------
// Malformed input
// ---------------------------------------------------------------------------

#[test]
fn test_open_rejects_non_fits() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("junk.fits");
    common::write_bytes(&path, b"definitely not a FITS file");
    assert!(FitsReader::open(&path).is_err());
}

#[test]
fn test_read_header_rejects_non_ascii_card() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("bad.fits");

    let mut buf = Vec::new();
    buf.extend(common::card("SIMPLE  =                    T"));
    // Multibyte character straddling the fixed key/value boundary.
    let mut bad = b"COMMENT".to_vec();
    bad.extend("\u{e9} accented remark".as_bytes());
    bad.resize(80, b' ');
    buf.extend(bad);
    buf.extend(common::card("END"));
    while buf.len() % 2880 != 0 {
        buf.extend(common::card(""));
    }
    common::write_bytes(&path, &buf);

    assert!(FitsReader::read_header(&path).is_err());
}

#[test]
fn test_open_rejects_truncated_data() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("trunc.fits");

    let full = common::build_i16_fits(16, 16, &vec![0i16; 256], 0.0);
    // Keep the header but chop the data section short.
    common::write_bytes(&path, &full[..2880 + 100]);
    assert!(FitsReader::open(&path).is_err());
}
