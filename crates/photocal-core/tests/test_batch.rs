mod common;

use common::DateFixture;
use photocal_core::batch::{calibrate_date, DateStatus, ReductionConfig};
use photocal_core::io::fits::FitsReader;
use photocal_core::manifest::DateLayout;

/// A complete, healthy observing date.
///
/// Signal model in ADU: bias level 100, dark current 10 over 90 s and
/// 2 over 5 s, flat-field sky level 1000, science target 500. With the
/// header gain of 2.0 e-/ADU every calibrated science pixel comes out at
/// exactly 1000 electrons.
fn healthy_date() -> DateFixture {
    let fixture = DateFixture::new("2024-03-01");
    for i in 1..=3 {
        fixture.add_bias(i, &common::uniform(16, 16, 100.0));
        fixture.add_dark(i, 90.0, &common::uniform(16, 16, 110.0));
        fixture.add_flat_dark(i, 5.0, &common::uniform(16, 16, 102.0));
        fixture.add_flat(i, "V", 5.0, &common::uniform(16, 16, 1102.0));
    }
    fixture.add_science(1, "V", 90.0, &common::uniform(16, 16, 610.0));
    fixture.add_science(2, "V", 90.0, &common::uniform(16, 16, 610.0));
    fixture
}

// ---------------------------------------------------------------------------
// Full-success path
// ---------------------------------------------------------------------------

#[test]
fn test_healthy_date_is_done() {
    let fixture = healthy_date();
    let report = calibrate_date(&fixture.date_dir, &ReductionConfig::default());

    assert_eq!(report.status, DateStatus::Done);
    assert_eq!(report.outputs.len(), 2);
    assert!(report.failures.is_empty());
    assert!(report.fatal.is_none());
    for output in &report.outputs {
        assert!(output.is_file(), "missing output {}", output.display());
    }
}

#[test]
fn test_calibrated_values_and_provenance() {
    let fixture = healthy_date();
    let report = calibrate_date(&fixture.date_dir, &ReductionConfig::default());
    assert_eq!(report.status, DateStatus::Done);

    let reader = FitsReader::open(&report.outputs[0]).unwrap();
    assert_eq!(reader.header.get_str("ACQTYPE"), Some("SCIENCE_CAL"));
    assert_eq!(reader.header.get_str("BUNIT"), Some("electron"));
    assert_eq!(
        reader.header.get_str("CALBIAS"),
        Some("2024-03-01_MASTERBIAS.fits")
    );
    assert_eq!(reader.header.get_bool("CRCLEAN"), Some(true));
    assert_eq!(reader.header.get_i64("CRCOUNT"), Some(0));

    // (610 - 100 bias - 10 dark) / 1.0 flat * 2.0 gain = 1000 electrons.
    let data = reader.read_image().unwrap();
    for v in data.iter() {
        assert!((*v - 1000.0).abs() < 0.1, "got {v}");
    }
}

#[test]
fn test_masters_are_persisted() {
    let fixture = healthy_date();
    calibrate_date(&fixture.date_dir, &ReductionConfig::default());

    let layout = DateLayout::new(&fixture.date_dir);
    assert!(layout.master_bias_path().is_file());
    assert!(layout
        .master_dark_path(photocal_core::frame::ExposureTime::from_secs(90.0))
        .is_file());
    assert!(layout
        .master_flat_path(&photocal_core::frame::Filter::new("V"))
        .is_file());
    assert!(layout.mask_path().is_file());

    let bias = FitsReader::open(&layout.master_bias_path()).unwrap();
    assert_eq!(bias.header.get_str("ACQTYPE"), Some("MASTERBIAS"));
    assert_eq!(bias.header.get_i64("NCOMBINE"), Some(3));
    assert_eq!(
        bias.header.get_str("COMBMETH"),
        Some("sigma-clipped mean (3 sigma)")
    );

    let flat = FitsReader::open(&layout.master_flat_path(&photocal_core::frame::Filter::new("V")))
        .unwrap();
    let data = flat.read_image().unwrap();
    for v in data.iter() {
        assert!((*v - 1.0).abs() < 1e-4, "flat not normalized, got {v}");
    }
}

// ---------------------------------------------------------------------------
// Idempotence
// ---------------------------------------------------------------------------

#[test]
fn test_second_run_is_skipped() {
    let fixture = healthy_date();
    let config = ReductionConfig::default();

    let first = calibrate_date(&fixture.date_dir, &config);
    assert_eq!(first.status, DateStatus::Done);

    let second = calibrate_date(&fixture.date_dir, &config);
    assert_eq!(second.status, DateStatus::SkipAlreadyDone);
    assert!(second.outputs.is_empty());
}

#[test]
fn test_force_recalibrates() {
    let fixture = healthy_date();
    calibrate_date(&fixture.date_dir, &ReductionConfig::default());

    let config = ReductionConfig {
        force: true,
        ..ReductionConfig::default()
    };
    let report = calibrate_date(&fixture.date_dir, &config);
    assert_eq!(report.status, DateStatus::Done);
    assert_eq!(report.outputs.len(), 2);
}

#[test]
fn test_interrupted_run_resumes() {
    // Losing one output must re-run the date, not skip it.
    let fixture = healthy_date();
    let first = calibrate_date(&fixture.date_dir, &ReductionConfig::default());
    std::fs::remove_file(&first.outputs[0]).unwrap();

    let second = calibrate_date(&fixture.date_dir, &ReductionConfig::default());
    assert_eq!(second.status, DateStatus::Done);
    assert!(first.outputs[0].is_file());
}

// ---------------------------------------------------------------------------
// Partial and fatal failures
// ---------------------------------------------------------------------------

#[test]
fn test_science_without_dark_is_partial_failure() {
    let fixture = healthy_date();
    // No dark group at 120 s exists for this frame.
    let odd = fixture.add_science(3, "V", 120.0, &common::uniform(16, 16, 610.0));

    let report = calibrate_date(&fixture.date_dir, &ReductionConfig::default());
    assert_eq!(report.status, DateStatus::PartialFailure);
    assert_eq!(report.outputs.len(), 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, odd);
    // The healthy frames were still written.
    for output in &report.outputs {
        assert!(output.is_file());
    }
}

#[test]
fn test_unreadable_file_is_reported_excluded() {
    let fixture = healthy_date();
    let junk = fixture.science_dir.join("003_SCIENCE.fits");
    common::write_bytes(&junk, b"not a FITS file at all");

    let report = calibrate_date(&fixture.date_dir, &ReductionConfig::default());
    // A scan-time drop never counts against the status.
    assert_eq!(report.status, DateStatus::Done);
    assert_eq!(report.outputs.len(), 2);
    assert_eq!(report.excluded.len(), 1);
    assert_eq!(report.excluded[0].path, junk);
}

#[test]
fn test_no_bias_frames_is_fatal() {
    let fixture = DateFixture::new("2024-03-01");
    for i in 1..=3 {
        fixture.add_dark(i, 90.0, &common::uniform(16, 16, 110.0));
        fixture.add_flat_dark(i, 5.0, &common::uniform(16, 16, 102.0));
        fixture.add_flat(i, "V", 5.0, &common::uniform(16, 16, 1102.0));
    }
    fixture.add_science(1, "V", 90.0, &common::uniform(16, 16, 610.0));

    let report = calibrate_date(&fixture.date_dir, &ReductionConfig::default());
    assert_eq!(report.status, DateStatus::FatalError);
    assert!(report.outputs.is_empty());
    assert!(report.fatal.unwrap().contains("bias"));
}

#[test]
fn test_no_flat_frames_is_fatal() {
    let fixture = DateFixture::new("2024-03-01");
    for i in 1..=3 {
        fixture.add_bias(i, &common::uniform(16, 16, 100.0));
        fixture.add_dark(i, 90.0, &common::uniform(16, 16, 110.0));
    }
    fixture.add_science(1, "V", 90.0, &common::uniform(16, 16, 610.0));

    let report = calibrate_date(&fixture.date_dir, &ReductionConfig::default());
    assert_eq!(report.status, DateStatus::FatalError);
    assert!(report.outputs.is_empty());
}

#[test]
fn test_no_science_frames_is_fatal() {
    let fixture = DateFixture::new("2024-03-01");
    for i in 1..=3 {
        fixture.add_bias(i, &common::uniform(16, 16, 100.0));
        fixture.add_dark(i, 90.0, &common::uniform(16, 16, 110.0));
        fixture.add_flat_dark(i, 5.0, &common::uniform(16, 16, 102.0));
        fixture.add_flat(i, "V", 5.0, &common::uniform(16, 16, 1102.0));
    }

    let report = calibrate_date(&fixture.date_dir, &ReductionConfig::default());
    assert_eq!(report.status, DateStatus::FatalError);
}

#[test]
fn test_missing_science_dir_is_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let date_dir = tmp.path().join("2024-03-01");
    std::fs::create_dir_all(&date_dir).unwrap();

    let report = calibrate_date(&date_dir, &ReductionConfig::default());
    assert_eq!(report.status, DateStatus::FatalError);
}

// ---------------------------------------------------------------------------
// Memory-bounded combination
// ---------------------------------------------------------------------------

#[test]
fn test_chunked_combination_matches_unchunked() {
    // A budget small enough for one frame at a time forces per-chunk
    // combination with weighted-mean merging; the result must be the
    // same masters and the same calibrated values.
    let fixture = healthy_date();
    let config = ReductionConfig {
        mem_limit_gb: 1e-7,
        ..ReductionConfig::default()
    };
    assert_eq!(config.max_frames_in_memory(16, 16), 1);

    let report = calibrate_date(&fixture.date_dir, &config);
    assert_eq!(report.status, DateStatus::Done);

    let reader = FitsReader::open(&report.outputs[0]).unwrap();
    let data = reader.read_image().unwrap();
    for v in data.iter() {
        assert!((*v - 1000.0).abs() < 0.1, "got {v}");
    }
}
