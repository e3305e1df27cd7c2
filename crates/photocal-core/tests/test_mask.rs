mod common;

use ndarray::Array2;
use photocal_core::combine::flat::{correct_flat, masked_median, normalize_flat};
use photocal_core::combine::CombineMethod;
use photocal_core::frame::{FrameKind, MasterFrame, MasterProvenance};
use photocal_core::mask::generate_mask;

fn flat_master(data: Array2<f32>) -> MasterFrame {
    MasterFrame {
        data,
        provenance: MasterProvenance {
            kind: FrameKind::Flat,
            input_count: 1,
            method: CombineMethod::Median,
            exptime: None,
            filter: None,
            chunks: 1,
        },
    }
}

// ---------------------------------------------------------------------------
// Statistical bad-pixel mask
// ---------------------------------------------------------------------------

#[test]
fn test_mask_flags_dead_and_hot_pixels() {
    let mut data = common::uniform(10, 10, 1.0);
    data[[2, 2]] = 0.0; // dead
    data[[7, 7]] = 5.0; // unstable

    let mask = generate_mask(&flat_master(data), 2.0);
    assert!(mask.mask[[2, 2]]);
    assert!(mask.mask[[7, 7]]);
    assert!(!mask.mask[[0, 0]]);
    assert_eq!(mask.bad_count(), 2);
}

#[test]
fn test_mask_flags_non_finite_pixels() {
    let mut data = common::uniform(8, 8, 1.0);
    data[[3, 3]] = f32::NAN;

    let mask = generate_mask(&flat_master(data), 5.0);
    assert!(mask.mask[[3, 3]]);
}

#[test]
fn test_mask_clean_flat_flags_nothing() {
    let data = common::uniform(8, 8, 1.0);
    let mask = generate_mask(&flat_master(data), 5.0);
    assert_eq!(mask.bad_count(), 0);
}

#[test]
fn test_mask_union() {
    let mut a = generate_mask(&flat_master(common::uniform(4, 4, 1.0)), 5.0);
    let mut b_data = common::uniform(4, 4, 1.0);
    b_data[[1, 1]] = 100.0;
    let b = generate_mask(&flat_master(b_data), 2.0);

    a.union(&b);
    assert!(a.mask[[1, 1]]);
    assert_eq!(a.bad_count(), 1);
}

// ---------------------------------------------------------------------------
// Flat correction and normalization
// ---------------------------------------------------------------------------

#[test]
fn test_correct_flat_subtracts_bias_and_dark() {
    let flat = common::uniform(4, 4, 1102.0);
    let bias = common::uniform(4, 4, 100.0);
    let dark = common::uniform(4, 4, 2.0);
    let corrected = correct_flat(&flat, &bias, &dark);
    for v in corrected.iter() {
        assert!((*v - 1000.0).abs() < 1e-3);
    }
}

#[test]
fn test_normalize_flat_scales_to_unit_median() {
    let mut data = common::uniform(4, 4, 1000.0);
    data[[0, 0]] = 500.0;
    let median = normalize_flat(&mut data, None).unwrap();
    assert!((median - 1000.0).abs() < 1e-3);
    assert!((data[[1, 1]] - 1.0).abs() < 1e-5);
    assert!((data[[0, 0]] - 0.5).abs() < 1e-5);
}

#[test]
fn test_masked_pixels_excluded_from_normalization() {
    // A wildly hot pixel would skew the median if it were counted.
    let mut data = common::uniform(3, 3, 10.0);
    data[[0, 0]] = 1e6;
    let mut mask = Array2::from_elem((3, 3), false);
    mask[[0, 0]] = true;

    assert!((masked_median(&data, Some(&mask)) - 10.0).abs() < 1e-3);

    let median = normalize_flat(&mut data, Some(&mask)).unwrap();
    assert!((median - 10.0).abs() < 1e-3);
    assert!((data[[1, 1]] - 1.0).abs() < 1e-5);
}

#[test]
fn test_normalize_flat_degenerate_median_is_error() {
    let mut data = common::uniform(4, 4, 0.0);
    assert!(normalize_flat(&mut data, None).is_err());
}
