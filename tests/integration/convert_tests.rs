//! Conversion pipeline integration tests.
//!
//! Tests verify:
//! - End-to-end conversion of deep-bit-depth sources
//! - Sidecar layout and atomic replacement (no partial files left behind)
//! - Pyramid geometry of the converted output

use deepslide::convert::{convert_image, sidecar_path, SIDECAR_DIR};
use deepslide::error::ConvertError;
use deepslide::pyramid::{PyramidImage, TiffPyramid};

use super::test_utils::{write_deep_png, write_plain_png};

#[test]
fn test_deep_grayscale_source_converts_to_visible_pyramid() {
    let root = tempfile::tempdir().unwrap();
    let input = root.path().join("scan.png");
    write_deep_png(&input, 700, 500);

    let output = sidecar_path(&input);
    convert_image(&input, &output).unwrap();

    let pyramid = TiffPyramid::open(&output).unwrap();
    assert_eq!(pyramid.dimensions(), (700, 500));
    // 700x500 -> 350x250 -> 175x125: three levels down to the floor.
    assert_eq!(pyramid.level_count(), 3);

    // The 16-bit values sat in a narrow band; after percentile rescaling
    // the 8-bit output must use a wide range, not collapse to near-black.
    let region = pyramid.read_region(0, 0, 0, 128, 1).unwrap();
    let max = region.pixels().map(|p| p[0]).max().unwrap();
    let min = region.pixels().map(|p| p[0]).min().unwrap();
    assert!(max > 180, "max {max} too dark after rescale");
    assert!(min < 40, "min {min} too bright after rescale");
}

#[test]
fn test_sidecar_directory_layout() {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir(root.path().join("batch")).unwrap();
    let input = root.path().join("batch/photo.png");
    write_plain_png(&input, 300, 200);

    let output = sidecar_path(&input);
    assert_eq!(output, root.path().join("batch").join(SIDECAR_DIR).join("photo.tif"));

    convert_image(&input, &output).unwrap();
    assert!(output.is_file());
}

#[test]
fn test_no_temp_file_left_behind() {
    let root = tempfile::tempdir().unwrap();
    let input = root.path().join("photo.png");
    write_plain_png(&input, 300, 200);

    let output = sidecar_path(&input);
    convert_image(&input, &output).unwrap();

    let entries: Vec<_> = std::fs::read_dir(output.parent().unwrap())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(entries, vec!["photo.tif"]);
}

#[test]
fn test_failed_conversion_leaves_no_output() {
    let root = tempfile::tempdir().unwrap();
    let input = root.path().join("broken.png");
    std::fs::write(&input, b"\x89PNG\r\n\x1a\ntruncated").unwrap();

    let output = sidecar_path(&input);
    let err = convert_image(&input, &output).unwrap_err();
    assert!(matches!(err, ConvertError::Unreadable { .. }));
    assert!(!output.exists());
}

#[test]
fn test_converted_pyramid_pages_halve() {
    let root = tempfile::tempdir().unwrap();
    let input = root.path().join("wide.png");
    write_plain_png(&input, 1200, 300);

    let output = sidecar_path(&input);
    convert_image(&input, &output).unwrap();

    let pyramid = TiffPyramid::open(&output).unwrap();
    assert_eq!(pyramid.level_dimensions(0), Some((1200, 300)));
    assert_eq!(pyramid.level_dimensions(1), Some((600, 150)));
    assert_eq!(pyramid.level_dimensions(2), Some((300, 75)));
    assert_eq!(pyramid.level_dimensions(3), Some((150, 38)));
    assert_eq!(pyramid.level_count(), 4);
}
