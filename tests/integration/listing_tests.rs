//! Directory listing integration tests.
//!
//! Tests verify:
//! - Content-based detection of servable images
//! - Exclusion of sidecar and private directories after conversion ran
//! - Depth control through the HTTP endpoint

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use deepslide::listing::list_tree;

use super::test_utils::{test_router, write_plain_png, write_pyramid_slide};

#[test]
fn test_detection_by_content_not_extension() {
    let root = tempfile::tempdir().unwrap();
    // TIFF content under a misleading extension is still served.
    write_pyramid_slide(&root.path().join("scan.dat"), 300, 300);
    // Image extension over non-image content is not.
    std::fs::write(root.path().join("fake.tif"), b"just text").unwrap();

    let tree = list_tree(root.path(), "", 4, "");
    let names: Vec<_> = tree.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["scan.dat"]);
}

#[test]
fn test_sidecar_excluded_after_conversion() {
    let root = tempfile::tempdir().unwrap();
    let input = root.path().join("photo.png");
    write_plain_png(&input, 300, 200);

    let output = deepslide::convert::sidecar_path(&input);
    deepslide::convert::convert_image(&input, &output).unwrap();

    // Only the source shows up; the generated sidecar stays hidden.
    let tree = list_tree(root.path(), "", 4, "");
    let names: Vec<_> = tree.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["photo.png"]);
}

#[tokio::test]
async fn test_tree_depth_parameter() {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(root.path().join("a/b")).unwrap();
    write_pyramid_slide(&root.path().join("a/b/deep.tif"), 300, 300);

    let router = test_router(root.path());

    let request = Request::builder()
        .uri("/tree?depth=3")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json.as_array().unwrap().len(), 1);

    // Too shallow to reach the file: the empty branch collapses.
    let request = Request::builder()
        .uri("/tree?depth=2")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(json.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_tree_subtree_parameter() {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir(root.path().join("batch1")).unwrap();
    std::fs::create_dir(root.path().join("batch2")).unwrap();
    write_pyramid_slide(&root.path().join("batch1/x.tif"), 300, 300);
    write_pyramid_slide(&root.path().join("batch2/y.tif"), 300, 300);

    let request = Request::builder()
        .uri("/tree?path=batch1")
        .body(Body::empty())
        .unwrap();
    let response = test_router(root.path()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let names: Vec<&str> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["x.tif"]);
    assert_eq!(json[0]["path"], "batch1/x.tif");
}
