//! API integration tests for descriptors, tiles, and error handling.
//!
//! Tests verify:
//! - DZI descriptor and tile retrieval for pyramidal TIFF slides
//! - Metadata and tree endpoints
//! - Conversion of plain images through the slide route
//! - Error cases (traversal, missing slide, invalid coordinates)

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use super::test_utils::{
    is_valid_jpeg, is_valid_png, test_router, write_plain_png, write_pyramid_slide,
};

async fn get(router: axum::Router, uri: &str) -> (StatusCode, axum::http::HeaderMap, bytes::Bytes) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, headers, body)
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health() {
    let root = tempfile::tempdir().unwrap();
    let (status, _, body) = get(test_router(root.path()), "/health").await;

    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

// =============================================================================
// Descriptors
// =============================================================================

#[tokio::test]
async fn test_dzi_descriptor() {
    let root = tempfile::tempdir().unwrap();
    write_pyramid_slide(&root.path().join("test.tif"), 1000, 800);

    let (status, headers, body) = get(test_router(root.path()), "/slides/test.tif.dzi").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("content-type").unwrap(), "application/xml");
    assert!(headers.contains_key("cache-control"));

    let xml = String::from_utf8(body.to_vec()).unwrap();
    assert!(xml.contains("Width=\"1000\""));
    assert!(xml.contains("Height=\"800\""));
    assert!(xml.contains("TileSize=\"254\""));
    assert!(xml.contains("Overlap=\"1\""));
    assert!(xml.contains("Format=\"jpeg\""));
}

#[tokio::test]
async fn test_dzi_descriptor_nested_path() {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir(root.path().join("batch1")).unwrap();
    write_pyramid_slide(&root.path().join("batch1/deep.tif"), 600, 400);

    let (status, _, body) = get(test_router(root.path()), "/slides/batch1/deep.tif.dzi").await;

    assert_eq!(status, StatusCode::OK);
    let xml = String::from_utf8(body.to_vec()).unwrap();
    assert!(xml.contains("Width=\"600\""));
}

// =============================================================================
// Tiles
// =============================================================================

#[tokio::test]
async fn test_tile_retrieval_jpeg() {
    let root = tempfile::tempdir().unwrap();
    write_pyramid_slide(&root.path().join("test.tif"), 1000, 800);

    // 1000x800 -> max Deep Zoom level ceil(log2(1000)) = 10.
    let (status, headers, body) =
        get(test_router(root.path()), "/slides/test.tif_files/10/0_0.jpeg").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("content-type").unwrap(), "image/jpeg");
    assert_eq!(
        headers.get("cache-control").unwrap(),
        "public, max-age=3600"
    );
    assert!(is_valid_jpeg(&body));
}

#[tokio::test]
async fn test_tile_retrieval_png() {
    let root = tempfile::tempdir().unwrap();
    write_pyramid_slide(&root.path().join("test.tif"), 1000, 800);

    let (status, headers, body) =
        get(test_router(root.path()), "/slides/test.tif_files/10/1_0.png").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("content-type").unwrap(), "image/png");
    assert!(is_valid_png(&body));

    // Interior column tile: 254 + 1 left + 1 right overlap wide.
    let decoded = image::load_from_memory(&body).unwrap();
    assert_eq!(decoded.width(), 256);
}

#[tokio::test]
async fn test_tile_from_low_level_is_downscaled() {
    let root = tempfile::tempdir().unwrap();
    write_pyramid_slide(&root.path().join("test.tif"), 1000, 800);

    let (status, _, body) =
        get(test_router(root.path()), "/slides/test.tif_files/0/0_0.png").await;

    assert_eq!(status, StatusCode::OK);
    let decoded = image::load_from_memory(&body).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (1, 1));
}

// =============================================================================
// Metadata and Tree
// =============================================================================

#[tokio::test]
async fn test_metadata_endpoint() {
    let root = tempfile::tempdir().unwrap();
    write_pyramid_slide(&root.path().join("test.tif"), 1000, 800);

    let (status, _, body) = get(test_router(root.path()), "/metadata/test.tif").await;

    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["name"], "test.tif");
    assert_eq!(json["metadata"]["level_count"], 11);
    assert_eq!(json["metadata"]["tile_size"], 254);
    // 40000 pixels/cm resolution tags -> 0.25 microns per pixel.
    let mpp = json["mpp"].as_f64().unwrap();
    assert!((mpp - 0.25).abs() < 1e-6);
}

#[tokio::test]
async fn test_tree_endpoint() {
    let root = tempfile::tempdir().unwrap();
    write_pyramid_slide(&root.path().join("a.tif"), 400, 400);
    std::fs::create_dir(root.path().join("private")).unwrap();
    write_pyramid_slide(&root.path().join("private/hidden.tif"), 400, 400);

    let (status, _, body) = get(test_router(root.path()), "/tree").await;

    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let names: Vec<&str> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["a.tif"]);
}

#[tokio::test]
async fn test_tree_filter() {
    let root = tempfile::tempdir().unwrap();
    write_pyramid_slide(&root.path().join("liver.tif"), 400, 400);
    write_pyramid_slide(&root.path().join("kidney.tif"), 400, 400);

    let (status, _, body) = get(test_router(root.path()), "/tree?filter=liv").await;

    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json.as_array().unwrap().len(), 1);
    assert_eq!(json[0]["name"], "liver.tif");
}

// =============================================================================
// Conversion Through the API
// =============================================================================

#[tokio::test]
async fn test_plain_image_served_via_conversion() {
    let root = tempfile::tempdir().unwrap();
    write_plain_png(&root.path().join("photo.png"), 500, 300);

    let router = test_router(root.path());

    let (status, _, body) = get(router.clone(), "/slides/photo.png.dzi").await;
    assert_eq!(status, StatusCode::OK);
    let xml = String::from_utf8(body.to_vec()).unwrap();
    assert!(xml.contains("Width=\"500\""));

    // The sidecar now exists next to the source.
    assert!(root.path().join(".deepslide/photo.tif").is_file());

    // Tiles come from the converted pyramid. max level = ceil(log2(500)) = 9.
    let (status, _, body) = get(router, "/slides/photo.png_files/9/0_0.jpeg").await;
    assert_eq!(status, StatusCode::OK);
    assert!(is_valid_jpeg(&body));
}

// =============================================================================
// Error Handling
// =============================================================================

#[tokio::test]
async fn test_missing_slide_is_404() {
    let root = tempfile::tempdir().unwrap();
    let (status, _, _) = get(test_router(root.path()), "/slides/missing.tif.dzi").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_traversal_is_404() {
    let outer = tempfile::tempdir().unwrap();
    write_pyramid_slide(&outer.path().join("secret.tif"), 400, 400);
    let root = outer.path().join("served");
    std::fs::create_dir(&root).unwrap();

    let (status, _, _) = get(test_router(&root), "/slides/..%2Fsecret.tif.dzi").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_tree_rejects_traversal() {
    let root = tempfile::tempdir().unwrap();
    let (status, _, _) = get(test_router(root.path()), "/tree?path=..%2F..").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_tile_coordinates_are_404() {
    let root = tempfile::tempdir().unwrap();
    write_pyramid_slide(&root.path().join("test.tif"), 1000, 800);
    let router = test_router(root.path());

    // Column out of the grid.
    let (status, _, _) = get(router.clone(), "/slides/test.tif_files/10/99_0.jpeg").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Level past the pyramid.
    let (status, _, _) = get(router.clone(), "/slides/test.tif_files/11/0_0.jpeg").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Unknown format.
    let (status, _, _) = get(router, "/slides/test.tif_files/10/0_0.webp").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_deepzoom_path_is_404() {
    let root = tempfile::tempdir().unwrap();
    write_pyramid_slide(&root.path().join("test.tif"), 400, 400);

    let (status, _, _) = get(test_router(root.path()), "/slides/test.tif").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unservable_file_is_415() {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("notes.txt"), "plain text, not an image").unwrap();

    let (status, _, _) = get(test_router(root.path()), "/slides/notes.txt.dzi").await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
}
