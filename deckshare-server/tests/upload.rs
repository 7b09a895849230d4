mod common;

use axum::{body::Bytes, http::StatusCode};
use axum_test::TestRequest;
use common::{TestApp, TestAppBuilder, sha256_hex};
use deckshare_server::handlers::upload::{CancelResponse, UploadResponse};
use serde_json::Value;

fn chunk(
    app: &TestApp,
    dir: &str,
    name: &str,
    checksum: &str,
    offset: u64,
    more: bool,
    body: &[u8],
) -> TestRequest {
    app.server
        .post("/upload")
        .add_query_param("path", dir)
        .add_query_param("filename", name)
        .add_header("Upload-Offset", offset.to_string())
        .add_header("Upload-Incomplete", more.to_string())
        .add_header("X-File-Checksum", checksum.to_string())
        .bytes(Bytes::copy_from_slice(body))
}

#[tokio::test]
async fn chunked_upload_lands_in_place() {
    let app = TestAppBuilder::new().build();
    std::fs::create_dir(app.root().join("inbox")).unwrap();
    let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let checksum = sha256_hex(&data);
    let (first, rest) = data.split_at(4096);
    let (second, third) = rest.split_at(4096);

    let accepted: UploadResponse =
        chunk(&app, "/inbox", "holiday video.bin", &checksum, 0, true, first)
            .await
            .json();
    assert_eq!(accepted.received, 4096);
    assert!(!accepted.complete);

    chunk(&app, "/inbox", "holiday video.bin", &checksum, 4096, true, second)
        .await
        .assert_status_ok();

    let done: UploadResponse =
        chunk(&app, "/inbox", "holiday video.bin", &checksum, 8192, false, third)
            .await
            .json();
    assert!(done.complete);
    assert_eq!(done.received, 10_000);
    assert_eq!(done.path.as_deref(), Some("/inbox/holiday video.bin"));

    let written = std::fs::read(app.root().join("inbox/holiday video.bin")).unwrap();
    assert_eq!(written, data);
    assert!(!app.root().join("inbox").join(&checksum).exists());
    assert!(app.context.uploads().is_empty());
}

#[tokio::test]
async fn uploads_disabled() {
    let app = TestAppBuilder::new().uploads(false).build();
    let checksum = sha256_hex(b"x");

    chunk(&app, "/", "x.txt", &checksum, 0, false, b"x")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    app.server
        .get("/cancel_upload")
        .add_query_param("filehash", &checksum)
        .await
        .assert_status(StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn missing_header_names_the_parameter() {
    let app = TestAppBuilder::new().build();

    let response = app
        .server
        .post("/upload")
        .add_query_param("path", "/")
        .add_query_param("filename", "x.txt")
        .add_header("Upload-Offset", "0")
        .add_header("Upload-Incomplete", "false")
        .bytes(Bytes::from_static(b"x"))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"]["message"], "missing param: X-File-Checksum");
}

#[tokio::test]
async fn protocol_errors_map_to_statuses() {
    let app = TestAppBuilder::new().build();
    let checksum = sha256_hex(b"abcdef");

    // resume of an upload that never started
    chunk(&app, "/", "a.txt", &checksum, 3, false, b"def")
        .await
        .assert_status(StatusCode::NOT_FOUND);
    assert!(!app.root().join(&checksum).exists());

    chunk(&app, "/", "a.txt", &checksum, 0, true, b"abc")
        .await
        .assert_status_ok();
    chunk(&app, "/", "a.txt", &checksum, 5, false, b"f")
        .await
        .assert_status(StatusCode::CONFLICT);

    chunk(&app, "/", "a.txt", "not-a-checksum", 0, true, b"abc")
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    chunk(&app, "../outside", "a.txt", &checksum, 0, true, b"abc")
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    chunk(&app, "/", "../a.txt", &checksum, 3, false, b"def")
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    // the rejected chunks left the upload where it was
    chunk(&app, "/", "a.txt", &checksum, 3, false, b"def")
        .await
        .assert_status_ok();
    assert_eq!(std::fs::read(app.root().join("a.txt")).unwrap(), b"abcdef");
}

#[tokio::test]
async fn oversized_chunks_are_rejected() {
    let app = TestAppBuilder::new().max_chunk(16).build();
    let body = [7u8; 32];

    chunk(&app, "/", "big.bin", &sha256_hex(&body), 0, false, &body)
        .await
        .assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    assert!(app.context.uploads().is_empty());
}

#[tokio::test]
async fn checksum_mismatch_keeps_the_upload_until_cancelled() {
    let app = TestAppBuilder::new().build();
    let claimed = sha256_hex(b"the real contents");
    let temp = app.root().join(&claimed);

    chunk(&app, "/", "file.txt", &claimed, 0, false, b"tampered contents")
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    assert!(temp.exists());
    assert!(!app.root().join("file.txt").exists());

    let cancelled: CancelResponse = app
        .server
        .post("/cancel_upload")
        .add_query_param("filehash", &claimed)
        .await
        .json();
    assert!(cancelled.cancelled);
    assert!(!temp.exists());

    let again: CancelResponse = app
        .server
        .get("/cancel_upload")
        .add_query_param("filehash", &claimed)
        .await
        .json();
    assert!(!again.cancelled);
}

#[tokio::test]
async fn cancel_requires_a_filehash() {
    let app = TestAppBuilder::new().build();

    app.server
        .get("/cancel_upload")
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn sweep_clears_abandoned_uploads() {
    let app = TestAppBuilder::new().build();
    let checksum = sha256_hex(b"0123456789");

    chunk(&app, "/", "digits.txt", &checksum, 0, true, b"01234")
        .await
        .assert_status_ok();
    assert!(app.root().join(&checksum).exists());

    let report = app.context.sweep_orphans().await;
    assert_eq!(report.deleted, 1);
    assert!(!app.root().join(&checksum).exists());

    chunk(&app, "/", "digits.txt", &checksum, 5, false, b"56789")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}
