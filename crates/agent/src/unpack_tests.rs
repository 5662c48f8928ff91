// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use super::*;

const MAX_BYTES: u64 = 768 * 1024 * 1024;
const MAX_TIME: Duration = Duration::from_secs(30);

/// A plain (uncompressed) tar of a small project tree. Paired with `cat` as
/// the "decompressor", it exercises the full pipe without a zstd binary.
fn project_tarball() -> Vec<u8> {
    let source = tempfile::tempdir().unwrap();
    std::fs::write(source.path().join("package.json"), br#"{"name":"demo"}"#).unwrap();
    std::fs::create_dir(source.path().join("src")).unwrap();
    std::fs::write(source.path().join("src/main.js"), b"console.log(1)\n").unwrap();

    let output = std::process::Command::new("tar")
        .arg("-cf")
        .arg("-")
        .arg("-C")
        .arg(source.path())
        .arg(".")
        .output()
        .unwrap();
    assert!(output.status.success());
    output.stdout
}

#[tokio::test]
async fn unpacks_streamed_tarball() {
    let staging = tempfile::tempdir().unwrap();
    let outcome = unpack_tar_zstd(
        Body::from(project_tarball()),
        staging.path(),
        "cat",
        MAX_BYTES,
        MAX_TIME,
    )
    .await;

    assert!(matches!(outcome, UnpackOutcome::Unpacked { .. }), "{outcome:?}");
    assert!(staging.path().join("package.json").exists());
    assert!(staging.path().join("src/main.js").exists());
}

#[tokio::test]
async fn rejects_oversized_upload() {
    let staging = tempfile::tempdir().unwrap();
    let outcome = unpack_tar_zstd(
        Body::from(vec![0u8; 4096]),
        staging.path(),
        "cat",
        1024,
        MAX_TIME,
    )
    .await;
    assert!(matches!(outcome, UnpackOutcome::TooLarge), "{outcome:?}");
}

#[tokio::test]
async fn surfaces_tar_failure_with_stderr() {
    let staging = tempfile::tempdir().unwrap();
    let outcome = unpack_tar_zstd(
        Body::from(&b"this is not a tar archive"[..]),
        staging.path(),
        "cat",
        MAX_BYTES,
        MAX_TIME,
    )
    .await;

    match outcome {
        UnpackOutcome::Failed(UnpackError::Tar { stderr, .. }) => {
            assert!(!stderr.is_empty(), "tar stderr should be captured");
        }
        other => panic!("expected tar failure, got {other:?}"),
    }
}

#[tokio::test]
async fn client_disconnect_is_not_an_error() {
    let staging = tempfile::tempdir().unwrap();
    let broken = futures_util::stream::iter(vec![
        Ok::<_, std::io::Error>(axum::body::Bytes::from_static(b"partial")),
        Err(std::io::Error::other("connection reset")),
    ]);

    let outcome = unpack_tar_zstd(
        Body::from_stream(broken),
        staging.path(),
        "cat",
        MAX_BYTES,
        MAX_TIME,
    )
    .await;
    assert!(matches!(outcome, UnpackOutcome::ClientGone), "{outcome:?}");
}
