// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn parses_full_request() {
    let raw = r#"{"targets":[{"name":"appimage","arch":"x64","unpackedDirName":"linux-unpacked"}],"platform":"linux","electronDownload":{"version":""},"executableName":"demo"}"#;
    let request = BuildRequest::parse(raw).unwrap();
    assert_eq!(request.platform, "linux");
    assert_eq!(request.targets.len(), 1);
    assert_eq!(request.targets[0].unpacked_dir_name, "linux-unpacked");
    assert_eq!(request.executable_name.as_deref(), Some("demo"));
    assert!(request.electron_download.unwrap().is_empty());
}

#[test]
fn rejects_malformed_json() {
    assert!(BuildRequest::parse("{not json").is_err());
}

#[test]
fn sanitize_clears_download_locations() {
    let raw = r#"{"targets":[],"platform":"linux","electronDownload":{"version":"29.0.0","mirror":"http://evil/","cache":"/etc","customDir":"../../"}}"#;
    let mut request = BuildRequest::parse(raw).unwrap();
    request.sanitize();

    let download = request.electron_download.unwrap();
    assert_eq!(download.version, "29.0.0");
    assert_eq!(download.mirror, None);
    assert_eq!(download.cache, None);
    assert_eq!(download.custom_dir, None);
}

#[test]
fn sanitize_without_download_spec_is_noop() {
    let mut request = BuildRequest::parse(r#"{"targets":[],"platform":"win32"}"#).unwrap();
    request.sanitize();
    assert!(request.electron_download.is_none());
}
