// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn resolves_inside_out_dir() {
    let id = JobId::generate();
    let path = artifact_path(Path::new("/stage"), &id.to_string(), "demo-1.0.AppImage").unwrap();
    assert_eq!(path, Path::new("/stage").join(id.to_string()).join("out/demo-1.0.AppImage"));
}

#[test]
fn allows_nested_artifacts() {
    let id = JobId::generate();
    let path = artifact_path(Path::new("/stage"), &id.to_string(), "nsis-web/demo.7z").unwrap();
    assert!(path.ends_with("out/nsis-web/demo.7z"));
}

#[test]
fn rejects_bad_job_ids() {
    assert!(artifact_path(Path::new("/stage"), "not-a-job-id", "file").is_none());
    assert!(artifact_path(Path::new("/stage"), "../../etc", "passwd").is_none());
}

#[test]
fn rejects_escaping_paths() {
    let id = JobId::generate().to_string();
    for bad in ["", "..", "../secret", "a/../../b", "/etc/passwd"] {
        assert!(artifact_path(Path::new("/stage"), &id, bad).is_none(), "{bad:?}");
    }
}
