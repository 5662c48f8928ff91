// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end specs: a real agent served over HTTP, driven with a real
//! client. The packaging tool is a bash stub and the "zstd" decompressor is
//! `cat`, so the full upload → build → stream → download path runs without
//! external toolchains.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bf_agent::{AgentState, Config};
use bf_core::JobId;
use bf_pool::WorkerPool;
use bf_registry::{AgentEntry, LeaseStore, MemConnector, MemStore};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const BUILD_REQUEST: &str = r#"{"targets":[{"name":"appimage","arch":"x64","unpackedDirName":"linux-unpacked"}],"platform":"linux","electronDownload":{"version":""},"executableName":"demo"}"#;

/// Writes two log lines, a 12345-byte artifact, and a success manifest.
const SUCCESS_SCRIPT: &str = r#"
echo "packaging started"
echo "artifact ready"
head -c 12345 /dev/zero > "$PROJECT_OUT_DIR/demo-1.0.AppImage"
printf '[{"file":"demo-1.0.AppImage"}]' > "$APP_BUILDER_TMP_DIR/__build-result.json"
"#;

/// Reports a structured failure and exits nonzero, like a cancelled build.
const FAILURE_SCRIPT: &str = r#"
printf '{"code":"E_CANCELLED","message":"stopped"}' > "$APP_BUILDER_TMP_DIR/__build-result.json"
exit 2
"#;

/// Hangs until killed.
const SLOW_SCRIPT: &str = "sleep 600\n";

struct TestAgent {
    base_url: String,
    stage_dir: PathBuf,
    pool: Arc<WorkerPool>,
    _root: tempfile::TempDir,
}

async fn start_agent(script: &str) -> TestAgent {
    let root = tempfile::tempdir().unwrap();
    let stage_dir = root.path().join("stage");
    let tmp_dir = root.path().join("tmp");
    std::fs::create_dir_all(&stage_dir).unwrap();
    std::fs::create_dir_all(&tmp_dir).unwrap();
    let builder_script = root.path().join("builder.sh");
    std::fs::write(&builder_script, script).unwrap();

    let config = Config {
        port: 0,
        stage_dir: stage_dir.clone(),
        tmp_dir,
        node_program: "bash".to_string(),
        builder_script,
        zstd_program: "cat".to_string(),
        max_upload_bytes: 64 * 1024 * 1024,
        max_upload_time: Duration::from_secs(30),
        job_max_time: Duration::from_secs(60),
        worker_count: 2,
        ping_interval: Duration::from_secs(20),
    };

    let shutdown = CancellationToken::new();
    let pool =
        Arc::new(WorkerPool::new(config.worker_count, config.job_max_time, shutdown.clone()));
    let registry_entry = Arc::new(
        AgentEntry::register(
            Arc::new(MemConnector::new(MemStore::new())),
            "/builders/127.0.0.1:443",
        )
        .await
        .unwrap(),
    );
    let state = AgentState {
        config: Arc::new(config),
        pool: Arc::clone(&pool),
        registry_entry,
        fetcher: Arc::new(bf_agent::runtime_fetch::DisabledFetcher),
    };

    let app = bf_agent::server::router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    TestAgent { base_url: format!("http://{addr}"), stage_dir, pool, _root: root }
}

/// A plain tar of a small project; `cat` stands in for zstd.
fn project_tarball() -> Vec<u8> {
    let source = tempfile::tempdir().unwrap();
    std::fs::write(source.path().join("package.json"), br#"{"name":"demo"}"#).unwrap();
    std::fs::create_dir(source.path().join("src")).unwrap();
    std::fs::write(source.path().join("src/index.js"), b"module.exports = 1\n").unwrap();

    let output = std::process::Command::new("tar")
        .args(["-cf", "-", "-C"])
        .arg(source.path())
        .arg(".")
        .output()
        .unwrap();
    assert!(output.status.success());
    output.stdout
}

/// Reads NDJSON lines from a response body until `stop` returns true.
async fn read_lines_until(
    response: &mut reqwest::Response,
    stop: impl Fn(&str) -> bool,
) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    let mut buffer = String::new();
    let deadline = Duration::from_secs(30);

    let fed = timeout(deadline, async {
        loop {
            let chunk = match response.chunk().await {
                Ok(Some(chunk)) => chunk,
                _ => return,
            };
            buffer.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].to_string();
                buffer.drain(..=newline);
                let done = stop(&line);
                lines.push(line);
                if done {
                    return;
                }
            }
        }
    })
    .await;
    assert!(fed.is_ok(), "timed out reading response lines; got {lines:?}");
    lines
}

async fn post_build(agent: &TestAgent) -> reqwest::Response {
    let response = reqwest::Client::new()
        .post(format!("{}/v2/build", agent.base_url))
        .header("x-build-request", BUILD_REQUEST)
        .header("x-zstd-compression-level", "3")
        .body(project_tarball())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    response
}

#[tokio::test]
async fn successful_build_streams_status_and_serves_artifacts() {
    let agent = start_agent(SUCCESS_SCRIPT).await;
    let mut response = post_build(&agent).await;
    assert_eq!(
        response.headers().get("content-type").and_then(|v| v.to_str().ok()),
        Some("application/x-ndjson")
    );

    let lines = read_lines_until(&mut response, |line| line.contains("baseUrl")).await;

    // Every line before the terminal object is a status object, in
    // subprocess-output order.
    let statuses: Vec<String> = lines[..lines.len() - 1]
        .iter()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            value["status"].as_str().unwrap().to_string()
        })
        .collect();
    assert!(statuses[0].starts_with("job started (queue time:"), "{statuses:?}");
    let started = statuses.iter().flat_map(|s| s.lines()).position(|l| l == "packaging started");
    let ready = statuses.iter().flat_map(|s| s.lines()).position(|l| l == "artifact ready");
    assert!(started.unwrap() < ready.unwrap(), "{statuses:?}");

    let terminal: serde_json::Value = serde_json::from_str(&lines[lines.len() - 1]).unwrap();
    let base_url = terminal["baseUrl"].as_str().unwrap();
    let job_id = base_url.strip_prefix("/v2/download/").unwrap();
    assert!(JobId::parse(job_id).is_some(), "job id must be well-formed: {job_id}");
    assert_eq!(terminal["files"], serde_json::json!([{ "file": "demo-1.0.AppImage" }]));
    assert_eq!(terminal["fileSizes"], serde_json::json!([12345]));

    // Download over a fresh connection while the build connection stays open.
    let artifact_url = format!("{}{}/demo-1.0.AppImage", agent.base_url, base_url);
    let full = reqwest::get(&artifact_url).await.unwrap();
    assert_eq!(full.status(), 200);
    assert_eq!(full.bytes().await.unwrap().len(), 12345);

    let partial = reqwest::Client::new()
        .get(&artifact_url)
        .header("range", "bytes=0-99")
        .send()
        .await
        .unwrap();
    assert_eq!(partial.status(), 206);
    assert_eq!(partial.bytes().await.unwrap().len(), 100);

    drop(response);
}

#[tokio::test]
async fn structured_tool_failure_passes_through() {
    let agent = start_agent(FAILURE_SCRIPT).await;
    let mut response = post_build(&agent).await;

    let lines = read_lines_until(&mut response, |line| line.contains("baseUrl")).await;
    let terminal: serde_json::Value = serde_json::from_str(&lines[lines.len() - 1]).unwrap();

    assert_eq!(
        terminal["error"],
        serde_json::json!({ "code": "E_CANCELLED", "message": "stopped" })
    );
    assert!(terminal.get("files").is_none());
}

#[tokio::test]
async fn client_disconnect_kills_job_and_removes_staging() {
    let agent = start_agent(SLOW_SCRIPT).await;
    let mut response = post_build(&agent).await;

    // Wait until the job is actually running, then walk away.
    read_lines_until(&mut response, |line| line.contains("job started")).await;
    drop(response);

    timeout(Duration::from_secs(2), async {
        loop {
            let staging_empty = std::fs::read_dir(&agent.stage_dir)
                .map(|entries| entries.count() == 0)
                .unwrap_or(false);
            if staging_empty && agent.pool.running_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "staging not cleaned after disconnect (running={})",
            agent.pool.running_count()
        )
    });
}

#[tokio::test]
async fn router_returns_least_loaded_agent_endpoint() {
    let store = MemStore::new();
    for (address, cpu, jobs) in [("10.0.0.1:443", 8u8, 4u8), ("10.0.0.2:443", 4, 1)] {
        let lease = store.grant(Duration::from_secs(60)).await.unwrap();
        store.put(&format!("/builders/{address}"), vec![cpu, jobs], lease).await.unwrap();
    }

    let app = bf_router::router(Arc::new(bf_registry::AgentRegistry::new(Arc::new(store))));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let response =
        reqwest::get(format!("http://{addr}/find-build-agent")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), r#"{"endpoint": "https://10.0.0.2:443"}"#);
}

#[tokio::test]
async fn missing_header_is_rejected() {
    let agent = start_agent(SUCCESS_SCRIPT).await;
    let response = reqwest::Client::new()
        .post(format!("{}/v2/build", agent.base_url))
        .body(project_tarball())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert_eq!(response.text().await.unwrap(), "header x-build-request is not specified");
}
