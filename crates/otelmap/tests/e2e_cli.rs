use std::net::TcpListener;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use opentelemetry_proto::tonic::collector::trace::v1::trace_service_client::TraceServiceClient;
use otelmap_core::model::service_map::MapAnalysis;
use otelmap_core::query::{SessionTokenResponse, StatusResponse};
use prost::Message;
use serial_test::serial;
use testkit::{sample_export_request, sample_session};

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn bin() -> &'static str {
    env!("CARGO_BIN_EXE_otelmap")
}

struct Server {
    child: Child,
    grpc_port: u16,
    http_port: u16,
    api_port: u16,
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn spawn_server(temp: &Path) -> Server {
    let grpc_port = free_port();
    let http_port = free_port();
    let api_port = free_port();

    let child = Command::new(bin())
        .arg("run")
        .arg("--db-path")
        .arg(temp.join("otelmap.duckdb"))
        .arg("--otlp-grpc-addr")
        .arg(format!("127.0.0.1:{grpc_port}"))
        .arg("--otlp-http-addr")
        .arg(format!("127.0.0.1:{http_port}"))
        .arg("--api-addr")
        .arg(format!("127.0.0.1:{api_port}"))
        .env("OTELMAP_CONFIG", temp.join("missing.toml"))
        .env("OTELMAP_WRITE_FLUSH_MS", "20")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    Server {
        child,
        grpc_port,
        http_port,
        api_port,
    }
}

async fn wait_ready(server: &mut Server) {
    let client = reqwest::Client::new();
    for _ in 0..100 {
        assert!(server.child.try_wait().unwrap().is_none(), "otelmap exited early");
        let api = client
            .get(format!("http://127.0.0.1:{}/api/v1/healthz", server.api_port))
            .send()
            .await;
        let ingest = client
            .post(format!("http://127.0.0.1:{}/v1/traces", server.http_port))
            .body(Vec::<u8>::new())
            .send()
            .await;
        if api.is_ok() && ingest.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("otelmap did not become ready");
}

fn cli(api_port: u16, args: &[&str]) -> std::process::Output {
    Command::new(bin())
        .arg("--addr")
        .arg(format!("127.0.0.1:{api_port}"))
        .args(args)
        .output()
        .unwrap()
}

fn new_session(api_port: u16) -> SessionTokenResponse {
    let output = cli(api_port, &["--json", "session"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    serde_json::from_slice(&output.stdout).unwrap()
}

#[tokio::test]
#[serial]
async fn e2e_http_ingest_then_map() {
    let temp = tempfile::tempdir().unwrap();
    let mut server = spawn_server(temp.path());
    wait_ready(&mut server).await;

    let session = new_session(server.api_port);
    assert_eq!(session.ingest.header_value, session.token);

    let resp = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}/v1/traces", server.http_port))
        .header("content-type", "application/x-protobuf")
        .body(sample_export_request(Some(&session.token)).encode_to_vec())
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    tokio::time::sleep(Duration::from_millis(300)).await;

    let output = cli(server.api_port, &["--json", "map", "--session", &session.token]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let analysis: MapAnalysis = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(analysis.map.nodes.len(), 2);
    let edge = analysis.map.edge("frontend", "api").unwrap();
    assert_eq!(edge.request_count, 1);
    assert_eq!(edge.operations, vec!["POST /orders".to_string()]);
    assert_eq!(analysis.map.node("api").unwrap().error_rate, 1.0);
    assert_eq!(analysis.flows.len(), 1);

    let output = cli(server.api_port, &["map", "--session", &session.token, "--flows"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("-- 2 nodes, 1 edges --"));
    assert!(stdout.contains("POST /orders"));
    assert!(stdout.contains("-- 1 flows --"));
}

#[tokio::test]
#[serial]
async fn e2e_grpc_ingest_with_session_header() {
    let temp = tempfile::tempdir().unwrap();
    let mut server = spawn_server(temp.path());
    wait_ready(&mut server).await;

    let session = new_session(server.api_port);

    let mut client = TraceServiceClient::connect(format!("http://127.0.0.1:{}", server.grpc_port))
        .await
        .unwrap();
    let mut request = tonic::Request::new(sample_export_request(None));
    request
        .metadata_mut()
        .insert("x-otel-session", session.token.parse().unwrap());
    client.export(request).await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;

    let output = cli(server.api_port, &["--json", "map", "--session", &session.token]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let analysis: MapAnalysis = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(analysis.map.global.total_requests, 2);

    let output = cli(server.api_port, &["--json", "status"]);
    let status: StatusResponse = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(status.spans_count, 2);
    assert_eq!(status.sessions_count, 1);
}

#[tokio::test]
#[serial]
async fn e2e_unknown_session_fails_cleanly() {
    let temp = tempfile::tempdir().unwrap();
    let mut server = spawn_server(temp.path());
    wait_ready(&mut server).await;

    let output = cli(
        server.api_port,
        &["map", "--session", "7d444840-9dc0-11d1-b245-5ffdce74fad2"],
    );
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("404"));
}

#[test]
fn offline_span_file_map() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("spans.json");
    std::fs::write(&path, serde_json::to_string(&sample_session("tok")).unwrap()).unwrap();

    let output = Command::new(bin())
        .arg("map")
        .arg("--spans")
        .arg(&path)
        .arg("--flows")
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("-- 3 nodes, 3 edges --"));
    assert!(stdout.contains("-- 2 flows --"));

    let output = Command::new(bin())
        .arg("--json")
        .arg("map")
        .arg("--spans")
        .arg(&path)
        .output()
        .unwrap();
    let analysis: MapAnalysis = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(analysis.map.edge("checkout", "payments").unwrap().error_rate, 0.5);
    assert_eq!(analysis.map.edge("checkout", "postgres").unwrap().request_count, 0);
}

#[test]
fn map_without_source_is_a_usage_error() {
    let output = Command::new(bin()).arg("map").output().unwrap();
    assert!(!output.status.success());
}
