// SPDX-License-Identifier: Apache-2.0

use std::path::Path;
use std::sync::Arc;

use pacsproxy_server::{
    build_router, AppState, CacheConfig, FsContentStore, LocalArchiveChannel, SeriesService,
};
use serde_json::{json, Value};
use tempfile::{tempdir, TempDir};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

struct Harness {
    addr: std::net::SocketAddr,
    storage: TempDir,
    _archive: TempDir,
}

struct HttpResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

impl HttpResponse {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn json(&self) -> Value {
        serde_json::from_str(&self.body).expect("json body")
    }
}

fn seed_archive(root: &Path) {
    let ct = root.join("1.2.840.1").join("1.2.840.1.1");
    std::fs::create_dir_all(&ct).expect("mkdir ct series");
    std::fs::write(
        ct.join("series.json"),
        json!([{
            "0020000D": {"vr": "UI", "Value": ["1.2.840.1"]},
            "0020000E": {"vr": "UI", "Value": ["1.2.840.1.1"]},
            "00080060": {"vr": "CS", "Value": ["CT"]},
            "00200011": {"vr": "IS", "Value": [3]}
        }])
        .to_string(),
    )
    .expect("write series json");
    std::fs::write(ct.join("1.2.840.1.1.1.dcm"), b"CT-SLICE-1").expect("write slice 1");
    std::fs::write(ct.join("1.2.840.1.1.2.dcm"), b"CT-SLICE-2").expect("write slice 2");

    let seg = root.join("1.2.840.9").join("1.2.840.9.1");
    std::fs::create_dir_all(&seg).expect("mkdir seg series");
    std::fs::write(
        seg.join("series.json"),
        json!([{"00080060": {"vr": "CS", "Value": ["SEG"]}}]).to_string(),
    )
    .expect("write seg json");
    std::fs::write(seg.join("references.json"), json!(["1.2.840.1.1"]).to_string())
        .expect("write references");
    std::fs::write(seg.join("1.2.840.9.1.1.dcm"), b"SEG-1").expect("write seg instance");
}

async fn start() -> Harness {
    let archive = tempdir().expect("archive dir");
    let storage = tempdir().expect("storage dir");
    seed_archive(archive.path());
    let cfg = CacheConfig {
        storage_root: storage.path().to_path_buf(),
        ..CacheConfig::default()
    };
    let service = SeriesService::new(
        &cfg,
        "http://proxy.test",
        Arc::new(FsContentStore::new(storage.path().to_path_buf())),
        Arc::new(LocalArchiveChannel::new(archive.path().to_path_buf())),
    );
    let app = build_router(AppState::new(Arc::new(service)));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve app");
    });
    Harness {
        addr,
        storage,
        _archive: archive,
    }
}

async fn get(addr: std::net::SocketAddr, path: &str, extra_headers: &str) -> HttpResponse {
    let mut stream = tokio::net::TcpStream::connect(addr)
        .await
        .expect("connect server");
    let request = format!(
        "GET {path} HTTP/1.1\r\nHost: {addr}\r\n{extra_headers}Connection: close\r\n\r\n"
    );
    stream
        .write_all(request.as_bytes())
        .await
        .expect("write request");
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.expect("read response");
    let text = String::from_utf8_lossy(&raw).into_owned();
    let (head, body) = text.split_once("\r\n\r\n").expect("http head");
    let mut lines = head.lines();
    let status = lines
        .next()
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|s| s.parse().ok())
        .expect("status code");
    let headers = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();
    HttpResponse {
        status,
        headers,
        body: body.to_string(),
    }
}

#[tokio::test]
async fn liveness_landing_and_readiness() {
    let h = start().await;
    let landing = get(h.addr, "/", "").await;
    assert_eq!(landing.status, 200);
    assert_eq!(landing.json(), json!({"hello": "world"}));

    assert_eq!(get(h.addr, "/healthz", "").await.status, 200);
    let ready = get(h.addr, "/readyz", "").await;
    assert_eq!(ready.status, 200);
    assert!(ready.header("x-request-id").is_some());
}

#[tokio::test]
async fn series_metadata_on_both_routes() {
    let h = start().await;
    for path in ["/series/1.2.840.1.1/metadata", "/metadata/1.2.840.1.1"] {
        let resp = get(h.addr, path, "").await;
        assert_eq!(resp.status, 200, "{path}: {}", resp.body);
        let body = resp.json();
        assert_eq!(body["Modality"], "CT");
        assert_eq!(body["StudyInstanceUID"], "1.2.840.1");
        assert_eq!(body["SeriesNumber"], "3");
    }
}

#[tokio::test]
async fn invalid_and_unknown_identifiers() {
    let h = start().await;
    let bad = get(h.addr, "/series/1.2.abc/metadata", "x-request-id: req-client-1\r\n").await;
    assert_eq!(bad.status, 400);
    assert_eq!(bad.header("x-request-id"), Some("req-client-1"));
    let body = bad.json();
    assert_eq!(body["error"]["code"], "invalid_identifier");
    assert_eq!(body["error"]["request_id"], "req-client-1");

    let unknown = get(h.addr, "/metadata/1.2.3.4.5", "").await;
    assert_eq!(unknown.status, 404);
    assert_eq!(unknown.json()["error"]["code"], "not_found");
}

#[tokio::test]
async fn series_detail_and_rois_list_urls() {
    let h = start().await;
    let detail = get(h.addr, "/series/1.2.840.1.1", "").await;
    assert_eq!(detail.status, 200, "{}", detail.body);
    let body = detail.json();
    assert_eq!(body["Modality"], "CT");
    assert_eq!(
        body["images"],
        json!([
            "http://proxy.test/files/1.2.840.1/1.2.840.1.1/1.2.840.1.1.1",
            "http://proxy.test/files/1.2.840.1/1.2.840.1.1/1.2.840.1.1.2"
        ])
    );
    assert_eq!(
        body["segmentations"],
        json!(["http://proxy.test/files/1.2.840.9/1.2.840.9.1/1.2.840.9.1.1"])
    );

    let rois = get(h.addr, "/rois/1.2.840.1.1", "").await;
    assert_eq!(rois.status, 200);
    assert_eq!(rois.json(), body["segmentations"]);
}

#[tokio::test]
async fn payload_is_retrieved_on_demand_and_served() {
    let h = start().await;
    let stored = h.storage.path().join("1.2.840.1").join("1.2.840.1.1.2");
    assert!(!stored.exists());

    let resp = get(h.addr, "/files/1.2.840.1/1.2.840.1.1/1.2.840.1.1.2", "").await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.header("content-type"), Some("application/dicom"));
    assert_eq!(resp.body, "CT-SLICE-2");
    assert!(stored.is_file());

    let again = get(h.addr, "/payload/1.2.840.1/1.2.840.1.1/1.2.840.1.1.1", "").await;
    assert_eq!(again.status, 200);
    assert_eq!(again.body, "CT-SLICE-1");
}

#[tokio::test]
async fn payload_failures_map_to_status_codes() {
    let h = start().await;
    let missing_instance = get(h.addr, "/files/1.2.840.1/1.2.840.1.1/1.2.840.1.1.99", "").await;
    assert_eq!(missing_instance.status, 404, "{}", missing_instance.body);

    let missing_series = get(h.addr, "/files/1.2.840.1/1.2.840.1.7/1.2.840.1.7.1", "").await;
    assert_eq!(missing_series.status, 500);
    assert_eq!(missing_series.json()["error"]["code"], "retrieval_failed");
}

#[tokio::test]
async fn metrics_reflect_cache_activity() {
    let h = start().await;
    let _ = get(h.addr, "/metadata/1.2.840.1.1", "").await;
    let _ = get(h.addr, "/metadata/1.2.840.1.1", "").await;
    let metrics = get(h.addr, "/metrics", "").await;
    assert_eq!(metrics.status, 200);
    let line = metrics
        .body
        .lines()
        .find(|l| l.starts_with("pacsproxy_metadata_hits_total{"))
        .expect("hits line");
    assert!(line.ends_with(" 1"), "{line}");
    assert!(metrics
        .body
        .contains("pacsproxy_limiter_capacity{channel=\"local\""));
}
