//! HTTP surface, driven in-process through the router.

mod helpers;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use helpers::*;
use serde_json::Value;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use cnpj_batch::app_state::{AppState, StartupError};
use cnpj_batch::config::AppConfig;
use cnpj_batch::routes;

async fn mock_api(delay: Duration) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(office_body("ACME LTDA", true, false))
                .set_delay(delay),
        )
        .mount(&server)
        .await;
    server
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>, header::HeaderMap) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec(), headers)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder().method("POST").uri(uri).body(Body::empty()).unwrap()
}

fn upload(uri: &str, file_name: &str, content: &[u8]) -> Request<Body> {
    let (content_type, body) = multipart_file(file_name, content);
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .unwrap()
}

fn json(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap()
}

async fn submit(app: &Router, uri: &str, csv: &str) -> String {
    let (status, body, _) = send(app, upload(uri, "lista.csv", csv.as_bytes())).await;
    assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&body));
    json(&body)["job_id"].as_str().unwrap().to_string()
}

async fn wait_done(app: &Router, job_id: &str) -> Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let (status, body, _) = send(app, get(&format!("/jobs/{}/status", job_id))).await;
        assert_eq!(status, StatusCode::OK);
        let snapshot = json(&body);
        if snapshot["done"] == Value::Bool(true) {
            return snapshot;
        }
        assert!(tokio::time::Instant::now() < deadline, "job did not finish");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_upload_status_and_csv_download() {
    let server = mock_api(Duration::ZERO).await;
    let tc = open_cache(3600).await;
    let app = routes::router(app_state(&tc, &server.uri()));

    let csv = "empresa,cnpj\nA,11.222.333/0001-81\nB,11222333000181\nC,123\n";
    let job_id = submit(&app, "/jobs?output=csv&delay_seconds=0", csv).await;

    let snapshot = wait_done(&app, &job_id).await;
    assert_eq!(snapshot["status"], "done");
    assert_eq!(snapshot["progress"], 2);
    assert_eq!(snapshot["total"], 2);
    assert_eq!(snapshot["has_output"], true);

    let (status, body, headers) = send(&app, get(&format!("/jobs/{}/download", job_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "text/csv");
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename=\"resultado.csv\""
    );

    let text = String::from_utf8(body).unwrap();
    assert!(text.starts_with("cnpj,razao_social,simples_nacional,simei,data_consulta,erro\n"));
    assert!(text.contains("11222333000181,ACME LTDA,Sim,Não,"));
    assert!(text.contains("00000000000123,,,,"));
}

#[tokio::test]
async fn test_xlsx_is_the_default_output() {
    let server = mock_api(Duration::ZERO).await;
    let tc = open_cache(3600).await;
    let app = routes::router(app_state(&tc, &server.uri()));

    let job_id = submit(&app, "/jobs", "cnpj\n11222333000181\n").await;
    wait_done(&app, &job_id).await;

    let (status, body, headers) = send(&app, get(&format!("/jobs/{}/download", job_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename=\"resultado.xlsx\""
    );
    assert!(body.starts_with(b"PK"));
}

#[tokio::test]
async fn test_submission_errors_are_bad_requests() {
    let tc = open_cache(3600).await;
    let app = routes::router(app_state(&tc, "http://127.0.0.1:9"));

    let (status, body, _) = send(&app, upload("/jobs?output=pdf", "a.csv", b"cnpj\n11222333000181\n")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json(&body)["detail"], "output deve ser csv ou xlsx");

    let (status, body, _) = send(&app, upload("/jobs", "a.csv", b"cnpj\n")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json(&body)["detail"].as_str().unwrap().starts_with("Nenhum CNPJ"));

    let (status, _, _) = send(&app, upload("/jobs", "a.txt", b"cnpj\n11222333000181\n")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    for uri in ["/jobs?delay_seconds=abc", "/jobs?delay_seconds=NaN"] {
        let (status, _, _) = send(&app, upload(uri, "a.csv", b"cnpj\n11222333000181\n")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
    }
}

#[tokio::test]
async fn test_out_of_range_delays_are_accepted() {
    let tc = open_cache(3600).await;
    let app = routes::router(app_state(&tc, "http://127.0.0.1:9"));

    for uri in ["/jobs?delay_seconds=-1", "/jobs?delay_seconds=5000", "/jobs?sleep_seconds=0"] {
        let (status, body, _) = send(&app, upload(uri, "a.csv", b"cnpj\n11222333000181\n")).await;
        assert_eq!(status, StatusCode::OK, "{}: {}", uri, String::from_utf8_lossy(&body));
        assert!(json(&body)["job_id"].is_string());
    }
}

#[tokio::test]
async fn test_negative_delay_runs_at_the_floor() {
    let server = mock_api(Duration::ZERO).await;
    let tc = open_cache(3600).await;
    let floor = Duration::from_millis(300);
    let app = routes::router(app_state_with_floor(&tc, &server.uri(), floor));

    let started = std::time::Instant::now();
    let job_id = submit(
        &app,
        "/jobs?output=csv&delay_seconds=-5",
        "cnpj\n11222333000181\n11444777000161\n",
    )
    .await;
    let snapshot = wait_done(&app, &job_id).await;

    assert_eq!(snapshot["status"], "done");
    assert!(started.elapsed() >= floor, "elapsed {:?}", started.elapsed());
}

#[tokio::test]
async fn test_unknown_jobs_are_not_found() {
    let tc = open_cache(3600).await;
    let app = routes::router(app_state(&tc, "http://127.0.0.1:9"));
    let missing = Uuid::new_v4();

    for uri in [
        format!("/jobs/{}/status", missing),
        format!("/jobs/{}/download", missing),
        format!("/jobs/{}/events", missing),
        "/jobs/not-a-uuid/status".to_string(),
    ] {
        let (status, body, _) = send(&app, get(&uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
        assert_eq!(json(&body)["detail"], "job não encontrado");
    }

    let (status, _, _) = send(&app, post(&format!("/jobs/{}/cancel", missing))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_download_before_done_conflicts_then_cancel() {
    let server = mock_api(Duration::from_secs(1)).await;
    let tc = open_cache(3600).await;
    let app = routes::router(app_state(&tc, &server.uri()));

    let job_id = submit(&app, "/jobs?output=csv", "cnpj\n11222333000181\n11444777000161\n").await;

    let (status, _, _) = send(&app, get(&format!("/jobs/{}/download", job_id))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body, _) = send(&app, post(&format!("/jobs/{}/cancel", job_id))).await;
    assert_eq!(status, StatusCode::OK);
    let reply = json(&body);
    assert_eq!(reply["ok"], true);
    assert_eq!(reply["status"], "canceling");

    let snapshot = wait_done(&app, &job_id).await;
    assert_eq!(snapshot["status"], "canceled");
    assert_eq!(snapshot["canceled"], true);

    let (status, _, _) = send(&app, get(&format!("/jobs/{}/download", job_id))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_event_stream_reports_progress_until_done() {
    let server = mock_api(Duration::from_millis(20)).await;
    let tc = open_cache(3600).await;
    let app = routes::router(app_state(&tc, &server.uri()));

    let job_id = submit(&app, "/jobs?output=csv", "cnpj\n11222333000181\n").await;

    let (status, body, headers) = tokio::time::timeout(
        Duration::from_secs(10),
        send(&app, get(&format!("/jobs/{}/events", job_id))),
    )
    .await
    .expect("event stream closes after done");

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");

    let text = String::from_utf8(body).unwrap();
    assert!(text.starts_with("event: open\n"), "{}", text);
    assert!(text.contains("retry: 5000"));
    assert!(text.contains("event: progress\n"));
    assert!(text.contains("\"status\":\"done\""));
    assert!(text.contains("event: done\ndata: ok"));
}

#[tokio::test]
async fn test_health_and_index() {
    let tc = open_cache(3600).await;
    let app = routes::router(app_state(&tc, "http://127.0.0.1:9"));

    let (status, body, _) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    let health = json(&body);
    assert_eq!(health["status"], "ok");
    assert_eq!(health["checks"]["cache"]["status"], "ok");
    assert!(health["checks"]["cache"]["latency_ms"].is_u64());
    assert_eq!(health["jobs"], 0);

    let (status, body, _) = send(&app, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(body).unwrap().contains("<form"));
}

#[tokio::test]
async fn test_field_rules_file_is_loaded_at_startup() {
    let tc = open_cache(3600).await;
    let dir = tempfile::tempdir().unwrap();

    let missing = AppConfig {
        field_rules_path: Some(dir.path().join("missing.json").display().to_string()),
        ..AppConfig::default()
    };
    assert!(matches!(
        AppState::from_config(tc.pool.clone(), &missing),
        Err(StartupError::FieldRules(_))
    ));

    let rules = dir.path().join("rules.json");
    std::fs::write(
        &rules,
        r#"{"display_name": [["empresa", "nome"]], "simples_nacional": [], "simei": [], "flag_keys": [], "status_keys": []}"#,
    )
    .unwrap();
    let configured = AppConfig {
        field_rules_path: Some(rules.display().to_string()),
        ..AppConfig::default()
    };
    assert!(AppState::from_config(tc.pool.clone(), &configured).is_ok());
}
