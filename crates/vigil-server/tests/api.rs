use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::watch;
use tower::ServiceExt;
use vigil_server::app::build_http_app;
use vigil_server::config::ServerConfig;
use vigil_server::runtime;
use vigil_server::state::AppState;
use vigil_storage::Store;

const API_KEY: &str = "test-key";

struct TestServer {
    app: Router,
    _dir: TempDir,
    _shutdown: watch::Sender<bool>,
}

async fn setup() -> TestServer {
    vigil_common::id::init(1, 1);
    let dir = tempfile::tempdir().unwrap();
    let db_url = format!("sqlite://{}/vigil.db?mode=rwc", dir.path().display());
    let store = Arc::new(Store::connect(&db_url).await.unwrap());

    let mut config = ServerConfig::default();
    config.notify.stub_slack = true;
    let config = Arc::new(config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (eval, notify, _handles) =
        runtime::spawn(store.clone(), config.clone(), shutdown_rx).unwrap();
    let state = AppState::new(store.clone(), config, eval, notify);

    let client = store.create_client("acme").await.unwrap();
    store.create_api_key(&client.id, "agent", API_KEY).await.unwrap();

    TestServer {
        app: build_http_app(state),
        _dir: dir,
        _shutdown: shutdown_tx,
    }
}

fn get(path: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .header("x-api-key", API_KEY)
        .body(Body::empty())
        .unwrap()
}

fn send_json(method: &str, path: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(path)
        .header("content-type", "application/json")
        .header("x-api-key", API_KEY)
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn ingest_body(value: f64) -> Value {
    json!({
        "sent_at": Utc::now().to_rfc3339(),
        "machine": {"hostname": "web-01", "os": "linux", "fingerprint": "fp-1"},
        "metrics": [{"name": "cpu_load", "type": "number", "value": value}]
    })
}

/// Polls `check` until it returns true or the deadline passes, yielding
/// to the queue workers in between.
async fn wait_for<F, Fut>(mut check: F, what: &str)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for: {what}");
}

async fn open_incident_count(app: &Router) -> u64 {
    let resp = app
        .clone()
        .oneshot(get("/api/v1/incidents?status=open"))
        .await
        .unwrap();
    body_json(resp).await["total"].as_u64().unwrap()
}

#[tokio::test]
async fn health_needs_no_auth() {
    let server = setup().await;
    let resp = server
        .app
        .clone()
        .oneshot(Request::builder().uri("/api/v1/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, json!({"status": "ok"}));
}

#[tokio::test]
async fn ingest_rejects_missing_and_invalid_keys() {
    let server = setup().await;

    let no_key = Request::builder()
        .method("POST")
        .uri("/api/v1/ingest/metrics")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&ingest_body(0.1)).unwrap()))
        .unwrap();
    let resp = server.app.clone().oneshot(no_key).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(resp).await["detail"]["message"], "Missing API key");

    let bad_key = Request::builder()
        .method("POST")
        .uri("/api/v1/ingest/metrics")
        .header("content-type", "application/json")
        .header("x-api-key", "wrong")
        .body(Body::from(serde_json::to_vec(&ingest_body(0.1)).unwrap()))
        .unwrap();
    let resp = server.app.clone().oneshot(bad_key).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(resp).await["detail"]["message"], "Invalid API key");
}

#[tokio::test]
async fn duplicate_ingest_id_acknowledged_without_side_effects() {
    let server = setup().await;
    let body = ingest_body(0.42);

    let mk_req = |body: &Value| {
        Request::builder()
            .method("POST")
            .uri("/api/v1/ingest/metrics")
            .header("content-type", "application/json")
            .header("x-api-key", API_KEY)
            .header("x-ingest-id", "11111111-1111-1111-1111-111111111111")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap()
    };

    let resp = server.app.clone().oneshot(mk_req(&body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let first = body_json(resp).await;
    assert_eq!(first["accepted"], true);
    assert_eq!(first["duplicate"], false);

    let resp = server.app.clone().oneshot(mk_req(&body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let second = body_json(resp).await;
    assert_eq!(second["accepted"], true);
    assert_eq!(second["duplicate"], true);

    // One machine, one instance, one sample's worth of data.
    let resp = server.app.clone().oneshot(get("/api/v1/machines")).await.unwrap();
    let machines = body_json(resp).await;
    assert_eq!(machines["total"], 1);
    let machine_id = machines["items"][0]["id"].as_str().unwrap().to_string();

    let resp = server
        .app
        .clone()
        .oneshot(get(&format!("/api/v1/machines/{machine_id}/metrics")))
        .await
        .unwrap();
    let metrics = body_json(resp).await;
    let instance_id = metrics[0]["id"].as_str().unwrap();

    let resp = server
        .app
        .clone()
        .oneshot(get(&format!("/api/v1/metrics/{instance_id}/samples")))
        .await
        .unwrap();
    assert_eq!(body_json(resp).await.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn oversized_ingest_id_is_rejected() {
    let server = setup().await;
    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/ingest/metrics")
        .header("content-type", "application/json")
        .header("x-api-key", API_KEY)
        .header("x-ingest-id", "x".repeat(65))
        .body(Body::from(serde_json::to_vec(&ingest_body(0.1)).unwrap()))
        .unwrap();
    let resp = server.app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn http_target_create_conflict_and_validation() {
    let server = setup().await;
    let body = json!({
        "name": "T",
        "url": "https://httpbin.org/status/500?k=1",
        "method": "GET",
        "timeout_seconds": 10,
        "check_interval_seconds": 60,
        "is_active": true
    });

    let resp = server
        .app
        .clone()
        .oneshot(send_json("POST", "/api/v1/http-targets", &body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created = body_json(resp).await;
    let id = created["id"].as_str().unwrap().to_string();

    // Identical create: 409 with the winner's id.
    let resp = server
        .app
        .clone()
        .oneshot(send_json("POST", "/api/v1/http-targets", &body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let conflict = body_json(resp).await;
    assert_eq!(conflict["detail"]["existing_id"], id.as_str());

    // Bad scheme and bad method are 422, field-level.
    let bad_scheme = json!({"name": "F", "url": "ftp://example.com", "method": "GET"});
    let resp = server
        .app
        .clone()
        .oneshot(send_json("POST", "/api/v1/http-targets", &bad_scheme))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let bad_method = json!({"name": "M", "url": "https://example.com", "method": "TRACE"});
    let resp = server
        .app
        .clone()
        .oneshot(send_json("POST", "/api/v1/http-targets", &bad_method))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

    // Empty accepted set defaults to {200}.
    let resp = server.app.clone().oneshot(get("/api/v1/http-targets")).await.unwrap();
    let listed = body_json(resp).await;
    assert_eq!(listed[0]["accepted_status_codes"], json!([200]));
}

#[tokio::test]
async fn settings_roundtrip() {
    let server = setup().await;

    let resp = server.app.clone().oneshot(get("/api/v1/settings")).await.unwrap();
    let defaults = body_json(resp).await;
    assert_eq!(defaults["notify_on_resolve"], true);
    assert_eq!(defaults["reminder_notification_seconds"], 0);

    let update = json!({
        "reminder_notification_seconds": 600,
        "notify_on_resolve": false,
        "slack_channel_name": "#alerts"
    });
    let resp = server
        .app
        .clone()
        .oneshot(send_json("PUT", "/api/v1/settings", &update))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let updated = body_json(resp).await;
    assert_eq!(updated["reminder_notification_seconds"], 600);
    assert_eq!(updated["notify_on_resolve"], false);
    assert_eq!(updated["slack_channel_name"], "#alerts");
}

#[tokio::test]
async fn threshold_breach_opens_single_incident_and_resolves() {
    let server = setup().await;
    let app = &server.app;

    // First batch registers the machine and instance.
    let resp = app
        .clone()
        .oneshot(send_json("POST", "/api/v1/ingest/metrics", &ingest_body(0.5)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let resp = app.clone().oneshot(get("/api/v1/machines")).await.unwrap();
    let machine_id = body_json(resp).await["items"][0]["id"]
        .as_str()
        .unwrap()
        .to_string();
    let resp = app
        .clone()
        .oneshot(get(&format!("/api/v1/machines/{machine_id}/metrics")))
        .await
        .unwrap();
    let instance_id = body_json(resp).await[0]["id"].as_str().unwrap().to_string();

    // Install gt 0.8 critical.
    let resp = app
        .clone()
        .oneshot(send_json(
            "POST",
            &format!("/api/v1/metrics/{instance_id}/thresholds/default"),
            &json!({"comparison": "gt", "value": 0.8, "severity": "critical"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    // 0.9 breaches: exactly one incident opens.
    app.clone()
        .oneshot(send_json("POST", "/api/v1/ingest/metrics", &ingest_body(0.9)))
        .await
        .unwrap();
    wait_for(|| async { open_incident_count(app).await == 1 }, "incident to open").await;

    // A second breach does not open a second incident.
    app.clone()
        .oneshot(send_json("POST", "/api/v1/ingest/metrics", &ingest_body(0.9)))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    assert_eq!(open_incident_count(app).await, 1);

    // The instance shows up under /alerts while critical.
    let resp = app.clone().oneshot(get("/api/v1/alerts")).await.unwrap();
    let alerts = body_json(resp).await;
    assert_eq!(alerts.as_array().unwrap().len(), 1);
    assert_eq!(alerts[0]["metric_name"], "cpu_load");

    // Recovery resolves it.
    app.clone()
        .oneshot(send_json("POST", "/api/v1/ingest/metrics", &ingest_body(0.4)))
        .await
        .unwrap();
    wait_for(|| async { open_incident_count(app).await == 0 }, "incident to resolve").await;

    let resp = app
        .clone()
        .oneshot(get("/api/v1/incidents?status=resolved"))
        .await
        .unwrap();
    let resolved = body_json(resp).await;
    assert_eq!(resolved["total"], 1);
    assert!(resolved["items"][0]["resolved_at"].is_string());
}

#[tokio::test]
async fn disabling_alerting_resolves_open_incident() {
    let server = setup().await;
    let app = &server.app;

    app.clone()
        .oneshot(send_json("POST", "/api/v1/ingest/metrics", &ingest_body(0.5)))
        .await
        .unwrap();
    let resp = app.clone().oneshot(get("/api/v1/machines")).await.unwrap();
    let machine_id = body_json(resp).await["items"][0]["id"]
        .as_str()
        .unwrap()
        .to_string();
    let resp = app
        .clone()
        .oneshot(get(&format!("/api/v1/machines/{machine_id}/metrics")))
        .await
        .unwrap();
    let instance_id = body_json(resp).await[0]["id"].as_str().unwrap().to_string();

    app.clone()
        .oneshot(send_json(
            "POST",
            &format!("/api/v1/metrics/{instance_id}/thresholds/default"),
            &json!({"comparison": "gt", "value": 0.8, "severity": "critical"}),
        ))
        .await
        .unwrap();

    app.clone()
        .oneshot(send_json("POST", "/api/v1/ingest/metrics", &ingest_body(0.95)))
        .await
        .unwrap();
    wait_for(|| async { open_incident_count(app).await == 1 }, "incident to open").await;

    // Operator turns alerting off: the next evaluation resolves.
    let resp = app
        .clone()
        .oneshot(send_json(
            "PATCH",
            &format!("/api/v1/metrics/{instance_id}/alerting"),
            &json!({"enabled": false}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    wait_for(|| async { open_incident_count(app).await == 0 }, "suppression to resolve").await;

    let resp = app
        .clone()
        .oneshot(get(&format!("/api/v1/metrics/{instance_id}")))
        .await
        .unwrap();
    assert_eq!(body_json(resp).await["state"], "UNKNOWN");
}

#[tokio::test]
async fn probe_normalizes_transport_failure_to_status_zero() {
    let server = setup().await;

    // Nothing listens on port 9; the connection is refused immediately.
    let body = json!({
        "name": "dead",
        "url": "http://127.0.0.1:9/health",
        "method": "GET",
        "timeout_seconds": 2,
        "check_interval_seconds": 60,
        "is_active": true
    });
    let resp = server
        .app
        .clone()
        .oneshot(send_json("POST", "/api/v1/http-targets", &body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let id = body_json(resp).await["id"].as_str().unwrap().to_string();

    let resp = server
        .app
        .clone()
        .oneshot(send_json(
            "POST",
            &format!("/api/v1/http-targets/{id}/check"),
            &json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let outcome = body_json(resp).await;
    assert_eq!(outcome["ok"], false);
    assert_eq!(outcome["status"], 0);
    assert!(outcome["error"].is_string());

    // The failed probe flows through the evaluator and opens an incident.
    wait_for(
        || async { open_incident_count(&server.app).await == 1 },
        "probe failure to open an incident",
    )
    .await;

    // last_* fields reflect the check.
    let resp = server.app.clone().oneshot(get("/api/v1/http-targets")).await.unwrap();
    let targets = body_json(resp).await;
    assert_eq!(targets[0]["last_status"], 0);
    assert!(targets[0]["last_check_at"].is_string());
}

#[tokio::test]
async fn threshold_value_type_must_match_definition() {
    let server = setup().await;
    let app = &server.app;

    app.clone()
        .oneshot(send_json("POST", "/api/v1/ingest/metrics", &ingest_body(0.5)))
        .await
        .unwrap();
    let resp = app.clone().oneshot(get("/api/v1/machines")).await.unwrap();
    let machine_id = body_json(resp).await["items"][0]["id"]
        .as_str()
        .unwrap()
        .to_string();
    let resp = app
        .clone()
        .oneshot(get(&format!("/api/v1/machines/{machine_id}/metrics")))
        .await
        .unwrap();
    let instance_id = body_json(resp).await[0]["id"].as_str().unwrap().to_string();

    let resp = app
        .clone()
        .oneshot(send_json(
            "POST",
            &format!("/api/v1/metrics/{instance_id}/thresholds/default"),
            &json!({"comparison": "contains", "value": "oops"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
}
