use chrono::{Duration, Utc};
use vigil_common::types::{
    Comparison, IngestMachine, IngestMetric, IngestRequest, MetricValue, NotificationKind,
    Severity, Subject, ValueType,
};

use crate::store::{NewHttpTarget, Store};
use crate::StorageError;

async fn setup() -> Store {
    vigil_common::id::init(1, 1);
    Store::connect("sqlite::memory:").await.unwrap()
}

fn batch(fingerprint: &str, metrics: Vec<IngestMetric>) -> IngestRequest {
    IngestRequest {
        sent_at: Utc::now(),
        machine: IngestMachine {
            hostname: "web-01".to_string(),
            os: Some("linux".to_string()),
            fingerprint: fingerprint.to_string(),
        },
        metrics,
    }
}

fn cpu_metric(value: f64) -> IngestMetric {
    IngestMetric {
        name: "cpu_load".to_string(),
        value_type: ValueType::Number,
        value: MetricValue::Number(value),
        unit: None,
    }
}

#[tokio::test]
async fn machine_is_unique_per_client_fingerprint() {
    let store = setup().await;
    let client = store.create_client("acme").await.unwrap();

    let first = store
        .ingest_batch(&client.id, "ingest-1", &batch("fp-1", vec![cpu_metric(0.1)]), Utc::now())
        .await
        .unwrap();
    let second = store
        .ingest_batch(&client.id, "ingest-2", &batch("fp-1", vec![cpu_metric(0.2)]), Utc::now())
        .await
        .unwrap();

    assert_eq!(first.machine.id, second.machine.id);
    assert_eq!(store.count_machines(&client.id).await.unwrap(), 1);

    let m = store.get_machine(&first.machine.id).await.unwrap().unwrap();
    assert!(m.last_seen.unwrap() >= first.machine.last_seen.unwrap());
}

#[tokio::test]
async fn duplicate_ingest_id_writes_samples_once() {
    let store = setup().await;
    let client = store.create_client("acme").await.unwrap();
    let req = batch("fp-1", vec![cpu_metric(0.42)]);

    let first = store
        .ingest_batch(&client.id, "11111111-1111-1111-1111-111111111111", &req, Utc::now())
        .await
        .unwrap();
    assert!(!first.duplicate);
    assert_eq!(first.instance_ids.len(), 1);

    let second = store
        .ingest_batch(&client.id, "11111111-1111-1111-1111-111111111111", &req, Utc::now())
        .await
        .unwrap();
    assert!(second.duplicate);
    assert!(second.instance_ids.is_empty());

    let count = store.count_samples(&first.instance_ids[0]).await.unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn same_ingest_id_is_scoped_per_client() {
    let store = setup().await;
    let a = store.create_client("acme").await.unwrap();
    let b = store.create_client("globex").await.unwrap();
    let req = batch("fp-1", vec![cpu_metric(0.1)]);

    let ra = store.ingest_batch(&a.id, "shared-id", &req, Utc::now()).await.unwrap();
    let rb = store.ingest_batch(&b.id, "shared-id", &req, Utc::now()).await.unwrap();
    assert!(!ra.duplicate);
    assert!(!rb.duplicate, "ingest ids must not collide across tenants");
}

#[tokio::test]
async fn type_drift_rejects_whole_batch() {
    let store = setup().await;
    let client = store.create_client("acme").await.unwrap();

    let first = store
        .ingest_batch(&client.id, "i-1", &batch("fp-1", vec![cpu_metric(0.1)]), Utc::now())
        .await
        .unwrap();

    // Same name, now as a string: the entire second batch must roll back,
    // including the valid disk metric ahead of it.
    let drifting = batch(
        "fp-1",
        vec![
            IngestMetric {
                name: "disk_free".to_string(),
                value_type: ValueType::Number,
                value: MetricValue::Number(10.0),
                unit: Some("gb".to_string()),
            },
            IngestMetric {
                name: "cpu_load".to_string(),
                value_type: ValueType::String,
                value: MetricValue::Text("high".to_string()),
                unit: None,
            },
        ],
    );
    let err = store
        .ingest_batch(&client.id, "i-2", &drifting, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::TypeDrift { .. }));

    assert_eq!(store.count_samples(&first.instance_ids[0]).await.unwrap(), 1);
    assert!(
        store.find_definition(&client.id, "disk_free").await.unwrap().is_none(),
        "rolled-back batch must not leave definitions behind"
    );

    // The ingest id burned by the failed batch is reusable.
    let retry = store
        .ingest_batch(&client.id, "i-2", &batch("fp-1", vec![cpu_metric(0.3)]), Utc::now())
        .await
        .unwrap();
    assert!(!retry.duplicate);
}

#[tokio::test]
async fn single_open_incident_per_subject() {
    let store = setup().await;
    let client = store.create_client("acme").await.unwrap();
    let outcome = store
        .ingest_batch(&client.id, "i-1", &batch("fp-1", vec![cpu_metric(0.9)]), Utc::now())
        .await
        .unwrap();
    let subject = Subject::MetricInstance {
        client_id: client.id.clone(),
        instance_id: outcome.instance_ids[0].clone(),
    };

    let now = Utc::now();
    let (first, created) = store
        .open_incident(&subject, Severity::Critical, "cpu_load breach", None, now)
        .await
        .unwrap();
    assert!(created);

    let (second, created_again) = store
        .open_incident(&subject, Severity::Critical, "cpu_load breach", None, now)
        .await
        .unwrap();
    assert!(!created_again, "second open coalesces onto the first");
    assert_eq!(first.id, second.id);

    let open = store.list_incidents(&client.id, Some("open"), 10, 0).await.unwrap();
    assert_eq!(open.len(), 1);
}

#[tokio::test]
async fn resolve_without_open_is_noop_and_resolved_rows_stay() {
    let store = setup().await;
    let client = store.create_client("acme").await.unwrap();
    let outcome = store
        .ingest_batch(&client.id, "i-1", &batch("fp-1", vec![cpu_metric(0.9)]), Utc::now())
        .await
        .unwrap();
    let subject = Subject::MetricInstance {
        client_id: client.id.clone(),
        instance_id: outcome.instance_ids[0].clone(),
    };

    assert!(store.resolve_incident(&subject, Utc::now()).await.unwrap().is_none());

    let (opened, _) = store
        .open_incident(&subject, Severity::Warning, "cpu_load breach", None, Utc::now())
        .await
        .unwrap();
    let resolved = store.resolve_incident(&subject, Utc::now()).await.unwrap().unwrap();
    assert_eq!(resolved.id, opened.id);
    assert_eq!(resolved.status, "RESOLVED");
    assert!(resolved.resolved_at.is_some());

    // A fresh open after resolve is a new row, not a reopened one.
    let (reopened, created) = store
        .open_incident(&subject, Severity::Warning, "cpu_load breach", None, Utc::now())
        .await
        .unwrap();
    assert!(created);
    assert_ne!(reopened.id, opened.id);
}

#[tokio::test]
async fn cooldown_reads_only_open_and_reminder_successes() {
    let store = setup().await;
    let client = store.create_client("acme").await.unwrap();

    let pending = store
        .insert_notification_pending(
            &client.id,
            Some("inc-1"),
            None,
            "slack",
            "#alerts",
            NotificationKind::Open,
            "open message",
        )
        .await
        .unwrap();
    assert!(store.last_notification_success("inc-1").await.unwrap().is_none());

    let t0 = Utc::now();
    store
        .mark_notification_result(&pending.id, true, None, Some(t0))
        .await
        .unwrap();
    let last = store.last_notification_success("inc-1").await.unwrap().unwrap();
    assert_eq!(last.timestamp(), t0.timestamp());

    // A later resolve success must not move the reminder clock.
    let resolve = store
        .insert_notification_pending(
            &client.id,
            Some("inc-1"),
            None,
            "slack",
            "#alerts",
            NotificationKind::Resolve,
            "resolve message",
        )
        .await
        .unwrap();
    store
        .mark_notification_result(&resolve.id, true, None, Some(t0 + Duration::seconds(300)))
        .await
        .unwrap();
    let last = store.last_notification_success("inc-1").await.unwrap().unwrap();
    assert_eq!(last.timestamp(), t0.timestamp());

    // Failed sends never count.
    let failed = store
        .insert_notification_pending(
            &client.id,
            Some("inc-1"),
            None,
            "slack",
            "#alerts",
            NotificationKind::Reminder,
            "reminder",
        )
        .await
        .unwrap();
    store
        .mark_notification_result(&failed.id, false, Some("timeout"), None)
        .await
        .unwrap();
    let last = store.last_notification_success("inc-1").await.unwrap().unwrap();
    assert_eq!(last.timestamp(), t0.timestamp());
}

#[tokio::test]
async fn http_target_url_conflict_carries_existing_id() {
    let store = setup().await;
    let client = store.create_client("acme").await.unwrap();
    let input = NewHttpTarget {
        name: "T".to_string(),
        url: "https://httpbin.org/status/500?k=1".to_string(),
        method: "GET".to_string(),
        accepted_status_codes: vec![],
        timeout_ms: 10_000,
        check_interval_s: 60,
        is_active: true,
    };

    let created = store.create_http_target(&client.id, &input).await.unwrap();
    assert_eq!(created.accepted_status_codes, vec![200], "empty set defaults to {{200}}");

    let err = store.create_http_target(&client.id, &input).await.unwrap_err();
    match err {
        StorageError::Conflict { existing_id, .. } => assert_eq!(existing_id, created.id),
        other => panic!("expected conflict, got {other:?}"),
    }

    // Same URL under another tenant is fine.
    let other = store.create_client("globex").await.unwrap();
    assert!(store.create_http_target(&other.id, &input).await.is_ok());
}

#[tokio::test]
async fn due_targets_honor_cadence() {
    let store = setup().await;
    let client = store.create_client("acme").await.unwrap();
    let t = store
        .create_http_target(
            &client.id,
            &NewHttpTarget {
                name: "api".to_string(),
                url: "https://example.com/health".to_string(),
                method: "GET".to_string(),
                accepted_status_codes: vec![200, 204],
                timeout_ms: 5_000,
                check_interval_s: 60,
                is_active: true,
            },
        )
        .await
        .unwrap();

    let now = Utc::now();
    // Never checked: due immediately.
    assert_eq!(store.due_http_targets(now).await.unwrap().len(), 1);

    store.record_probe_result(&t.id, now, 200, 42).await.unwrap();
    assert!(store.due_http_targets(now + Duration::seconds(30)).await.unwrap().is_empty());
    assert_eq!(
        store.due_http_targets(now + Duration::seconds(61)).await.unwrap().len(),
        1
    );

    let row = store.get_http_target(&t.id).await.unwrap().unwrap();
    assert_eq!(row.last_status, Some(200));
    assert_eq!(row.last_latency_ms, Some(42));
}

#[tokio::test]
async fn default_threshold_is_replaced_not_duplicated() {
    let store = setup().await;
    let client = store.create_client("acme").await.unwrap();
    let outcome = store
        .ingest_batch(&client.id, "i-1", &batch("fp-1", vec![cpu_metric(0.1)]), Utc::now())
        .await
        .unwrap();
    let instance_id = &outcome.instance_ids[0];

    let first = store
        .upsert_default_threshold(
            instance_id,
            Comparison::Gt,
            &MetricValue::Number(0.8),
            Severity::Critical,
        )
        .await
        .unwrap();
    let second = store
        .upsert_default_threshold(
            instance_id,
            Comparison::Ge,
            &MetricValue::Number(0.9),
            Severity::Warning,
        )
        .await
        .unwrap();
    assert_eq!(first.id, second.id);

    let effective = store.get_threshold(instance_id).await.unwrap().unwrap();
    assert_eq!(effective.comparison, Comparison::Ge);
    assert_eq!(effective.value, MetricValue::Number(0.9));
}

#[tokio::test]
async fn trim_samples_keeps_recent_history() {
    let store = setup().await;
    let client = store.create_client("acme").await.unwrap();
    let outcome = store
        .ingest_batch(&client.id, "i-0", &batch("fp-1", vec![cpu_metric(0.0)]), Utc::now())
        .await
        .unwrap();
    let instance_id = outcome.instance_ids[0].clone();

    let base = Utc::now();
    for i in 1..10 {
        store
            .append_sample(
                &instance_id,
                base + Duration::seconds(i),
                None,
                &MetricValue::Number(i as f64),
            )
            .await
            .unwrap();
    }
    assert_eq!(store.count_samples(&instance_id).await.unwrap(), 10);

    let removed = store.trim_samples(3).await.unwrap();
    assert_eq!(removed, 7);
    let remaining = store.list_samples(&instance_id, 10).await.unwrap();
    assert_eq!(remaining.len(), 3);
    assert_eq!(remaining[0].value, MetricValue::Number(9.0));
}

#[tokio::test]
async fn outbox_roundtrip() {
    let store = setup().await;
    let row = store.enqueue_outbox("notify", "{\"incident_id\":\"x\"}").await.unwrap();

    let pending = store.fetch_undelivered_outbox(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, row.id);

    store.mark_outbox_delivered(&row.id, Utc::now()).await.unwrap();
    assert!(store.fetch_undelivered_outbox(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn api_key_lookup_hides_disabled_keys() {
    let store = setup().await;
    let client = store.create_client("acme").await.unwrap();
    let key = store.create_api_key(&client.id, "agent", "k-secret").await.unwrap();

    assert!(store.find_active_api_key("k-secret").await.unwrap().is_some());
    assert!(store.find_active_api_key("k-wrong").await.unwrap().is_none());

    store.set_api_key_active(&key.id, false).await.unwrap();
    assert!(store.find_active_api_key("k-secret").await.unwrap().is_none());
}
