use chrono::Utc;
use sea_orm::TransactionTrait;
use vigil_common::types::{MetricValue, NotificationKind, ProbeOutcome, Severity, Subject};
use vigil_engine::{classify, transition, GatePolicy, Intent, SubjectSnapshot, ThresholdSpec};
use vigil_storage::store::{incident, outbox};
use vigil_storage::{ClientSettingsRow, Store};

use crate::config::ServerConfig;
use crate::runtime::{EvalIntent, NotifyJob, NotifyRouter};

pub async fn handle_intent(
    store: &Store,
    config: &ServerConfig,
    notify: &NotifyRouter,
    intent: EvalIntent,
) -> anyhow::Result<()> {
    match intent {
        EvalIntent::Metric {
            client_id,
            instance_id,
        } => evaluate_metric(store, config, notify, &client_id, &instance_id).await,
        EvalIntent::Probe(outcome) => evaluate_probe(store, config, notify, &outcome).await,
    }
}

fn gates_for(settings: &ClientSettingsRow, config: &ServerConfig) -> GatePolicy {
    GatePolicy {
        grace_period_seconds: if settings.grace_period_seconds > 0 {
            settings.grace_period_seconds
        } else {
            config.grace_period_seconds_default
        },
        consecutive_failures: settings.consecutive_failures_threshold,
    }
}

async fn evaluate_metric(
    store: &Store,
    config: &ServerConfig,
    notify: &NotifyRouter,
    client_id: &str,
    instance_id: &str,
) -> anyhow::Result<()> {
    let Some(detail) = store.get_instance_detail(instance_id).await? else {
        tracing::debug!(instance_id, "instance vanished before evaluation");
        return Ok(());
    };
    let Some(value) = detail.instance.last_value.clone() else {
        // Nothing observed yet; stays UNKNOWN.
        return Ok(());
    };

    let settings = store.get_settings(client_id).await?;
    let threshold = store.get_threshold(instance_id).await?;
    let severity = threshold
        .as_ref()
        .map(|t| t.severity)
        .unwrap_or(Severity::Warning);
    let spec = threshold.map(|t| ThresholdSpec {
        comparison: t.comparison,
        value: t.value,
        severity: t.severity,
    });

    let verdict = classify(
        spec.as_ref(),
        detail.value_type,
        &value,
        detail.instance.alert_enabled,
        detail.instance.paused,
    );

    let prev = SubjectSnapshot {
        state: detail.instance.state,
        pending_since: detail.instance.pending_since,
        critical_streak: detail.instance.critical_streak,
    };
    let now = Utc::now();
    let decision = transition(&prev, verdict, &gates_for(&settings, config), now);

    if decision.next != prev {
        store
            .update_instance_eval_state(
                instance_id,
                decision.next.state,
                decision.next.pending_since,
                decision.next.critical_streak,
            )
            .await?;
    }

    let Some(intent) = decision.intent else {
        return Ok(());
    };

    let subject = Subject::MetricInstance {
        client_id: client_id.to_string(),
        instance_id: instance_id.to_string(),
    };
    let title = format!("Threshold breach on {}", detail.metric_name);
    let spec_desc = spec
        .as_ref()
        .map(|s| format!("{} {} {}", detail.metric_name, s.comparison, s.value))
        .unwrap_or_else(|| detail.metric_name.clone());

    match intent {
        Intent::OpenIncident => {
            let body = format!(
                "{} on {} — last value {}",
                spec_desc, detail.hostname, render_value(&value)
            );
            open_incident(store, notify, &subject, severity, &title, &body).await
        }
        Intent::ResolveIncident => {
            let body = format!(
                "{} back to normal on {} — last value {}",
                detail.metric_name,
                detail.hostname,
                render_value(&value)
            );
            resolve_incident(store, &subject, &body).await
        }
    }
}

async fn evaluate_probe(
    store: &Store,
    config: &ServerConfig,
    notify: &NotifyRouter,
    outcome: &ProbeOutcome,
) -> anyhow::Result<()> {
    let Some(target) = store.get_http_target(&outcome.target_id).await? else {
        tracing::debug!(target_id = %outcome.target_id, "target vanished before evaluation");
        return Ok(());
    };

    let settings = store.get_settings(&outcome.client_id).await?;
    let verdict = if outcome.ok {
        vigil_engine::Verdict::Normal
    } else {
        vigil_engine::Verdict::Critical
    };

    let prev = SubjectSnapshot {
        state: target.state,
        pending_since: target.pending_since,
        critical_streak: target.critical_streak,
    };
    let decision = transition(&prev, verdict, &gates_for(&settings, config), outcome.ts);

    if decision.next != prev {
        store
            .update_target_eval_state(
                &target.id,
                decision.next.state,
                decision.next.pending_since,
                decision.next.critical_streak,
            )
            .await?;
    }

    let Some(intent) = decision.intent else {
        return Ok(());
    };

    let subject = Subject::HttpTarget {
        client_id: outcome.client_id.clone(),
        target_id: outcome.target_id.clone(),
    };
    let title = format!("HTTP check failed: {}", target.name);

    match intent {
        Intent::OpenIncident => {
            let accepted = target
                .accepted_status_codes
                .iter()
                .map(u16::to_string)
                .collect::<Vec<_>>()
                .join(",");
            let body = format!(
                "{} — {}\nStatus: {} (accepted: {})\nLatency: {} ms\nError: {}",
                target.name,
                target.url,
                outcome.status,
                accepted,
                outcome.latency_ms,
                outcome.error.as_deref().unwrap_or("-"),
            );
            open_incident(store, notify, &subject, Severity::Warning, &title, &body).await
        }
        Intent::ResolveIncident => {
            let body = format!(
                "{} — {}\nOK: {} ({} ms)",
                target.name, target.url, outcome.status, outcome.latency_ms
            );
            resolve_incident(store, &subject, &body).await
        }
    }
}

/// Opens (or re-observes) the incident for a subject and produces the
/// notification intent.
///
/// A first open commits together with its outbox event, so the "incident
/// exists but nobody was told" window cannot survive a crash. The
/// conflict case — something already open for the subject — is idempotent
/// and only emits a reminder, which the notifier's cooldown governs.
async fn open_incident(
    store: &Store,
    notify: &NotifyRouter,
    subject: &Subject,
    severity: Severity,
    title: &str,
    body: &str,
) -> anyhow::Result<()> {
    let now = Utc::now();
    let txn = store.db().begin().await?;
    let (row, created) = incident::open_incident(&txn, subject, severity, title, Some(body), now).await?;

    let job = NotifyJob {
        incident_id: row.id.clone(),
        client_id: row.client_id.clone(),
        kind: if created {
            NotificationKind::Open
        } else {
            NotificationKind::Reminder
        },
        severity,
        title: title.to_string(),
        body: body.to_string(),
    };

    if created {
        outbox::enqueue(&txn, "notify", &serde_json::to_string(&job)?).await?;
        txn.commit().await?;
        tracing::info!(incident_id = %row.id, title, "incident opened");
    } else {
        txn.commit().await?;
        notify.enqueue(job).await;
    }
    Ok(())
}

/// Resolves the open incident for a subject, if any, and emits the
/// resolve notification intent transactionally. Resolving with nothing
/// open is a no-op.
async fn resolve_incident(store: &Store, subject: &Subject, body: &str) -> anyhow::Result<()> {
    let now = Utc::now();
    let txn = store.db().begin().await?;
    let Some(row) = incident::resolve_incident(&txn, subject, now).await? else {
        txn.commit().await?;
        return Ok(());
    };

    let job = NotifyJob {
        incident_id: row.id.clone(),
        client_id: row.client_id.clone(),
        kind: NotificationKind::Resolve,
        severity: row.severity,
        title: row.title.clone(),
        body: body.to_string(),
    };
    outbox::enqueue(&txn, "notify", &serde_json::to_string(&job)?).await?;
    txn.commit().await?;
    tracing::info!(incident_id = %row.id, title = %row.title, "incident resolved");
    Ok(())
}

fn render_value(value: &MetricValue) -> String {
    match value {
        MetricValue::Number(n) => format!("{n:.2}"),
        other => other.to_string(),
    }
}
