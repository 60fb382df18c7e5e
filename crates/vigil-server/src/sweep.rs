use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::interval;
use vigil_storage::Store;

use crate::config::ServerConfig;
use crate::runtime::{EvalIntent, EvalRouter, NotifyJob, NotifyRouter};

/// Periodic re-evaluation of every alert-enabled metric instance.
///
/// Ingest already evaluates on arrival; the sweep covers what events
/// cannot: intents lost in a shutdown, operator edits between batches,
/// and grace windows that expire without new samples.
pub async fn evaluation_sweep(
    store: Arc<Store>,
    eval: EvalRouter,
    config: Arc<ServerConfig>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(tick_secs = config.evaluation.sweep_secs, "evaluation sweep started");
    let mut tick = interval(std::time::Duration::from_secs(config.evaluation.sweep_secs.max(1)));
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                match store.list_sweepable_instances().await {
                    Ok(pairs) => {
                        for (instance_id, client_id) in pairs {
                            eval.dispatch(EvalIntent::Metric { client_id, instance_id }).await;
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "evaluation sweep query failed"),
                }
            }
        }
    }
    tracing::info!("evaluation sweep stopped");
}

/// Periodic reminder intents for incidents that stay open. The notifier's
/// cooldown decides whether each one actually sends, so this can run
/// often without spamming anyone.
pub async fn reminder_sweep(
    store: Arc<Store>,
    notify: NotifyRouter,
    config: Arc<ServerConfig>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(tick_secs = config.reminders.tick_secs, "reminder sweep started");
    let mut tick = interval(std::time::Duration::from_secs(config.reminders.tick_secs.max(1)));
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                match store.list_open_incidents().await {
                    Ok(incidents) => {
                        for incident in incidents {
                            if !incident.severity.is_notifiable() {
                                continue;
                            }
                            notify
                                .enqueue(NotifyJob {
                                    incident_id: incident.id.clone(),
                                    client_id: incident.client_id.clone(),
                                    kind: vigil_common::types::NotificationKind::Reminder,
                                    severity: incident.severity,
                                    title: incident.title.clone(),
                                    body: incident
                                        .description
                                        .clone()
                                        .unwrap_or_else(|| incident.title.clone()),
                                })
                                .await;
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "reminder sweep query failed"),
                }
            }
        }
    }
    tracing::info!("reminder sweep stopped");
}

/// Trims per-instance sample history down to the configured window. The
/// core retains only enough history for evaluation and UI display.
pub async fn retention_sweep(
    store: Arc<Store>,
    config: Arc<ServerConfig>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = interval(std::time::Duration::from_secs(300));
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                match store.trim_samples(config.sample_retention_keep).await {
                    Ok(removed) if removed > 0 => {
                        tracing::info!(removed, "trimmed sample history")
                    }
                    Err(e) => tracing::error!(error = %e, "sample retention failed"),
                    _ => {}
                }
            }
        }
    }
}
