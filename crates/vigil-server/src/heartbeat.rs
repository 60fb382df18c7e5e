use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::interval;
use vigil_common::types::{Comparison, MetricValue, Severity, ValueType};
use vigil_storage::Store;

use crate::config::ServerConfig;
use crate::runtime::{EvalIntent, EvalRouter};

/// Name of the synthetic liveness metric. Machine liveness is modeled as
/// an ordinary bool metric with an `eq false -> critical` threshold, so
/// the evaluator, incident manager, and notifier handle it without any
/// special casing, and recovery falls out of the next sweep after an
/// ingest refreshes `last_seen`.
const HEARTBEAT_METRIC: &str = "heartbeat";

pub async fn run(
    store: Arc<Store>,
    eval: EvalRouter,
    config: Arc<ServerConfig>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(tick_secs = config.heartbeat.tick_secs, "heartbeat sweep started");
    let mut tick = interval(std::time::Duration::from_secs(config.heartbeat.tick_secs.max(1)));
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                if let Err(e) = sweep(&store, &eval, &config).await {
                    tracing::error!(error = %e, "heartbeat sweep failed");
                }
            }
        }
    }
    tracing::info!("heartbeat sweep stopped");
}

async fn sweep(store: &Store, eval: &EvalRouter, config: &ServerConfig) -> anyhow::Result<()> {
    let now = Utc::now();
    let machines = store.list_active_machines().await?;
    if machines.is_empty() {
        return Ok(());
    }

    let thresholds: HashMap<String, i64> = store
        .list_all_settings()
        .await?
        .into_iter()
        .map(|s| (s.client_id.clone(), s.heartbeat_threshold_minutes))
        .collect();

    for machine in machines {
        let minutes = thresholds
            .get(&machine.client_id)
            .copied()
            .filter(|m| *m > 0)
            .unwrap_or(config.heartbeat_threshold_minutes_default);
        let fresh = machine
            .last_seen
            .map(|seen| now - seen < Duration::minutes(minutes))
            .unwrap_or(false);

        let definition = store
            .ensure_definition(&machine.client_id, HEARTBEAT_METRIC, ValueType::Bool, None)
            .await?;
        let instance = store.ensure_instance(&machine.id, &definition.id).await?;

        if store.get_threshold(&instance.id).await?.is_none() {
            store
                .upsert_default_threshold(
                    &instance.id,
                    Comparison::Eq,
                    &MetricValue::Bool(false),
                    Severity::Critical,
                )
                .await?;
        }

        let value = MetricValue::Bool(fresh);
        store.append_sample(&instance.id, now, None, &value).await?;
        store.set_instance_last_value(&instance.id, &value, now).await?;

        if !fresh {
            tracing::debug!(
                machine = %machine.hostname,
                last_seen = ?machine.last_seen,
                threshold_minutes = minutes,
                "machine missed its heartbeat window"
            );
        }

        eval.dispatch(EvalIntent::Metric {
            client_id: machine.client_id.clone(),
            instance_id: instance.id.clone(),
        })
        .await;
    }
    Ok(())
}
