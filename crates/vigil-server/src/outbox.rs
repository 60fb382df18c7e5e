use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::interval;
use vigil_storage::Store;

use crate::config::ServerConfig;
use crate::runtime::{NotifyJob, NotifyRouter};

/// Drains the transactional outbox into the notify queue.
///
/// Events are marked delivered only after the hand-off, so a crash in
/// between replays them on the next pass (at-least-once); the notifier's
/// cooldown and idempotent log inserts absorb the duplicates.
pub async fn run(
    store: Arc<Store>,
    notify: NotifyRouter,
    config: Arc<ServerConfig>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(tick_secs = config.outbox.tick_secs, "outbox deliverer started");
    let mut tick = interval(std::time::Duration::from_secs(config.outbox.tick_secs.max(1)));
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                if let Err(e) = deliver_batch(&store, &notify, config.outbox.batch).await {
                    tracing::error!(error = %e, "outbox delivery failed");
                }
            }
        }
    }
    tracing::info!("outbox deliverer stopped");
}

async fn deliver_batch(store: &Store, notify: &NotifyRouter, batch: usize) -> anyhow::Result<()> {
    let events = store.fetch_undelivered_outbox(batch).await?;
    for event in events {
        match event.kind.as_str() {
            "notify" => match serde_json::from_str::<NotifyJob>(&event.payload) {
                Ok(job) => notify.enqueue(job).await,
                Err(e) => {
                    // A payload that never parses would wedge the queue;
                    // log it and move on.
                    tracing::error!(
                        outbox_id = %event.id,
                        error = %e,
                        "unreadable outbox payload, discarding"
                    );
                }
            },
            other => {
                tracing::warn!(outbox_id = %event.id, kind = other, "unknown outbox kind");
            }
        }
        store.mark_outbox_delivered(&event.id, Utc::now()).await?;
    }
    Ok(())
}
