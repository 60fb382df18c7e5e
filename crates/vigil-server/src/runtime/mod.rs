use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use vigil_common::types::{NotificationKind, ProbeOutcome, Severity, Subject};
use vigil_notify::Notifier;
use vigil_storage::Store;

use crate::config::ServerConfig;

pub mod evaluate;
pub mod notify;

/// Builds the notifier from config and spawns both worker pools.
///
/// Returned handles are joined (with a bounded deadline) at shutdown.
pub fn spawn(
    store: Arc<Store>,
    config: Arc<ServerConfig>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<(EvalRouter, NotifyRouter, Vec<JoinHandle<()>>)> {
    let notifier = Arc::new(vigil_notify::Notifier::new(
        store.clone(),
        vigil_notify::NotifierConfig {
            default_reminder_minutes: config.default_alert_reminder_minutes,
            global_slack_webhook: config.notify.slack_webhook.clone(),
            stub_slack: config.notify.stub_slack,
            provider_timeout_secs: config.notify.provider_timeout_secs,
            max_attempts: config.notify.max_attempts,
            backoff_base_ms: config.notify.backoff_base_ms,
            smtp: config.smtp.as_ref().map(|s| vigil_notify::SmtpConfig {
                host: s.host.clone(),
                port: s.port,
                username: s.username.clone(),
                password: s.password.clone(),
                from: s.from.clone(),
            }),
        },
    )?);

    let (notify_router, mut handles) =
        NotifyRouter::spawn(notifier, store.clone(), config.clone(), shutdown.clone());
    let (eval_router, eval_handles) =
        EvalRouter::spawn(store, config, notify_router.clone(), shutdown);
    handles.extend(eval_handles);
    Ok((eval_router, notify_router, handles))
}

/// One unit of evaluation work. Metric intents are emitted by ingest, the
/// heartbeat task, and the periodic sweep; probe intents by the prober.
#[derive(Debug, Clone)]
pub enum EvalIntent {
    Metric {
        client_id: String,
        instance_id: String,
    },
    Probe(ProbeOutcome),
}

impl EvalIntent {
    pub fn subject(&self) -> Subject {
        match self {
            EvalIntent::Metric {
                client_id,
                instance_id,
            } => Subject::MetricInstance {
                client_id: client_id.clone(),
                instance_id: instance_id.clone(),
            },
            EvalIntent::Probe(outcome) => Subject::HttpTarget {
                client_id: outcome.client_id.clone(),
                target_id: outcome.target_id.clone(),
            },
        }
    }
}

/// One notification to deliver. Also the outbox payload format, so open
/// and resolve intents survive a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyJob {
    pub incident_id: String,
    pub client_id: String,
    pub kind: NotificationKind,
    pub severity: Severity,
    pub title: String,
    pub body: String,
}

fn partition_of(key: &str, partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % partitions.max(1)
}

/// Fans evaluation intents out to a fixed pool of workers, partitioned by
/// subject hash. All intents for one subject land on the same worker, so
/// incident state transitions are serialized per subject without locks.
///
/// Intents lost in a shutdown are regenerated by the next evaluation
/// sweep; nothing here needs to be durable.
#[derive(Clone)]
pub struct EvalRouter {
    senders: Arc<Vec<mpsc::Sender<EvalIntent>>>,
}

impl EvalRouter {
    pub fn spawn(
        store: Arc<Store>,
        config: Arc<ServerConfig>,
        notify: NotifyRouter,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let workers = config.evaluation.workers.max(1);
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for worker_id in 0..workers {
            let (tx, mut rx) = mpsc::channel::<EvalIntent>(config.evaluation.queue_depth);
            senders.push(tx);

            let store = store.clone();
            let config = config.clone();
            let notify = notify.clone();
            let mut shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        intent = rx.recv() => {
                            let Some(intent) = intent else { break };
                            if let Err(e) =
                                evaluate::handle_intent(&store, &config, &notify, intent).await
                            {
                                tracing::error!(worker_id, error = %e, "evaluation failed");
                            }
                        }
                    }
                }
                tracing::debug!(worker_id, "evaluate worker stopped");
            }));
        }

        (
            Self {
                senders: Arc::new(senders),
            },
            handles,
        )
    }

    pub async fn dispatch(&self, intent: EvalIntent) {
        let key = intent.subject().partition_key();
        let idx = partition_of(&key, self.senders.len());
        if self.senders[idx].send(intent).await.is_err() {
            tracing::warn!("evaluate queue closed, dropping intent");
        }
    }
}

/// Same partitioning scheme for notification jobs, keyed by incident, so
/// at most one send is in flight per subject. A job for a subject that is
/// already queued is coalesced away; the queued send will consult the log
/// and settle the cooldown.
#[derive(Clone)]
pub struct NotifyRouter {
    senders: Arc<Vec<mpsc::Sender<NotifyJob>>>,
    queued: Arc<Mutex<HashSet<(String, NotificationKind)>>>,
}

impl NotifyRouter {
    pub fn spawn(
        notifier: Arc<Notifier>,
        store: Arc<Store>,
        config: Arc<ServerConfig>,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let workers = config.notify.workers.max(1);
        let queued: Arc<Mutex<HashSet<(String, NotificationKind)>>> =
            Arc::new(Mutex::new(HashSet::new()));
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for worker_id in 0..workers {
            let (tx, mut rx) = mpsc::channel::<NotifyJob>(config.notify.queue_depth);
            senders.push(tx);

            let notifier = notifier.clone();
            let store = store.clone();
            let queued = queued.clone();
            let mut shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        job = rx.recv() => {
                            let Some(job) = job else { break };
                            queued
                                .lock()
                                .unwrap_or_else(|poisoned| poisoned.into_inner())
                                .remove(&(job.incident_id.clone(), job.kind));
                            if let Err(e) = notify::deliver(&notifier, &store, &job).await {
                                tracing::error!(worker_id, error = %e, "notification job failed");
                            }
                        }
                    }
                }
                tracing::debug!(worker_id, "notify worker stopped");
            }));
        }

        (
            Self {
                senders: Arc::new(senders),
                queued,
            },
            handles,
        )
    }

    pub async fn enqueue(&self, job: NotifyJob) {
        {
            let mut queued = self
                .queued
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if !queued.insert((job.incident_id.clone(), job.kind)) {
                tracing::debug!(
                    incident_id = %job.incident_id,
                    kind = %job.kind,
                    "duplicate notify intent coalesced"
                );
                return;
            }
        }
        let idx = partition_of(&job.incident_id, self.senders.len());
        if self.senders[idx].send(job).await.is_err() {
            tracing::warn!("notify queue closed, dropping job");
        }
    }
}
