use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::time::interval;
use vigil_common::types::ProbeOutcome;
use vigil_storage::{HttpTargetRow, Store};

use crate::config::ServerConfig;
use crate::runtime::{EvalIntent, EvalRouter};

/// Probe client: bounded redirects, no global timeout (each request
/// carries the target's own `timeout_ms`).
pub fn build_probe_client(max_redirects: usize) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::limited(max_redirects))
        .user_agent(concat!("vigil-prober/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Issues one probe. Transport-level failures (DNS, TCP, TLS, timeout)
/// normalize to `status = 0`; `ok` is membership in the target's accepted
/// status set.
pub async fn probe_target(client: &reqwest::Client, target: &HttpTargetRow) -> ProbeOutcome {
    let method = reqwest::Method::from_bytes(target.method.as_bytes())
        .unwrap_or(reqwest::Method::GET);
    let timeout = Duration::from_millis(target.timeout_ms.max(1) as u64);

    let started = Instant::now();
    let result = client
        .request(method, &target.url)
        .timeout(timeout)
        .send()
        .await;
    let latency_ms = started.elapsed().as_millis() as i64;

    let (status, error) = match result {
        Ok(resp) => (resp.status().as_u16(), None),
        Err(e) => (0u16, Some(e.to_string())),
    };
    let ok = target.accepted_status_codes.contains(&status);

    ProbeOutcome {
        client_id: target.client_id.clone(),
        target_id: target.id.clone(),
        ok,
        status,
        latency_ms,
        ts: Utc::now(),
        error,
    }
}

/// Periodic prober: each tick selects the due active targets and fans
/// them out under a global cap plus a per-client cap, so a single tenant
/// with many slow endpoints cannot monopolize the pool. Slow probes run
/// in their own tasks and never block the tick loop.
pub struct Prober {
    store: Arc<Store>,
    eval: EvalRouter,
    config: Arc<ServerConfig>,
    client: reqwest::Client,
    global: Arc<Semaphore>,
    per_client: std::sync::Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Prober {
    pub fn new(
        store: Arc<Store>,
        eval: EvalRouter,
        config: Arc<ServerConfig>,
    ) -> anyhow::Result<Self> {
        let client = build_probe_client(config.prober.max_redirects)?;
        let global = Arc::new(Semaphore::new(config.prober.concurrency.max(1)));
        Ok(Self {
            store,
            eval,
            config,
            client,
            global,
            per_client: std::sync::Mutex::new(HashMap::new()),
        })
    }

    fn client_permit(&self, client_id: &str) -> Arc<Semaphore> {
        let mut map = self
            .per_client
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        map.entry(client_id.to_string())
            .or_insert_with(|| {
                Arc::new(Semaphore::new(self.config.prober.per_client_concurrency.max(1)))
            })
            .clone()
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            tick_secs = self.config.prober.tick_secs,
            concurrency = self.config.prober.concurrency,
            per_client = self.config.prober.per_client_concurrency,
            "HTTP prober started"
        );
        let mut tick = interval(Duration::from_secs(self.config.prober.tick_secs.max(1)));
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tick.tick() => {
                    if let Err(e) = self.probe_due().await {
                        tracing::error!(error = %e, "probe cycle failed");
                    }
                }
            }
        }
        tracing::info!("HTTP prober stopped");
    }

    async fn probe_due(&self) -> anyhow::Result<()> {
        let now = Utc::now();
        let due = self.store.due_http_targets(now).await?;
        if due.is_empty() {
            return Ok(());
        }
        tracing::debug!(count = due.len(), "probing due targets");

        for target in due {
            let global = self.global.clone();
            let tenant = self.client_permit(&target.client_id);

            let store = self.store.clone();
            let eval = self.eval.clone();
            let client = self.client.clone();
            // Permits are taken inside the task: a tenant at its cap
            // queues its own probes without stalling the tick loop or
            // other tenants.
            tokio::spawn(async move {
                let Ok(_global) = global.acquire_owned().await else { return };
                let Ok(_tenant) = tenant.acquire_owned().await else { return };
                let outcome = probe_target(&client, &target).await;

                if let Err(e) = store
                    .record_probe_result(&target.id, outcome.ts, outcome.status, outcome.latency_ms)
                    .await
                {
                    tracing::error!(target_id = %target.id, error = %e, "failed to record probe");
                }

                tracing::debug!(
                    target = %target.name,
                    status = outcome.status,
                    latency_ms = outcome.latency_ms,
                    ok = outcome.ok,
                    "probe completed"
                );
                eval.dispatch(EvalIntent::Probe(outcome)).await;
            });
        }
        Ok(())
    }
}
