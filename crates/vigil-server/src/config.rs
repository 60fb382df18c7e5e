use serde::Deserialize;

/// Process configuration. Loaded once from TOML at boot, then overlaid
/// with the environment variables named in the deployment contract
/// (`DATABASE_URL`, `DEFAULT_ALERT_REMINDER_MINUTES`, ...). Immutable
/// afterwards; every component holds the same `Arc` snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Accepted for deployment compatibility; the queue backend is the
    /// in-process worker runtime, so nothing reads it.
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default = "default_reminder_minutes")]
    pub default_alert_reminder_minutes: i64,
    #[serde(default)]
    pub grace_period_seconds_default: i64,
    #[serde(default = "default_heartbeat_minutes")]
    pub heartbeat_threshold_minutes_default: i64,
    #[serde(default = "default_sample_retention_keep")]
    pub sample_retention_keep: u64,

    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub prober: ProberConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub reminders: RemindersConfig,
    #[serde(default)]
    pub outbox: OutboxConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub smtp: Option<SmtpSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// `sent_at` farther in the future than this is rejected (422).
    #[serde(default = "default_ingest_future_max")]
    pub future_max_seconds: i64,
    /// Batches older than this are acknowledged but not stored.
    #[serde(default = "default_ingest_late_max")]
    pub late_max_seconds: i64,
    /// Seconds an API-key lookup may be served from the in-process cache.
    #[serde(default = "default_api_key_cache_ttl")]
    pub api_key_cache_ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProberConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_prober_tick")]
    pub tick_secs: u64,
    /// `HTTP_PROBER_CONCURRENCY`: probes in flight across all tenants.
    #[serde(default = "default_prober_concurrency")]
    pub concurrency: usize,
    /// Probes in flight for a single tenant, so one client's slow
    /// endpoints cannot saturate the pool.
    #[serde(default = "default_prober_per_client")]
    pub per_client_concurrency: usize,
    #[serde(default = "default_prober_redirects")]
    pub max_redirects: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default = "default_eval_sweep")]
    pub sweep_secs: u64,
    #[serde(default = "default_eval_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_heartbeat_tick")]
    pub tick_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemindersConfig {
    #[serde(default = "default_reminders_tick")]
    pub tick_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutboxConfig {
    #[serde(default = "default_outbox_tick")]
    pub tick_secs: u64,
    #[serde(default = "default_outbox_batch")]
    pub batch: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    #[serde(default = "default_notify_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_secs: u64,
    #[serde(default = "default_notify_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// `SLACK_WEBHOOK`: global fallback webhook.
    #[serde(default)]
    pub slack_webhook: Option<String>,
    /// `STUB_SLACK`: short-circuit Slack delivery with success.
    #[serde(default)]
    pub stub_slack: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpSettings {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub from: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            future_max_seconds: default_ingest_future_max(),
            late_max_seconds: default_ingest_late_max(),
            api_key_cache_ttl_seconds: default_api_key_cache_ttl(),
        }
    }
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_secs: default_prober_tick(),
            concurrency: default_prober_concurrency(),
            per_client_concurrency: default_prober_per_client(),
            max_redirects: default_prober_redirects(),
        }
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            sweep_secs: default_eval_sweep(),
            workers: default_eval_workers(),
            queue_depth: default_queue_depth(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_secs: default_heartbeat_tick(),
        }
    }
}

impl Default for RemindersConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_reminders_tick(),
        }
    }
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_outbox_tick(),
            batch: default_outbox_batch(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            workers: default_notify_workers(),
            queue_depth: default_queue_depth(),
            provider_timeout_secs: default_provider_timeout(),
            max_attempts: default_notify_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            slack_webhook: None,
            stub_slack: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty config deserializes from defaults")
    }
}

fn default_http_port() -> u16 {
    8080
}

fn default_database_url() -> String {
    "sqlite://data/vigil.db?mode=rwc".to_string()
}

fn default_reminder_minutes() -> i64 {
    30
}

fn default_heartbeat_minutes() -> i64 {
    5
}

fn default_sample_retention_keep() -> u64 {
    50
}

fn default_ingest_future_max() -> i64 {
    120
}

fn default_ingest_late_max() -> i64 {
    86400
}

fn default_api_key_cache_ttl() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_prober_tick() -> u64 {
    60
}

fn default_prober_concurrency() -> usize {
    10
}

fn default_prober_per_client() -> usize {
    4
}

fn default_prober_redirects() -> usize {
    3
}

fn default_eval_sweep() -> u64 {
    60
}

fn default_eval_workers() -> usize {
    4
}

fn default_queue_depth() -> usize {
    1024
}

fn default_heartbeat_tick() -> u64 {
    120
}

fn default_reminders_tick() -> u64 {
    60
}

fn default_outbox_tick() -> u64 {
    5
}

fn default_outbox_batch() -> usize {
    100
}

fn default_notify_workers() -> usize {
    2
}

fn default_provider_timeout() -> u64 {
    5
}

fn default_notify_attempts() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_smtp_port() -> u16 {
    587
}

impl ServerConfig {
    /// Loads the TOML file when present (a missing file means defaults),
    /// then applies environment overrides. Unreadable or malformed
    /// configuration prevents startup.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let mut config: Self = match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(e.into()),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("DATABASE_URL") {
            self.database_url = v;
        }
        if let Ok(v) = std::env::var("REDIS_URL") {
            self.redis_url = Some(v);
        }
        if let Ok(v) = std::env::var("DEFAULT_ALERT_REMINDER_MINUTES") {
            if let Ok(n) = v.parse() {
                self.default_alert_reminder_minutes = n;
            }
        }
        if let Ok(v) = std::env::var("GRACE_PERIOD_SECONDS_DEFAULT") {
            if let Ok(n) = v.parse() {
                self.grace_period_seconds_default = n;
            }
        }
        if let Ok(v) = std::env::var("HEARTBEAT_THRESHOLD_MINUTES_DEFAULT") {
            if let Ok(n) = v.parse() {
                self.heartbeat_threshold_minutes_default = n;
            }
        }
        if let Ok(v) = std::env::var("HTTP_PROBER_CONCURRENCY") {
            if let Ok(n) = v.parse() {
                self.prober.concurrency = n;
            }
        }
        if let Ok(v) = std::env::var("SLACK_WEBHOOK") {
            if !v.is_empty() {
                self.notify.slack_webhook = Some(v);
            }
        }
        if let Ok(v) = std::env::var("STUB_SLACK") {
            self.notify.stub_slack = matches!(v.as_str(), "1" | "true" | "yes");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let c = ServerConfig::default();
        assert_eq!(c.http_port, 8080);
        assert_eq!(c.default_alert_reminder_minutes, 30);
        assert_eq!(c.grace_period_seconds_default, 0);
        assert_eq!(c.prober.concurrency, 10);
        assert_eq!(c.notify.max_attempts, 5);
        assert!(c.smtp.is_none());
    }

    #[test]
    fn partial_toml_overrides_defaults() {
        let c: ServerConfig = toml::from_str(
            "http_port = 9000\n\n[prober]\ntick_secs = 10\n\n[notify]\nstub_slack = true\n",
        )
        .unwrap();
        assert_eq!(c.http_port, 9000);
        assert_eq!(c.prober.tick_secs, 10);
        assert_eq!(c.prober.concurrency, 10);
        assert!(c.notify.stub_slack);
    }
}
