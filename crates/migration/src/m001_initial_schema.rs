use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m001_initial_schema"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Tables are created in dependency order, rooted at clients.
        manager.get_connection().execute_unprepared(UP_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.get_connection().execute_unprepared(DOWN_SQL).await?;
        Ok(())
    }
}

const UP_SQL: &str = "
PRAGMA journal_mode=WAL;

CREATE TABLE IF NOT EXISTS clients (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS api_keys (
    id TEXT PRIMARY KEY NOT NULL,
    client_id TEXT NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
    key TEXT NOT NULL,
    name TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    machine_id TEXT,
    last_used_at TEXT,
    created_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS uq_api_keys_key ON api_keys(key);
CREATE INDEX IF NOT EXISTS idx_api_keys_client ON api_keys(client_id);

CREATE TABLE IF NOT EXISTS machines (
    id TEXT PRIMARY KEY NOT NULL,
    client_id TEXT NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
    hostname TEXT NOT NULL,
    os TEXT,
    fingerprint TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    registered_at TEXT NOT NULL,
    last_seen TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS uq_machines_client_fingerprint
    ON machines(client_id, fingerprint);
CREATE INDEX IF NOT EXISTS idx_machines_last_seen ON machines(last_seen DESC);

CREATE TABLE IF NOT EXISTS metric_definitions (
    id TEXT PRIMARY KEY NOT NULL,
    client_id TEXT NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    value_type TEXT NOT NULL,
    unit TEXT,
    suggested INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS uq_metric_definitions_client_name
    ON metric_definitions(client_id, name);

CREATE TABLE IF NOT EXISTS metric_instances (
    id TEXT PRIMARY KEY NOT NULL,
    machine_id TEXT NOT NULL REFERENCES machines(id) ON DELETE CASCADE,
    definition_id TEXT NOT NULL REFERENCES metric_definitions(id) ON DELETE CASCADE,
    alert_enabled INTEGER NOT NULL DEFAULT 1,
    paused INTEGER NOT NULL DEFAULT 0,
    state TEXT NOT NULL DEFAULT 'UNKNOWN',
    pending_since TEXT,
    critical_streak INTEGER NOT NULL DEFAULT 0,
    last_value_num REAL,
    last_value_bool INTEGER,
    last_value_str TEXT,
    last_value_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS uq_metric_instances_machine_definition
    ON metric_instances(machine_id, definition_id);

CREATE TABLE IF NOT EXISTS samples (
    id TEXT PRIMARY KEY NOT NULL,
    metric_instance_id TEXT NOT NULL REFERENCES metric_instances(id) ON DELETE CASCADE,
    ts TEXT NOT NULL,
    sent_at TEXT,
    value_num REAL,
    value_bool INTEGER,
    value_str TEXT
);
CREATE INDEX IF NOT EXISTS idx_samples_instance_ts ON samples(metric_instance_id, ts DESC);

CREATE TABLE IF NOT EXISTS thresholds (
    id TEXT PRIMARY KEY NOT NULL,
    metric_instance_id TEXT NOT NULL REFERENCES metric_instances(id) ON DELETE CASCADE,
    name TEXT NOT NULL DEFAULT 'default',
    comparison TEXT NOT NULL,
    value_num REAL,
    value_bool INTEGER,
    value_str TEXT,
    severity TEXT NOT NULL DEFAULT 'warning',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK (
        (value_num IS NOT NULL AND value_bool IS NULL AND value_str IS NULL)
     OR (value_num IS NULL AND value_bool IS NOT NULL AND value_str IS NULL)
     OR (value_num IS NULL AND value_bool IS NULL AND value_str IS NOT NULL)
    )
);
CREATE UNIQUE INDEX IF NOT EXISTS uq_thresholds_instance_name
    ON thresholds(metric_instance_id, name);

CREATE TABLE IF NOT EXISTS http_targets (
    id TEXT PRIMARY KEY NOT NULL,
    client_id TEXT NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    url TEXT NOT NULL,
    method TEXT NOT NULL DEFAULT 'GET',
    accepted_status_codes TEXT NOT NULL DEFAULT '[200]',
    timeout_ms INTEGER NOT NULL DEFAULT 10000,
    check_interval_s INTEGER NOT NULL DEFAULT 60,
    is_active INTEGER NOT NULL DEFAULT 1,
    state TEXT NOT NULL DEFAULT 'UNKNOWN',
    pending_since TEXT,
    critical_streak INTEGER NOT NULL DEFAULT 0,
    last_check_at TEXT,
    last_status INTEGER,
    last_latency_ms INTEGER,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS uq_http_targets_client_url
    ON http_targets(client_id, url);
CREATE INDEX IF NOT EXISTS idx_http_targets_active ON http_targets(is_active);

CREATE TABLE IF NOT EXISTS incidents (
    id TEXT PRIMARY KEY NOT NULL,
    client_id TEXT NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
    http_target_id TEXT REFERENCES http_targets(id) ON DELETE CASCADE,
    metric_instance_id TEXT REFERENCES metric_instances(id) ON DELETE CASCADE,
    status TEXT NOT NULL DEFAULT 'OPEN',
    severity TEXT NOT NULL DEFAULT 'warning',
    title TEXT NOT NULL,
    description TEXT,
    opened_at TEXT NOT NULL,
    resolved_at TEXT,
    last_observed_at TEXT NOT NULL,
    last_notified_at TEXT,
    CHECK (
        (http_target_id IS NOT NULL AND metric_instance_id IS NULL)
     OR (http_target_id IS NULL AND metric_instance_id IS NOT NULL)
    )
);
CREATE UNIQUE INDEX IF NOT EXISTS ux_incidents_open_by_target
    ON incidents(client_id, http_target_id) WHERE status = 'OPEN' AND http_target_id IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS ux_incidents_open_by_instance
    ON incidents(client_id, metric_instance_id) WHERE status = 'OPEN' AND metric_instance_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_incidents_client_status ON incidents(client_id, status);

CREATE TABLE IF NOT EXISTS ingest_events (
    id TEXT PRIMARY KEY NOT NULL,
    client_id TEXT NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
    ingest_id TEXT NOT NULL,
    machine_id TEXT NOT NULL,
    received_at TEXT NOT NULL,
    sent_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS uq_ingest_events_client_ingest
    ON ingest_events(client_id, ingest_id);

CREATE TABLE IF NOT EXISTS notification_logs (
    id TEXT PRIMARY KEY NOT NULL,
    client_id TEXT NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
    incident_id TEXT,
    alert_id TEXT,
    provider TEXT NOT NULL,
    recipient TEXT NOT NULL,
    kind TEXT NOT NULL DEFAULT 'open',
    status TEXT NOT NULL DEFAULT 'pending',
    message TEXT,
    error TEXT,
    sent_at TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_notification_logs_incident
    ON notification_logs(incident_id, status, sent_at);
CREATE INDEX IF NOT EXISTS idx_notification_logs_client ON notification_logs(client_id);

CREATE TABLE IF NOT EXISTS client_settings (
    client_id TEXT PRIMARY KEY NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
    notification_email TEXT,
    slack_webhook_url TEXT,
    slack_channel_name TEXT,
    grace_period_seconds INTEGER NOT NULL DEFAULT 0,
    reminder_notification_seconds INTEGER NOT NULL DEFAULT 0,
    alert_grouping_enabled INTEGER NOT NULL DEFAULT 0,
    notify_on_resolve INTEGER NOT NULL DEFAULT 1,
    heartbeat_threshold_minutes INTEGER NOT NULL DEFAULT 5,
    consecutive_failures_threshold INTEGER NOT NULL DEFAULT 1,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS outbox_events (
    id TEXT PRIMARY KEY NOT NULL,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL,
    delivered_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_outbox_undelivered
    ON outbox_events(created_at) WHERE delivered_at IS NULL;
";

const DOWN_SQL: &str = "
DROP TABLE IF EXISTS outbox_events;
DROP TABLE IF EXISTS client_settings;
DROP TABLE IF EXISTS notification_logs;
DROP TABLE IF EXISTS ingest_events;
DROP TABLE IF EXISTS incidents;
DROP TABLE IF EXISTS http_targets;
DROP TABLE IF EXISTS thresholds;
DROP TABLE IF EXISTS samples;
DROP TABLE IF EXISTS metric_instances;
DROP TABLE IF EXISTS metric_definitions;
DROP TABLE IF EXISTS machines;
DROP TABLE IF EXISTS api_keys;
DROP TABLE IF EXISTS clients;
";
