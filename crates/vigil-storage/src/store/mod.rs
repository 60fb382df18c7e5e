use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use std::str::FromStr;
use vigil_common::types::MetricValue;

use crate::error::{Result, StorageError};

pub mod api_key;
pub mod client;
pub mod http_target;
pub mod incident;
pub mod ingest;
pub mod machine;
pub mod metric;
pub mod notification;
pub mod outbox;
pub mod sample;
pub mod threshold;

pub use api_key::ApiKeyRow;
pub use client::{ClientRow, ClientSettingsRow, SettingsUpdate};
pub use http_target::{HttpTargetRow, HttpTargetUpdate, NewHttpTarget};
pub use incident::IncidentRow;
pub use ingest::IngestBatchOutcome;
pub use machine::MachineRow;
pub use metric::{AlertRow, InstanceDetail, MetricDefinitionRow, MetricInstanceRow};
pub use notification::{NotificationLogFilter, NotificationLogRow};
pub use outbox::OutboxRow;
pub use sample::SampleRow;
pub use threshold::ThresholdRow;

/// Unified access layer over the management database.
///
/// All methods are `async fn` backed by SeaORM + SQLite. Connecting runs
/// pending migrations, so a fresh `DATABASE_URL` yields a ready schema.
pub struct Store {
    db: DatabaseConnection,
}

impl Store {
    /// Connects to `database_url` (e.g. `sqlite://data/vigil.db?mode=rwc`
    /// or `sqlite::memory:`), enables WAL, and applies migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let mut options = ConnectOptions::new(database_url.to_owned());
        if database_url.contains(":memory:") || database_url.contains("mode=memory") {
            // A pooled in-memory database is one database per connection;
            // pin the pool so every query sees the same schema.
            options.max_connections(1);
        }
        let db = Database::connect(options).await?;
        db.execute_unprepared("PRAGMA journal_mode=WAL;").await?;
        db.execute_unprepared("PRAGMA foreign_keys=ON;").await?;
        Migrator::up(&db, None).await?;
        tracing::info!(url = %redact_url(database_url), "Store initialized");
        Ok(Self { db })
    }

    /// Underlying connection, for callers that need to span a transaction
    /// across aggregates (incident + outbox).
    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }
}

fn redact_url(url: &str) -> String {
    match url.split_once('@') {
        Some((head, tail)) => match head.rsplit_once("://") {
            Some((scheme, _)) => format!("{scheme}://***@{tail}"),
            None => format!("***@{tail}"),
        },
        None => url.to_string(),
    }
}

// Shared column mapping for the (value_num, value_bool, value_str) triple
// used by samples, thresholds, and metric instances.

pub(crate) fn value_to_columns(
    value: &MetricValue,
) -> (Option<f64>, Option<bool>, Option<String>) {
    match value {
        MetricValue::Number(n) => (Some(*n), None, None),
        MetricValue::Bool(b) => (None, Some(*b), None),
        MetricValue::Text(s) => (None, None, Some(s.clone())),
    }
}

pub(crate) fn value_from_columns(
    num: Option<f64>,
    boolean: Option<bool>,
    text: Option<String>,
) -> Option<MetricValue> {
    if let Some(n) = num {
        Some(MetricValue::Number(n))
    } else if let Some(b) = boolean {
        Some(MetricValue::Bool(b))
    } else {
        text.map(MetricValue::Text)
    }
}

/// Parses a stored enum column, surfacing bad data instead of defaulting.
pub(crate) fn parse_column<T>(column: &'static str, raw: &str) -> Result<T>
where
    T: FromStr,
{
    raw.parse::<T>().map_err(|_| StorageError::InvalidColumn {
        column,
        value: raw.to_string(),
    })
}
