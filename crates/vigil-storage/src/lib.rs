//! Relational storage layer for the vigil monitoring backend.
//!
//! [`Store`] wraps a SeaORM SQLite connection (WAL mode, migrations run at
//! connect time) and exposes one store module per aggregate: clients and
//! their settings, API keys, machines, metric definitions/instances,
//! samples, thresholds, HTTP targets, incidents, ingest events, the
//! notification log, and the outbox.
//!
//! Invariants owned here:
//! - at most one OPEN incident per subject, enforced by partial unique
//!   indexes (the open path inserts and treats the index violation as
//!   "already open" instead of check-then-insert),
//! - ingest idempotence via the `(client_id, ingest_id)` unique index,
//!   with the whole batch applied in one transaction,
//! - machine identity via `(client_id, fingerprint)`.

pub mod entities;
pub mod error;
pub mod store;

#[cfg(test)]
mod tests;

pub use error::{Result, StorageError};
pub use store::Store;
pub use store::{
    AlertRow, ApiKeyRow, ClientRow, ClientSettingsRow, HttpTargetRow, HttpTargetUpdate,
    IncidentRow, IngestBatchOutcome, InstanceDetail, MachineRow, MetricDefinitionRow,
    MetricInstanceRow, NewHttpTarget, NotificationLogFilter, NotificationLogRow, OutboxRow,
    SampleRow, SettingsUpdate, ThresholdRow,
};
