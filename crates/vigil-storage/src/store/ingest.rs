use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ConnectionTrait, TransactionTrait};
use vigil_common::types::IngestRequest;

use crate::entities::ingest_event;
use crate::error::{Result, StorageError};
use crate::store::{machine, metric, sample, MachineRow, Store};

/// What one accepted batch did.
#[derive(Debug, Clone)]
pub struct IngestBatchOutcome {
    /// True when the `(client_id, ingest_id)` pair was already recorded;
    /// no samples were written in that case.
    pub duplicate: bool,
    pub machine: MachineRow,
    /// Instances that received a sample, in batch order. The caller
    /// enqueues one evaluate intent per entry.
    pub instance_ids: Vec<String>,
}

/// Inserts the dedup marker; returns false when the pair already exists.
async fn record_ingest_event<C: ConnectionTrait>(
    conn: &C,
    client_id: &str,
    ingest_id: &str,
    machine_id: &str,
    received_at: DateTime<Utc>,
    sent_at: DateTime<Utc>,
) -> Result<bool> {
    let am = ingest_event::ActiveModel {
        id: Set(vigil_common::id::next_id()),
        client_id: Set(client_id.to_owned()),
        ingest_id: Set(ingest_id.to_owned()),
        machine_id: Set(machine_id.to_owned()),
        received_at: Set(received_at.fixed_offset()),
        sent_at: Set(sent_at.fixed_offset()),
    };
    match am.insert(conn).await {
        Ok(_) => Ok(true),
        Err(e) if StorageError::is_unique_violation(&e) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

impl Store {
    /// Applies one authenticated metric batch atomically.
    ///
    /// The machine upsert, dedup marker, definitions, instances, samples,
    /// and last-value updates all commit together; a validation failure
    /// (type drift) rolls the whole batch back. A duplicate ingest id
    /// commits only the machine `last_seen` refresh and skips the rest.
    pub async fn ingest_batch(
        &self,
        client_id: &str,
        ingest_id: &str,
        request: &IngestRequest,
        received_at: DateTime<Utc>,
    ) -> Result<IngestBatchOutcome> {
        let txn = self.db().begin().await?;

        let machine = machine::upsert_machine(
            &txn,
            client_id,
            &request.machine.hostname,
            request.machine.os.as_deref(),
            &request.machine.fingerprint,
            received_at,
        )
        .await?;

        let created = record_ingest_event(
            &txn,
            client_id,
            ingest_id,
            &machine.id,
            received_at,
            request.sent_at,
        )
        .await?;

        if !created {
            txn.commit().await?;
            tracing::info!(client_id, ingest_id, "duplicate ingest acknowledged");
            return Ok(IngestBatchOutcome {
                duplicate: true,
                machine,
                instance_ids: Vec::new(),
            });
        }

        let mut instance_ids = Vec::with_capacity(request.metrics.len());
        for m in &request.metrics {
            let definition = metric::resolve_definition(
                &txn,
                client_id,
                &m.name,
                m.value_type,
                m.unit.as_deref(),
            )
            .await?;
            let instance = metric::resolve_instance(&txn, &machine.id, &definition.id).await?;
            sample::append_sample(
                &txn,
                &instance.id,
                received_at,
                Some(request.sent_at),
                &m.value,
            )
            .await?;
            metric::update_instance_last_value(&txn, &instance.id, &m.value, received_at).await?;
            instance_ids.push(instance.id);
        }

        txn.commit().await?;
        Ok(IngestBatchOutcome {
            duplicate: false,
            machine,
            instance_ids,
        })
    }
}
