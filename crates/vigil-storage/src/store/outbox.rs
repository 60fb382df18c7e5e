use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, Order,
    QueryFilter, QueryOrder, QuerySelect,
};
use serde::Serialize;

use crate::entities::outbox_event::{self, Column as OutboxCol, Entity as OutboxEntity};
use crate::error::{Result, StorageError};
use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct OutboxRow {
    pub id: String,
    pub kind: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

fn model_to_row(m: outbox_event::Model) -> OutboxRow {
    OutboxRow {
        id: m.id,
        kind: m.kind,
        payload: m.payload,
        created_at: m.created_at.with_timezone(&Utc),
        delivered_at: m.delivered_at.map(|t| t.with_timezone(&Utc)),
    }
}

/// Appends an event inside the caller's transaction so the intent commits
/// (or rolls back) together with the state change that produced it.
pub async fn enqueue<C: ConnectionTrait>(conn: &C, kind: &str, payload: &str) -> Result<OutboxRow> {
    let am = outbox_event::ActiveModel {
        id: Set(vigil_common::id::next_id()),
        kind: Set(kind.to_owned()),
        payload: Set(payload.to_owned()),
        created_at: Set(Utc::now().fixed_offset()),
        delivered_at: Set(None),
    };
    Ok(model_to_row(am.insert(conn).await?))
}

impl Store {
    pub async fn enqueue_outbox(&self, kind: &str, payload: &str) -> Result<OutboxRow> {
        enqueue(self.db(), kind, payload).await
    }

    /// Oldest undelivered events first. Delivery is at-least-once: a crash
    /// between hand-off and `mark_outbox_delivered` replays the event.
    pub async fn fetch_undelivered_outbox(&self, limit: usize) -> Result<Vec<OutboxRow>> {
        let rows = OutboxEntity::find()
            .filter(OutboxCol::DeliveredAt.is_null())
            .order_by(OutboxCol::CreatedAt, Order::Asc)
            .limit(limit as u64)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(model_to_row).collect())
    }

    pub async fn mark_outbox_delivered(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let model = OutboxEntity::find_by_id(id)
            .one(self.db())
            .await?
            .ok_or_else(|| StorageError::NotFound {
                entity: "outbox_event",
                id: id.to_string(),
            })?;
        let mut am: outbox_event::ActiveModel = model.into();
        am.delivered_at = Set(Some(at.fixed_offset()));
        am.update(self.db()).await?;
        Ok(())
    }
}
