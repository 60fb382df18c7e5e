use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Select,
};
use serde::Serialize;
use vigil_common::types::NotificationKind;

use crate::entities::notification_log::{self, Column as LogCol, Entity as LogEntity};
use crate::error::{Result, StorageError};
use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct NotificationLogRow {
    pub id: String,
    pub client_id: String,
    pub incident_id: Option<String>,
    pub alert_id: Option<String>,
    pub provider: String,
    pub recipient: String,
    pub kind: NotificationKind,
    pub status: String,
    pub message: Option<String>,
    pub error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NotificationLogFilter {
    pub incident_id: Option<String>,
    pub provider: Option<String>,
    pub status: Option<String>,
}

fn model_to_row(m: notification_log::Model) -> Result<NotificationLogRow> {
    Ok(NotificationLogRow {
        kind: crate::store::parse_column("kind", &m.kind)?,
        id: m.id,
        client_id: m.client_id,
        incident_id: m.incident_id,
        alert_id: m.alert_id,
        provider: m.provider,
        recipient: m.recipient,
        status: m.status,
        message: m.message,
        error: m.error,
        sent_at: m.sent_at.map(|t| t.with_timezone(&Utc)),
        created_at: m.created_at.with_timezone(&Utc),
    })
}

fn apply_filter(
    mut q: Select<LogEntity>,
    client_id: &str,
    filter: &NotificationLogFilter,
) -> Select<LogEntity> {
    q = q.filter(LogCol::ClientId.eq(client_id));
    if let Some(ref v) = filter.incident_id {
        q = q.filter(LogCol::IncidentId.eq(v.as_str()));
    }
    if let Some(ref v) = filter.provider {
        q = q.filter(LogCol::Provider.eq(v.as_str()));
    }
    if let Some(ref v) = filter.status {
        q = q.filter(LogCol::Status.eq(v.as_str()));
    }
    q
}

impl Store {
    /// Step 1 of the send protocol: the pending row exists before any
    /// external call is made.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_notification_pending(
        &self,
        client_id: &str,
        incident_id: Option<&str>,
        alert_id: Option<&str>,
        provider: &str,
        recipient: &str,
        kind: NotificationKind,
        message: &str,
    ) -> Result<NotificationLogRow> {
        let am = notification_log::ActiveModel {
            id: Set(vigil_common::id::next_id()),
            client_id: Set(client_id.to_owned()),
            incident_id: Set(incident_id.map(str::to_owned)),
            alert_id: Set(alert_id.map(str::to_owned)),
            provider: Set(provider.to_owned()),
            recipient: Set(recipient.to_owned()),
            kind: Set(kind.to_string()),
            status: Set("pending".to_owned()),
            message: Set(Some(message.to_owned())),
            error: Set(None),
            sent_at: Set(None),
            created_at: Set(Utc::now().fixed_offset()),
        };
        model_to_row(am.insert(self.db()).await?)
    }

    /// Steps 3/4: outcome of the provider call. Success stamps `sent_at`,
    /// which drives the cooldown computation.
    pub async fn mark_notification_result(
        &self,
        id: &str,
        success: bool,
        error: Option<&str>,
        sent_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let model = LogEntity::find_by_id(id)
            .one(self.db())
            .await?
            .ok_or_else(|| StorageError::NotFound {
                entity: "notification_log",
                id: id.to_string(),
            })?;
        let mut am: notification_log::ActiveModel = model.into();
        am.status = Set(if success { "success" } else { "failed" }.to_owned());
        am.error = Set(error.map(str::to_owned));
        am.sent_at = Set(sent_at.map(|t| t.fixed_offset()));
        am.update(self.db()).await?;
        Ok(())
    }

    /// MAX(sent_at) of successful open/reminder sends for an incident.
    /// Resolve notifications are a distinct subject type and excluded, so
    /// they never stretch or shrink the reminder cadence.
    pub async fn last_notification_success(
        &self,
        incident_id: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let model = LogEntity::find()
            .filter(LogCol::IncidentId.eq(incident_id))
            .filter(LogCol::Status.eq("success"))
            .filter(LogCol::Kind.ne(NotificationKind::Resolve.to_string()))
            .filter(LogCol::SentAt.is_not_null())
            .order_by(LogCol::SentAt, Order::Desc)
            .one(self.db())
            .await?;
        Ok(model
            .and_then(|m| m.sent_at)
            .map(|t| t.with_timezone(&Utc)))
    }

    pub async fn list_notification_logs(
        &self,
        client_id: &str,
        filter: &NotificationLogFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<NotificationLogRow>> {
        let q = apply_filter(LogEntity::find(), client_id, filter);
        let rows = q
            .order_by(LogCol::CreatedAt, Order::Desc)
            .limit(limit as u64)
            .offset(offset as u64)
            .all(self.db())
            .await?;
        rows.into_iter().map(model_to_row).collect()
    }

    pub async fn count_notification_logs(
        &self,
        client_id: &str,
        filter: &NotificationLogFilter,
    ) -> Result<u64> {
        let q = apply_filter(LogEntity::find(), client_id, filter);
        Ok(q.count(self.db()).await?)
    }
}
