use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, Order,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Select,
};
use serde::Serialize;
use vigil_common::types::{Severity, Subject};

use crate::entities::incident::{self, Column as IncCol, Entity as IncEntity};
use crate::error::{Result, StorageError};
use crate::store::Store;

const STATUS_OPEN: &str = "OPEN";
const STATUS_RESOLVED: &str = "RESOLVED";

#[derive(Debug, Clone, Serialize)]
pub struct IncidentRow {
    pub id: String,
    pub client_id: String,
    pub http_target_id: Option<String>,
    pub metric_instance_id: Option<String>,
    pub status: String,
    pub severity: Severity,
    pub title: String,
    pub description: Option<String>,
    pub opened_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub last_observed_at: DateTime<Utc>,
    pub last_notified_at: Option<DateTime<Utc>>,
}

impl IncidentRow {
    pub fn subject(&self) -> Subject {
        match (&self.http_target_id, &self.metric_instance_id) {
            (Some(target_id), _) => Subject::HttpTarget {
                client_id: self.client_id.clone(),
                target_id: target_id.clone(),
            },
            (None, Some(instance_id)) => Subject::MetricInstance {
                client_id: self.client_id.clone(),
                instance_id: instance_id.clone(),
            },
            // The CHECK constraint forbids this shape.
            (None, None) => unreachable!("incident row without a subject key"),
        }
    }
}

fn model_to_row(m: incident::Model) -> Result<IncidentRow> {
    Ok(IncidentRow {
        severity: crate::store::parse_column("severity", &m.severity)?,
        id: m.id,
        client_id: m.client_id,
        http_target_id: m.http_target_id,
        metric_instance_id: m.metric_instance_id,
        status: m.status,
        title: m.title,
        description: m.description,
        opened_at: m.opened_at.with_timezone(&Utc),
        resolved_at: m.resolved_at.map(|t| t.with_timezone(&Utc)),
        last_observed_at: m.last_observed_at.with_timezone(&Utc),
        last_notified_at: m.last_notified_at.map(|t| t.with_timezone(&Utc)),
    })
}

fn open_query_for(subject: &Subject) -> Select<IncEntity> {
    let q = IncEntity::find()
        .filter(IncCol::ClientId.eq(subject.client_id()))
        .filter(IncCol::Status.eq(STATUS_OPEN));
    match subject {
        Subject::HttpTarget { target_id, .. } => q.filter(IncCol::HttpTargetId.eq(target_id)),
        Subject::MetricInstance { instance_id, .. } => {
            q.filter(IncCol::MetricInstanceId.eq(instance_id))
        }
    }
}

/// Opens an incident for a subject, or returns the one already open.
///
/// Insert-first: the partial unique index `(client, subject) WHERE
/// status='OPEN'` is the conflict oracle. On a violation the existing row
/// is fetched, its `last_observed_at` is advanced, and `created=false` is
/// returned so the caller emits a reminder instead of a first-open
/// notification.
pub async fn open_incident<C: ConnectionTrait>(
    conn: &C,
    subject: &Subject,
    severity: Severity,
    title: &str,
    description: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(IncidentRow, bool)> {
    let (target_id, instance_id) = match subject {
        Subject::HttpTarget { target_id, .. } => (Some(target_id.clone()), None),
        Subject::MetricInstance { instance_id, .. } => (None, Some(instance_id.clone())),
    };

    let am = incident::ActiveModel {
        id: Set(vigil_common::id::next_id()),
        client_id: Set(subject.client_id().to_owned()),
        http_target_id: Set(target_id),
        metric_instance_id: Set(instance_id),
        status: Set(STATUS_OPEN.to_owned()),
        severity: Set(severity.to_string()),
        title: Set(title.to_owned()),
        description: Set(description.map(str::to_owned)),
        opened_at: Set(now.fixed_offset()),
        resolved_at: Set(None),
        last_observed_at: Set(now.fixed_offset()),
        last_notified_at: Set(None),
    };

    match am.insert(conn).await {
        Ok(model) => Ok((model_to_row(model)?, true)),
        Err(e) if StorageError::is_unique_violation(&e) => {
            let existing = open_query_for(subject).one(conn).await?.ok_or_else(|| {
                // Lost a race with a concurrent resolve; rare, caller retries.
                StorageError::Other("open incident vanished during conflict recovery".into())
            })?;
            let mut am: incident::ActiveModel = existing.into();
            am.last_observed_at = Set(now.fixed_offset());
            let updated = am.update(conn).await?;
            Ok((model_to_row(updated)?, false))
        }
        Err(e) => Err(e.into()),
    }
}

/// Resolves the OPEN incident for a subject, if any. Resolving with
/// nothing open is a no-op (`None`). RESOLVED rows are never touched
/// again.
pub async fn resolve_incident<C: ConnectionTrait>(
    conn: &C,
    subject: &Subject,
    now: DateTime<Utc>,
) -> Result<Option<IncidentRow>> {
    let Some(existing) = open_query_for(subject).one(conn).await? else {
        return Ok(None);
    };
    let mut am: incident::ActiveModel = existing.into();
    am.status = Set(STATUS_RESOLVED.to_owned());
    am.resolved_at = Set(Some(now.fixed_offset()));
    let updated = am.update(conn).await?;
    Ok(Some(model_to_row(updated)?))
}

impl Store {
    pub async fn open_incident(
        &self,
        subject: &Subject,
        severity: Severity,
        title: &str,
        description: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(IncidentRow, bool)> {
        open_incident(self.db(), subject, severity, title, description, now).await
    }

    pub async fn resolve_incident(
        &self,
        subject: &Subject,
        now: DateTime<Utc>,
    ) -> Result<Option<IncidentRow>> {
        resolve_incident(self.db(), subject, now).await
    }

    pub async fn get_incident(&self, id: &str) -> Result<Option<IncidentRow>> {
        let model = IncEntity::find_by_id(id).one(self.db()).await?;
        model.map(model_to_row).transpose()
    }

    pub async fn find_open_incident(&self, subject: &Subject) -> Result<Option<IncidentRow>> {
        let model = open_query_for(subject).one(self.db()).await?;
        model.map(model_to_row).transpose()
    }

    pub async fn list_incidents(
        &self,
        client_id: &str,
        status: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<IncidentRow>> {
        let mut q = IncEntity::find().filter(IncCol::ClientId.eq(client_id));
        if let Some(s) = status {
            q = q.filter(IncCol::Status.eq(s.to_uppercase()));
        }
        let rows = q
            .order_by(IncCol::OpenedAt, Order::Desc)
            .limit(limit as u64)
            .offset(offset as u64)
            .all(self.db())
            .await?;
        rows.into_iter().map(model_to_row).collect()
    }

    pub async fn count_incidents(&self, client_id: &str, status: Option<&str>) -> Result<u64> {
        let mut q = IncEntity::find().filter(IncCol::ClientId.eq(client_id));
        if let Some(s) = status {
            q = q.filter(IncCol::Status.eq(s.to_uppercase()));
        }
        Ok(q.count(self.db()).await?)
    }

    /// Every OPEN incident across tenants, for the reminder sweep.
    pub async fn list_open_incidents(&self) -> Result<Vec<IncidentRow>> {
        let rows = IncEntity::find()
            .filter(IncCol::Status.eq(STATUS_OPEN))
            .order_by(IncCol::OpenedAt, Order::Asc)
            .all(self.db())
            .await?;
        rows.into_iter().map(model_to_row).collect()
    }

    /// Stamped by the notifier after a successful send.
    pub async fn touch_incident_notified(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let model = IncEntity::find_by_id(id)
            .one(self.db())
            .await?
            .ok_or_else(|| StorageError::NotFound {
                entity: "incident",
                id: id.to_string(),
            })?;
        if model.status != STATUS_OPEN {
            // Resolved incidents are immutable; a late success just logs.
            return Ok(());
        }
        let mut am: incident::ActiveModel = model.into();
        am.last_notified_at = Set(Some(at.fixed_offset()));
        am.update(self.db()).await?;
        Ok(())
    }
}
