use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, QueryFilter, QueryOrder,
};
use serde::{Deserialize, Serialize};
use vigil_common::types::MetricState;

use crate::entities::http_target::{self, Column as TargetCol, Entity as TargetEntity};
use crate::error::{Result, StorageError};
use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct HttpTargetRow {
    pub id: String,
    pub client_id: String,
    pub name: String,
    pub url: String,
    pub method: String,
    pub accepted_status_codes: Vec<u16>,
    pub timeout_ms: i64,
    pub check_interval_s: i64,
    pub is_active: bool,
    pub state: MetricState,
    pub pending_since: Option<DateTime<Utc>>,
    pub critical_streak: i32,
    pub last_check_at: Option<DateTime<Utc>>,
    pub last_status: Option<i32>,
    pub last_latency_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewHttpTarget {
    pub name: String,
    pub url: String,
    pub method: String,
    pub accepted_status_codes: Vec<u16>,
    pub timeout_ms: i64,
    pub check_interval_s: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HttpTargetUpdate {
    pub name: Option<String>,
    pub url: Option<String>,
    pub method: Option<String>,
    pub accepted_status_codes: Option<Vec<u16>>,
    pub timeout_ms: Option<i64>,
    pub check_interval_s: Option<i64>,
    pub is_active: Option<bool>,
}

fn model_to_row(m: http_target::Model) -> Result<HttpTargetRow> {
    let mut accepted: Vec<u16> = serde_json::from_str(&m.accepted_status_codes)?;
    if accepted.is_empty() {
        accepted.push(200);
    }
    Ok(HttpTargetRow {
        state: crate::store::parse_column("state", &m.state)?,
        accepted_status_codes: accepted,
        id: m.id,
        client_id: m.client_id,
        name: m.name,
        url: m.url,
        method: m.method,
        timeout_ms: m.timeout_ms,
        check_interval_s: m.check_interval_s,
        is_active: m.is_active,
        pending_since: m.pending_since.map(|t| t.with_timezone(&Utc)),
        critical_streak: m.critical_streak,
        last_check_at: m.last_check_at.map(|t| t.with_timezone(&Utc)),
        last_status: m.last_status,
        last_latency_ms: m.last_latency_ms,
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    })
}

impl Store {
    /// Creates a target. The `(client_id, url)` unique index is the
    /// conflict oracle: a violation is mapped to [`StorageError::Conflict`]
    /// carrying the existing row's id, so concurrent identical creates
    /// converge on one 201 and one 409.
    pub async fn create_http_target(
        &self,
        client_id: &str,
        input: &NewHttpTarget,
    ) -> Result<HttpTargetRow> {
        let now = Utc::now().fixed_offset();
        let accepted = if input.accepted_status_codes.is_empty() {
            vec![200u16]
        } else {
            input.accepted_status_codes.clone()
        };
        let am = http_target::ActiveModel {
            id: Set(vigil_common::id::next_id()),
            client_id: Set(client_id.to_owned()),
            name: Set(input.name.clone()),
            url: Set(input.url.clone()),
            method: Set(input.method.to_uppercase()),
            accepted_status_codes: Set(serde_json::to_string(&accepted)?),
            timeout_ms: Set(input.timeout_ms),
            check_interval_s: Set(input.check_interval_s),
            is_active: Set(input.is_active),
            state: Set(MetricState::Unknown.to_string()),
            pending_since: Set(None),
            critical_streak: Set(0),
            last_check_at: Set(None),
            last_status: Set(None),
            last_latency_ms: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        match am.insert(self.db()).await {
            Ok(model) => model_to_row(model),
            Err(e) if StorageError::is_unique_violation(&e) => {
                let existing = TargetEntity::find()
                    .filter(TargetCol::ClientId.eq(client_id))
                    .filter(TargetCol::Url.eq(input.url.as_str()))
                    .one(self.db())
                    .await?;
                match existing {
                    Some(m) => Err(StorageError::Conflict {
                        entity: "http_target",
                        existing_id: m.id,
                    }),
                    // The violation was not ours after all; propagate.
                    None => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_http_target(&self, id: &str) -> Result<Option<HttpTargetRow>> {
        let model = TargetEntity::find_by_id(id).one(self.db()).await?;
        model.map(model_to_row).transpose()
    }

    pub async fn list_http_targets(&self, client_id: &str) -> Result<Vec<HttpTargetRow>> {
        let rows = TargetEntity::find()
            .filter(TargetCol::ClientId.eq(client_id))
            .order_by(TargetCol::Name, Order::Asc)
            .all(self.db())
            .await?;
        rows.into_iter().map(model_to_row).collect()
    }

    pub async fn update_http_target(
        &self,
        id: &str,
        upd: &HttpTargetUpdate,
    ) -> Result<Option<HttpTargetRow>> {
        let Some(model) = TargetEntity::find_by_id(id).one(self.db()).await? else {
            return Ok(None);
        };
        let client_id = model.client_id.clone();
        let mut am: http_target::ActiveModel = model.into();
        if let Some(ref v) = upd.name {
            am.name = Set(v.clone());
        }
        if let Some(ref v) = upd.url {
            am.url = Set(v.clone());
        }
        if let Some(ref v) = upd.method {
            am.method = Set(v.to_uppercase());
        }
        if let Some(ref v) = upd.accepted_status_codes {
            let accepted = if v.is_empty() { vec![200u16] } else { v.clone() };
            am.accepted_status_codes = Set(serde_json::to_string(&accepted)?);
        }
        if let Some(v) = upd.timeout_ms {
            am.timeout_ms = Set(v);
        }
        if let Some(v) = upd.check_interval_s {
            am.check_interval_s = Set(v);
        }
        if let Some(v) = upd.is_active {
            am.is_active = Set(v);
        }
        am.updated_at = Set(Utc::now().fixed_offset());

        let updated = match am.update(self.db()).await {
            Ok(m) => m,
            Err(e) if StorageError::is_unique_violation(&e) => {
                // The new URL is already taken within the tenant.
                let holder = match upd.url {
                    Some(ref url) => {
                        TargetEntity::find()
                            .filter(TargetCol::ClientId.eq(client_id.as_str()))
                            .filter(TargetCol::Url.eq(url.as_str()))
                            .one(self.db())
                            .await?
                    }
                    None => None,
                };
                return Err(StorageError::Conflict {
                    entity: "http_target",
                    existing_id: holder.map(|m| m.id).unwrap_or_default(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Some(model_to_row(updated)?))
    }

    pub async fn delete_http_target(&self, id: &str) -> Result<bool> {
        let res = TargetEntity::delete_by_id(id).exec(self.db()).await?;
        Ok(res.rows_affected > 0)
    }

    /// Active targets whose cadence has elapsed. Timestamp math happens in
    /// Rust; the active set is assumed small enough to scan per tick.
    pub async fn due_http_targets(&self, now: DateTime<Utc>) -> Result<Vec<HttpTargetRow>> {
        let rows = TargetEntity::find()
            .filter(TargetCol::IsActive.eq(true))
            .all(self.db())
            .await?;
        let mut due = Vec::new();
        for m in rows {
            let row = model_to_row(m)?;
            let is_due = match row.last_check_at {
                None => true,
                Some(last) => (now - last).num_seconds() >= row.check_interval_s,
            };
            if is_due {
                due.push(row);
            }
        }
        Ok(due)
    }

    pub async fn record_probe_result(
        &self,
        id: &str,
        checked_at: DateTime<Utc>,
        status: u16,
        latency_ms: i64,
    ) -> Result<()> {
        let model = TargetEntity::find_by_id(id)
            .one(self.db())
            .await?
            .ok_or_else(|| StorageError::NotFound {
                entity: "http_target",
                id: id.to_string(),
            })?;
        let mut am: http_target::ActiveModel = model.into();
        am.last_check_at = Set(Some(checked_at.fixed_offset()));
        am.last_status = Set(Some(i32::from(status)));
        am.last_latency_ms = Set(Some(latency_ms));
        am.update(self.db()).await?;
        Ok(())
    }

    pub async fn update_target_eval_state(
        &self,
        id: &str,
        state: MetricState,
        pending_since: Option<DateTime<Utc>>,
        critical_streak: i32,
    ) -> Result<()> {
        let model = TargetEntity::find_by_id(id)
            .one(self.db())
            .await?
            .ok_or_else(|| StorageError::NotFound {
                entity: "http_target",
                id: id.to_string(),
            })?;
        let mut am: http_target::ActiveModel = model.into();
        am.state = Set(state.to_string());
        am.pending_since = Set(pending_since.map(|t| t.fixed_offset()));
        am.critical_streak = Set(critical_streak);
        am.updated_at = Set(Utc::now().fixed_offset());
        am.update(self.db()).await?;
        Ok(())
    }
}
