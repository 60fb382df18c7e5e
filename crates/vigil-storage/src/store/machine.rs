use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, Order,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
};
use serde::Serialize;

use crate::entities::machine::{self, Column as MachineCol, Entity as MachineEntity};
use crate::error::Result;
use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct MachineRow {
    pub id: String,
    pub client_id: String,
    pub hostname: String,
    pub os: Option<String>,
    pub fingerprint: String,
    pub is_active: bool,
    pub registered_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
}

pub(crate) fn model_to_row(m: machine::Model) -> MachineRow {
    MachineRow {
        id: m.id,
        client_id: m.client_id,
        hostname: m.hostname,
        os: m.os,
        fingerprint: m.fingerprint,
        is_active: m.is_active,
        registered_at: m.registered_at.with_timezone(&Utc),
        last_seen: m.last_seen.map(|t| t.with_timezone(&Utc)),
    }
}

/// Resolves or creates the machine for `(client_id, fingerprint)` and
/// stamps `last_seen`. Hostname and OS follow the latest batch.
///
/// Generic over the connection so the ingest transaction can call it.
pub(crate) async fn upsert_machine<C: ConnectionTrait>(
    conn: &C,
    client_id: &str,
    hostname: &str,
    os: Option<&str>,
    fingerprint: &str,
    now: DateTime<Utc>,
) -> Result<MachineRow> {
    let existing = MachineEntity::find()
        .filter(MachineCol::ClientId.eq(client_id))
        .filter(MachineCol::Fingerprint.eq(fingerprint))
        .one(conn)
        .await?;

    let model = match existing {
        Some(m) => {
            let mut am: machine::ActiveModel = m.into();
            am.hostname = Set(hostname.to_owned());
            am.os = Set(os.map(str::to_owned));
            am.last_seen = Set(Some(now.fixed_offset()));
            am.update(conn).await?
        }
        None => {
            let am = machine::ActiveModel {
                id: Set(vigil_common::id::next_id()),
                client_id: Set(client_id.to_owned()),
                hostname: Set(hostname.to_owned()),
                os: Set(os.map(str::to_owned)),
                fingerprint: Set(fingerprint.to_owned()),
                is_active: Set(true),
                registered_at: Set(now.fixed_offset()),
                last_seen: Set(Some(now.fixed_offset())),
            };
            am.insert(conn).await?
        }
    };
    Ok(model_to_row(model))
}

impl Store {
    pub async fn get_machine(&self, id: &str) -> Result<Option<MachineRow>> {
        let model = MachineEntity::find_by_id(id).one(self.db()).await?;
        Ok(model.map(model_to_row))
    }

    pub async fn list_machines(
        &self,
        client_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MachineRow>> {
        let rows = MachineEntity::find()
            .filter(MachineCol::ClientId.eq(client_id))
            .order_by(MachineCol::LastSeen, Order::Desc)
            .limit(limit as u64)
            .offset(offset as u64)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(model_to_row).collect())
    }

    pub async fn count_machines(&self, client_id: &str) -> Result<u64> {
        Ok(MachineEntity::find()
            .filter(MachineCol::ClientId.eq(client_id))
            .count(self.db())
            .await?)
    }

    /// Every active machine across all tenants, for the heartbeat sweep.
    pub async fn list_active_machines(&self) -> Result<Vec<MachineRow>> {
        let rows = MachineEntity::find()
            .filter(MachineCol::IsActive.eq(true))
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(model_to_row).collect())
    }

    pub async fn set_machine_active(&self, id: &str, active: bool) -> Result<bool> {
        let model = MachineEntity::find_by_id(id).one(self.db()).await?;
        match model {
            Some(m) => {
                let mut am: machine::ActiveModel = m.into();
                am.is_active = Set(active);
                am.update(self.db()).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn delete_machine(&self, id: &str) -> Result<bool> {
        let res = MachineEntity::delete_by_id(id).exec(self.db()).await?;
        Ok(res.rows_affected > 0)
    }
}
