use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter};
use serde::Serialize;

use crate::entities::api_key::{self, Column as KeyCol, Entity as KeyEntity};
use crate::error::{Result, StorageError};
use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyRow {
    pub id: String,
    pub client_id: String,
    pub key: String,
    pub name: String,
    pub is_active: bool,
    pub machine_id: Option<String>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

fn model_to_row(m: api_key::Model) -> ApiKeyRow {
    ApiKeyRow {
        id: m.id,
        client_id: m.client_id,
        key: m.key,
        name: m.name,
        is_active: m.is_active,
        machine_id: m.machine_id,
        last_used_at: m.last_used_at.map(|t| t.with_timezone(&Utc)),
        created_at: m.created_at.with_timezone(&Utc),
    }
}

impl Store {
    pub async fn create_api_key(
        &self,
        client_id: &str,
        name: &str,
        key: &str,
    ) -> Result<ApiKeyRow> {
        let am = api_key::ActiveModel {
            id: Set(vigil_common::id::next_id()),
            client_id: Set(client_id.to_owned()),
            key: Set(key.to_owned()),
            name: Set(name.to_owned()),
            is_active: Set(true),
            machine_id: Set(None),
            last_used_at: Set(None),
            created_at: Set(Utc::now().fixed_offset()),
        };
        let model = am.insert(self.db()).await.map_err(|e| {
            if StorageError::is_unique_violation(&e) {
                StorageError::Conflict {
                    entity: "api_key",
                    existing_id: key.to_string(),
                }
            } else {
                e.into()
            }
        })?;
        Ok(model_to_row(model))
    }

    /// Looks up an API key for authentication. Inactive keys are invisible
    /// here; the caller cannot distinguish disabled from unknown, which is
    /// intentional (both surface as the same 401).
    pub async fn find_active_api_key(&self, key: &str) -> Result<Option<ApiKeyRow>> {
        let model = KeyEntity::find()
            .filter(KeyCol::Key.eq(key))
            .filter(KeyCol::IsActive.eq(true))
            .one(self.db())
            .await?;
        Ok(model.map(model_to_row))
    }

    /// Best-effort usage stamp; failures here never fail a request.
    pub async fn touch_api_key(&self, id: &str) -> Result<()> {
        let model = KeyEntity::find_by_id(id).one(self.db()).await?;
        if let Some(m) = model {
            let mut am: api_key::ActiveModel = m.into();
            am.last_used_at = Set(Some(Utc::now().fixed_offset()));
            am.update(self.db()).await?;
        }
        Ok(())
    }

    pub async fn set_api_key_active(&self, id: &str, active: bool) -> Result<bool> {
        let model = KeyEntity::find_by_id(id).one(self.db()).await?;
        match model {
            Some(m) => {
                let mut am: api_key::ActiveModel = m.into();
                am.is_active = Set(active);
                am.update(self.db()).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
