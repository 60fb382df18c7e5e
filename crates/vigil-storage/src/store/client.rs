use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, EntityTrait};
use serde::{Deserialize, Serialize};

use crate::entities::client::{self, Entity as ClientEntity};
use crate::entities::client_settings::{self, Entity as SettingsEntity};
use crate::error::{Result, StorageError};
use crate::store::Store;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRow {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Per-tenant notification and evaluation knobs. One row per client,
/// created with defaults alongside the client itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettingsRow {
    pub client_id: String,
    pub notification_email: Option<String>,
    pub slack_webhook_url: Option<String>,
    pub slack_channel_name: Option<String>,
    pub grace_period_seconds: i64,
    pub reminder_notification_seconds: i64,
    pub alert_grouping_enabled: bool,
    pub notify_on_resolve: bool,
    pub heartbeat_threshold_minutes: i64,
    pub consecutive_failures_threshold: i32,
    pub updated_at: DateTime<Utc>,
}

/// Partial update for `PUT /settings`; `None` leaves the field untouched.
/// The two-level `Option` on the string fields distinguishes "clear"
/// (`Some(None)`) from "keep" (`None`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    pub notification_email: Option<Option<String>>,
    pub slack_webhook_url: Option<Option<String>>,
    pub slack_channel_name: Option<Option<String>>,
    pub grace_period_seconds: Option<i64>,
    pub reminder_notification_seconds: Option<i64>,
    pub alert_grouping_enabled: Option<bool>,
    pub notify_on_resolve: Option<bool>,
    pub heartbeat_threshold_minutes: Option<i64>,
    pub consecutive_failures_threshold: Option<i32>,
}

fn model_to_client(m: client::Model) -> ClientRow {
    ClientRow {
        id: m.id,
        name: m.name,
        created_at: m.created_at.with_timezone(&Utc),
    }
}

fn model_to_settings(m: client_settings::Model) -> ClientSettingsRow {
    ClientSettingsRow {
        client_id: m.client_id,
        notification_email: m.notification_email,
        slack_webhook_url: m.slack_webhook_url,
        slack_channel_name: m.slack_channel_name,
        grace_period_seconds: m.grace_period_seconds,
        reminder_notification_seconds: m.reminder_notification_seconds,
        alert_grouping_enabled: m.alert_grouping_enabled,
        notify_on_resolve: m.notify_on_resolve,
        heartbeat_threshold_minutes: m.heartbeat_threshold_minutes,
        consecutive_failures_threshold: m.consecutive_failures_threshold,
        updated_at: m.updated_at.with_timezone(&Utc),
    }
}

impl Store {
    pub async fn create_client(&self, name: &str) -> Result<ClientRow> {
        let now = Utc::now().fixed_offset();
        let id = vigil_common::id::next_id();
        let am = client::ActiveModel {
            id: Set(id.clone()),
            name: Set(name.to_owned()),
            created_at: Set(now),
        };
        let model = am.insert(self.db()).await.map_err(|e| {
            if StorageError::is_unique_violation(&e) {
                StorageError::Conflict {
                    entity: "client",
                    existing_id: name.to_string(),
                }
            } else {
                e.into()
            }
        })?;

        // Settings row travels with the client for its whole life.
        let settings = client_settings::ActiveModel {
            client_id: Set(id),
            notification_email: Set(None),
            slack_webhook_url: Set(None),
            slack_channel_name: Set(None),
            grace_period_seconds: Set(0),
            reminder_notification_seconds: Set(0),
            alert_grouping_enabled: Set(false),
            notify_on_resolve: Set(true),
            heartbeat_threshold_minutes: Set(5),
            consecutive_failures_threshold: Set(1),
            updated_at: Set(now),
        };
        settings.insert(self.db()).await?;

        Ok(model_to_client(model))
    }

    pub async fn get_client(&self, id: &str) -> Result<Option<ClientRow>> {
        let model = ClientEntity::find_by_id(id).one(self.db()).await?;
        Ok(model.map(model_to_client))
    }

    pub async fn delete_client(&self, id: &str) -> Result<bool> {
        let res = ClientEntity::delete_by_id(id).exec(self.db()).await?;
        Ok(res.rows_affected > 0)
    }

    /// Settings for a client. Tolerates a missing row (pre-settings data)
    /// by materializing defaults.
    pub async fn get_settings(&self, client_id: &str) -> Result<ClientSettingsRow> {
        let model = SettingsEntity::find_by_id(client_id).one(self.db()).await?;
        if let Some(m) = model {
            return Ok(model_to_settings(m));
        }
        let now = Utc::now().fixed_offset();
        let am = client_settings::ActiveModel {
            client_id: Set(client_id.to_owned()),
            notification_email: Set(None),
            slack_webhook_url: Set(None),
            slack_channel_name: Set(None),
            grace_period_seconds: Set(0),
            reminder_notification_seconds: Set(0),
            alert_grouping_enabled: Set(false),
            notify_on_resolve: Set(true),
            heartbeat_threshold_minutes: Set(5),
            consecutive_failures_threshold: Set(1),
            updated_at: Set(now),
        };
        let model = am.insert(self.db()).await?;
        Ok(model_to_settings(model))
    }

    pub async fn update_settings(
        &self,
        client_id: &str,
        upd: &SettingsUpdate,
    ) -> Result<ClientSettingsRow> {
        // Materialize the row first so partial updates have a base.
        self.get_settings(client_id).await?;

        let model = SettingsEntity::find_by_id(client_id)
            .one(self.db())
            .await?
            .ok_or_else(|| StorageError::NotFound {
                entity: "client_settings",
                id: client_id.to_string(),
            })?;

        let mut am: client_settings::ActiveModel = model.into();
        if let Some(ref v) = upd.notification_email {
            am.notification_email = Set(v.clone());
        }
        if let Some(ref v) = upd.slack_webhook_url {
            am.slack_webhook_url = Set(v.clone());
        }
        if let Some(ref v) = upd.slack_channel_name {
            am.slack_channel_name = Set(v.clone());
        }
        if let Some(v) = upd.grace_period_seconds {
            am.grace_period_seconds = Set(v.max(0));
        }
        if let Some(v) = upd.reminder_notification_seconds {
            am.reminder_notification_seconds = Set(v.max(0));
        }
        if let Some(v) = upd.alert_grouping_enabled {
            am.alert_grouping_enabled = Set(v);
        }
        if let Some(v) = upd.notify_on_resolve {
            am.notify_on_resolve = Set(v);
        }
        if let Some(v) = upd.heartbeat_threshold_minutes {
            am.heartbeat_threshold_minutes = Set(v.max(1));
        }
        if let Some(v) = upd.consecutive_failures_threshold {
            am.consecutive_failures_threshold = Set(v.max(1));
        }
        am.updated_at = Set(Utc::now().fixed_offset());
        let updated = am.update(self.db()).await?;
        Ok(model_to_settings(updated))
    }

    /// All clients that currently have settings rows, for sweeps that need
    /// per-tenant knobs without N+1 lookups.
    pub async fn list_all_settings(&self) -> Result<Vec<ClientSettingsRow>> {
        let rows = SettingsEntity::find().all(self.db()).await?;
        Ok(rows.into_iter().map(model_to_settings).collect())
    }
}
