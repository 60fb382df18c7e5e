use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
};
use serde::Serialize;
use std::collections::HashMap;
use vigil_common::types::{MetricState, MetricValue, ValueType};

use crate::entities::machine::{Column as MachineCol, Entity as MachineEntity};
use crate::entities::metric_definition::{self, Column as DefCol, Entity as DefEntity};
use crate::entities::metric_instance::{self, Column as InstCol, Entity as InstEntity};
use crate::error::{Result, StorageError};
use crate::store::{value_from_columns, value_to_columns, Store};

#[derive(Debug, Clone, Serialize)]
pub struct MetricDefinitionRow {
    pub id: String,
    pub client_id: String,
    pub name: String,
    pub value_type: ValueType,
    pub unit: Option<String>,
    pub suggested: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricInstanceRow {
    pub id: String,
    pub machine_id: String,
    pub definition_id: String,
    pub alert_enabled: bool,
    pub paused: bool,
    pub state: MetricState,
    pub pending_since: Option<DateTime<Utc>>,
    pub critical_streak: i32,
    pub last_value: Option<MetricValue>,
    pub last_value_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An instance joined with the context an evaluation or API response
/// needs: the definition's name and type plus the owning machine/client.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceDetail {
    pub instance: MetricInstanceRow,
    pub metric_name: String,
    pub value_type: ValueType,
    pub unit: Option<String>,
    pub client_id: String,
    pub hostname: String,
}

/// A currently-critical instance, as listed by `GET /alerts`.
#[derive(Debug, Clone, Serialize)]
pub struct AlertRow {
    pub metric_instance_id: String,
    pub machine_id: String,
    pub hostname: String,
    pub metric_name: String,
    pub last_value: Option<MetricValue>,
    pub last_value_at: Option<DateTime<Utc>>,
    pub since: Option<DateTime<Utc>>,
}

fn model_to_definition(m: metric_definition::Model) -> Result<MetricDefinitionRow> {
    Ok(MetricDefinitionRow {
        value_type: crate::store::parse_column("value_type", &m.value_type)?,
        id: m.id,
        client_id: m.client_id,
        name: m.name,
        unit: m.unit,
        suggested: m.suggested,
        created_at: m.created_at.with_timezone(&Utc),
    })
}

pub(crate) fn model_to_instance(m: metric_instance::Model) -> Result<MetricInstanceRow> {
    Ok(MetricInstanceRow {
        state: crate::store::parse_column("state", &m.state)?,
        last_value: value_from_columns(m.last_value_num, m.last_value_bool, m.last_value_str),
        id: m.id,
        machine_id: m.machine_id,
        definition_id: m.definition_id,
        alert_enabled: m.alert_enabled,
        paused: m.paused,
        pending_since: m.pending_since.map(|t| t.with_timezone(&Utc)),
        critical_streak: m.critical_streak,
        last_value_at: m.last_value_at.map(|t| t.with_timezone(&Utc)),
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    })
}

/// Resolves or creates the definition for `(client_id, name)`.
///
/// The value type is immutable after creation: a batch carrying a
/// different type for an existing name fails with [`StorageError::TypeDrift`]
/// and the caller rejects the whole batch.
pub(crate) async fn resolve_definition<C: ConnectionTrait>(
    conn: &C,
    client_id: &str,
    name: &str,
    value_type: ValueType,
    unit: Option<&str>,
) -> Result<MetricDefinitionRow> {
    let existing = DefEntity::find()
        .filter(DefCol::ClientId.eq(client_id))
        .filter(DefCol::Name.eq(name))
        .one(conn)
        .await?;

    if let Some(m) = existing {
        let row = model_to_definition(m)?;
        if row.value_type != value_type {
            return Err(StorageError::TypeDrift {
                metric: name.to_string(),
                expected: row.value_type.to_string(),
                got: value_type.to_string(),
            });
        }
        return Ok(row);
    }

    let am = metric_definition::ActiveModel {
        id: Set(vigil_common::id::next_id()),
        client_id: Set(client_id.to_owned()),
        name: Set(name.to_owned()),
        value_type: Set(value_type.to_string()),
        unit: Set(unit.map(str::to_owned)),
        suggested: Set(false),
        created_at: Set(Utc::now().fixed_offset()),
    };
    model_to_definition(am.insert(conn).await?)
}

/// Resolves or creates the instance binding a definition to a machine.
pub(crate) async fn resolve_instance<C: ConnectionTrait>(
    conn: &C,
    machine_id: &str,
    definition_id: &str,
) -> Result<MetricInstanceRow> {
    let existing = InstEntity::find()
        .filter(InstCol::MachineId.eq(machine_id))
        .filter(InstCol::DefinitionId.eq(definition_id))
        .one(conn)
        .await?;
    if let Some(m) = existing {
        return model_to_instance(m);
    }

    let now = Utc::now().fixed_offset();
    let am = metric_instance::ActiveModel {
        id: Set(vigil_common::id::next_id()),
        machine_id: Set(machine_id.to_owned()),
        definition_id: Set(definition_id.to_owned()),
        alert_enabled: Set(true),
        paused: Set(false),
        state: Set(MetricState::Unknown.to_string()),
        pending_since: Set(None),
        critical_streak: Set(0),
        last_value_num: Set(None),
        last_value_bool: Set(None),
        last_value_str: Set(None),
        last_value_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    };
    model_to_instance(am.insert(conn).await?)
}

/// Last-writer-wins update of the denormalized latest value.
pub(crate) async fn update_instance_last_value<C: ConnectionTrait>(
    conn: &C,
    instance_id: &str,
    value: &MetricValue,
    at: DateTime<Utc>,
) -> Result<()> {
    let model = InstEntity::find_by_id(instance_id)
        .one(conn)
        .await?
        .ok_or_else(|| StorageError::NotFound {
            entity: "metric_instance",
            id: instance_id.to_string(),
        })?;
    let (num, boolean, text) = value_to_columns(value);
    let mut am: metric_instance::ActiveModel = model.into();
    am.last_value_num = Set(num);
    am.last_value_bool = Set(boolean);
    am.last_value_str = Set(text);
    am.last_value_at = Set(Some(at.fixed_offset()));
    am.updated_at = Set(Utc::now().fixed_offset());
    am.update(conn).await?;
    Ok(())
}

impl Store {
    pub async fn get_instance(&self, id: &str) -> Result<Option<MetricInstanceRow>> {
        let model = InstEntity::find_by_id(id).one(self.db()).await?;
        model.map(model_to_instance).transpose()
    }

    pub async fn get_instance_detail(&self, id: &str) -> Result<Option<InstanceDetail>> {
        let Some(model) = InstEntity::find_by_id(id).one(self.db()).await? else {
            return Ok(None);
        };
        let instance = model_to_instance(model)?;

        let definition = DefEntity::find_by_id(&instance.definition_id)
            .one(self.db())
            .await?
            .ok_or_else(|| StorageError::NotFound {
                entity: "metric_definition",
                id: instance.definition_id.clone(),
            })?;
        let definition = model_to_definition(definition)?;

        let machine = MachineEntity::find_by_id(&instance.machine_id)
            .one(self.db())
            .await?
            .ok_or_else(|| StorageError::NotFound {
                entity: "machine",
                id: instance.machine_id.clone(),
            })?;

        Ok(Some(InstanceDetail {
            instance,
            metric_name: definition.name,
            value_type: definition.value_type,
            unit: definition.unit,
            client_id: machine.client_id,
            hostname: machine.hostname,
        }))
    }

    pub async fn list_instances_for_machine(
        &self,
        machine_id: &str,
    ) -> Result<Vec<InstanceDetail>> {
        let machine = MachineEntity::find_by_id(machine_id)
            .one(self.db())
            .await?
            .ok_or_else(|| StorageError::NotFound {
                entity: "machine",
                id: machine_id.to_string(),
            })?;

        let models = InstEntity::find()
            .filter(InstCol::MachineId.eq(machine_id))
            .all(self.db())
            .await?;

        let def_ids: Vec<String> = models.iter().map(|m| m.definition_id.clone()).collect();
        let defs: HashMap<String, metric_definition::Model> = DefEntity::find()
            .filter(DefCol::Id.is_in(def_ids))
            .all(self.db())
            .await?
            .into_iter()
            .map(|d| (d.id.clone(), d))
            .collect();

        let mut out = Vec::with_capacity(models.len());
        for m in models {
            let Some(def) = defs.get(&m.definition_id) else {
                continue;
            };
            let definition = model_to_definition(def.clone())?;
            out.push(InstanceDetail {
                instance: model_to_instance(m)?,
                metric_name: definition.name,
                value_type: definition.value_type,
                unit: definition.unit,
                client_id: machine.client_id.clone(),
                hostname: machine.hostname.clone(),
            });
        }
        out.sort_by(|a, b| a.metric_name.cmp(&b.metric_name));
        Ok(out)
    }

    /// `(instance_id, client_id)` pairs for everything the evaluation
    /// sweep should touch: alert-enabled, not paused.
    pub async fn list_sweepable_instances(&self) -> Result<Vec<(String, String)>> {
        let models = InstEntity::find()
            .filter(InstCol::AlertEnabled.eq(true))
            .filter(InstCol::Paused.eq(false))
            .all(self.db())
            .await?;

        let machine_ids: Vec<String> = models.iter().map(|m| m.machine_id.clone()).collect();
        let clients: HashMap<String, String> = MachineEntity::find()
            .filter(MachineCol::Id.is_in(machine_ids))
            .all(self.db())
            .await?
            .into_iter()
            .map(|m| (m.id, m.client_id))
            .collect();

        Ok(models
            .into_iter()
            .filter_map(|m| clients.get(&m.machine_id).map(|c| (m.id, c.clone())))
            .collect())
    }

    /// Currently-critical instances for one client (`GET /alerts`).
    pub async fn list_critical_alerts(&self, client_id: &str) -> Result<Vec<AlertRow>> {
        let machines: HashMap<String, String> = MachineEntity::find()
            .filter(MachineCol::ClientId.eq(client_id))
            .all(self.db())
            .await?
            .into_iter()
            .map(|m| (m.id, m.hostname))
            .collect();
        if machines.is_empty() {
            return Ok(Vec::new());
        }

        let machine_ids: Vec<String> = machines.keys().cloned().collect();
        let models = InstEntity::find()
            .filter(InstCol::MachineId.is_in(machine_ids))
            .filter(InstCol::State.eq(MetricState::Critical.to_string()))
            .all(self.db())
            .await?;

        let def_ids: Vec<String> = models.iter().map(|m| m.definition_id.clone()).collect();
        let defs: HashMap<String, String> = DefEntity::find()
            .filter(DefCol::Id.is_in(def_ids))
            .all(self.db())
            .await?
            .into_iter()
            .map(|d| (d.id, d.name))
            .collect();

        let mut out = Vec::with_capacity(models.len());
        for m in models {
            let row = model_to_instance(m)?;
            out.push(AlertRow {
                hostname: machines
                    .get(&row.machine_id)
                    .cloned()
                    .unwrap_or_default(),
                metric_name: defs.get(&row.definition_id).cloned().unwrap_or_default(),
                metric_instance_id: row.id,
                machine_id: row.machine_id,
                last_value: row.last_value,
                last_value_at: row.last_value_at,
                since: row.pending_since,
            });
        }
        Ok(out)
    }

    pub async fn set_instance_alerting(
        &self,
        id: &str,
        enabled: bool,
    ) -> Result<Option<MetricInstanceRow>> {
        let model = InstEntity::find_by_id(id).one(self.db()).await?;
        match model {
            Some(m) => {
                let mut am: metric_instance::ActiveModel = m.into();
                am.alert_enabled = Set(enabled);
                am.updated_at = Set(Utc::now().fixed_offset());
                Ok(Some(model_to_instance(am.update(self.db()).await?)?))
            }
            None => Ok(None),
        }
    }

    pub async fn set_instance_paused(
        &self,
        id: &str,
        paused: bool,
    ) -> Result<Option<MetricInstanceRow>> {
        let model = InstEntity::find_by_id(id).one(self.db()).await?;
        match model {
            Some(m) => {
                let mut am: metric_instance::ActiveModel = m.into();
                am.paused = Set(paused);
                am.updated_at = Set(Utc::now().fixed_offset());
                Ok(Some(model_to_instance(am.update(self.db()).await?)?))
            }
            None => Ok(None),
        }
    }

    /// Writes back the evaluator's snapshot. Only the evaluator calls
    /// this; operator endpoints never touch `state` directly.
    pub async fn update_instance_eval_state(
        &self,
        id: &str,
        state: MetricState,
        pending_since: Option<DateTime<Utc>>,
        critical_streak: i32,
    ) -> Result<()> {
        let model = InstEntity::find_by_id(id)
            .one(self.db())
            .await?
            .ok_or_else(|| StorageError::NotFound {
                entity: "metric_instance",
                id: id.to_string(),
            })?;
        let mut am: metric_instance::ActiveModel = model.into();
        am.state = Set(state.to_string());
        am.pending_since = Set(pending_since.map(|t| t.fixed_offset()));
        am.critical_streak = Set(critical_streak);
        am.updated_at = Set(Utc::now().fixed_offset());
        am.update(self.db()).await?;
        Ok(())
    }

    /// Definition lookup by `(client, name)`, used by the heartbeat task.
    pub async fn find_definition(
        &self,
        client_id: &str,
        name: &str,
    ) -> Result<Option<MetricDefinitionRow>> {
        let model = DefEntity::find()
            .filter(DefCol::ClientId.eq(client_id))
            .filter(DefCol::Name.eq(name))
            .one(self.db())
            .await?;
        model.map(model_to_definition).transpose()
    }

    pub async fn ensure_definition(
        &self,
        client_id: &str,
        name: &str,
        value_type: ValueType,
        unit: Option<&str>,
    ) -> Result<MetricDefinitionRow> {
        resolve_definition(self.db(), client_id, name, value_type, unit).await
    }

    pub async fn ensure_instance(
        &self,
        machine_id: &str,
        definition_id: &str,
    ) -> Result<MetricInstanceRow> {
        resolve_instance(self.db(), machine_id, definition_id).await
    }

    pub async fn set_instance_last_value(
        &self,
        instance_id: &str,
        value: &MetricValue,
        at: DateTime<Utc>,
    ) -> Result<()> {
        update_instance_last_value(self.db(), instance_id, value, at).await
    }
}
