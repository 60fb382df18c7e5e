use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter};
use serde::Serialize;
use vigil_common::types::{Comparison, MetricValue, Severity};

use crate::entities::threshold::{self, Column as ThCol, Entity as ThEntity};
use crate::error::Result;
use crate::store::{value_from_columns, value_to_columns, Store};

const DEFAULT_NAME: &str = "default";

#[derive(Debug, Clone, Serialize)]
pub struct ThresholdRow {
    pub id: String,
    pub metric_instance_id: String,
    pub name: String,
    pub comparison: Comparison,
    pub value: MetricValue,
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn model_to_row(m: threshold::Model) -> Result<Option<ThresholdRow>> {
    let comparison = crate::store::parse_column("comparison", &m.comparison)?;
    let severity = crate::store::parse_column("severity", &m.severity)?;
    Ok(
        value_from_columns(m.value_num, m.value_bool, m.value_str).map(|value| ThresholdRow {
            id: m.id,
            metric_instance_id: m.metric_instance_id,
            name: m.name,
            comparison,
            value,
            severity,
            created_at: m.created_at.with_timezone(&Utc),
            updated_at: m.updated_at.with_timezone(&Utc),
        }),
    )
}

impl Store {
    /// The effective threshold for an instance: the single `default` row.
    pub async fn get_threshold(
        &self,
        metric_instance_id: &str,
    ) -> Result<Option<ThresholdRow>> {
        let model = ThEntity::find()
            .filter(ThCol::MetricInstanceId.eq(metric_instance_id))
            .filter(ThCol::Name.eq(DEFAULT_NAME))
            .one(self.db())
            .await?;
        match model {
            Some(m) => model_to_row(m),
            None => Ok(None),
        }
    }

    /// Installs or replaces the default threshold for an instance.
    pub async fn upsert_default_threshold(
        &self,
        metric_instance_id: &str,
        comparison: Comparison,
        value: &MetricValue,
        severity: Severity,
    ) -> Result<ThresholdRow> {
        let now = Utc::now().fixed_offset();
        let (num, boolean, text) = value_to_columns(value);

        let existing = ThEntity::find()
            .filter(ThCol::MetricInstanceId.eq(metric_instance_id))
            .filter(ThCol::Name.eq(DEFAULT_NAME))
            .one(self.db())
            .await?;

        let model = match existing {
            Some(m) => {
                let mut am: threshold::ActiveModel = m.into();
                am.comparison = Set(comparison.to_string());
                am.value_num = Set(num);
                am.value_bool = Set(boolean);
                am.value_str = Set(text);
                am.severity = Set(severity.to_string());
                am.updated_at = Set(now);
                am.update(self.db()).await?
            }
            None => {
                let am = threshold::ActiveModel {
                    id: Set(vigil_common::id::next_id()),
                    metric_instance_id: Set(metric_instance_id.to_owned()),
                    name: Set(DEFAULT_NAME.to_owned()),
                    comparison: Set(comparison.to_string()),
                    value_num: Set(num),
                    value_bool: Set(boolean),
                    value_str: Set(text),
                    severity: Set(severity.to_string()),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                am.insert(self.db()).await?
            }
        };

        model_to_row(model)?.ok_or_else(|| {
            crate::error::StorageError::Other("threshold written without a value".to_string())
        })
    }

    pub async fn delete_threshold(&self, metric_instance_id: &str) -> Result<bool> {
        let res = ThEntity::delete_many()
            .filter(ThCol::MetricInstanceId.eq(metric_instance_id))
            .exec(self.db())
            .await?;
        Ok(res.rows_affected > 0)
    }
}
