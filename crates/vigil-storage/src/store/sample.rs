use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, Order,
    QueryFilter, QueryOrder, QuerySelect, Statement,
};
use serde::Serialize;
use vigil_common::types::MetricValue;

use crate::entities::sample::{self, Column as SampleCol, Entity as SampleEntity};
use crate::error::Result;
use crate::store::{value_from_columns, value_to_columns, Store};

#[derive(Debug, Clone, Serialize)]
pub struct SampleRow {
    pub id: String,
    pub metric_instance_id: String,
    pub ts: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub value: MetricValue,
}

fn model_to_row(m: sample::Model) -> Option<SampleRow> {
    Some(SampleRow {
        value: value_from_columns(m.value_num, m.value_bool, m.value_str)?,
        id: m.id,
        metric_instance_id: m.metric_instance_id,
        ts: m.ts.with_timezone(&Utc),
        sent_at: m.sent_at.map(|t| t.with_timezone(&Utc)),
    })
}

/// Appends one sample. `ts` is the server receive time; `sent_at` is the
/// agent's clock, kept for skew diagnostics only.
pub(crate) async fn append_sample<C: ConnectionTrait>(
    conn: &C,
    metric_instance_id: &str,
    ts: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
    value: &MetricValue,
) -> Result<SampleRow> {
    let (num, boolean, text) = value_to_columns(value);
    let am = sample::ActiveModel {
        id: Set(vigil_common::id::next_id()),
        metric_instance_id: Set(metric_instance_id.to_owned()),
        ts: Set(ts.fixed_offset()),
        sent_at: Set(sent_at.map(|t| t.fixed_offset())),
        value_num: Set(num),
        value_bool: Set(boolean),
        value_str: Set(text),
    };
    let model = am.insert(conn).await?;
    Ok(model_to_row(model).expect("freshly written sample has a value"))
}

impl Store {
    pub async fn append_sample(
        &self,
        metric_instance_id: &str,
        ts: DateTime<Utc>,
        sent_at: Option<DateTime<Utc>>,
        value: &MetricValue,
    ) -> Result<SampleRow> {
        append_sample(self.db(), metric_instance_id, ts, sent_at, value).await
    }

    pub async fn latest_sample(&self, metric_instance_id: &str) -> Result<Option<SampleRow>> {
        let model = SampleEntity::find()
            .filter(SampleCol::MetricInstanceId.eq(metric_instance_id))
            .order_by(SampleCol::Ts, Order::Desc)
            .one(self.db())
            .await?;
        Ok(model.and_then(model_to_row))
    }

    /// Recent history for one instance, newest first.
    pub async fn list_samples(
        &self,
        metric_instance_id: &str,
        limit: usize,
    ) -> Result<Vec<SampleRow>> {
        let rows = SampleEntity::find()
            .filter(SampleCol::MetricInstanceId.eq(metric_instance_id))
            .order_by(SampleCol::Ts, Order::Desc)
            .limit(limit as u64)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().filter_map(model_to_row).collect())
    }

    pub async fn count_samples(&self, metric_instance_id: &str) -> Result<u64> {
        use sea_orm::PaginatorTrait;
        Ok(SampleEntity::find()
            .filter(SampleCol::MetricInstanceId.eq(metric_instance_id))
            .count(self.db())
            .await?)
    }

    /// Trims every instance to its most recent `keep` samples. The core
    /// only needs recent history for evaluation and UI display.
    pub async fn trim_samples(&self, keep: u64) -> Result<u64> {
        let stmt = Statement::from_sql_and_values(
            sea_orm::DatabaseBackend::Sqlite,
            "DELETE FROM samples WHERE id IN (
                 SELECT id FROM (
                     SELECT id, ROW_NUMBER() OVER (
                         PARTITION BY metric_instance_id ORDER BY ts DESC
                     ) AS rn FROM samples
                 ) WHERE rn > ?
             )",
            [keep.into()],
        );
        let res = self.db().execute(stmt).await?;
        Ok(res.rows_affected())
    }
}
