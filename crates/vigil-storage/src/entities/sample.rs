use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "samples")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub metric_instance_id: String,
    pub ts: DateTimeWithTimeZone,
    pub sent_at: Option<DateTimeWithTimeZone>,
    pub value_num: Option<f64>,
    pub value_bool: Option<bool>,
    pub value_str: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
