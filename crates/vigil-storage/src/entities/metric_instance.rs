use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "metric_instances")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub machine_id: String,
    pub definition_id: String,
    pub alert_enabled: bool,
    pub paused: bool,
    pub state: String,
    pub pending_since: Option<DateTimeWithTimeZone>,
    pub critical_streak: i32,
    pub last_value_num: Option<f64>,
    pub last_value_bool: Option<bool>,
    pub last_value_str: Option<String>,
    pub last_value_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
