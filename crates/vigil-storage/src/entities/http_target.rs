use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "http_targets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub client_id: String,
    pub name: String,
    pub url: String,
    pub method: String,
    pub accepted_status_codes: String,
    pub timeout_ms: i64,
    pub check_interval_s: i64,
    pub is_active: bool,
    pub state: String,
    pub pending_since: Option<DateTimeWithTimeZone>,
    pub critical_streak: i32,
    pub last_check_at: Option<DateTimeWithTimeZone>,
    pub last_status: Option<i32>,
    pub last_latency_ms: Option<i64>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
