use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "client_settings")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
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
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
