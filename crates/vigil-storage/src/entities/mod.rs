pub mod api_key;
pub mod client;
pub mod client_settings;
pub mod http_target;
pub mod incident;
pub mod ingest_event;
pub mod machine;
pub mod metric_definition;
pub mod metric_instance;
pub mod notification_log;
pub mod outbox_event;
pub mod sample;
pub mod threshold;
