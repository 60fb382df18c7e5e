use axum::extract::State;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::Serialize;
use utoipa::ToSchema;
use vigil_storage::{ClientSettingsRow, SettingsUpdate};

use crate::api::{ApiError, ApiResult};
use crate::auth::AuthedClient;
use crate::state::AppState;

#[derive(Serialize, ToSchema)]
pub struct SettingsResponse {
    pub notification_email: Option<String>,
    pub slack_webhook_url: Option<String>,
    pub slack_channel_name: Option<String>,
    pub grace_period_seconds: i64,
    pub reminder_notification_seconds: i64,
    pub alert_grouping_enabled: bool,
    pub notify_on_resolve: bool,
    pub heartbeat_threshold_minutes: i64,
    pub consecutive_failures_threshold: i32,
}

fn row_to_response(row: ClientSettingsRow) -> SettingsResponse {
    SettingsResponse {
        notification_email: row.notification_email,
        slack_webhook_url: row.slack_webhook_url,
        slack_channel_name: row.slack_channel_name,
        grace_period_seconds: row.grace_period_seconds,
        reminder_notification_seconds: row.reminder_notification_seconds,
        alert_grouping_enabled: row.alert_grouping_enabled,
        notify_on_resolve: row.notify_on_resolve,
        heartbeat_threshold_minutes: row.heartbeat_threshold_minutes,
        consecutive_failures_threshold: row.consecutive_failures_threshold,
    }
}

/// Notification and evaluation settings for the authenticated client.
#[utoipa::path(
    get,
    path = "/api/v1/settings",
    tag = "Settings",
    security(("api_key" = [])),
    responses(
        (status = 200, description = "Client settings", body = SettingsResponse),
        (status = 401, description = "Missing or invalid API key")
    )
)]
pub async fn get_settings(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthedClient>,
) -> ApiResult<impl IntoResponse> {
    let row = state.store.get_settings(&auth.client_id).await?;
    Ok(Json(row_to_response(row)))
}

/// Partial update of client settings; omitted fields are untouched.
#[utoipa::path(
    put,
    path = "/api/v1/settings",
    tag = "Settings",
    security(("api_key" = [])),
    responses(
        (status = 200, description = "Updated settings", body = SettingsResponse),
        (status = 422, description = "Malformed body")
    )
)]
pub async fn put_settings(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthedClient>,
    payload: Result<Json<SettingsUpdate>, axum::extract::rejection::JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(update) =
        payload.map_err(|e| ApiError::validation_field(&["body"], &e.body_text()))?;
    let row = state.store.update_settings(&auth.client_id, &update).await?;
    Ok(Json(row_to_response(row)))
}
