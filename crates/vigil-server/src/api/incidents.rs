use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use vigil_storage::{IncidentRow, NotificationLogFilter};

use crate::api::{ApiResult, Paginated, PaginationParams};
use crate::auth::AuthedClient;
use crate::state::AppState;

#[derive(Serialize, ToSchema)]
pub struct IncidentResponse {
    pub id: String,
    pub http_target_id: Option<String>,
    pub metric_instance_id: Option<String>,
    pub status: String,
    pub severity: String,
    pub title: String,
    pub description: Option<String>,
    pub opened_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub last_observed_at: DateTime<Utc>,
    pub last_notified_at: Option<DateTime<Utc>>,
}

fn row_to_response(row: IncidentRow) -> IncidentResponse {
    IncidentResponse {
        id: row.id,
        http_target_id: row.http_target_id,
        metric_instance_id: row.metric_instance_id,
        status: row.status,
        severity: row.severity.to_string(),
        title: row.title,
        description: row.description,
        opened_at: row.opened_at,
        resolved_at: row.resolved_at,
        last_observed_at: row.last_observed_at,
        last_notified_at: row.last_notified_at,
    }
}

#[derive(Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct IncidentsQuery {
    /// Filter by status: `open` or `resolved`.
    #[param(required = false)]
    pub status: Option<String>,
}

/// Incident history for the authenticated client, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/incidents",
    tag = "Incidents",
    security(("api_key" = [])),
    params(IncidentsQuery, PaginationParams),
    responses(
        (status = 200, description = "Incident page", body = Paginated<IncidentResponse>),
        (status = 401, description = "Missing or invalid API key")
    )
)]
pub async fn list_incidents(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthedClient>,
    Query(query): Query<IncidentsQuery>,
    Query(pagination): Query<PaginationParams>,
) -> ApiResult<impl IntoResponse> {
    let limit = pagination.limit();
    let offset = pagination.offset();
    let status = query.status.as_deref();

    let total = state.store.count_incidents(&auth.client_id, status).await?;
    let rows = state
        .store
        .list_incidents(&auth.client_id, status, limit, offset)
        .await?;

    Ok(Json(Paginated {
        items: rows.into_iter().map(row_to_response).collect::<Vec<_>>(),
        total,
        limit,
        offset,
    }))
}

#[derive(Serialize, ToSchema)]
pub struct ActiveAlertResponse {
    pub metric_instance_id: String,
    pub machine_id: String,
    pub hostname: String,
    pub metric_name: String,
    #[schema(value_type = Object)]
    pub last_value: Option<serde_json::Value>,
    pub last_value_at: Option<DateTime<Utc>>,
    pub since: Option<DateTime<Utc>>,
}

/// Metric instances currently in CRITICAL state.
#[utoipa::path(
    get,
    path = "/api/v1/alerts",
    tag = "Incidents",
    security(("api_key" = [])),
    responses(
        (status = 200, description = "Active alerts", body = Vec<ActiveAlertResponse>),
        (status = 401, description = "Missing or invalid API key")
    )
)]
pub async fn list_alerts(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthedClient>,
) -> ApiResult<impl IntoResponse> {
    let rows = state.store.list_critical_alerts(&auth.client_id).await?;
    let items: Vec<ActiveAlertResponse> = rows
        .into_iter()
        .map(|r| ActiveAlertResponse {
            metric_instance_id: r.metric_instance_id,
            machine_id: r.machine_id,
            hostname: r.hostname,
            metric_name: r.metric_name,
            last_value: r.last_value.map(|v| serde_json::to_value(v).unwrap_or_default()),
            last_value_at: r.last_value_at,
            since: r.since,
        })
        .collect();
    Ok(Json(items))
}

#[derive(Serialize, ToSchema)]
pub struct NotificationResponse {
    pub id: String,
    pub incident_id: Option<String>,
    pub provider: String,
    pub recipient: String,
    pub kind: String,
    pub status: String,
    pub error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct NotificationsQuery {
    #[param(required = false)]
    pub incident_id: Option<String>,
    #[param(required = false)]
    pub provider: Option<String>,
    /// `pending`, `success`, or `failed`.
    #[param(required = false)]
    pub status: Option<String>,
}

/// Notification delivery ledger, newest first. Failures are visible here
/// rather than surfaced to agents.
#[utoipa::path(
    get,
    path = "/api/v1/notifications",
    tag = "Incidents",
    security(("api_key" = [])),
    params(NotificationsQuery, PaginationParams),
    responses(
        (status = 200, description = "Notification page", body = Paginated<NotificationResponse>),
        (status = 401, description = "Missing or invalid API key")
    )
)]
pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthedClient>,
    Query(query): Query<NotificationsQuery>,
    Query(pagination): Query<PaginationParams>,
) -> ApiResult<impl IntoResponse> {
    let limit = pagination.limit();
    let offset = pagination.offset();
    let filter = NotificationLogFilter {
        incident_id: query.incident_id,
        provider: query.provider,
        status: query.status,
    };

    let total = state
        .store
        .count_notification_logs(&auth.client_id, &filter)
        .await?;
    let rows = state
        .store
        .list_notification_logs(&auth.client_id, &filter, limit, offset)
        .await?;

    Ok(Json(Paginated {
        items: rows
            .into_iter()
            .map(|r| NotificationResponse {
                id: r.id,
                incident_id: r.incident_id,
                provider: r.provider,
                recipient: r.recipient,
                kind: r.kind.to_string(),
                status: r.status,
                error: r.error,
                sent_at: r.sent_at,
                created_at: r.created_at,
            })
            .collect::<Vec<_>>(),
        total,
        limit,
        offset,
    }))
}
