use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use vigil_common::types::{Comparison, MetricValue, Severity};
use vigil_storage::InstanceDetail;

use crate::api::{ApiError, ApiResult};
use crate::auth::AuthedClient;
use crate::runtime::EvalIntent;
use crate::state::AppState;

#[derive(Serialize, ToSchema)]
pub struct MetricResponse {
    pub id: String,
    pub machine_id: String,
    pub hostname: String,
    pub name: String,
    pub value_type: String,
    pub unit: Option<String>,
    pub alert_enabled: bool,
    pub paused: bool,
    pub state: String,
    #[schema(value_type = Object)]
    pub last_value: Option<serde_json::Value>,
    pub last_value_at: Option<DateTime<Utc>>,
}

pub(crate) fn detail_to_response(detail: InstanceDetail) -> MetricResponse {
    MetricResponse {
        id: detail.instance.id,
        machine_id: detail.instance.machine_id,
        hostname: detail.hostname,
        name: detail.metric_name,
        value_type: detail.value_type.to_string(),
        unit: detail.unit,
        alert_enabled: detail.instance.alert_enabled,
        paused: detail.instance.paused,
        state: detail.instance.state.to_string(),
        last_value: detail
            .instance
            .last_value
            .map(|v| serde_json::to_value(v).unwrap_or_default()),
        last_value_at: detail.instance.last_value_at,
    }
}

async fn owned_detail(state: &AppState, auth: &AuthedClient, id: &str) -> ApiResult<InstanceDetail> {
    match state.store.get_instance_detail(id).await? {
        Some(detail) if detail.client_id == auth.client_id => Ok(detail),
        _ => Err(ApiError::not_found(&format!("metric '{id}' not found"))),
    }
}

/// One metric instance with its definition context.
#[utoipa::path(
    get,
    path = "/api/v1/metrics/{id}",
    tag = "Metrics",
    security(("api_key" = [])),
    params(("id" = String, Path, description = "Metric instance id")),
    responses(
        (status = 200, description = "Instance detail", body = MetricResponse),
        (status = 404, description = "Unknown metric instance")
    )
)]
pub async fn get_metric(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthedClient>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let detail = owned_detail(&state, &auth, &id).await?;
    Ok(Json(detail_to_response(detail)))
}

#[derive(Serialize, ToSchema)]
pub struct SampleResponse {
    pub ts: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    #[schema(value_type = Object)]
    pub value: serde_json::Value,
}

#[derive(Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SamplesQuery {
    /// Most recent N samples (default 50, capped at 500).
    #[param(required = false)]
    pub limit: Option<u64>,
}

/// Recent samples for one instance, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/metrics/{id}/samples",
    tag = "Metrics",
    security(("api_key" = [])),
    params(("id" = String, Path, description = "Metric instance id"), SamplesQuery),
    responses(
        (status = 200, description = "Recent samples", body = Vec<SampleResponse>),
        (status = 404, description = "Unknown metric instance")
    )
)]
pub async fn metric_samples(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthedClient>,
    Path(id): Path<String>,
    Query(query): Query<SamplesQuery>,
) -> ApiResult<impl IntoResponse> {
    owned_detail(&state, &auth, &id).await?;
    let limit = query.limit.unwrap_or(50).min(500) as usize;
    let rows = state.store.list_samples(&id, limit).await?;
    let items: Vec<SampleResponse> = rows
        .into_iter()
        .map(|s| SampleResponse {
            ts: s.ts,
            sent_at: s.sent_at,
            value: serde_json::to_value(s.value).unwrap_or_default(),
        })
        .collect();
    Ok(Json(items))
}

#[derive(Deserialize, ToSchema)]
pub struct AlertingPatch {
    pub enabled: bool,
}

/// Enables or disables alerting for an instance. Disabling forces the
/// state to UNKNOWN on the next evaluation and resolves any open
/// incident (operator-suppression semantics); the re-evaluation is
/// enqueued immediately.
#[utoipa::path(
    patch,
    path = "/api/v1/metrics/{id}/alerting",
    tag = "Metrics",
    security(("api_key" = [])),
    params(("id" = String, Path, description = "Metric instance id")),
    request_body = AlertingPatch,
    responses(
        (status = 200, description = "Updated instance", body = MetricResponse),
        (status = 404, description = "Unknown metric instance")
    )
)]
pub async fn patch_alerting(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthedClient>,
    Path(id): Path<String>,
    Json(payload): Json<AlertingPatch>,
) -> ApiResult<impl IntoResponse> {
    owned_detail(&state, &auth, &id).await?;
    state
        .store
        .set_instance_alerting(&id, payload.enabled)
        .await?
        .ok_or_else(|| ApiError::not_found(&format!("metric '{id}' not found")))?;

    state
        .eval
        .dispatch(EvalIntent::Metric {
            client_id: auth.client_id.clone(),
            instance_id: id.clone(),
        })
        .await;

    let detail = owned_detail(&state, &auth, &id).await?;
    Ok(Json(detail_to_response(detail)))
}

#[derive(Deserialize, ToSchema)]
pub struct PausePatch {
    pub paused: bool,
}

/// Pauses or resumes evaluation for an instance. Same suppression
/// semantics as disabling alerting.
#[utoipa::path(
    patch,
    path = "/api/v1/metrics/{id}/pause",
    tag = "Metrics",
    security(("api_key" = [])),
    params(("id" = String, Path, description = "Metric instance id")),
    request_body = PausePatch,
    responses(
        (status = 200, description = "Updated instance", body = MetricResponse),
        (status = 404, description = "Unknown metric instance")
    )
)]
pub async fn patch_pause(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthedClient>,
    Path(id): Path<String>,
    Json(payload): Json<PausePatch>,
) -> ApiResult<impl IntoResponse> {
    owned_detail(&state, &auth, &id).await?;
    state
        .store
        .set_instance_paused(&id, payload.paused)
        .await?
        .ok_or_else(|| ApiError::not_found(&format!("metric '{id}' not found")))?;

    state
        .eval
        .dispatch(EvalIntent::Metric {
            client_id: auth.client_id.clone(),
            instance_id: id.clone(),
        })
        .await;

    let detail = owned_detail(&state, &auth, &id).await?;
    Ok(Json(detail_to_response(detail)))
}

#[derive(Deserialize, ToSchema)]
pub struct DefaultThresholdIn {
    /// One of gt, lt, ge, le, eq, ne, contains.
    pub comparison: String,
    /// Typed to match the metric definition: number, bool, or string.
    #[schema(value_type = Object)]
    pub value: serde_json::Value,
    #[serde(default = "default_severity")]
    pub severity: String,
}

fn default_severity() -> String {
    "warning".to_string()
}

#[derive(Serialize, ToSchema)]
pub struct ThresholdResponse {
    pub id: String,
    pub metric_instance_id: String,
    pub comparison: String,
    #[schema(value_type = Object)]
    pub value: serde_json::Value,
    pub severity: String,
}

/// Installs (or replaces) the instance's default threshold.
#[utoipa::path(
    post,
    path = "/api/v1/metrics/{id}/thresholds/default",
    tag = "Metrics",
    security(("api_key" = [])),
    params(("id" = String, Path, description = "Metric instance id")),
    request_body = DefaultThresholdIn,
    responses(
        (status = 201, description = "Threshold installed", body = ThresholdResponse),
        (status = 404, description = "Unknown metric instance"),
        (status = 422, description = "Comparison or value incompatible with the metric type")
    )
)]
pub async fn create_default_threshold(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthedClient>,
    Path(id): Path<String>,
    Json(payload): Json<DefaultThresholdIn>,
) -> ApiResult<impl IntoResponse> {
    let detail = owned_detail(&state, &auth, &id).await?;

    let comparison: Comparison = payload
        .comparison
        .parse()
        .map_err(|_| ApiError::validation_field(&["body", "comparison"], "unknown comparison"))?;
    let severity: Severity = payload
        .severity
        .parse()
        .map_err(|_| ApiError::validation_field(&["body", "severity"], "unknown severity"))?;
    let value: MetricValue = serde_json::from_value(payload.value)
        .map_err(|_| ApiError::validation_field(&["body", "value"], "value must be a scalar"))?;

    if value.kind() != detail.value_type {
        return Err(ApiError::validation_field(
            &["body", "value"],
            &format!(
                "threshold value must be {} to match the metric",
                detail.value_type
            ),
        ));
    }
    let comparison_ok = match detail.value_type {
        vigil_common::types::ValueType::Number => !matches!(comparison, Comparison::Contains),
        vigil_common::types::ValueType::Bool => {
            matches!(comparison, Comparison::Eq | Comparison::Ne)
        }
        vigil_common::types::ValueType::String => matches!(
            comparison,
            Comparison::Eq | Comparison::Ne | Comparison::Contains
        ),
    };
    if !comparison_ok {
        return Err(ApiError::validation_field(
            &["body", "comparison"],
            &format!("'{comparison}' is not defined for {} metrics", detail.value_type),
        ));
    }

    let row = state
        .store
        .upsert_default_threshold(&id, comparison, &value, severity)
        .await?;

    // Evaluate against the new rule right away.
    state
        .eval
        .dispatch(EvalIntent::Metric {
            client_id: auth.client_id.clone(),
            instance_id: id.clone(),
        })
        .await;

    Ok((
        axum::http::StatusCode::CREATED,
        Json(ThresholdResponse {
            id: row.id,
            metric_instance_id: row.metric_instance_id,
            comparison: row.comparison.to_string(),
            value: serde_json::to_value(row.value).unwrap_or_default(),
            severity: row.severity.to_string(),
        }),
    ))
}
