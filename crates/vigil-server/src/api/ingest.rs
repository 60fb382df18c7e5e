use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use chrono::{Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use utoipa::ToSchema;
use vigil_common::types::IngestRequest;

use crate::api::{ApiError, ApiResult};
use crate::auth::AuthedClient;
use crate::runtime::EvalIntent;
use crate::state::AppState;

const MAX_INGEST_ID_LEN: usize = 64;

#[derive(Serialize, ToSchema)]
pub struct IngestResponse {
    pub accepted: bool,
    pub duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub ingest_id: String,
}

/// Deterministic fallback when the agent sends no `X-Ingest-Id`: a
/// retransmit of the same batch hashes to the same id and dedupes anyway.
fn auto_ingest_id(client_id: &str, fingerprint: &str, request: &IngestRequest) -> String {
    let mut metrics: Vec<(String, String, String)> = request
        .metrics
        .iter()
        .map(|m| {
            (
                m.name.clone(),
                m.value_type.to_string(),
                m.value.to_string(),
            )
        })
        .collect();
    metrics.sort();

    let sent = request.sent_at.timestamp();
    let mut hasher = Sha256::new();
    hasher.update(format!("{client_id}|{fingerprint}|{sent}|{metrics:?}"));
    let digest = hasher.finalize();

    use std::fmt::Write;
    let mut id = String::with_capacity(MAX_INGEST_ID_LEN);
    id.push_str("auto-");
    for b in digest {
        if id.len() + 2 > MAX_INGEST_ID_LEN {
            break;
        }
        let _ = write!(id, "{b:02x}");
    }
    id
}

/// Accepts a metric batch from an agent.
///
/// Duplicate `X-Ingest-Id` submissions are acknowledged with
/// `duplicate=true` and no further side effects. Validation failures
/// reject the whole batch; nothing is half-applied.
#[utoipa::path(
    post,
    path = "/api/v1/ingest/metrics",
    tag = "Ingest",
    security(("api_key" = [])),
    responses(
        (status = 202, description = "Batch accepted (or acknowledged as duplicate)", body = IngestResponse),
        (status = 401, description = "Missing or invalid API key"),
        (status = 422, description = "Malformed batch or metric type drift")
    )
)]
pub async fn ingest_metrics(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthedClient>,
    headers: HeaderMap,
    payload: Result<Json<IngestRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload
        .map_err(|e| ApiError::validation_field(&["body"], &e.body_text()))?;

    let header_id = headers
        .get("x-ingest-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    if let Some(ref id) = header_id {
        if id.is_empty() || id.len() > MAX_INGEST_ID_LEN {
            return Err(ApiError::validation_field(
                &["header", "X-Ingest-Id"],
                "must be 1-64 characters",
            ));
        }
    }

    // Both window checks are strict: a batch sitting exactly on either
    // limit is still accepted and stored.
    let now = Utc::now();
    if request.sent_at - now > Duration::seconds(state.config.ingest.future_max_seconds) {
        return Err(ApiError::validation_field(
            &["body", "sent_at"],
            "collection time is in the future",
        ));
    }
    if now - request.sent_at > Duration::seconds(state.config.ingest.late_max_seconds) {
        // Too old to evaluate; acknowledge so the agent stops retrying.
        return Ok((
            StatusCode::ACCEPTED,
            Json(IngestResponse {
                accepted: false,
                duplicate: false,
                reason: Some("archived".to_string()),
                ingest_id: header_id.unwrap_or_default(),
            }),
        ));
    }

    if request.machine.fingerprint.trim().is_empty() {
        return Err(ApiError::validation_field(
            &["body", "machine", "fingerprint"],
            "fingerprint must not be empty",
        ));
    }

    let ingest_id = header_id.unwrap_or_else(|| {
        auto_ingest_id(&auth.client_id, &request.machine.fingerprint, &request)
    });

    let outcome = state
        .store
        .ingest_batch(&auth.client_id, &ingest_id, &request, now)
        .await?;

    if !outcome.duplicate {
        for instance_id in &outcome.instance_ids {
            state
                .eval
                .dispatch(EvalIntent::Metric {
                    client_id: auth.client_id.clone(),
                    instance_id: instance_id.clone(),
                })
                .await;
        }
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            accepted: true,
            duplicate: outcome.duplicate,
            reason: None,
            ingest_id,
        }),
    ))
}
