pub mod health;
pub mod http_targets;
pub mod incidents;
pub mod ingest;
pub mod machines;
pub mod metrics;
pub mod settings;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;
use vigil_storage::StorageError;

use crate::state::AppState;

/// Structured error body: everything rides under `detail`, either a
/// `{message, ...}` object or a list of field-level entries for 422.
#[derive(Debug)]
pub enum ApiError {
    Auth(String),
    NotFound(String),
    Conflict {
        message: String,
        existing_id: String,
    },
    Validation(serde_json::Value),
    Internal(String),
}

impl ApiError {
    pub fn auth(msg: &str) -> Self {
        ApiError::Auth(msg.to_string())
    }

    pub fn not_found(msg: &str) -> Self {
        ApiError::NotFound(msg.to_string())
    }

    pub fn internal(msg: &str) -> Self {
        ApiError::Internal(msg.to_string())
    }

    pub fn validation(msg: &str) -> Self {
        ApiError::Validation(serde_json::json!({ "message": msg }))
    }

    /// Field-level 422 entry in the conventional `loc`/`msg` shape.
    pub fn validation_field(loc: &[&str], msg: &str) -> Self {
        ApiError::Validation(serde_json::json!([{ "loc": loc, "msg": msg }]))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::Auth(msg) => (
                StatusCode::UNAUTHORIZED,
                serde_json::json!({ "message": msg }),
            ),
            ApiError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, serde_json::json!({ "message": msg }))
            }
            ApiError::Conflict {
                message,
                existing_id,
            } => (
                StatusCode::CONFLICT,
                serde_json::json!({ "message": message, "existing_id": existing_id }),
            ),
            ApiError::Validation(detail) => (StatusCode::UNPROCESSABLE_ENTITY, detail),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error surfaced to API");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({ "message": "internal server error" }),
                )
            }
        };
        (status, Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { entity, id } => {
                ApiError::not_found(&format!("{entity} '{id}' not found"))
            }
            StorageError::Conflict {
                entity,
                existing_id,
            } => ApiError::Conflict {
                message: format!("A {entity} with this key already exists for this client."),
                existing_id,
            },
            StorageError::TypeDrift {
                metric,
                expected,
                got,
            } => ApiError::validation_field(
                &["body", "metrics"],
                &format!("metric '{metric}' is declared {expected} but batch carries {got}"),
            ),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Standard `limit`/`offset` query parameters.
#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PaginationParams {
    /// Page size (default 20, capped at 200).
    #[param(required = false)]
    pub limit: Option<u64>,
    /// Offset (default 0).
    #[param(required = false)]
    pub offset: Option<u64>,
}

impl PaginationParams {
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(20).min(200) as usize
    }

    pub fn offset(&self) -> usize {
        self.offset.unwrap_or(0) as usize
    }
}

/// Paginated list envelope.
#[derive(Serialize, ToSchema)]
pub struct Paginated<T>
where
    T: Serialize,
{
    pub items: Vec<T>,
    pub total: u64,
    pub limit: usize,
    pub offset: usize,
}

/// Routes that require no authentication.
pub fn public_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(routes!(health::health))
}

/// Routes behind the `X-API-Key` middleware, client-scoped.
pub fn protected_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(ingest::ingest_metrics))
        .routes(routes!(
            http_targets::list_targets,
            http_targets::create_target
        ))
        .routes(routes!(
            http_targets::update_target,
            http_targets::delete_target
        ))
        .routes(routes!(http_targets::check_target))
        .routes(routes!(incidents::list_incidents))
        .routes(routes!(incidents::list_alerts))
        .routes(routes!(incidents::list_notifications))
        .routes(routes!(machines::list_machines))
        .routes(routes!(machines::get_machine))
        .routes(routes!(machines::machine_metrics))
        .routes(routes!(metrics::get_metric))
        .routes(routes!(metrics::metric_samples))
        .routes(routes!(metrics::patch_alerting))
        .routes(routes!(metrics::patch_pause))
        .routes(routes!(metrics::create_default_threshold))
        .routes(routes!(settings::get_settings, settings::put_settings))
}
