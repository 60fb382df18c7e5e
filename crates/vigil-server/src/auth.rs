use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderName, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::api::ApiError;
use crate::state::AppState;

/// Bearer header carried by agents and operator tooling alike.
static API_KEY_HEADER: HeaderName = HeaderName::from_static("x-api-key");

/// The authenticated tenant scope, injected into request extensions for
/// every handler behind the middleware.
#[derive(Debug, Clone)]
pub struct AuthedClient {
    pub client_id: String,
    pub api_key_id: String,
}

/// Validates `X-API-Key` against the store (through the short-TTL cache)
/// and scopes the request to the key's client.
///
/// 401 distinguishes a missing header from an unknown or disabled key in
/// the message only; both are AUTH failures.
pub async fn api_key_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let Some(key) = req
        .headers()
        .get(&API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
    else {
        return ApiError::auth("Missing API key").into_response();
    };

    let cached = state.api_keys.get(&key);
    let row = match cached {
        Some(row) => row,
        None => {
            let row = match state.store.find_active_api_key(&key).await {
                Ok(row) => row,
                Err(e) => {
                    tracing::error!(error = %e, "API key lookup failed");
                    return ApiError::internal("authentication backend error").into_response();
                }
            };
            state.api_keys.put(&key, row.clone());
            row
        }
    };

    let Some(row) = row else {
        tracing::warn!("rejected request with invalid or inactive API key");
        return ApiError::auth("Invalid API key").into_response();
    };

    // Usage stamp is advisory; never blocks the request path.
    {
        let store = state.store.clone();
        let key_id = row.id.clone();
        tokio::spawn(async move {
            if let Err(e) = store.touch_api_key(&key_id).await {
                tracing::debug!(error = %e, "failed to stamp api key usage");
            }
        });
    }

    req.extensions_mut().insert(AuthedClient {
        client_id: row.client_id,
        api_key_id: row.id,
    });
    next.run(req).await
}
