use axum::middleware;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::state::AppState;
use crate::{api, auth, logging};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "vigil API",
        description = "Multi-tenant monitoring backend: agent ingest, HTTP probing, incidents, notifications",
    ),
    tags(
        (name = "Health", description = "Liveness"),
        (name = "Ingest", description = "Agent metric ingestion"),
        (name = "HttpTargets", description = "HTTP endpoint monitoring"),
        (name = "Incidents", description = "Incidents, active alerts, notification ledger"),
        (name = "Machines", description = "Monitored hosts"),
        (name = "Metrics", description = "Metric instances and thresholds"),
        (name = "Settings", description = "Per-client notification settings")
    ),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "api_key",
            utoipa::openapi::security::SecurityScheme::ApiKey(
                utoipa::openapi::security::ApiKey::Header(
                    utoipa::openapi::security::ApiKeyValue::new("X-API-Key"),
                ),
            ),
        );
    }
}

pub fn build_http_app(state: AppState) -> Router {
    let (public_router, public_spec) = api::public_routes().split_for_parts();
    let (protected_router, protected_spec) = api::protected_routes().split_for_parts();

    let mut spec = ApiDoc::openapi();
    spec.merge(public_spec);
    spec.merge(protected_spec);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    public_router
        .merge(protected_router.layer(middleware::from_fn_with_state(
            state.clone(),
            auth::api_key_middleware,
        )))
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api/v1/openapi.json", spec))
        .layer(cors)
        .layer(middleware::from_fn(logging::request_logging))
}
