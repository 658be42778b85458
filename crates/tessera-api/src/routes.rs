//! Router setup with all API routes and middleware.

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use tessera_core::config::TesseraConfig;
use tessera_core::error::TesseraError;

use crate::auth::USER_ID_HEADER;
use crate::handlers;
use crate::state::AppState;

/// Create the axum Router with all routes and middleware.
///
/// Public routes identify the caller by header; `/internal` routes sit
/// behind the bearer-token middleware.
pub fn create_router(state: AppState) -> Router {
    let port = state.config.general.port;
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", port),
        format!("http://localhost:{}", port),
    ]
    .iter()
    .filter_map(|origin| origin.parse().ok())
    .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            HeaderName::from_static(USER_ID_HEADER),
        ]);

    let public_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/actions", get(handlers::list_actions))
        .route("/actions/batch", post(handlers::batch_actions))
        .route(
            "/actions/{id}",
            get(handlers::get_action)
                .patch(handlers::patch_action)
                .delete(handlers::delete_action),
        )
        .route("/actions/{id}/execute", post(handlers::execute_action))
        .route(
            "/actions/{id}/resolve-duplicate",
            post(handlers::resolve_duplicate),
        )
        .route("/actions/{id}/preview", get(handlers::get_preview));

    let internal_routes = Router::new()
        .route("/internal/actions", post(handlers::create_action))
        .route(
            "/internal/actions/{id}/preview",
            put(handlers::put_preview),
        )
        .route("/internal/actions/{id}/result", post(handlers::record_result))
        .route(
            "/internal/events/action-created",
            post(handlers::action_created),
        )
        .route(
            "/internal/events/action-created/{action_type}",
            post(handlers::action_created_for_type),
        )
        .route(
            "/internal/events/approval-reply",
            post(handlers::approval_reply),
        )
        .route("/internal/sweep/retry-pending", post(handlers::retry_sweep))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::auth::require_internal_token,
        ));

    public_routes
        .merge(internal_routes)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server on the configured port.
///
/// Binds to 127.0.0.1; a gateway in front of the service sets `x-user-id`.
pub async fn start_server(config: &TesseraConfig, state: AppState) -> Result<(), TesseraError> {
    let addr = format!("127.0.0.1:{}", config.general.port);
    let router = create_router(state);

    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(TesseraError::Io)?;

    axum::serve(listener, router)
        .await
        .map_err(TesseraError::Io)?;

    Ok(())
}
