//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post, put};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/v1/health", get(handlers::health_check))
        .route("/v1/stores/{store}/files", post(handlers::create_file))
        .route(
            "/v1/stores/{store}/files/{file_id}",
            get(handlers::get_file_record).delete(handlers::delete_file),
        )
        .route(
            "/v1/stores/{store}/files/{file_id}/chunk",
            put(handlers::write_chunk),
        )
        .route(
            "/v1/stores/{store}/files/{file_id}/complete",
            post(handlers::complete_file),
        )
        .route(
            "/v1/stores/{store}/files/{file_id}/stop",
            post(handlers::stop_upload),
        )
        .route("/v1/stores/{store}/import", post(handlers::import_file));

    // Raw transfer routes live under the configured stores path, e.g. /ufs.
    let transfer_routes = Router::new()
        .route(
            "/{store}/{file_id}",
            post(handlers::post_chunk).get(handlers::get_file),
        )
        .route("/{store}/{file_id}/{name}", get(handlers::get_named_file));
    let stores_path = format!("/{}", state.config.server.stores_path.trim_matches('/'));

    let mut router = Router::new()
        .merge(api_routes)
        .nest(&stores_path, transfer_routes);

    // When enabled, restrict /metrics to the scraper at the network level.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
