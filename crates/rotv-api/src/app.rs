use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::metrics::metrics_handler;
use crate::routes;
use crate::state::AppState;

// No global CORS layer: manifest endpoints add the permissive header only
// on `?cors=1`, segment and passthrough handlers always set it themselves.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health))
        .merge(routes::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
