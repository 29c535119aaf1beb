use axum::{
    Router,
    http::Method,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handler::{self, AppState};

pub fn routes(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers(Any);

    Router::new()
        .route("/", get(handler::healthcheck))
        .route("/info", get(handler::info))
        .route("/bookmarks", post(handler::create_bookmarks))
        .route(
            "/bookmarks/:id",
            get(handler::get_bookmarks).put(handler::update_bookmarks),
        )
        .route("/bookmarks/:id/lastUpdated", get(handler::get_last_updated))
        .route("/bookmarks/:id/version", get(handler::get_version))
        .fallback(handler::not_implemented)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
