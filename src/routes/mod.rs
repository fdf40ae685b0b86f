pub mod api_routes;
pub mod ui_stream;

use axum::routing::post;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::routes::api_routes::chat_handler;
use crate::service::chat_service::ChatService;

/// Builds the application router.
pub fn build(svc: ChatService) -> Router {
    Router::new()
        .route("/api/chat", post(chat_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(svc)
}
