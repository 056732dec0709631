use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use synapse_core::SynapseDeps;

use crate::rest;

#[derive(Clone)]
pub struct AppState {
    pub deps: Arc<SynapseDeps>,
}

pub fn build_router(deps: Arc<SynapseDeps>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(rest::health))
        .route("/api/ingest", post(rest::ingest_news))
        .route("/api/news", get(rest::list_news))
        .route("/api/news/topics", get(rest::news_topics))
        .route("/api/briefing/refresh", post(rest::refresh_briefing))
        .route("/api/signal", post(rest::submit_signal))
        .route("/api/handshake", post(rest::resolve_handshake))
        .layer(cors)
        .with_state(AppState { deps })
}
