//! HTTP history endpoint for joining clients.
//!
//! `GET /history?documentId=<id>` returns every current record of the
//! document as `[{"annotationId":..,"xfdfString":..,"widget":..}]`.
//! The legacy path `/server/annotationHandler.js` serves the same thing.
//!
//! A store failure answers `204 No Content` with no body, so clients can tell
//! "could not load" apart from "nothing stored yet" (`200` with `[]`).

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::context::ServerContext;

pub const HISTORY_PATH: &str = "/history";
pub const LEGACY_HISTORY_PATH: &str = "/server/annotationHandler.js";

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(rename = "documentId")]
    pub document_id: String,
}

/// Build the HTTP router.
pub fn router(ctx: Arc<ServerContext>) -> Router {
    Router::new()
        .route(HISTORY_PATH, get(history_handler))
        .route(LEGACY_HISTORY_PATH, get(history_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// History snapshot for one document.
pub async fn history_handler(
    State(ctx): State<Arc<ServerContext>>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    if query.document_id.is_empty() {
        debug!("History request without a document id");
        return (StatusCode::BAD_REQUEST, "documentId must not be empty").into_response();
    }

    match ctx.history.entries(&query.document_id).await {
        Ok(entries) => (StatusCode::OK, Json(entries)).into_response(),
        // HistoryService already logged the store error
        Err(_) => StatusCode::NO_CONTENT.into_response(),
    }
}
