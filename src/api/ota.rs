//! `GET /api/ota` — serve a cached or upstream-fetched firmware binary.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::server::ServerState;

use super::error_response;

#[derive(Debug, Deserialize)]
pub struct OtaQuery {
    pub version: String,
    pub platform: String,
}

pub async fn get_ota(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<OtaQuery>,
) -> Response {
    match state.releases.get(&query.version, &query.platform).await {
        Ok(bytes) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}
