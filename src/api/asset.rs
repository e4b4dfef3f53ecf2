//! `GET /api/asset` — path-safe asset serving with content-sniffed MIME.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::assets::AssetKind;
use crate::server::ServerState;

use super::error_response;

#[derive(Debug, Deserialize)]
pub struct AssetQuery {
    pub asset: String,
    #[serde(rename = "type")]
    pub kind: AssetKind,
}

pub async fn get_asset(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<AssetQuery>,
) -> Response {
    match state.assets.read(query.kind, &query.asset) {
        Ok((bytes, mime)) => ([(header::CONTENT_TYPE, mime)], bytes).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}
