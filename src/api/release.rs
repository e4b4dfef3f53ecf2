//! `GET`/`POST /api/release` — release catalog and OTA cache admin.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::RoostError;
use crate::server::ServerState;

use super::error_response;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseType {
    /// Raw upstream firmware catalog.
    Satellite,
    /// Catalog annotated with server-local OTA URLs and cache state, merged
    /// with locally built firmware.
    Was,
}

#[derive(Debug, Deserialize)]
pub struct GetReleaseQuery {
    #[serde(rename = "type")]
    pub kind: ReleaseType,
}

pub async fn get_release(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<GetReleaseQuery>,
) -> Response {
    match query.kind {
        ReleaseType::Satellite => match state.releases.fetch_catalog().await {
            Ok(catalog) => Json(catalog).into_response(),
            Err(e) => error_response(&e).into_response(),
        },
        ReleaseType::Was => {
            let Some(was_url) = state.store.read_nvs().was.and_then(|was| was.url) else {
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"detail": "WAS URL not set"})),
                )
                    .into_response();
            };
            match state.releases.list_releases(&was_url).await {
                Ok(releases) => Json(releases).into_response(),
                Err(e) => error_response(&e).into_response(),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseAction {
    Cache,
    Delete,
}

#[derive(Debug, Deserialize)]
pub struct PostReleaseQuery {
    pub action: ReleaseAction,
}

pub async fn post_release(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<PostReleaseQuery>,
    Json(body): Json<Value>,
) -> Response {
    match query.action {
        ReleaseAction::Cache => {
            let (Some(version), Some(platform), Some(url)) = (
                body.get("version").and_then(Value::as_str),
                body.get("platform").and_then(Value::as_str),
                body.get("url").and_then(Value::as_str),
            ) else {
                return error_response(&RoostError::Config(
                    "version, platform, and url are required".to_owned(),
                ))
                .into_response();
            };
            let size = body.get("size").and_then(Value::as_u64);
            match state.releases.cache(version, platform, url, size).await {
                Ok(()) => (StatusCode::OK, Json(json!("Success"))).into_response(),
                Err(e) => error_response(&e).into_response(),
            }
        }
        ReleaseAction::Delete => {
            let Some(path) = body.get("path").and_then(Value::as_str) else {
                return error_response(&RoostError::Config("path is required".to_owned()))
                    .into_response();
            };
            match state.releases.delete(path) {
                Ok(()) => (StatusCode::OK, Json(json!("Success"))).into_response(),
                Err(e) => error_response(&e).into_response(),
            }
        }
    }
}
