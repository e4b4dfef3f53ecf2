//! Thin HTTP verbs over the coordination plane for the admin UI.

pub mod asset;
pub mod client;
pub mod config;
pub mod ota;
pub mod release;
pub mod status;

use axum::Json;
use axum::http::StatusCode;
use serde_json::{Value, json};

use crate::error::RoostError;

/// Map an error to its HTTP status and a FastAPI-style `detail` body.
pub(crate) fn error_response(err: &RoostError) -> (StatusCode, Json<Value>) {
    let status = match err {
        RoostError::Config(_) | RoostError::PathUnsafe(_) | RoostError::EndpointConfig(_) => {
            StatusCode::BAD_REQUEST
        }
        RoostError::NotFound(_) => StatusCode::NOT_FOUND,
        RoostError::Upstream(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!("api error: {err}");
    } else {
        tracing::warn!("api rejection: {err}");
    }
    (status, Json(json!({"detail": err.to_string()})))
}
