//! `GET /api/status` — diagnostic snapshots.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;

use crate::server::ServerState;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusType {
    Tasks,
    Connmgr,
    NotifyQueue,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    #[serde(rename = "type")]
    pub kind: StatusType,
}

pub async fn get_status(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<StatusQuery>,
) -> Response {
    match query.kind {
        StatusType::Connmgr => Json(state.connmgr.snapshots()).into_response(),
        StatusType::NotifyQueue => Json(state.notify.snapshot()).into_response(),
        StatusType::Tasks => {
            let endpoint = state.endpoint().await.map(|endpoint| endpoint.name());
            Json(json!([
                {"task": "notify_dequeue", "running": state.notify.is_running()},
                {"task": "wake_arbiter", "running": state.wake.is_running()},
                {"task": "command_endpoint", "endpoint": endpoint},
            ]))
            .into_response()
        }
    }
}
