//! `GET`/`POST /api/client` — connected satellites and device actions.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::RoostError;
use crate::notify::{NotifyMessage, Notification};
use crate::server::ServerState;

use super::error_response;

/// `GET /api/client` — live sessions joined with stored labels, deduped by
/// MAC, sorted by label with hostname as the fallback key.
pub async fn get_clients(State(state): State<Arc<ServerState>>) -> Response {
    let labels: HashMap<String, Option<String>> = state
        .store
        .list_client_labels()
        .unwrap_or_default()
        .into_iter()
        .map(|entry| (entry.mac_addr, entry.label))
        .collect();

    let mut clients = Vec::new();
    let mut seen_macs: Vec<String> = Vec::new();
    for snapshot in state.connmgr.snapshots() {
        if seen_macs.contains(&snapshot.mac_addr) {
            continue;
        }
        seen_macs.push(snapshot.mac_addr.clone());

        let label = labels.get(&snapshot.mac_addr).cloned().flatten();
        // User agents look like "Satellite/1.2.0"; the tail is the firmware
        // version.
        let version = snapshot
            .user_agent
            .split_once('/')
            .map_or(snapshot.user_agent.clone(), |(_, v)| v.to_owned());

        clients.push(json!({
            "hostname": snapshot.hostname,
            "platform": snapshot.platform,
            "mac_addr": snapshot.mac_addr,
            "ip": snapshot.ip,
            "port": snapshot.port,
            "version": version,
            "label": label,
        }));
    }

    // Sort by label when every client has one, otherwise by hostname.
    let all_labeled = clients.iter().all(|c| c["label"].is_string());
    if all_labeled {
        clients.sort_by(|a, b| a["label"].as_str().cmp(&b["label"].as_str()));
    } else {
        clients.sort_by(|a, b| a["hostname"].as_str().cmp(&b["hostname"].as_str()));
    }

    Json(Value::Array(clients)).into_response()
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientAction {
    Restart,
    Update,
    Config,
    Identify,
    Notify,
}

#[derive(Debug, Deserialize)]
pub struct ClientActionQuery {
    pub action: ClientAction,
}

/// `POST /api/client` — forward a device command, upsert a label, or
/// enqueue a notification.
pub async fn post_client(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<ClientActionQuery>,
    Json(body): Json<Value>,
) -> Response {
    match query.action {
        ClientAction::Restart => forward_command(&state, &body, "restart"),
        ClientAction::Identify => forward_command(&state, &body, "identify"),
        ClientAction::Update => {
            let Some(ota_url) = body.get("ota_url").and_then(Value::as_str) else {
                return error_response(&RoostError::Config("ota_url is required".to_owned()))
                    .into_response();
            };
            let frame = json!({"cmd": "ota_start", "ota_url": ota_url}).to_string();
            send_to_hostname(&state, &body, frame)
        }
        ClientAction::Config => {
            let Some(mac) = body.get("mac_addr").and_then(Value::as_str).filter(|m| !m.is_empty())
            else {
                return error_response(&RoostError::Config("mac_addr is required".to_owned()))
                    .into_response();
            };
            let label = body.get("label").and_then(Value::as_str);
            match state.store.upsert_client_label(mac, label) {
                Ok(()) => (StatusCode::OK, Json(json!("Success"))).into_response(),
                Err(e) => error_response(&e).into_response(),
            }
        }
        ClientAction::Notify => {
            let mut msg: NotifyMessage = match serde_json::from_value(body) {
                Ok(msg) => msg,
                Err(e) => {
                    return error_response(&RoostError::Config(format!(
                        "invalid notification: {e}"
                    )))
                    .into_response();
                }
            };
            warm_tts(&state, &mut msg.data).await;
            match state.notify.add(msg) {
                Ok(()) => (StatusCode::OK, Json(json!("Success"))).into_response(),
                Err(e) => error_response(&e).into_response(),
            }
        }
    }
}

fn forward_command(state: &ServerState, body: &Value, command: &str) -> Response {
    let frame = json!({"cmd": command}).to_string();
    send_to_hostname(state, body, frame)
}

fn send_to_hostname(state: &ServerState, body: &Value, frame: String) -> Response {
    let Some(hostname) = body.get("hostname").and_then(Value::as_str) else {
        return error_response(&RoostError::Config("hostname is required".to_owned()))
            .into_response();
    };
    let Some(session) = state.connmgr.by_hostname(hostname) else {
        return error_response(&RoostError::NotFound(format!(
            "no connected satellite named {hostname}"
        )))
        .into_response();
    };
    match state.connmgr.send_text(session, frame) {
        Ok(()) => (StatusCode::OK, Json(json!("Success"))).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

/// Pre-warm the speech-synthesis cache for a text notification.
///
/// When the notification has text but no audio, the synthesis URL is built
/// from the configured TTS base, fetched once so the audio is rendered
/// before satellites ask for it, and attached to the notification.
async fn warm_tts(state: &ServerState, notification: &mut Notification) {
    if notification.audio_url.is_some() {
        return;
    }
    let Some(text) = notification.text.clone() else {
        return;
    };
    let Some(tts_url) = state.store.read_config().wis_tts_url else {
        return;
    };

    match crate::urls::tts_warm_url(&tts_url) {
        Ok(base) => {
            let url = format!("{base}{}", urlencoding::encode(&text));
            if let Err(e) = state.http.get(&url).send().await {
                tracing::warn!("TTS warm-up fetch failed: {e}");
            }
            notification.audio_url = Some(url);
        }
        Err(e) => tracing::warn!("cannot build TTS warm-up URL: {e}"),
    }
}
