//! Satellite WebSocket session handler.
//!
//! One task per live socket: inbound frames are decoded as top-level JSON
//! objects and dispatched on the first recognized key, wake frames first to
//! minimize arbitration latency. A companion writer task drains the
//! session's outbound channel so frames are delivered in send order.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::connmgr::{SessionId, mac_value_to_string};
use crate::server::ServerState;

/// Whether the session loop should keep running after a frame.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Closed,
}

/// `GET /ws` — upgrade and run the satellite session.
pub async fn ws_handler(
    State(state): State<Arc<ServerState>>,
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .unwrap_or("unknown")
        .to_owned();
    ws.on_upgrade(move |socket| run_session(state, socket, user_agent, remote))
}

async fn run_session(
    state: Arc<ServerState>,
    socket: WebSocket,
    user_agent: String,
    remote: SocketAddr,
) {
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let session = state.connmgr.accept(outbound_tx, &user_agent, remote);

    let (mut sink, mut stream) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(text) = outbound_rx.recv().await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if handle_frame(&state, session, text.as_str()).await == Flow::Closed {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {} // Binary and ping/pong frames are not part of the protocol.
            Err(e) => {
                tracing::warn!(session, "session transport error: {e}");
                break;
            }
        }
    }

    state.connmgr.disconnect(session);
    writer.abort();
}

/// Dispatch one inbound frame.
///
/// A malformed frame is logged and the session continues — no inbound
/// message may take the server down.
async fn handle_frame(state: &Arc<ServerState>, session: SessionId, text: &str) -> Flow {
    let msg: Value = match serde_json::from_str(text) {
        Ok(Value::Object(object)) => Value::Object(object),
        Ok(_) => {
            tracing::warn!(session, "ignoring non-object frame");
            return Flow::Continue;
        }
        Err(e) => {
            tracing::warn!(session, "ignoring malformed frame: {e}");
            return Flow::Continue;
        }
    };

    // Latency-sensitive, so handled first.
    if let Some(wake_start) = msg.get("wake_start") {
        if let Some(volume) = wake_start.get("wake_volume").and_then(Value::as_f64) {
            state.wake.feed(session, volume);
        }
        return Flow::Continue;
    }

    if msg.get("wake_end").is_some() {
        // Received but carries no state.
        return Flow::Continue;
    }

    if let Some(notify_done) = msg.get("notify_done") {
        if let Some(id) = notify_done.as_i64() {
            state.notify.done(session, id);
        }
        return Flow::Continue;
    }

    if let Some(cmd) = msg.get("cmd").and_then(Value::as_str) {
        match cmd {
            "endpoint" => {
                let data = msg.get("data").cloned().unwrap_or(Value::Null);
                dispatch_intent(state, session, data).await;
            }
            "get_config" => {
                let frame = json!({"config": state.store.read_config_json()}).to_string();
                if let Err(e) = state.connmgr.send_text(session, frame) {
                    tracing::warn!(session, "failed to send config: {e}");
                }
            }
            other => tracing::debug!(session, "unhandled cmd: {other}"),
        }
        return Flow::Continue;
    }

    if msg.get("goodbye").is_some() {
        state.connmgr.disconnect(session);
        return Flow::Closed;
    }

    if let Some(hello) = msg.get("hello") {
        apply_hello(state, session, hello);
        return Flow::Continue;
    }

    tracing::debug!(session, "frame with no recognized key");
    Flow::Continue
}

/// Forward an intent payload to the active command endpoint.
async fn dispatch_intent(state: &Arc<ServerState>, session: SessionId, data: Value) {
    let Some(endpoint) = state.endpoint().await else {
        tracing::debug!(session, "intent received but no command endpoint is configured");
        return;
    };

    tracing::debug!(session, endpoint = endpoint.name(), "dispatching intent");
    match endpoint.send(data, session).await {
        Ok(Some(response)) => {
            let wire = endpoint.parse_response(response);
            if let Err(e) = state.connmgr.send_text(session, wire) {
                tracing::warn!(session, "failed to send endpoint reply: {e}");
            }
        }
        // The endpoint replies through its own callback path.
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(session, "endpoint send failed: {e}");
            let wire = crate::endpoints::EndpointResult::default().to_wire();
            if let Err(e) = state.connmgr.send_text(session, wire) {
                tracing::warn!(session, "failed to send endpoint error: {e}");
            }
        }
    }
}

/// Apply a `hello` identity frame.
fn apply_hello(state: &Arc<ServerState>, session: SessionId, hello: &Value) {
    if let Some(hostname) = hello.get("hostname").and_then(Value::as_str) {
        state.connmgr.update_hostname(session, hostname);
    }
    if let Some(hw_type) = hello.get("hw_type").and_then(Value::as_str) {
        state.connmgr.update_platform(session, &hw_type.to_uppercase());
    }
    if let Some(mac) = hello.get("mac_addr").and_then(mac_value_to_string) {
        state.connmgr.update_mac_addr(session, &mac);
    }
}
