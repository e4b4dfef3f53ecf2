//! Home Assistant assist-pipeline WebSocket endpoint.
//!
//! Maintains one persistent WebSocket client against `/api/websocket`.
//! Intents are posted as `assist_pipeline/run` frames; replies arrive as
//! `intent-end` events correlated back to the originating satellite session
//! through a pending map keyed by frame id. The connection authenticates on
//! `auth_required`, then fetches the device registry so intents can carry the
//! satellite's Home Assistant `device_id`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::connmgr::{ConnMgr, SessionId};
use crate::error::{Result, RoostError};
use crate::urls::construct_url;

use super::{CommandEndpoint, EndpointResponse, EndpointResult};

/// Fixed delay between reconnect attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Probe whether a Home Assistant instance exposes the assist pipeline.
///
/// The factory uses this to decide between the WebSocket and conversation
/// REST variants.
pub async fn supports_assist_pipeline(base_url: &str, token: &str) -> Result<bool> {
    let client = reqwest::Client::builder()
        .connect_timeout(super::CONNECT_TIMEOUT)
        .timeout(super::READ_TIMEOUT)
        .build()
        .map_err(|e| RoostError::EndpointRuntime(e.to_string()))?;
    let components: Vec<String> = client
        .get(format!("{base_url}/api/components"))
        .bearer_auth(token)
        .send()
        .await
        .map_err(|e| RoostError::EndpointRuntime(e.to_string()))?
        .json()
        .await
        .map_err(|e| RoostError::EndpointRuntime(e.to_string()))?;
    Ok(components.iter().any(|c| c == "assist_pipeline"))
}

/// Shared state between the endpoint handle and the client task.
struct Shared {
    connmgr: Arc<ConnMgr>,
    token: String,
    /// Pending frame id → originating satellite session.
    pending: Mutex<HashMap<u64, SessionId>>,
    /// Satellite identifier (MAC) → Home Assistant device id.
    devices: Mutex<HashMap<String, String>>,
    next_id: AtomicU64,
}

impl Shared {
    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<u64, SessionId>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_devices(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        match self.devices.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Allocate a strictly increasing frame id seeded from the process
    /// monotonic clock in nanoseconds.
    fn alloc_id(&self) -> u64 {
        let nanos = monotonic_nanos();
        let prev = self
            .next_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |p| {
                Some(p.max(nanos) + 1)
            })
            .unwrap_or(nanos);
        prev.max(nanos) + 1
    }
}

fn monotonic_nanos() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_nanos() as u64 + 1
}

pub struct HaWsEndpoint {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<String>,
    handle: JoinHandle<()>,
}

impl HaWsEndpoint {
    /// Spawn the persistent client task and return the endpoint handle.
    pub fn start(host: &str, port: u16, tls: bool, token: &str, connmgr: Arc<ConnMgr>) -> Self {
        let url = format!("{}/api/websocket", construct_url(host, port, tls, true));
        let shared = Arc::new(Shared {
            connmgr,
            token: token.to_owned(),
            pending: Mutex::new(HashMap::new()),
            devices: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        });

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let task_shared = Arc::clone(&shared);
        let handle = tokio::spawn(async move {
            client_loop(url, task_shared, outbound_rx).await;
        });

        Self {
            shared,
            outbound,
            handle,
        }
    }
}

#[async_trait::async_trait]
impl CommandEndpoint for HaWsEndpoint {
    fn name(&self) -> &'static str {
        "Home Assistant assist pipeline"
    }

    async fn send(
        &self,
        mut data: Value,
        session: SessionId,
    ) -> Result<Option<EndpointResponse>> {
        let id = self.shared.alloc_id();

        if let Some(object) = data.as_object_mut() {
            object.remove("language");
        }

        let mut frame = json!({
            "end_stage": "intent",
            "id": id,
            "input": data,
            "start_stage": "intent",
            "type": "assist_pipeline/run",
        });
        if let Some(mac) = self.shared.connmgr.mac_of(session) {
            if let Some(device_id) = self.shared.lock_devices().get(&mac) {
                frame["device_id"] = json!(device_id);
            }
        }

        self.shared.lock_pending().insert(id, session);
        if self.outbound.send(frame.to_string()).is_err() {
            self.shared.lock_pending().remove(&id);
            return Err(RoostError::EndpointRuntime(
                "assist pipeline client is not running".to_owned(),
            ));
        }

        // The reply arrives as an intent-end event and is sent over the
        // session by the client task.
        Ok(None)
    }

    fn parse_response(&self, _response: EndpointResponse) -> String {
        // Replies are pushed asynchronously; nothing to parse here.
        EndpointResult::default().to_wire()
    }

    async fn stop(&self) {
        tracing::info!("stopping {}", self.name());
        self.handle.abort();
    }
}

impl Drop for HaWsEndpoint {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Run the WebSocket client with fixed-delay reconnection.
///
/// Each failed connection clears the pending map — satellites whose intents
/// were in flight get no reply and run their own timeouts; replaying them
/// would re-execute the intents.
async fn client_loop(
    url: String,
    shared: Arc<Shared>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
) {
    loop {
        if let Err(e) = connect_once(&url, &shared, &mut outbound_rx).await {
            tracing::info!("assist pipeline connection lost: {e}");
        }
        shared.lock_pending().clear();
        shared.lock_devices().clear();
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

/// One connection lifetime: authenticate, fetch the device registry, then
/// pump frames until the transport drops.
async fn connect_once(
    url: &str,
    shared: &Arc<Shared>,
    outbound_rx: &mut mpsc::UnboundedReceiver<String>,
) -> std::result::Result<(), String> {
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::{connect_async, tungstenite::Message};

    let (ws_stream, _) = connect_async(url)
        .await
        .map_err(|e| format!("connect: {e}"))?;
    let (mut write, mut read) = ws_stream.split();

    let mut device_list_id: Option<u64> = None;

    loop {
        tokio::select! {
            inbound = read.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_frame(&text, shared, &mut device_list_id) {
                            write
                                .send(Message::Text(reply))
                                .await
                                .map_err(|e| format!("send: {e}"))?;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Err("connection closed by Home Assistant".to_owned());
                    }
                    Some(Err(e)) => {
                        return Err(format!("read error: {e}"));
                    }
                    _ => {} // Ping/Pong handled by tungstenite.
                }
            }
            Some(frame) = outbound_rx.recv() => {
                write
                    .send(Message::Text(frame))
                    .await
                    .map_err(|e| format!("send error: {e}"))?;
            }
        }
    }
}

/// Process one inbound frame. Returns a frame to send back, if any.
fn handle_frame(text: &str, shared: &Shared, device_list_id: &mut Option<u64>) -> Option<String> {
    let msg: Value = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::debug!("ignoring unparseable assist pipeline frame: {e}");
            return None;
        }
    };

    match msg.get("type").and_then(Value::as_str) {
        Some("auth_required") => {
            tracing::debug!("authenticating assist pipeline connection");
            Some(json!({"type": "auth", "access_token": shared.token}).to_string())
        }
        Some("auth_ok") => {
            let id = shared.alloc_id();
            *device_list_id = Some(id);
            Some(json!({"id": id, "type": "config/device_registry/list"}).to_string())
        }
        Some("auth_invalid") => {
            tracing::error!("assist pipeline rejected the access token");
            None
        }
        Some("result") => {
            if msg.get("id").and_then(Value::as_u64) == *device_list_id {
                let map = build_device_map(msg.get("result").unwrap_or(&Value::Null));
                tracing::debug!(devices = map.len(), "device registry loaded");
                *shared.lock_devices() = map;
            }
            None
        }
        Some("event") => {
            handle_event(&msg, shared);
            None
        }
        _ => None,
    }
}

/// Correlate an `intent-end` event back to the originating session and send
/// the result frame over it.
fn handle_event(msg: &Value, shared: &Shared) {
    if msg.pointer("/event/type").and_then(Value::as_str) != Some("intent-end") {
        return;
    }
    let Some(id) = msg.get("id").and_then(Value::as_u64) else {
        return;
    };
    let Some(session) = shared.lock_pending().remove(&id) else {
        tracing::debug!(id, "intent-end with no pending session");
        return;
    };

    let response = msg
        .pointer("/event/data/intent_output/response")
        .cloned()
        .unwrap_or(Value::Null);
    let result = EndpointResult {
        ok: response.get("response_type").and_then(Value::as_str) == Some("action_done"),
        speech: response
            .pointer("/speech/plain/speech")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
    };

    if let Err(e) = shared.connmgr.send_text(session, result.to_wire()) {
        tracing::warn!("failed to deliver intent result: {e}");
    }
}

/// Flatten the device registry into identifier → device id.
fn build_device_map(result: &Value) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Some(devices) = result.as_array() else {
        return map;
    };
    for device in devices {
        let Some(device_id) = device.get("id").and_then(Value::as_str) else {
            continue;
        };
        let Some(identifiers) = device.get("identifiers").and_then(Value::as_array) else {
            continue;
        };
        for identifier in identifiers {
            // Each identifier is a [domain, value] pair.
            if let Some(value) = identifier.as_array().and_then(|pair| pair.get(1)).and_then(Value::as_str) {
                map.insert(value.to_lowercase(), device_id.to_owned());
            }
        }
    }
    map
}
