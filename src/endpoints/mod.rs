//! Command endpoints: the home-automation backends that execute intents.
//!
//! Five variants share one capability set — `send`, `parse_response`,
//! `stop` — behind a trait object. Variants never share state; the factory
//! fully replaces the active instance on config change, stopping the old
//! one's background task first.

mod ha_rest;
mod ha_ws;
mod mqtt;
mod openhab;
mod rest;

pub use ha_rest::HaRestEndpoint;
pub use ha_ws::HaWsEndpoint;
pub use mqtt::{MqttAuth, MqttEndpoint, MqttEndpointConfig};
pub use openhab::OpenhabEndpoint;
pub use rest::{RestAuth, RestEndpoint};

use std::sync::Arc;

use serde::Serialize;

use crate::config::{CommandEndpointKind, MqttAuthKind, RestAuthKind};
use crate::connmgr::{ConnMgr, SessionId};
use crate::error::{Result, RoostError};
use crate::store::ConfigStore;
use crate::urls::construct_url;

/// Connect timeout for endpoint REST calls.
pub(crate) const CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(1);
/// Read timeout for endpoint REST calls.
pub(crate) const READ_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// The `{ok, speech}` payload of every endpoint reply.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointResult {
    pub ok: bool,
    pub speech: String,
}

impl Default for EndpointResult {
    fn default() -> Self {
        Self {
            ok: false,
            speech: "Error!".to_owned(),
        }
    }
}

impl EndpointResult {
    /// Collapse newlines and carriage returns to spaces and strip leading
    /// whitespace — satellites render speech on a single line.
    pub fn sanitize(&mut self) {
        self.speech = self
            .speech
            .replace('\n', " ")
            .replace('\r', " ")
            .trim_start()
            .to_owned();
    }

    /// Serialize to the wire shape `{"result":{"ok":…,"speech":…}}`.
    pub fn to_wire(mut self) -> String {
        self.sanitize();
        serde_json::json!({"result": self}).to_string()
    }
}

/// Raw response captured from a synchronous endpoint call.
#[derive(Debug, Clone)]
pub struct EndpointResponse {
    /// True for 2xx statuses.
    pub ok: bool,
    /// Response body text.
    pub body: String,
}

/// The capability set shared by all endpoint variants.
#[async_trait::async_trait]
pub trait CommandEndpoint: Send + Sync {
    /// Human-readable endpoint name for logs.
    fn name(&self) -> &'static str;

    /// Dispatch one intent payload on behalf of `session`.
    ///
    /// `None` means the reply arrives asynchronously through the endpoint's
    /// own callback path (it sends directly over the session).
    async fn send(
        &self,
        data: serde_json::Value,
        session: SessionId,
    ) -> Result<Option<EndpointResponse>>;

    /// Turn a synchronous response into the wire JSON reply.
    fn parse_response(&self, response: EndpointResponse) -> String;

    /// Tear down any background task. Called before the factory replaces
    /// this instance.
    async fn stop(&self);
}

/// Build the endpoint selected by the stored config.
///
/// Returns `None` when endpoint mode is disabled. Configuration problems
/// (missing credentials) surface as [`RoostError::EndpointConfig`]; the
/// caller leaves the slot empty and the server keeps running.
pub async fn init_command_endpoint(
    store: &ConfigStore,
    connmgr: &Arc<ConnMgr>,
) -> Result<Option<Arc<dyn CommandEndpoint>>> {
    let config = store.read_config();
    if config.was_mode != Some(true) {
        return Ok(None);
    }

    let Some(kind) = config.command_endpoint else {
        return Ok(None);
    };

    let endpoint: Arc<dyn CommandEndpoint> = match kind {
        CommandEndpointKind::HomeAssistant => {
            let host = required(config.hass_host, "Home Assistant host")?;
            let port = config.hass_port.unwrap_or(8123);
            let tls = config.hass_tls.unwrap_or(false);
            let token = required(config.hass_token, "Home Assistant token")?;

            let base = construct_url(&host, port, tls, false);
            if ha_ws::supports_assist_pipeline(&base, &token).await? {
                Arc::new(HaWsEndpoint::start(
                    &host,
                    port,
                    tls,
                    &token,
                    Arc::clone(connmgr),
                ))
            } else {
                tracing::info!(
                    "Home Assistant at {base} has no assist pipeline, using conversation REST"
                );
                Arc::new(HaRestEndpoint::new(&host, port, tls, &token)?)
            }
        }
        CommandEndpointKind::OpenHab => {
            let url = required(config.openhab_url, "openHAB URL")?;
            let token = required(config.openhab_token, "openHAB token")?;
            Arc::new(OpenhabEndpoint::new(&url, &token)?)
        }
        CommandEndpointKind::Mqtt => {
            let mqtt_config = MqttEndpointConfig {
                host: required(config.mqtt_host, "MQTT host")?,
                port: config.mqtt_port.unwrap_or(8883),
                tls: config.mqtt_tls.unwrap_or(true),
                topic: required(config.mqtt_topic, "MQTT topic")?,
                auth: match config.mqtt_auth_type {
                    Some(MqttAuthKind::UserPw) => MqttAuth::UserPw {
                        username: required(config.mqtt_username, "MQTT username")?,
                        password: required(config.mqtt_password, "MQTT password")?,
                    },
                    _ => MqttAuth::None,
                },
            };
            Arc::new(MqttEndpoint::start(mqtt_config)?)
        }
        CommandEndpointKind::Rest => {
            let url = required(config.rest_url, "REST URL")?;
            let auth = match config.rest_auth_type {
                Some(RestAuthKind::Basic) => RestAuth::Basic {
                    user: required(config.rest_auth_user, "REST auth username")?,
                    pass: required(config.rest_auth_pass, "REST auth password")?,
                },
                Some(RestAuthKind::Header) => RestAuth::Header {
                    value: required(config.rest_auth_header, "REST auth header")?,
                },
                _ => RestAuth::None,
            };
            Arc::new(RestEndpoint::new(&url, auth)?)
        }
    };

    tracing::info!("command endpoint initialized: {}", endpoint.name());
    Ok(Some(endpoint))
}

fn required(value: Option<String>, what: &str) -> Result<String> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(RoostError::EndpointConfig(format!("{what} is not set"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_collapses_newlines_and_strips_leading_whitespace() {
        let mut result = EndpointResult {
            ok: true,
            speech: "  Turned on\nthe kitchen\r\nlights".to_owned(),
        };
        result.sanitize();
        assert_eq!(result.speech, "Turned on the kitchen  lights");
        assert!(!result.speech.contains('\n'));
        assert!(!result.speech.contains('\r'));
    }

    #[test]
    fn wire_shape_is_a_result_object() {
        let wire = EndpointResult {
            ok: true,
            speech: "OK".to_owned(),
        }
        .to_wire();
        let value: serde_json::Value = serde_json::from_str(&wire).expect("wire json");
        assert_eq!(value, serde_json::json!({"result": {"ok": true, "speech": "OK"}}));
    }

    #[test]
    fn default_result_is_the_error_shape() {
        let wire = EndpointResult::default().to_wire();
        let value: serde_json::Value = serde_json::from_str(&wire).expect("wire json");
        assert_eq!(value["result"]["ok"], false);
        assert_eq!(value["result"]["speech"], "Error!");
    }

    #[tokio::test]
    async fn endpoint_mode_off_yields_no_endpoint() {
        let store = ConfigStore::open_in_memory().expect("store");
        store
            .write_config(&serde_json::json!({"command_endpoint": "REST"}))
            .expect("write");
        let connmgr = Arc::new(ConnMgr::new());
        let endpoint = init_command_endpoint(&store, &connmgr).await.expect("init");
        assert!(endpoint.is_none());
    }

    #[tokio::test]
    async fn missing_credentials_surface_as_endpoint_config_errors() {
        let store = ConfigStore::open_in_memory().expect("store");
        store
            .write_config(&serde_json::json!({
                "was_mode": true,
                "command_endpoint": "MQTT",
                "mqtt_host": "broker.local",
                "mqtt_topic": "roost/intents",
                "mqtt_auth_type": "userpw",
                "mqtt_username": "roost",
            }))
            .expect("write");
        let connmgr = Arc::new(ConnMgr::new());
        let err = match init_command_endpoint(&store, &connmgr).await {
            Err(e) => e,
            Ok(_) => panic!("password missing"),
        };
        assert!(matches!(err, RoostError::EndpointConfig(_)));
    }
}
