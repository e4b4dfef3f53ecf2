//! MQTT command endpoint.
//!
//! Publish-only: intents are published to one configured topic and no reply
//! is correlated. The client connects asynchronously and reconnects by
//! itself — sends while disconnected fail as runtime errors.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, Transport};
use tokio::task::JoinHandle;

use crate::connmgr::SessionId;
use crate::error::{Result, RoostError};

use super::{CommandEndpoint, EndpointResponse, EndpointResult};

/// MQTT broker authentication.
#[derive(Debug, Clone)]
pub enum MqttAuth {
    None,
    UserPw { username: String, password: String },
}

/// Validated MQTT endpoint configuration.
#[derive(Debug, Clone)]
pub struct MqttEndpointConfig {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub topic: String,
    pub auth: MqttAuth,
}

impl MqttEndpointConfig {
    fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(RoostError::EndpointConfig("MQTT host is not set".to_owned()));
        }
        if self.topic.is_empty() {
            return Err(RoostError::EndpointConfig("MQTT topic is not set".to_owned()));
        }
        if let MqttAuth::UserPw { username, password } = &self.auth {
            if username.is_empty() {
                return Err(RoostError::EndpointConfig(
                    "user/password auth enabled without a username".to_owned(),
                ));
            }
            if password.is_empty() {
                return Err(RoostError::EndpointConfig(
                    "user/password auth enabled without a password".to_owned(),
                ));
            }
        }
        Ok(())
    }
}

pub struct MqttEndpoint {
    client: AsyncClient,
    topic: String,
    connected: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl MqttEndpoint {
    /// Validate the config, then spawn the event-loop task that keeps the
    /// connection alive.
    pub fn start(config: MqttEndpointConfig) -> Result<Self> {
        config.validate()?;

        let mut options = MqttOptions::new("roost-server", &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(60));
        if let MqttAuth::UserPw { username, password } = &config.auth {
            options.set_credentials(username, password);
        }
        if config.tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, mut eventloop) = AsyncClient::new(options, 16);
        let connected = Arc::new(AtomicBool::new(false));

        let loop_connected = Arc::clone(&connected);
        let loop_client = client.clone();
        let topic = config.topic.clone();
        let loop_topic = config.topic;
        let handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        tracing::info!("MQTT connected");
                        loop_connected.store(true, Ordering::Release);
                        if let Err(e) = loop_client
                            .subscribe(&loop_topic, QoS::AtLeastOnce)
                            .await
                        {
                            tracing::warn!("MQTT subscribe failed: {e}");
                        }
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        tracing::info!("MQTT disconnected");
                        loop_connected.store(false, Ordering::Release);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        loop_connected.store(false, Ordering::Release);
                        tracing::info!("MQTT connection error: {e}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Ok(Self {
            client,
            topic,
            connected,
            handle,
        })
    }
}

#[async_trait::async_trait]
impl CommandEndpoint for MqttEndpoint {
    fn name(&self) -> &'static str {
        "MQTT"
    }

    async fn send(
        &self,
        data: serde_json::Value,
        _session: SessionId,
    ) -> Result<Option<EndpointResponse>> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(RoostError::EndpointRuntime("MQTT not connected".to_owned()));
        }
        self.client
            .publish(&self.topic, QoS::AtLeastOnce, false, data.to_string())
            .await
            .map_err(|e| RoostError::EndpointRuntime(e.to_string()))?;

        // Publish-only: no reply is correlated back to the satellite.
        Ok(None)
    }

    fn parse_response(&self, _response: EndpointResponse) -> String {
        EndpointResult::default().to_wire()
    }

    async fn stop(&self) {
        tracing::info!("stopping {}", self.name());
        self.handle.abort();
    }
}

impl Drop for MqttEndpoint {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
