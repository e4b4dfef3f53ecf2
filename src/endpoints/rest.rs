//! Generic REST command endpoint.
//!
//! POSTs the intent payload to a user-configured URL. A 2xx response means
//! the action completed; the response body becomes the spoken reply.

use crate::connmgr::SessionId;
use crate::error::{Result, RoostError};

use super::{CONNECT_TIMEOUT, CommandEndpoint, EndpointResponse, EndpointResult, READ_TIMEOUT};

/// Authentication applied to outgoing REST calls.
#[derive(Debug, Clone)]
pub enum RestAuth {
    None,
    Basic { user: String, pass: String },
    Header { value: String },
}

/// Generic REST endpoint. Also the HTTP engine for the Home Assistant
/// conversation and openHAB variants.
pub struct RestEndpoint {
    url: String,
    auth: RestAuth,
    client: reqwest::Client,
}

impl RestEndpoint {
    pub fn new(url: &str, auth: RestAuth) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .build()
            .map_err(|e| RoostError::EndpointConfig(format!("HTTP client: {e}")))?;
        Ok(Self {
            url: url.to_owned(),
            auth,
            client,
        })
    }

    fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            RestAuth::None => request,
            RestAuth::Basic { user, pass } => request.basic_auth(user, Some(pass)),
            RestAuth::Header { value } => request.header(reqwest::header::AUTHORIZATION, value),
        }
    }

    /// POST a JSON body and capture the response.
    pub(crate) async fn post_json(&self, body: &serde_json::Value) -> Result<EndpointResponse> {
        let request = self.apply_auth(self.client.post(&self.url).json(body));
        Self::capture(request).await
    }

    /// POST a plain-text body and capture the response.
    pub(crate) async fn post_text(&self, body: &str) -> Result<EndpointResponse> {
        let request = self.apply_auth(
            self.client
                .post(&self.url)
                .header(reqwest::header::CONTENT_TYPE, "text/plain")
                .body(body.to_owned()),
        );
        Self::capture(request).await
    }

    async fn capture(request: reqwest::RequestBuilder) -> Result<EndpointResponse> {
        let response = request
            .send()
            .await
            .map_err(|e| RoostError::EndpointRuntime(e.to_string()))?;
        let ok = response.status().is_success();
        let body = response
            .text()
            .await
            .map_err(|e| RoostError::EndpointRuntime(e.to_string()))?;
        Ok(EndpointResponse { ok, body })
    }
}

#[async_trait::async_trait]
impl CommandEndpoint for RestEndpoint {
    fn name(&self) -> &'static str {
        "REST"
    }

    async fn send(
        &self,
        data: serde_json::Value,
        _session: SessionId,
    ) -> Result<Option<EndpointResponse>> {
        Ok(Some(self.post_json(&data).await?))
    }

    fn parse_response(&self, response: EndpointResponse) -> String {
        let result = if response.ok {
            EndpointResult {
                ok: true,
                speech: response.body,
            }
        } else {
            EndpointResult::default()
        };
        result.to_wire()
    }

    async fn stop(&self) {}
}
