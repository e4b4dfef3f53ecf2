//! openHAB command endpoint.
//!
//! Sends the raw recognized text to the openHAB voice interpreter REST
//! resource, authenticating with the API token as the basic-auth username.

use crate::connmgr::SessionId;
use crate::error::{Result, RoostError};

use super::rest::{RestAuth, RestEndpoint};
use super::{CommandEndpoint, EndpointResponse, EndpointResult};

pub struct OpenhabEndpoint {
    rest: RestEndpoint,
}

impl OpenhabEndpoint {
    pub fn new(url: &str, token: &str) -> Result<Self> {
        let rest = RestEndpoint::new(
            &format!("{url}/rest/voice/interpreters"),
            RestAuth::Basic {
                user: token.to_owned(),
                pass: String::new(),
            },
        )?;
        Ok(Self { rest })
    }
}

#[async_trait::async_trait]
impl CommandEndpoint for OpenhabEndpoint {
    fn name(&self) -> &'static str {
        "openHAB"
    }

    async fn send(
        &self,
        data: serde_json::Value,
        _session: SessionId,
    ) -> Result<Option<EndpointResponse>> {
        let text = data
            .get("text")
            .and_then(|t| t.as_str())
            .ok_or_else(|| RoostError::EndpointRuntime("intent payload has no text".to_owned()))?;
        Ok(Some(self.rest.post_text(text).await?))
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
