//! Home Assistant conversation REST endpoint.
//!
//! Used when the target Home Assistant instance does not expose the assist
//! pipeline. Intents go to `/api/conversation/process` with bearer auth and
//! the spoken reply is extracted from `response.speech.plain.speech`.

use crate::connmgr::SessionId;
use crate::error::Result;
use crate::urls::construct_url;

use super::rest::{RestAuth, RestEndpoint};
use super::{CommandEndpoint, EndpointResponse, EndpointResult};

pub struct HaRestEndpoint {
    rest: RestEndpoint,
}

impl HaRestEndpoint {
    pub fn new(host: &str, port: u16, tls: bool, token: &str) -> Result<Self> {
        let url = format!(
            "{}/api/conversation/process",
            construct_url(host, port, tls, false)
        );
        let rest = RestEndpoint::new(
            &url,
            RestAuth::Header {
                value: format!("Bearer {token}"),
            },
        )?;
        Ok(Self { rest })
    }

    fn extract_speech(body: &str) -> String {
        serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|value| {
                value
                    .pointer("/response/speech/plain/speech")
                    .and_then(|speech| speech.as_str())
                    .map(str::to_owned)
            })
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl CommandEndpoint for HaRestEndpoint {
    fn name(&self) -> &'static str {
        "Home Assistant conversation"
    }

    async fn send(
        &self,
        data: serde_json::Value,
        _session: SessionId,
    ) -> Result<Option<EndpointResponse>> {
        let mut out = serde_json::Map::new();
        if let Some(text) = data.get("text") {
            out.insert("text".to_owned(), text.clone());
        }
        if let Some(language) = data.get("language") {
            out.insert("language".to_owned(), language.clone());
        }
        Ok(Some(self.rest.post_json(&serde_json::Value::Object(out)).await?))
    }

    fn parse_response(&self, response: EndpointResponse) -> String {
        let result = if response.ok {
            EndpointResult {
                ok: true,
                speech: Self::extract_speech(&response.body),
            }
        } else {
            EndpointResult::default()
        };
        result.to_wire()
    }

    async fn stop(&self) {}
}
