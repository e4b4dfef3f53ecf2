//! `GET`/`POST /api/config` — typed config, NVS, opaque blobs, tz catalog.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::config::{self, NvsConfig, SatelliteConfig};
use crate::error::RoostError;
use crate::server::ServerState;
use crate::urls::construct_url;

use super::error_response;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigType {
    Config,
    Nvs,
    HaUrl,
    HaToken,
    Multinet,
    Was,
    Tz,
}

#[derive(Debug, Deserialize)]
pub struct GetConfigQuery {
    #[serde(rename = "type")]
    pub kind: ConfigType,
    #[serde(default)]
    pub default: bool,
}

pub async fn get_config(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<GetConfigQuery>,
) -> Response {
    // The tz catalog is special: `default` forces an upstream refresh.
    if query.kind == ConfigType::Tz {
        return Json(state.tz.get(query.default).await).into_response();
    }

    if query.default {
        return fetch_default(&state, query.kind).await;
    }

    match query.kind {
        ConfigType::Config => Json(state.store.read_config_json()).into_response(),
        ConfigType::Nvs => Json(state.store.read_nvs_json()).into_response(),
        ConfigType::Multinet => Json(state.store.read_blob("multinet")).into_response(),
        ConfigType::Was => Json(state.store.read_blob("was")).into_response(),
        ConfigType::HaToken => match state.store.read_config().hass_token {
            Some(token) => token.into_response(),
            None => error_response(&RoostError::NotFound(
                "Home Assistant token is not set".to_owned(),
            ))
            .into_response(),
        },
        ConfigType::HaUrl => {
            let config = state.store.read_config();
            match config.hass_host {
                Some(host) => construct_url(
                    &host,
                    config.hass_port.unwrap_or(8123),
                    config.hass_tls.unwrap_or(false),
                    false,
                )
                .into_response(),
                None => error_response(&RoostError::NotFound(
                    "Home Assistant host is not set".to_owned(),
                ))
                .into_response(),
            }
        }
        ConfigType::Tz => Json(state.tz.get(query.default).await).into_response(),
    }
}

/// Proxy the upstream default-config service for one config type.
async fn fetch_default(state: &ServerState, kind: ConfigType) -> Response {
    let kind_name = match kind {
        ConfigType::Config => "config",
        ConfigType::Nvs => "nvs",
        ConfigType::Multinet => "multinet",
        ConfigType::Was => "was",
        _ => {
            return error_response(&RoostError::Config(
                "no upstream defaults for this config type".to_owned(),
            ))
            .into_response();
        }
    };

    let url = format!("{}?type={kind_name}", state.settings.default_config_url);
    let default_config: Result<Value, _> = async {
        state
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| RoostError::Upstream(e.to_string()))?
            .json()
            .await
            .map_err(|e| RoostError::Upstream(e.to_string()))
    }
    .await;

    match default_config {
        Ok(Value::Object(object)) => Json(Value::Object(object)).into_response(),
        Ok(_) => error_response(&RoostError::Config("invalid default config".to_owned()))
            .into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct PostConfigQuery {
    #[serde(rename = "type")]
    pub kind: ConfigType,
    #[serde(default)]
    pub apply: bool,
}

pub async fn post_config(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<PostConfigQuery>,
    Json(body): Json<Value>,
) -> Response {
    match query.kind {
        ConfigType::Config => {
            // Validate the typed shape before anything is persisted.
            let typed: SatelliteConfig = match serde_json::from_value(body.clone()) {
                Ok(typed) => typed,
                Err(e) => {
                    return error_response(&RoostError::Config(format!("invalid config: {e}")))
                        .into_response();
                }
            };
            if let Err(e) = config::validate_config(&typed) {
                return error_response(&e).into_response();
            }
            if let Err(e) = state.store.write_config(&body) {
                return error_response(&e).into_response();
            }
            if query.apply {
                // Broadcast the full stored record so satellites always see
                // a complete view, then swap the command endpoint.
                let frame = json!({"config": state.store.read_config_json()}).to_string();
                state.connmgr.broadcast(&frame);
                state.reinit_endpoint().await;
            }
            (StatusCode::OK, Json(json!("Success"))).into_response()
        }
        ConfigType::Nvs => {
            let typed: NvsConfig = match serde_json::from_value(body.clone()) {
                Ok(typed) => typed,
                Err(e) => {
                    return error_response(&RoostError::Config(format!("invalid NVS: {e}")))
                        .into_response();
                }
            };
            if let Err(e) = config::validate_nvs(&typed) {
                return error_response(&e).into_response();
            }
            if let Err(e) = state.store.write_nvs(&body) {
                return error_response(&e).into_response();
            }
            if query.apply {
                let frame = json!({"nvs": state.store.read_nvs_json()}).to_string();
                state.connmgr.broadcast(&frame);
            }
            (StatusCode::OK, Json(json!("Success"))).into_response()
        }
        ConfigType::Multinet | ConfigType::Was => {
            let kind_name = if query.kind == ConfigType::Multinet {
                "multinet"
            } else {
                "was"
            };
            match state.store.write_blob(kind_name, &body) {
                Ok(()) => (StatusCode::OK, Json(json!("Success"))).into_response(),
                Err(e) => error_response(&e).into_response(),
            }
        }
        _ => error_response(&RoostError::Config(
            "this config type cannot be written".to_owned(),
        ))
        .into_response(),
    }
}
