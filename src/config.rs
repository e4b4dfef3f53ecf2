//! Typed satellite configuration records and validators.
//!
//! The config record is a closed set of recognized settings: adding a field
//! is a schema change, not a dictionary update. Every field is optional at
//! rest — satellites and the admin UI tolerate partially-filled records and
//! treat missing fields as "use the firmware default".

use serde::{Deserialize, Serialize};

use crate::error::{Result, RoostError};

/// Audio codec used for the satellite → inference-server stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioCodec {
    #[serde(rename = "AMR-WB")]
    AmrWb,
    #[serde(rename = "PCM")]
    Pcm,
}

/// What the satellite plays after executing a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioResponseType {
    Chimes,
    None,
    #[serde(rename = "TTS")]
    Tts,
}

/// Which home-automation backend executes recognized intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandEndpointKind {
    #[serde(rename = "Home Assistant")]
    HomeAssistant,
    #[serde(rename = "openHAB")]
    OpenHab,
    #[serde(rename = "MQTT")]
    Mqtt,
    #[serde(rename = "REST")]
    Rest,
}

/// MQTT broker authentication mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MqttAuthKind {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "userpw")]
    UserPw,
}

/// NTP server selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NtpMode {
    Host,
    #[serde(rename = "DHCP")]
    Dhcp,
}

/// REST endpoint authentication mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestAuthKind {
    None,
    Basic,
    Header,
}

/// Speech recognition mode (only the inference server is supported).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpeechRecMode {
    #[serde(rename = "WIS")]
    Wis,
}

/// Wake detection channel count and confidence threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WakeMode {
    #[serde(rename = "1CH_90")]
    OneCh90,
    #[serde(rename = "1CH_95")]
    OneCh95,
    #[serde(rename = "2CH_90")]
    TwoCh90,
    #[serde(rename = "2CH_95")]
    TwoCh95,
    #[serde(rename = "3CH_90")]
    ThreeCh90,
    #[serde(rename = "3CH_95")]
    ThreeCh95,
}

/// Supported wake words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WakeWord {
    Alexa,
    Hiesp,
    Hilexin,
}

/// The full typed config record pushed to satellites.
///
/// Field names are the wire format — they appear verbatim in the `config`
/// frame and in the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SatelliteConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aec: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<AudioCodec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_response_type: Option<AudioResponseType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bss: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_endpoint: Option<CommandEndpointKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_timeout: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hass_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hass_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hass_tls: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hass_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lcd_brightness: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mic_gain: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mqtt_auth_type: Option<MqttAuthKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mqtt_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mqtt_password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mqtt_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mqtt_tls: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mqtt_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mqtt_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiwake: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ntp_config: Option<NtpMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ntp_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openhab_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openhab_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_buffer: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rest_auth_header: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rest_auth_pass: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rest_auth_type: Option<RestAuthKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rest_auth_user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rest_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_prereleases: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_volume: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_rec_mode: Option<SpeechRecMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_timeout: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vad_mode: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vad_timeout: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wake_confirmation: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wake_mode: Option<WakeMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wake_word: Option<WakeWord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub was_mode: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wis_tts_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wis_tts_url_v2: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wis_url: Option<String>,
}

/// The server-connection namespace of the satellite's non-volatile settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NvsWas {
    #[serde(rename = "URL", skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// The Wi-Fi namespace of the satellite's non-volatile settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NvsWifi {
    #[serde(rename = "PSK", skip_serializing_if = "Option::is_none")]
    pub psk: Option<String>,
    #[serde(rename = "SSID", skip_serializing_if = "Option::is_none")]
    pub ssid: Option<String>,
}

/// The satellite's non-volatile settings record (two namespaces).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NvsConfig {
    #[serde(rename = "WAS", default, skip_serializing_if = "Option::is_none")]
    pub was: Option<NvsWas>,
    #[serde(rename = "WIFI", default, skip_serializing_if = "Option::is_none")]
    pub wifi: Option<NvsWifi>,
}

/// Check a URL for the expected scheme family (`http(s)` or `ws(s)`).
pub fn validate_url(url: &str, ws: bool) -> bool {
    if ws {
        url.starts_with("ws://") || url.starts_with("wss://")
    } else {
        url.starts_with("http://") || url.starts_with("https://")
    }
}

/// WPA passphrases must be 8–63 ASCII characters.
pub fn validate_wifi_psk(psk: &str) -> bool {
    (8..=63).contains(&psk.len())
}

/// SSIDs must be 2–32 characters.
pub fn validate_wifi_ssid(ssid: &str) -> bool {
    (2..=32).contains(&ssid.len())
}

fn require(ok: bool, problems: &mut Vec<String>, msg: &str) {
    if !ok {
        problems.push(msg.to_owned());
    }
}

/// Validate a config record before persisting it.
///
/// Only shape checks — reachability probing is left to the admin UI. Returns
/// `RoostError::Config` listing every problem found.
pub fn validate_config(config: &SatelliteConfig) -> Result<()> {
    let mut problems = Vec::new();

    match config.command_endpoint {
        Some(CommandEndpointKind::HomeAssistant) => {
            require(
                config.hass_token.as_deref().is_some_and(|t| !t.is_empty()),
                &mut problems,
                "Home Assistant token is not set",
            );
        }
        Some(CommandEndpointKind::OpenHab) => {
            require(
                config.openhab_url.as_deref().is_some_and(|u| validate_url(u, false)),
                &mut problems,
                "invalid openHAB URL",
            );
        }
        Some(CommandEndpointKind::Rest) => {
            require(
                config.rest_url.as_deref().is_some_and(|u| validate_url(u, false)),
                &mut problems,
                "invalid REST URL",
            );
            match config.rest_auth_type {
                Some(RestAuthKind::Basic) => {
                    require(
                        config.rest_auth_user.as_deref().is_some_and(|u| !u.is_empty()),
                        &mut problems,
                        "REST basic auth username is not set",
                    );
                    require(
                        config.rest_auth_pass.as_deref().is_some_and(|p| !p.is_empty()),
                        &mut problems,
                        "REST basic auth password is not set",
                    );
                }
                Some(RestAuthKind::Header) => {
                    require(
                        config.rest_auth_header.as_deref().is_some_and(|h| !h.is_empty()),
                        &mut problems,
                        "REST auth header is not set",
                    );
                }
                _ => {}
            }
        }
        _ => {}
    }

    if config.speech_rec_mode.is_some() {
        require(
            config.wis_tts_url.as_deref().is_some_and(|u| validate_url(u, false)),
            &mut problems,
            "invalid speech synthesis URL",
        );
    }
    if let Some(wis_url) = config.wis_url.as_deref() {
        require(validate_url(wis_url, false), &mut problems, "invalid inference server URL");
    }
    if let Some(volume) = config.speaker_volume {
        require(volume <= 100, &mut problems, "speaker volume out of range");
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(RoostError::Config(problems.join("; ")))
    }
}

/// Validate an NVS record before persisting it.
pub fn validate_nvs(nvs: &NvsConfig) -> Result<()> {
    let mut problems = Vec::new();

    if let Some(was) = &nvs.was {
        require(
            was.url.as_deref().is_some_and(|u| validate_url(u, true)),
            &mut problems,
            "invalid WAS WebSocket URL",
        );
    }
    if let Some(wifi) = &nvs.wifi {
        if let Some(ssid) = wifi.ssid.as_deref() {
            require(
                validate_wifi_ssid(ssid),
                &mut problems,
                "Wi-Fi SSID must be between 2 and 32 characters",
            );
        }
        if let Some(psk) = wifi.psk.as_deref() {
            require(
                validate_wifi_psk(psk),
                &mut problems,
                "Wi-Fi WPA passphrase must be between 8 and 63 characters",
            );
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(RoostError::Config(problems.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wifi_psk_boundaries() {
        assert!(!validate_wifi_psk(&"x".repeat(7)));
        assert!(validate_wifi_psk(&"x".repeat(8)));
        assert!(validate_wifi_psk(&"x".repeat(63)));
        assert!(!validate_wifi_psk(&"x".repeat(64)));
    }

    #[test]
    fn wifi_ssid_boundaries() {
        assert!(!validate_wifi_ssid("x"));
        assert!(validate_wifi_ssid("xx"));
        assert!(validate_wifi_ssid(&"x".repeat(32)));
        assert!(!validate_wifi_ssid(&"x".repeat(33)));
    }

    #[test]
    fn enum_wire_names_round_trip() {
        let config = SatelliteConfig {
            audio_codec: Some(AudioCodec::AmrWb),
            audio_response_type: Some(AudioResponseType::Tts),
            command_endpoint: Some(CommandEndpointKind::HomeAssistant),
            wake_mode: Some(WakeMode::TwoCh95),
            wake_word: Some(WakeWord::Hiesp),
            ..SatelliteConfig::default()
        };
        let json = serde_json::to_value(&config).expect("serialize");
        assert_eq!(json["audio_codec"], "AMR-WB");
        assert_eq!(json["audio_response_type"], "TTS");
        assert_eq!(json["command_endpoint"], "Home Assistant");
        assert_eq!(json["wake_mode"], "2CH_95");
        assert_eq!(json["wake_word"], "hiesp");

        let back: SatelliteConfig = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, config);
    }

    #[test]
    fn partial_records_serialize_without_nulls() {
        let config = SatelliteConfig {
            wis_url: Some("http://stt.local:19000/api/listen".to_owned()),
            ..SatelliteConfig::default()
        };
        let json = serde_json::to_value(&config).expect("serialize");
        let object = json.as_object().expect("object");
        assert_eq!(object.len(), 1);
    }

    #[test]
    fn home_assistant_requires_a_token() {
        let config = SatelliteConfig {
            command_endpoint: Some(CommandEndpointKind::HomeAssistant),
            hass_token: Some(String::new()),
            ..SatelliteConfig::default()
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn nvs_wire_names_are_uppercase() {
        let nvs = NvsConfig {
            was: Some(NvsWas {
                url: Some("ws://roost.local:8502/ws".to_owned()),
            }),
            wifi: Some(NvsWifi {
                psk: Some("hunter2hunter2".to_owned()),
                ssid: Some("perch".to_owned()),
            }),
        };
        let json = serde_json::to_value(&nvs).expect("serialize");
        assert_eq!(json["WAS"]["URL"], "ws://roost.local:8502/ws");
        assert_eq!(json["WIFI"]["SSID"], "perch");
        assert_eq!(json["WIFI"]["PSK"], "hunter2hunter2");
        assert!(validate_nvs(&nvs).is_ok());
    }

    #[test]
    fn nvs_rejects_bad_was_url() {
        let nvs = NvsConfig {
            was: Some(NvsWas {
                url: Some("http://roost.local:8502/ws".to_owned()),
            }),
            wifi: None,
        };
        assert!(validate_nvs(&nvs).is_err());
    }
}
