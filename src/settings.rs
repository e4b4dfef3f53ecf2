//! Server settings read once from the environment at startup.
//!
//! Roost is configured by its hosting runtime (container, systemd unit), so
//! there is no CLI parser — every knob is an environment variable with a
//! documented default.

use std::path::PathBuf;

/// Default listen port. Satellites and the admin UI both dial this.
const DEFAULT_PORT: u16 = 8502;

/// Upstream firmware release catalog.
const DEFAULT_RELEASES_URL: &str = "https://updates.saorsalabs.com/roost/api/release?format=server";

/// Upstream default-config service (per-type defaults for new installs).
const DEFAULT_CONFIG_URL: &str = "https://updates.saorsalabs.com/roost/api/config";

/// Upstream timezone catalog.
const DEFAULT_TZ_URL: &str = "https://updates.saorsalabs.com/roost/api/asset?type=tz";

/// Immutable server settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Listen address for the HTTP API and satellite WebSocket endpoint.
    pub bind_host: String,
    /// Listen port.
    pub bind_port: u16,
    /// Root directory for all persistent state (db, OTA cache, assets).
    pub storage_dir: PathBuf,
    /// Upstream release catalog URL.
    pub releases_url: String,
    /// Upstream default-config URL.
    pub default_config_url: String,
    /// Upstream timezone catalog URL.
    pub tz_url: String,
}

impl Settings {
    /// Read settings from `ROOST_*` environment variables, falling back to
    /// defaults suitable for a container with a `storage/` volume.
    pub fn from_env() -> Self {
        let bind_host = std::env::var("ROOST_HOST").unwrap_or_else(|_| "0.0.0.0".to_owned());
        let bind_port = std::env::var("ROOST_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        let storage_dir = std::env::var("ROOST_STORAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("storage"));
        let releases_url = std::env::var("ROOST_RELEASES_URL")
            .unwrap_or_else(|_| DEFAULT_RELEASES_URL.to_owned());
        let default_config_url =
            std::env::var("ROOST_DEFAULT_CONFIG_URL").unwrap_or_else(|_| DEFAULT_CONFIG_URL.to_owned());
        let tz_url = std::env::var("ROOST_TZ_URL").unwrap_or_else(|_| DEFAULT_TZ_URL.to_owned());

        Self {
            bind_host,
            bind_port,
            storage_dir,
            releases_url,
            default_config_url,
            tz_url,
        }
    }

    /// OTA firmware cache root (`<storage>/ota/<version>/<platform>.bin`).
    pub fn ota_dir(&self) -> PathBuf {
        self.storage_dir.join("ota")
    }

    /// Asset root (`<storage>/asset/<type>/<name>`).
    pub fn asset_dir(&self) -> PathBuf {
        self.storage_dir.join("asset")
    }

    /// SQLite config store path.
    pub fn db_path(&self) -> PathBuf {
        self.storage_dir.join("roost.db")
    }

    /// Cached timezone catalog.
    pub fn tz_cache_path(&self) -> PathBuf {
        self.storage_dir.join("tz.json")
    }
}
