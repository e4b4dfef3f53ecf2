//! Timezone catalog: fetched from upstream, cached to disk.
//!
//! Satellites have no tz database; the admin UI offers the catalog when
//! picking a timezone. The catalog is refreshed at startup and on demand,
//! and every failure falls back to whatever is cached (or an empty object).

use std::path::PathBuf;

use serde_json::Value;

use crate::error::{Result, RoostError};

pub struct TzCatalog {
    url: String,
    cache_path: PathBuf,
    client: reqwest::Client,
}

impl TzCatalog {
    pub fn new(url: String, cache_path: PathBuf) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(1))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| RoostError::Upstream(e.to_string()))?;
        Ok(Self {
            url,
            cache_path,
            client,
        })
    }

    /// Return the catalog, refreshing from upstream when asked or when no
    /// cached copy exists. Never errors — an unreachable upstream yields the
    /// cached copy or `{}`.
    pub async fn get(&self, refresh: bool) -> Value {
        if refresh || !self.cache_path.is_file() {
            match self.fetch().await {
                Ok(catalog) => {
                    if let Err(e) = self.store(&catalog) {
                        tracing::warn!("failed to cache tz catalog: {e}");
                    }
                    return catalog;
                }
                Err(e) => tracing::warn!("tz catalog refresh failed: {e}"),
            }
        }
        self.cached()
    }

    async fn fetch(&self) -> Result<Value> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| RoostError::Upstream(e.to_string()))?;
        if !response.status().is_success() {
            return Err(RoostError::Upstream(format!(
                "tz catalog returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| RoostError::Upstream(e.to_string()))
    }

    fn store(&self, catalog: &Value) -> Result<()> {
        if let Some(parent) = self.cache_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.cache_path, catalog.to_string())?;
        Ok(())
    }

    fn cached(&self) -> Value {
        std::fs::read_to_string(&self.cache_path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_upstream_falls_back_to_cache() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache_path = dir.path().join("tz.json");
        std::fs::write(&cache_path, r#"{"UTC": "UTC0"}"#).expect("seed cache");

        let catalog = TzCatalog::new("http://127.0.0.1:1/api".to_owned(), cache_path)
            .expect("catalog");
        assert_eq!(catalog.get(true).await, serde_json::json!({"UTC": "UTC0"}));
    }

    #[tokio::test]
    async fn missing_cache_and_upstream_yield_empty_object() {
        let dir = tempfile::tempdir().expect("tempdir");
        let catalog = TzCatalog::new(
            "http://127.0.0.1:1/api".to_owned(),
            dir.path().join("tz.json"),
        )
        .expect("catalog");
        assert_eq!(catalog.get(false).await, serde_json::json!({}));
    }
}
