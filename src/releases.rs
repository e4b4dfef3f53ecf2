//! Firmware release catalog and OTA cache.
//!
//! Binaries are cached under `OTA_ROOT/<version>/<platform>.bin` on first
//! fetch and served from disk afterwards. Every externally supplied version,
//! platform, or path goes through the path-safety check before touching the
//! filesystem.

use std::path::{Path, PathBuf};

use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::error::{Result, RoostError};
use crate::paths::resolve_under;
use crate::urls::ota_url;

/// Connect timeout for upstream fetches.
const CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(1);
/// Read timeout for asset warm-up fetches.
const FETCH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

/// Directory under the OTA root scanned for locally built firmware.
const LOCAL_DIR: &str = "local";

pub struct ReleaseCache {
    ota_dir: PathBuf,
    releases_url: String,
    client: reqwest::Client,
}

impl ReleaseCache {
    /// Create the cache, ensuring the OTA root exists.
    pub fn new(ota_dir: PathBuf, releases_url: String) -> Result<Self> {
        std::fs::create_dir_all(&ota_dir)?;
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| RoostError::Upstream(e.to_string()))?;
        Ok(Self {
            ota_dir,
            releases_url,
            client,
        })
    }

    /// Fetch the raw upstream release catalog.
    pub async fn fetch_catalog(&self) -> Result<Value> {
        let response = self
            .client
            .get(&self.releases_url)
            .send()
            .await
            .map_err(|e| RoostError::Upstream(format!("release catalog: {e}")))?;
        if !response.status().is_success() {
            return Err(RoostError::Upstream(format!(
                "release catalog returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| RoostError::Upstream(format!("release catalog: {e}")))
    }

    /// Path-safe cache location for one asset.
    pub fn cached_path(&self, version: &str, platform: &str) -> Result<PathBuf> {
        let candidate = self
            .ota_dir
            .join(version)
            .join(format!("{platform}.bin"));
        resolve_under(&self.ota_dir, &candidate)
    }

    /// Serve one firmware binary, fetching and caching it on first request.
    ///
    /// Two calls return identical bytes; the second never re-downloads. A
    /// version/platform unknown upstream yields `NotFound` with no cache
    /// side-effect.
    pub async fn get(&self, version: &str, platform: &str) -> Result<Vec<u8>> {
        let path = self.cached_path(version, platform)?;
        if path.is_file() {
            return Ok(std::fs::read(&path)?);
        }

        let catalog = self.fetch_catalog().await?;
        let Some(url) = download_url(&catalog, version, platform) else {
            return Err(RoostError::NotFound(format!(
                "no release asset for {version}/{platform}"
            )));
        };

        let bytes = self.download(&url).await?;
        write_atomic(&path, &bytes)?;
        tracing::info!(version, platform, "cached OTA asset ({} bytes)", bytes.len());
        Ok(bytes)
    }

    /// Admin pre-fetch: cache an asset from an explicit URL.
    ///
    /// When the file is already cached and matches the expected size, the
    /// download is skipped.
    pub async fn cache(
        &self,
        version: &str,
        platform: &str,
        url: &str,
        size: Option<u64>,
    ) -> Result<()> {
        let path = self.cached_path(version, platform)?;
        if path.is_file() {
            let on_disk = std::fs::metadata(&path)?.len();
            if size.is_none_or(|expected| expected == on_disk) {
                return Ok(());
            }
            tracing::warn!(
                version,
                platform,
                on_disk,
                "cached asset size mismatch, refetching"
            );
        }

        let bytes = self.download(url).await?;
        if let Some(expected) = size {
            if bytes.len() as u64 != expected {
                return Err(RoostError::Upstream(format!(
                    "asset size mismatch for {version}/{platform}: expected {expected}, got {}",
                    bytes.len()
                )));
            }
        }
        write_atomic(&path, &bytes)?;
        Ok(())
    }

    /// Path-safe delete of a cached file, addressed relative to the OTA root.
    pub fn delete(&self, rel_path: &str) -> Result<()> {
        let path = resolve_under(&self.ota_dir, &self.ota_dir.join(rel_path))?;
        if !path.is_file() {
            return Err(RoostError::NotFound(format!("no cached file at {rel_path}")));
        }
        std::fs::remove_file(&path)?;
        Ok(())
    }

    /// Merge the upstream catalog with the locally-scanned `local/` firmware
    /// directory and annotate every asset with `was_url` and `cached`.
    pub async fn list_releases(&self, was_url: &str) -> Result<Value> {
        let mut catalog = self.fetch_catalog().await?;

        let releases = catalog
            .as_array_mut()
            .ok_or_else(|| RoostError::Upstream("release catalog is not an array".to_owned()))?;
        if let Some(local) = self.scan_local()? {
            releases.push(local);
        }

        for release in releases.iter_mut() {
            let Some(tag) = release
                .get("tag_name")
                .or_else(|| release.get("name"))
                .and_then(Value::as_str)
                .map(str::to_owned)
            else {
                continue;
            };
            let Some(assets) = release.get_mut("assets").and_then(Value::as_array_mut) else {
                continue;
            };
            for asset in assets.iter_mut() {
                let Some(platform) = asset.get("platform").and_then(Value::as_str).map(str::to_owned)
                else {
                    continue;
                };
                asset["was_url"] = json!(ota_url(was_url, &tag, &platform)?);
                let cached = self
                    .cached_path(&tag, &platform)
                    .map(|p| p.is_file())
                    .unwrap_or(false);
                asset["cached"] = json!(cached);
            }
        }

        Ok(catalog)
    }

    /// Build the synthetic `local` release from `OTA_ROOT/local/*.bin`.
    ///
    /// Checksums are computed on every read so a replaced binary is always
    /// reported accurately.
    fn scan_local(&self) -> Result<Option<Value>> {
        let local_dir = self.ota_dir.join(LOCAL_DIR);
        if !local_dir.is_dir() {
            return Ok(None);
        }

        let mut assets = Vec::new();
        let mut entries: Vec<_> = std::fs::read_dir(&local_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "bin"))
            .collect();
        entries.sort();

        for path in entries {
            let Some(platform) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let bytes = std::fs::read(&path)?;
            assets.push(json!({
                "platform": platform,
                "size": bytes.len(),
                "sha256": sha256_hex(&bytes),
                "local_path": path.to_string_lossy(),
            }));
        }

        if assets.is_empty() {
            return Ok(None);
        }
        Ok(Some(json!({
            "name": LOCAL_DIR,
            "tag_name": LOCAL_DIR,
            "assets": assets,
        })))
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RoostError::Upstream(format!("asset fetch: {e}")))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(RoostError::NotFound(format!("asset not found at {url}")));
        }
        if !response.status().is_success() {
            return Err(RoostError::Upstream(format!(
                "asset fetch returned {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| RoostError::Upstream(format!("asset fetch: {e}")))?;
        Ok(bytes.to_vec())
    }
}

/// Look up the download URL for one asset in the upstream catalog.
fn download_url(catalog: &Value, version: &str, platform: &str) -> Option<String> {
    let releases = catalog.as_array()?;
    for release in releases {
        if release.get("name").and_then(Value::as_str) != Some(version) {
            continue;
        }
        let assets = release.get("assets").and_then(Value::as_array)?;
        for asset in assets {
            if asset.get("platform").and_then(Value::as_str) == Some(platform) {
                return asset
                    .get("browser_download_url")
                    .and_then(Value::as_str)
                    .map(str::to_owned);
            }
        }
    }
    None
}

/// Write via a temp file in the target directory, then rename into place.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| RoostError::PathUnsafe(format!("no parent for {}", path.display())))?;
    std::fs::create_dir_all(parent)?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_matches_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn write_atomic_leaves_no_temp_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("v1").join("p1.bin");
        write_atomic(&target, b"firmware").expect("write");

        assert_eq!(std::fs::read(&target).expect("read"), b"firmware");
        let siblings: Vec<_> = std::fs::read_dir(target.parent().expect("parent"))
            .expect("read_dir")
            .collect();
        assert_eq!(siblings.len(), 1);
    }

    #[test]
    fn download_url_finds_the_matching_asset() {
        let catalog = json!([{
            "name": "1.2.0",
            "tag_name": "1.2.0",
            "assets": [
                {"platform": "ESP32-S3-BOX-3", "browser_download_url": "https://cdn/fw-box3.bin"},
                {"platform": "ESP32-S3-BOX-LITE", "browser_download_url": "https://cdn/fw-lite.bin"},
            ],
        }]);

        assert_eq!(
            download_url(&catalog, "1.2.0", "ESP32-S3-BOX-LITE").as_deref(),
            Some("https://cdn/fw-lite.bin")
        );
        assert_eq!(download_url(&catalog, "1.2.0", "UNKNOWN"), None);
        assert_eq!(download_url(&catalog, "9.9.9", "ESP32-S3-BOX-3"), None);
    }

    #[test]
    fn traversal_versions_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = ReleaseCache::new(dir.path().join("ota"), String::new()).expect("cache");
        let err = cache
            .cached_path("0.0.0-mock.0/../../..", "foo")
            .expect_err("traversal");
        assert!(matches!(err, RoostError::PathUnsafe(_)));
    }

    #[tokio::test]
    async fn local_scan_computes_checksums() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ota = dir.path().join("ota");
        std::fs::create_dir_all(ota.join("local")).expect("local dir");
        std::fs::write(ota.join("local").join("ESP32-S3-BOX-3.bin"), b"abc").expect("write");

        let cache = ReleaseCache::new(ota, String::new()).expect("cache");
        let local = cache.scan_local().expect("scan").expect("local release");
        assert_eq!(local["tag_name"], "local");
        assert_eq!(local["assets"][0]["platform"], "ESP32-S3-BOX-3");
        assert_eq!(local["assets"][0]["size"], 3);
        assert_eq!(
            local["assets"][0]["sha256"],
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
