//! Path-safe asset serving for the admin UI and satellites.
//!
//! Assets live under `ASSET_ROOT/<type>/<name>`. The MIME type is sniffed
//! from the file contents, never from the extension, and audio assets are
//! restricted to the formats satellites can decode (FLAC and WAV).

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{Result, RoostError};
use crate::paths::resolve_under;

/// Asset categories, each its own subdirectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Audio,
    Image,
    Other,
}

impl AssetKind {
    fn dir_name(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Image => "image",
            Self::Other => "other",
        }
    }
}

pub struct AssetStore {
    root: PathBuf,
}

impl AssetStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Resolve one asset path safely; `NotFound` when it does not exist.
    pub fn resolve(&self, kind: AssetKind, name: &str) -> Result<PathBuf> {
        let candidate = self.root.join(kind.dir_name()).join(name);
        let path = resolve_under(&self.root, &candidate)?;
        if !path.is_file() {
            return Err(RoostError::NotFound(format!("no asset named {name}")));
        }
        Ok(path)
    }

    /// Read an asset and determine its MIME type from the content.
    ///
    /// Audio assets in a format satellites cannot decode are rejected.
    pub fn read(&self, kind: AssetKind, name: &str) -> Result<(Vec<u8>, &'static str)> {
        let path = self.resolve(kind, name)?;
        let bytes = std::fs::read(&path)?;
        let mime = sniff_mime(&bytes);

        if kind == AssetKind::Audio && mime != "audio/flac" && mime != "audio/x-wav" {
            return Err(RoostError::Config(
                "unsupported audio asset file format".to_owned(),
            ));
        }
        Ok((bytes, mime))
    }
}

/// Determine a MIME type from magic numbers.
pub fn sniff_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"fLaC") {
        return "audio/flac";
    }
    if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WAVE" {
        return "audio/x-wav";
    }
    if bytes.starts_with(b"ID3") || bytes.starts_with(&[0xff, 0xfb]) {
        return "audio/mpeg";
    }
    if bytes.starts_with(b"OggS") {
        return "audio/ogg";
    }
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        return "image/png";
    }
    if bytes.starts_with(&[0xff, 0xd8, 0xff]) {
        return "image/jpeg";
    }
    if bytes.starts_with(b"GIF8") {
        return "image/gif";
    }
    if bytes.starts_with(b"BM") {
        return "image/bmp";
    }
    "application/octet-stream"
}
