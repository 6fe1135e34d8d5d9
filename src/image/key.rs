//! Canonical identity of a series' raw pixel data.
//!
//! Two openers that point at the same bytes with the same pixel-affecting
//! settings produce equal [`RawDataKey`]s and therefore share one decode pool
//! and one pyramid cache.

use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Backend family that decodes a source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum BackendKind {
    BioFormats,
    Omero,
    QuPath,
    InMemory,
    Other(String),
}

/// Prefix of canonical keys. Custom backends live under `other/` so they
/// never collide with a built-in name.
impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::BioFormats => f.write_str("bioformats"),
            BackendKind::Omero => f.write_str("omero"),
            BackendKind::QuPath => f.write_str("qupath"),
            BackendKind::InMemory => f.write_str("memory"),
            BackendKind::Other(name) => write!(f, "other/{}", name),
        }
    }
}

/// Where a series comes from and how its pixels are interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SourceDescriptor {
    pub backend: BackendKind,

    /// File path or server URL of the container
    pub location: String,

    /// Series index inside the container
    pub series: u32,

    /// Channel index inside the series
    pub channel: u32,

    /// Whether interleaved RGB is split into separate channels
    pub split_rgb: bool,

    /// Bit depth forced onto the pixels, if any
    pub bit_depth_override: Option<u8>,
}

impl SourceDescriptor {
    /// Series 0, channel 0, native pixel settings.
    pub fn new(backend: BackendKind, location: impl Into<String>) -> Self {
        Self {
            backend,
            location: location.into(),
            series: 0,
            channel: 0,
            split_rgb: false,
            bit_depth_override: None,
        }
    }
}

/// Canonical key for deduplicating raw data across openers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RawDataKey {
    canonical: String,
    digest: String,
}

impl RawDataKey {
    pub fn from_descriptor(descriptor: &SourceDescriptor) -> Self {
        let bit_depth = descriptor
            .bit_depth_override
            .map(|b| b.to_string())
            .unwrap_or_else(|| "native".to_string());

        let canonical = format!(
            "{}:{}#series={}&channel={}&split_rgb={}&bit_depth={}",
            descriptor.backend,
            normalize_location(&descriptor.location),
            descriptor.series,
            descriptor.channel,
            descriptor.split_rgb,
            bit_depth
        );
        let digest = hex::encode(Sha256::digest(canonical.as_bytes()));

        Self { canonical, digest }
    }

    /// Human-readable canonical form.
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// SHA-256 hex digest of the canonical form; used as the series id of tiles.
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl fmt::Display for RawDataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

/// Trim whitespace, unify separators and drop trailing slashes.
fn normalize_location(location: &str) -> String {
    let unified = location.trim().replace('\\', "/");
    let trimmed = unified.trim_end_matches('/');
    if trimmed.is_empty() {
        unified
    } else {
        trimmed.to_string()
    }
}
