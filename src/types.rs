//! Core types for satstack

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use url::Url;

/// One downloadable object within a catalog item
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    /// Asset key within the item (e.g. "B04")
    pub key: String,
    /// Byte-addressable location
    pub href: Url,
    /// Media type as advertised by the catalog
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

impl AssetRef {
    /// Create an asset reference
    pub fn new(key: impl Into<String>, href: Url, media_type: Option<String>) -> Self {
        Self {
            key: key.into(),
            href,
            media_type,
        }
    }
}

/// Per-call download options
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadOptions {
    /// Width of the download pool (default: 4)
    pub max_parallel: usize,
    /// Reuse completed files already on disk (default: true)
    pub skip_existing: bool,
    /// Re-fetch even when a completed file exists (default: false)
    pub overwrite: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            skip_existing: true,
            overwrite: false,
        }
    }
}

/// How to reconcile and stack bands into one raster
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MergeSpec {
    /// Band names in output order
    pub band_order: Vec<String>,
    /// Output pixel size; `None` uses the first band in `band_order`
    #[serde(default)]
    pub target_pixel_size: Option<f64>,
    /// Pixel-size difference still treated as "same resolution"
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Replace an existing merged file
    #[serde(default)]
    pub overwrite: bool,
}

fn default_tolerance() -> f64 {
    MergeSpec::DEFAULT_TOLERANCE
}

impl MergeSpec {
    /// Default pixel-size tolerance
    pub const DEFAULT_TOLERANCE: f64 = 0.01;

    /// Spec with the given order and default tolerance
    pub fn new<I, S>(band_order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            band_order: band_order.into_iter().map(Into::into).collect(),
            target_pixel_size: None,
            tolerance: Self::DEFAULT_TOLERANCE,
            overwrite: false,
        }
    }

    /// Fix the output pixel size
    #[must_use]
    pub fn with_target_pixel_size(mut self, size: f64) -> Self {
        self.target_pixel_size = Some(size);
        self
    }

    /// Override the tolerance
    #[must_use]
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Allow replacing an existing output
    #[must_use]
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

/// Terminal state of one download task
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AssetOutcome {
    /// File is complete on disk (freshly fetched or reused)
    Success {
        /// Local path
        path: PathBuf,
    },
    /// Fetch failed; any partial output was removed
    Failed {
        /// Captured cause
        reason: String,
    },
    /// Requested key is not offered by the item
    NotFound,
}

impl AssetOutcome {
    /// Local path when the asset completed
    pub fn path(&self) -> Option<&Path> {
        match self {
            AssetOutcome::Success { path } => Some(path),
            _ => None,
        }
    }

    /// Whether the asset completed
    pub fn is_success(&self) -> bool {
        matches!(self, AssetOutcome::Success { .. })
    }
}

/// Outcome map for one catalog item
///
/// Keys are kept sorted so the content is identical regardless of the order
/// in which downloads completed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadResult {
    /// Catalog item the assets belong to
    pub item_id: String,
    /// Outcome per requested asset key
    pub outcomes: BTreeMap<String, AssetOutcome>,
    /// Keys the item actually offers
    pub available_keys: Vec<String>,
}

impl DownloadResult {
    /// Local path for a key, `None` on failure or absence
    pub fn path(&self, key: &str) -> Option<&Path> {
        self.outcomes.get(key).and_then(AssetOutcome::path)
    }

    /// Successfully completed assets
    pub fn successful(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.outcomes
            .iter()
            .filter_map(|(key, outcome)| outcome.path().map(|p| (key.as_str(), p)))
    }

    /// Keys that failed, with their causes
    pub fn failed(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outcomes.iter().filter_map(|(key, outcome)| match outcome {
            AssetOutcome::Failed { reason } => Some((key.as_str(), reason.as_str())),
            _ => None,
        })
    }

    /// Requested keys the item does not offer
    pub fn not_found(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, AssetOutcome::NotFound))
            .map(|(key, _)| key.as_str())
    }

    /// True when every requested key completed
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.values().all(AssetOutcome::is_success)
    }
}

/// Event emitted during token and download lifecycles
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Network fetch started for an asset
    AssetStarted {
        /// Catalog item
        item_id: String,
        /// Asset key
        key: String,
    },

    /// Asset fetched and moved into place
    AssetDownloaded {
        /// Catalog item
        item_id: String,
        /// Asset key
        key: String,
        /// Final path
        path: PathBuf,
        /// Bytes written
        bytes: u64,
    },

    /// Completed file reused without network I/O
    AssetSkipped {
        /// Catalog item
        item_id: String,
        /// Asset key
        key: String,
        /// Existing path
        path: PathBuf,
    },

    /// Asset fetch failed
    AssetFailed {
        /// Catalog item
        item_id: String,
        /// Asset key
        key: String,
        /// Captured cause
        error: String,
    },

    /// Requested key absent from the item
    AssetNotFound {
        /// Catalog item
        item_id: String,
        /// Requested key
        key: String,
        /// Keys the item offers
        available: Vec<String>,
    },

    /// A new token pair was obtained
    TokenRefreshed {
        /// How the pair was obtained ("refresh" or "password")
        via: String,
    },

    /// Background renewal failed; it will retry next interval
    TokenRenewalFailed {
        /// Captured cause
        error: String,
    },

    /// Multi-band raster written
    MergeWritten {
        /// Output path
        path: PathBuf,
        /// Band names in output order
        bands: Vec<String>,
    },
}
