//! Error types for satstack
//!
//! This module provides the error taxonomy for the library:
//! - Domain-specific error types (Auth, Download, Resample, Merge, Raster)
//! - A top-level [`Error`] that every public operation returns
//! - Context information (asset key, path, underlying cause)

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for satstack operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for satstack
///
/// Each variant wraps a domain error carrying enough context (asset key, path,
/// underlying cause) to be actionable without re-deriving state.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_parallel")
        key: Option<String>,
    },

    /// No valid credential path exists
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Asset download error
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// Invalid merge spec or unsupported resampling
    #[error("resample error: {0}")]
    Resample(#[from] ResampleError),

    /// Multi-band write failed
    #[error("merge error: {0}")]
    Merge(#[from] MergeError),

    /// Raster decode/encode error
    #[error("raster error: {0}")]
    Raster(#[from] RasterError),

    /// Catalog resolver failure
    #[error("catalog error: {0}")]
    Catalog(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Token lifecycle errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// Neither a cached token nor username/password are available
    #[error("no credentials configured and no cached token is valid")]
    NoCredentials,

    /// The token endpoint answered with a non-success status
    #[error("token endpoint rejected the request with status {status}: {body}")]
    Rejected {
        /// HTTP status code returned by the token endpoint
        status: u16,
        /// Response body (truncated)
        body: String,
    },

    /// The token endpoint could not be reached
    #[error("token endpoint unreachable: {0}")]
    Transport(String),

    /// The token endpoint answered with a body that is not a token grant
    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    /// Cached, refresh and password paths were all tried and the last one failed
    #[error("all credential paths exhausted: {source}")]
    Exhausted {
        /// Failure of the final (password) authentication step
        #[source]
        source: Box<AuthError>,
    },

    /// The credential store could not be read or written
    #[error("credential store error at {path}: {reason}")]
    Store {
        /// File that failed
        path: PathBuf,
        /// Underlying cause
        reason: String,
    },
}

/// Per-asset download errors
///
/// These never abort a batch; they are recorded against the failing asset key.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Requested asset key is not offered by the catalog item
    #[error("asset '{key}' not found; available assets: {}", available.join(", "))]
    AssetNotFound {
        /// The requested key
        key: String,
        /// Keys the item actually offers
        available: Vec<String>,
    },

    /// Remote server answered with a non-success status
    #[error("asset '{key}' returned HTTP {status} from {url}")]
    HttpStatus {
        /// Asset key
        key: String,
        /// HTTP status code
        status: u16,
        /// Requested URL
        url: String,
    },

    /// Connection, timeout or body stream failure
    #[error("asset '{key}' transfer failed: {reason}")]
    Transport {
        /// Asset key
        key: String,
        /// Underlying cause
        reason: String,
    },

    /// Local write failure
    #[error("asset '{key}' could not be written to {path}: {source}")]
    Io {
        /// Asset key
        key: String,
        /// Path being written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The catalog could not sign the asset href
    #[error("asset '{key}' could not be signed: {reason}")]
    Signing {
        /// Asset key
        key: String,
        /// Underlying cause
        reason: String,
    },

    /// Another asset of the same item maps to the same local file
    #[error("asset '{key}' would overwrite {path}, already claimed by asset '{claimed_by}'")]
    DestinationConflict {
        /// Asset key
        key: String,
        /// Shared destination
        path: PathBuf,
        /// Key that owns the destination
        claimed_by: String,
    },

    /// The credential supplier could not produce a bearer token
    #[error("asset '{key}' has no credentials: {reason}")]
    Credentials {
        /// Asset key
        key: String,
        /// Underlying cause
        reason: String,
    },
}

/// Resolution reconciliation errors
#[derive(Debug, Error)]
pub enum ResampleError {
    /// No bands were provided
    #[error("cannot reconcile an empty band set")]
    EmptyInput,

    /// The merge spec or a band carries invalid values
    #[error("invalid merge spec: {0}")]
    InvalidSpec(String),

    /// The target grid for a band has no pixels
    #[error("band '{band}' has an empty grid at pixel size {pixel_size}")]
    EmptyGrid {
        /// Band name
        band: String,
        /// Target pixel size
        pixel_size: f64,
    },

    /// The target grid for a band exceeds the sample limit
    #[error("band '{band}' at pixel size {pixel_size} exceeds {limit} samples")]
    GridTooLarge {
        /// Band name
        band: String,
        /// Target pixel size
        pixel_size: f64,
        /// Maximum samples per band
        limit: u64,
    },
}

/// Multi-band merge errors
#[derive(Debug, Error)]
pub enum MergeError {
    /// Nothing to write
    #[error("no bands to merge")]
    NoBands,

    /// A band named in the order is not among the supplied bands
    #[error("band '{band}' requested in band order is missing; have: {}", available.join(", "))]
    MissingBand {
        /// Missing band name
        band: String,
        /// Band names that were supplied
        available: Vec<String>,
    },

    /// Bands do not share one grid
    #[error("band '{band}' is {width}x{height}, expected {expected_width}x{expected_height}")]
    ShapeMismatch {
        /// Offending band
        band: String,
        /// Band width
        width: u32,
        /// Band height
        height: u32,
        /// Width of the first band in order
        expected_width: u32,
        /// Height of the first band in order
        expected_height: u32,
    },

    /// Bands do not share one coordinate reference system
    #[error("band '{band}' is in {found}, expected {expected}")]
    CrsMismatch {
        /// Offending band
        band: String,
        /// CRS of the offending band
        found: String,
        /// CRS of the first band in order
        expected: String,
    },

    /// Bands share a shape but not a top-left corner
    #[error("band '{band}' starts at {origin:?}, expected {expected:?}")]
    OriginMismatch {
        /// Offending band
        band: String,
        /// Top-left corner of the offending band
        origin: (f64, f64),
        /// Top-left corner of the first band in order
        expected: (f64, f64),
    },

    /// Output already exists and overwrite was not requested
    #[error("output {0} already exists")]
    OutputExists(PathBuf),

    /// The raster writer rejected the output
    #[error("failed to write {path}: {reason}")]
    Write {
        /// Output path
        path: PathBuf,
        /// Underlying cause
        reason: String,
    },
}

/// GeoTIFF decode/encode errors
#[derive(Debug, Error)]
pub enum RasterError {
    /// The TIFF codec failed
    #[error("TIFF error in {path}: {source}")]
    Tiff {
        /// File being read or written
        path: PathBuf,
        /// Codec error
        #[source]
        source: tiff::TiffError,
    },

    /// A required GeoTIFF tag is missing or malformed
    #[error("{path} is missing GeoTIFF tag {tag}")]
    MissingGeoTag {
        /// File being read
        path: PathBuf,
        /// Tag name
        tag: &'static str,
    },

    /// Sample layout the reader does not handle
    #[error("{path} has unsupported layout: {reason}")]
    Unsupported {
        /// File being read
        path: PathBuf,
        /// What is unsupported
        reason: String,
    },

    /// I/O error opening or writing the file
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File being read or written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Short machine-readable code for logs and events
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Auth(_) => "auth_error",
            Error::Download(DownloadError::AssetNotFound { .. }) => "asset_not_found",
            Error::Download(_) => "download_error",
            Error::Resample(_) => "resample_error",
            Error::Merge(_) => "merge_error",
            Error::Raster(_) => "raster_error",
            Error::Catalog(_) => "catalog_error",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
        }
    }
}
