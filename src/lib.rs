//! # satstack
//!
//! Acquisition and co-registration of multi-band satellite rasters.
//!
//! satstack fetches named assets of a catalog item (e.g. Sentinel-2 bands)
//! from authenticated hosts, isolates per-asset failures, reconciles bands that
//! arrive at different native resolutions and stacks them into a single
//! multi-band GeoTIFF in a caller-chosen order.
//!
//! - **Token lifecycle** - [`TokenManager`] keeps a bearer token alive across
//!   long jobs (cached → refresh → password) with an optional renewal loop
//! - **Bounded downloads** - [`AssetDownloader`] streams assets to disk with
//!   atomic renames and skip-if-present idempotence
//! - **Resolution reconciliation** - [`raster::reconcile`] resamples outliers
//!   to one pixel size
//! - **Event-driven** - subscribe to [`Event`]s instead of polling
//!
//! ## Quick Start
//!
//! ```no_run
//! use satstack::{Config, DownloadOptions, MergeSpec, SceneStacker, StaticCatalog};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let item: serde_json::Value = serde_json::from_str(&std::fs::read_to_string("item.json")?)?;
//!     let catalog = Arc::new(StaticCatalog::from_stac_item(&item)?);
//!
//!     let stacker = SceneStacker::new(Config::default(), catalog).await?;
//!     let mut events = stacker.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let spec = MergeSpec::new(["B04", "B03", "B02"]);
//!     let (result, merged) = stacker
//!         .stack_item("S2B_MSIL2A_20240601", &spec, DownloadOptions::default())
//!         .await?;
//!     println!("{} assets, merged into {}", result.outcomes.len(), merged.display());
//!
//!     stacker.shutdown().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Bearer-token lifecycle
pub mod auth;
/// Catalog resolver boundary
pub mod catalog;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Concurrent asset downloads
pub mod fetch;
/// Raster model, resampling, GeoTIFF I/O and merging
pub mod raster;
/// Download-and-merge façade
pub mod stacker;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use auth::{AuthClient, CredentialStore, Credentials, OidcAuthClient, TokenManager, TokenState};
pub use catalog::{CatalogResolver, StaticCatalog};
pub use config::{AuthConfig, Config, DownloadConfig, MergeConfig};
pub use error::{
    AuthError, DownloadError, Error, MergeError, RasterError, ResampleError, Result,
};
pub use fetch::{AssetDownloader, CredentialSupplier, StaticToken};
pub use raster::{BandRaster, Crs, ResamplingMethod};
pub use stacker::SceneStacker;
pub use types::{
    AssetOutcome, AssetRef, DownloadOptions, DownloadResult, Event, MergeSpec,
};
