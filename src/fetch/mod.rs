//! Bounded-concurrency asset downloads for one catalog item.
//!
//! Each asset is fetched independently by [`fetcher`]; the orchestrator runs
//! them through a `buffer_unordered` pool and folds the outcomes into a
//! [`DownloadResult`] from a single loop, so worker bodies never touch the
//! shared map.

mod fetcher;


pub use fetcher::DownloadTask;

use crate::catalog::CatalogResolver;
use crate::config::DownloadConfig;
use crate::error::{DownloadError, Result};
use crate::types::{AssetOutcome, AssetRef, DownloadOptions, DownloadResult, Event};
use crate::utils::asset_file_name;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Source of bearer tokens for authenticated asset hosts
///
/// Called once per network fetch; implementations are expected to cache.
#[async_trait]
pub trait CredentialSupplier: Send + Sync {
    /// Token to send as `Authorization: Bearer <token>`
    async fn bearer_token(&self) -> Result<String>;
}

/// Fixed token, useful for pre-signed sessions and tests
#[derive(Clone, Debug)]
pub struct StaticToken(pub String);

#[async_trait]
impl CredentialSupplier for StaticToken {
    async fn bearer_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Shared state handed to every fetch
pub(crate) struct FetchContext {
    pub(crate) http: reqwest::Client,
    pub(crate) credentials: Option<Arc<dyn CredentialSupplier>>,
    pub(crate) signer: Option<Arc<dyn CatalogResolver>>,
    pub(crate) event_tx: broadcast::Sender<Event>,
}

/// Download orchestrator (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct AssetDownloader {
    ctx: Arc<FetchContext>,
}

impl std::fmt::Debug for AssetDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetDownloader")
            .field("authenticated", &self.ctx.credentials.is_some())
            .finish_non_exhaustive()
    }
}

impl AssetDownloader {
    /// Create a downloader with timeouts from the download configuration
    pub fn new(config: &DownloadConfig, event_tx: broadcast::Sender<Event>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self::with_client(http, event_tx))
    }

    /// Create a downloader around an existing HTTP client
    pub fn with_client(http: reqwest::Client, event_tx: broadcast::Sender<Event>) -> Self {
        Self {
            ctx: Arc::new(FetchContext {
                http,
                credentials: None,
                signer: None,
                event_tx,
            }),
        }
    }

    /// Attach a credential supplier; every fetch then carries a bearer token
    #[must_use]
    pub fn with_credentials(self, supplier: Arc<dyn CredentialSupplier>) -> Self {
        Self {
            ctx: Arc::new(FetchContext {
                http: self.ctx.http.clone(),
                credentials: Some(supplier),
                signer: self.ctx.signer.clone(),
                event_tx: self.ctx.event_tx.clone(),
            }),
        }
    }

    /// Sign each href through `catalog` right before it is fetched
    ///
    /// Only assets that go to the network are signed; a signing failure fails
    /// that asset alone.
    #[must_use]
    pub fn with_signer(self, catalog: Arc<dyn CatalogResolver>) -> Self {
        Self {
            ctx: Arc::new(FetchContext {
                http: self.ctx.http.clone(),
                credentials: self.ctx.credentials.clone(),
                signer: Some(catalog),
                event_tx: self.ctx.event_tx.clone(),
            }),
        }
    }

    /// Subscribe to download events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.ctx.event_tx.subscribe()
    }

    /// Fetch every asset of `item_id` into `dest_dir`
    ///
    /// Per-asset failures are recorded as [`AssetOutcome::Failed`]; they never
    /// abort sibling downloads. The returned map is identical regardless of
    /// completion order.
    pub async fn fetch_all(
        &self,
        item_id: &str,
        assets: &[AssetRef],
        dest_dir: &Path,
        options: DownloadOptions,
    ) -> DownloadResult {
        let available_keys = sorted_keys(assets);
        let mut result = DownloadResult {
            item_id: item_id.to_string(),
            outcomes: BTreeMap::new(),
            available_keys,
        };

        // Duplicate keys collapse onto one file; keep the first occurrence.
        // Distinct keys that sanitise to the same file name fail after the first.
        let mut seen = BTreeSet::new();
        let mut claimed: BTreeMap<PathBuf, String> = BTreeMap::new();
        let mut tasks = Vec::with_capacity(assets.len());
        for asset in assets.iter().filter(|asset| seen.insert(asset.key.clone())) {
            let destination = dest_dir.join(asset_file_name(item_id, asset));
            if let Some(owner) = claimed.get(&destination) {
                let err = DownloadError::DestinationConflict {
                    key: asset.key.clone(),
                    path: destination,
                    claimed_by: owner.clone(),
                };
                tracing::warn!(item_id, error = %err, "asset destination collides with a sibling");
                let reason = err.to_string();
                self.ctx
                    .event_tx
                    .send(Event::AssetFailed {
                        item_id: item_id.to_string(),
                        key: asset.key.clone(),
                        error: reason.clone(),
                    })
                    .ok();
                result
                    .outcomes
                    .insert(asset.key.clone(), AssetOutcome::Failed { reason });
                continue;
            }
            claimed.insert(destination.clone(), asset.key.clone());
            tasks.push(DownloadTask {
                item_id: item_id.to_string(),
                asset: asset.clone(),
                destination,
            });
        }

        if tasks.is_empty() {
            return result;
        }

        if let Err(e) = tokio::fs::create_dir_all(dest_dir).await {
            tracing::warn!(item_id, dir = %dest_dir.display(), error = %e, "cannot create output directory");
            for task in tasks {
                let reason = DownloadError::Io {
                    key: task.asset.key.clone(),
                    path: dest_dir.to_path_buf(),
                    source: std::io::Error::new(e.kind(), e.to_string()),
                }
                .to_string();
                result
                    .outcomes
                    .insert(task.asset.key, AssetOutcome::Failed { reason });
            }
            return result;
        }

        let width = options.max_parallel.max(1);
        tracing::info!(
            item_id,
            assets = tasks.len(),
            max_parallel = width,
            skip_existing = options.skip_existing,
            overwrite = options.overwrite,
            "fetching assets"
        );

        let mut outcomes = stream::iter(tasks)
            .map(|task| {
                let ctx = Arc::clone(&self.ctx);
                async move { fetcher::fetch_asset(&ctx, task, options).await }
            })
            .buffer_unordered(width);

        while let Some((key, outcome)) = outcomes.next().await {
            result.outcomes.insert(key, outcome);
        }

        let failed = result.failed().count();
        tracing::info!(
            item_id,
            succeeded = result.successful().count(),
            failed,
            "asset fetch finished"
        );

        result
    }

    /// Fetch the `requested` keys out of the item's `available` assets
    ///
    /// Keys the item does not offer are reported as [`AssetOutcome::NotFound`]
    /// alongside the list of available keys; valid keys in the same request are
    /// still fetched. An empty request fetches everything.
    pub async fn fetch_keys(
        &self,
        item_id: &str,
        available: &[AssetRef],
        requested: &[String],
        dest_dir: &Path,
        options: DownloadOptions,
    ) -> DownloadResult {
        if requested.is_empty() {
            return self.fetch_all(item_id, available, dest_dir, options).await;
        }

        let (selected, missing) = select_assets(available, requested);
        let available_keys = sorted_keys(available);

        for key in &missing {
            let err = DownloadError::AssetNotFound {
                key: key.clone(),
                available: available_keys.clone(),
            };
            tracing::warn!(item_id, error = %err, "requested asset not in item");
            self.ctx
                .event_tx
                .send(Event::AssetNotFound {
                    item_id: item_id.to_string(),
                    key: key.clone(),
                    available: available_keys.clone(),
                })
                .ok();
        }

        let mut result = self.fetch_all(item_id, &selected, dest_dir, options).await;
        result.available_keys = available_keys;
        for key in missing {
            result.outcomes.insert(key, AssetOutcome::NotFound);
        }
        result
    }
}

/// Split requested keys into offered assets (request order, deduplicated) and missing keys
pub(crate) fn select_assets(
    available: &[AssetRef],
    requested: &[String],
) -> (Vec<AssetRef>, Vec<String>) {
    let mut selected = Vec::new();
    let mut missing = Vec::new();
    let mut seen = BTreeSet::new();

    for key in requested {
        if !seen.insert(key.as_str()) {
            continue;
        }
        match available.iter().find(|a| &a.key == key) {
            Some(asset) => selected.push(asset.clone()),
            None => missing.push(key.clone()),
        }
    }

    (selected, missing)
}

fn sorted_keys(assets: &[AssetRef]) -> Vec<String> {
    assets
        .iter()
        .map(|a| a.key.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
