//! Scene stacker: resolve an item, fetch its bands, merge them.

use crate::auth::TokenManager;
use crate::catalog::CatalogResolver;
use crate::config::Config;
use crate::error::{Error, MergeError, Result};
use crate::fetch::AssetDownloader;
use crate::raster::{merge, read_band, reconcile};
use crate::types::{DownloadOptions, DownloadResult, Event, MergeSpec};
use crate::utils::merged_file_name;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Capacity of the event channel; slow subscribers lag rather than block work
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Acquisition façade (cloneable - all fields are Arc-wrapped)
///
/// Authenticates when credentials are configured, downloads catalog assets
/// into the output directory and stacks selected bands into one GeoTIFF.
#[derive(Clone)]
pub struct SceneStacker {
    config: Arc<Config>,
    event_tx: broadcast::Sender<Event>,
    catalog: Arc<dyn CatalogResolver>,
    downloader: AssetDownloader,
    tokens: Option<TokenManager>,
}

impl std::fmt::Debug for SceneStacker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneStacker")
            .field("output_dir", self.config.output_dir())
            .field("authenticated", &self.tokens.is_some())
            .finish_non_exhaustive()
    }
}

impl SceneStacker {
    /// Create a stacker from configuration
    ///
    /// A [`TokenManager`] is created when username/password are configured
    /// (directly or through the environment); otherwise assets are fetched
    /// anonymously.
    pub async fn new(config: Config, catalog: Arc<dyn CatalogResolver>) -> Result<Self> {
        config.validate()?;

        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let tokens = if config.auth.credentials().is_some() {
            Some(TokenManager::from_config(&config.auth, event_tx.clone()).await?)
        } else {
            tracing::debug!("no credentials configured, fetching anonymously");
            None
        };

        let downloader = AssetDownloader::new(&config.download, event_tx.clone())?
            .with_signer(Arc::clone(&catalog));
        let stacker = Self {
            config: Arc::new(config),
            event_tx,
            catalog,
            downloader,
            tokens: None,
        };
        Ok(match tokens {
            Some(tokens) => stacker.with_token_manager(tokens),
            None => stacker,
        })
    }

    /// Use `tokens` for every asset request
    #[must_use]
    pub fn with_token_manager(mut self, tokens: TokenManager) -> Self {
        self.downloader = self
            .downloader
            .with_credentials(Arc::new(tokens.clone()));
        self.tokens = Some(tokens);
        self
    }

    /// Subscribe to download, token and merge events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Sender side of the event channel, for components built outside the stacker
    pub fn event_sender(&self) -> broadcast::Sender<Event> {
        self.event_tx.clone()
    }

    /// Token manager, when authenticated
    pub fn token_manager(&self) -> Option<&TokenManager> {
        self.tokens.as_ref()
    }

    /// Effective configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start background token renewal (no-op when unauthenticated)
    pub async fn start_renewal(&self) {
        if let Some(tokens) = &self.tokens {
            tokens.start_renewal().await;
        }
    }

    /// Fetch `keys` of `item_id` into the output directory
    ///
    /// An empty `keys` slice fetches every asset. Hrefs are signed by the
    /// catalog as each selected asset is fetched. Per-asset failures,
    /// signing included, are reported in the result, not as an error.
    pub async fn download_item(
        &self,
        item_id: &str,
        keys: &[String],
        options: DownloadOptions,
    ) -> Result<DownloadResult> {
        let assets = self.catalog.item_assets(item_id).await?;

        Ok(self
            .downloader
            .fetch_keys(item_id, &assets, keys, self.config.output_dir(), options)
            .await)
    }

    /// Merge downloaded bands to `{item_id}_merged.tif` in the output directory
    pub async fn merge_item(&self, result: &DownloadResult, spec: &MergeSpec) -> Result<PathBuf> {
        let out = self
            .config
            .output_dir()
            .join(merged_file_name(&result.item_id));
        self.merge_to(result, spec, &out).await
    }

    /// Merge downloaded bands to `out_path`
    ///
    /// Bands are read, reconciled to one resolution and stacked in
    /// `spec.band_order` on the blocking pool. An empty band order merges
    /// every downloaded asset in key order.
    pub async fn merge_to(
        &self,
        result: &DownloadResult,
        spec: &MergeSpec,
        out_path: &Path,
    ) -> Result<PathBuf> {
        let order: Vec<String> = if spec.band_order.is_empty() {
            result.successful().map(|(key, _)| key.to_string()).collect()
        } else {
            spec.band_order.clone()
        };
        if order.is_empty() {
            return Err(MergeError::NoBands.into());
        }

        let mut inputs = Vec::with_capacity(order.len());
        for name in &order {
            let path = result.path(name).ok_or_else(|| MergeError::MissingBand {
                band: name.clone(),
                available: result.successful().map(|(k, _)| k.to_string()).collect(),
            })?;
            inputs.push((name.clone(), path.to_path_buf()));
        }

        let spec = MergeSpec {
            band_order: order.clone(),
            ..spec.clone()
        };
        let out = out_path.to_path_buf();
        let written = tokio::task::spawn_blocking(move || -> Result<PathBuf> {
            let bands = inputs
                .iter()
                .map(|(name, path)| read_band(path, name))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let bands = reconcile(bands, &spec)?;
            Ok(merge::write_merged_blocking(
                bands,
                &spec.band_order,
                &out,
                spec.overwrite,
            )?)
        })
        .await
        .map_err(|e| {
            tracing::error!(path = %out_path.display(), error = %e, "merge task panicked");
            Error::Merge(MergeError::Write {
                path: out_path.to_path_buf(),
                reason: format!("merge task failed: {e}"),
            })
        })??;

        self.event_tx
            .send(Event::MergeWritten {
                path: written.clone(),
                bands: order,
            })
            .ok();
        Ok(written)
    }

    /// Download the bands named in `spec` and merge them
    ///
    /// Fails with [`MergeError::MissingBand`] when a band could not be
    /// fetched; the download result is returned alongside the merged path.
    pub async fn stack_item(
        &self,
        item_id: &str,
        spec: &MergeSpec,
        options: DownloadOptions,
    ) -> Result<(DownloadResult, PathBuf)> {
        let result = self.download_item(item_id, &spec.band_order, options).await?;
        for (key, reason) in result.failed() {
            tracing::warn!(item_id, key, reason, "band unavailable for merge");
        }
        let path = self.merge_item(&result, spec).await?;
        Ok((result, path))
    }

    /// [`download_item`](Self::download_item) with the configured download options
    pub async fn fetch_item(&self, item_id: &str, keys: &[String]) -> Result<DownloadResult> {
        self.download_item(item_id, keys, self.config.download_options())
            .await
    }

    /// [`stack_item`](Self::stack_item) with the configured download options
    /// and merge defaults
    pub async fn stack_bands(
        &self,
        item_id: &str,
        band_order: &[String],
    ) -> Result<(DownloadResult, PathBuf)> {
        let spec = self.config.merge_spec(band_order.to_vec());
        self.stack_item(item_id, &spec, self.config.download_options())
            .await
    }

    /// Stop background work
    pub async fn shutdown(&self) {
        if let Some(tokens) = &self.tokens {
            tokens.stop_renewal().await;
        }
        tracing::info!("scene stacker shut down");
    }

    /// Stop background work and forget stored tokens
    pub async fn logout(&self) -> Result<()> {
        if let Some(tokens) = &self.tokens {
            tokens.logout().await?;
        }
        Ok(())
    }
}
