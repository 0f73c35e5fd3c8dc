//! Single-asset fetch: skip-if-exists, streamed write, atomic rename.

use crate::error::DownloadError;
use crate::types::{AssetOutcome, AssetRef, DownloadOptions, Event};
use crate::utils::partial_path;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use super::FetchContext;

/// One asset bound to its destination
///
/// Consumed by [`fetch_asset`]; a task is resolved exactly once.
#[derive(Clone, Debug)]
pub struct DownloadTask {
    /// Catalog item the asset belongs to
    pub item_id: String,
    /// Asset to fetch
    pub asset: AssetRef,
    /// Final local path
    pub destination: PathBuf,
}

/// Fetch one asset and report its terminal outcome
///
/// Never returns an error: failures are captured in the outcome so sibling
/// downloads proceed.
pub(crate) async fn fetch_asset(
    ctx: &FetchContext,
    task: DownloadTask,
    options: DownloadOptions,
) -> (String, AssetOutcome) {
    let DownloadTask {
        item_id,
        asset,
        destination,
    } = task;

    if options.skip_existing && !options.overwrite && is_complete(&destination).await {
        tracing::debug!(
            item_id = %item_id,
            key = %asset.key,
            path = %destination.display(),
            "reusing existing file"
        );
        ctx.event_tx
            .send(Event::AssetSkipped {
                item_id,
                key: asset.key.clone(),
                path: destination.clone(),
            })
            .ok();
        return (asset.key, AssetOutcome::Success { path: destination });
    }

    ctx.event_tx
        .send(Event::AssetStarted {
            item_id: item_id.clone(),
            key: asset.key.clone(),
        })
        .ok();

    match download_to(ctx, &asset, &destination).await {
        Ok(bytes) => {
            tracing::debug!(
                item_id = %item_id,
                key = %asset.key,
                bytes,
                path = %destination.display(),
                "asset downloaded"
            );
            ctx.event_tx
                .send(Event::AssetDownloaded {
                    item_id,
                    key: asset.key.clone(),
                    path: destination.clone(),
                    bytes,
                })
                .ok();
            (asset.key, AssetOutcome::Success { path: destination })
        }
        Err(e) => {
            tracing::warn!(item_id = %item_id, key = %asset.key, error = %e, "asset download failed");
            let reason = e.to_string();
            ctx.event_tx
                .send(Event::AssetFailed {
                    item_id,
                    key: asset.key.clone(),
                    error: reason.clone(),
                })
                .ok();
            (asset.key, AssetOutcome::Failed { reason })
        }
    }
}

/// A completed file is a regular file at the final path
async fn is_complete(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Stream the asset into `<destination>.part`, then rename into place
///
/// The partial file is removed on any failure.
async fn download_to(
    ctx: &FetchContext,
    asset: &AssetRef,
    destination: &Path,
) -> Result<u64, DownloadError> {
    let signed;
    let asset = match &ctx.signer {
        Some(catalog) => {
            signed = catalog
                .sign(asset)
                .await
                .map_err(|e| DownloadError::Signing {
                    key: asset.key.clone(),
                    reason: e.to_string(),
                })?;
            &signed
        }
        None => asset,
    };

    let mut request = ctx.http.get(asset.href.clone());
    if let Some(supplier) = &ctx.credentials {
        let token = supplier
            .bearer_token()
            .await
            .map_err(|e| DownloadError::Credentials {
                key: asset.key.clone(),
                reason: e.to_string(),
            })?;
        request = request.bearer_auth(token);
    }

    let response = request.send().await.map_err(|e| transport(asset, &e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::HttpStatus {
            key: asset.key.clone(),
            status: status.as_u16(),
            url: asset.href.to_string(),
        });
    }

    let tmp = partial_path(destination);
    let written = match write_body(asset, response, &tmp).await {
        Ok(bytes) => bytes,
        Err(e) => {
            remove_partial(&tmp).await;
            return Err(e);
        }
    };

    if let Err(source) = tokio::fs::rename(&tmp, destination).await {
        remove_partial(&tmp).await;
        return Err(DownloadError::Io {
            key: asset.key.clone(),
            path: destination.to_path_buf(),
            source,
        });
    }

    Ok(written)
}

async fn write_body(
    asset: &AssetRef,
    response: reqwest::Response,
    tmp: &Path,
) -> Result<u64, DownloadError> {
    let io_err = |source: std::io::Error| DownloadError::Io {
        key: asset.key.clone(),
        path: tmp.to_path_buf(),
        source,
    };

    let mut file = tokio::fs::File::create(tmp).await.map_err(io_err)?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| transport(asset, &e))?;
        file.write_all(&chunk).await.map_err(io_err)?;
        written += chunk.len() as u64;
    }

    file.flush().await.map_err(io_err)?;
    file.sync_all().await.map_err(io_err)?;
    Ok(written)
}

async fn remove_partial(tmp: &Path) {
    match tokio::fs::remove_file(tmp).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %tmp.display(), error = %e, "failed to remove partial download");
        }
    }
}

fn transport(asset: &AssetRef, e: &reqwest::Error) -> DownloadError {
    let reason = if e.is_timeout() {
        format!("timeout fetching {}", asset.href)
    } else if e.is_connect() {
        format!("connection failed for {}: {}", asset.href, e)
    } else {
        e.to_string()
    };
    DownloadError::Transport {
        key: asset.key.clone(),
        reason,
    }
}
