//! Catalog resolver boundary
//!
//! Searching a catalog is out of scope; the library only needs to turn an
//! item id into its asset list and, for hosts that require it, sign hrefs.

use crate::error::{Error, Result};
use crate::types::AssetRef;
use async_trait::async_trait;
use std::collections::HashMap;

/// Resolves catalog items to their downloadable assets
#[async_trait]
pub trait CatalogResolver: Send + Sync {
    /// All assets offered by `item_id`
    async fn item_assets(&self, item_id: &str) -> Result<Vec<AssetRef>>;

    /// Rewrite an asset before it is fetched (e.g. append a SAS token)
    ///
    /// The default passes the asset through unchanged.
    async fn sign(&self, asset: &AssetRef) -> Result<AssetRef> {
        Ok(asset.clone())
    }
}

/// In-memory resolver over a fixed set of items
#[derive(Clone, Debug, Default)]
pub struct StaticCatalog {
    items: HashMap<String, Vec<AssetRef>>,
}

impl StaticCatalog {
    /// Empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the assets of one item
    #[must_use]
    pub fn with_item(mut self, item_id: impl Into<String>, assets: Vec<AssetRef>) -> Self {
        self.items.insert(item_id.into(), assets);
        self
    }

    /// Build a single-item catalog from a STAC item document
    ///
    /// Reads `id` and the `assets` object; each asset needs an `href`, `type`
    /// is optional. Relative hrefs are rejected.
    pub fn from_stac_item(item: &serde_json::Value) -> Result<Self> {
        let id = item
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Catalog("STAC item has no string 'id'".to_string()))?;

        let assets = item
            .get("assets")
            .and_then(|v| v.as_object())
            .ok_or_else(|| Error::Catalog(format!("STAC item '{id}' has no 'assets' object")))?;

        let mut refs = Vec::with_capacity(assets.len());
        for (key, asset) in assets {
            let href = asset
                .get("href")
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::Catalog(format!("asset '{key}' of '{id}' has no href")))?;
            let href = href
                .parse::<url::Url>()
                .map_err(|e| Error::Catalog(format!("asset '{key}' href '{href}': {e}")))?;
            let media_type = asset
                .get("type")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            refs.push(AssetRef::new(key.clone(), href, media_type));
        }

        Ok(Self::new().with_item(id, refs))
    }

    /// Item ids known to this catalog, sorted
    pub fn item_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.items.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

#[async_trait]
impl CatalogResolver for StaticCatalog {
    async fn item_assets(&self, item_id: &str) -> Result<Vec<AssetRef>> {
        self.items
            .get(item_id)
            .cloned()
            .ok_or_else(|| Error::Catalog(format!("unknown item '{item_id}'")))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stac_item() -> serde_json::Value {
        json!({
            "type": "Feature",
            "stac_version": "1.0.0",
            "id": "S2B_MSIL2A_20240601",
            "assets": {
                "B02": {
                    "href": "https://data.example.com/S2B/B02.tif",
                    "type": "image/tiff; application=geotiff; profile=cloud-optimized"
                },
                "B04": { "href": "https://data.example.com/S2B/B04.tif" }
            }
        })
    }

    #[tokio::test]
    async fn stac_item_assets_are_resolved() {
        let catalog = StaticCatalog::from_stac_item(&stac_item()).unwrap();
        assert_eq!(catalog.item_ids(), vec!["S2B_MSIL2A_20240601"]);

        let mut assets = catalog.item_assets("S2B_MSIL2A_20240601").await.unwrap();
        assets.sort_by(|a, b| a.key.cmp(&b.key));

        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0].key, "B02");
        assert!(assets[0].media_type.as_deref().unwrap().starts_with("image/tiff"));
        assert_eq!(assets[1].media_type, None);
        assert_eq!(assets[1].href.as_str(), "https://data.example.com/S2B/B04.tif");
    }

    #[tokio::test]
    async fn unknown_item_is_a_catalog_error() {
        let catalog = StaticCatalog::new();
        let err = catalog.item_assets("nope").await.unwrap_err();
        assert_eq!(err.code(), "catalog_error");
    }

    #[tokio::test]
    async fn default_sign_is_identity() {
        let catalog = StaticCatalog::from_stac_item(&stac_item()).unwrap();
        let assets = catalog.item_assets("S2B_MSIL2A_20240601").await.unwrap();
        let signed = catalog.sign(&assets[0]).await.unwrap();
        assert_eq!(signed, assets[0]);
    }

    #[test]
    fn malformed_stac_items_are_rejected() {
        assert!(StaticCatalog::from_stac_item(&json!({ "assets": {} })).is_err());
        assert!(StaticCatalog::from_stac_item(&json!({ "id": "x" })).is_err());
        let relative = json!({ "id": "x", "assets": { "B02": { "href": "B02.tif" } } });
        assert!(StaticCatalog::from_stac_item(&relative).is_err());
    }
}
