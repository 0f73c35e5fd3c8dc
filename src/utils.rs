//! Utility functions for file naming and path manipulation

use crate::types::AssetRef;
use std::path::{Path, PathBuf};

/// Suffix appended to in-flight downloads and writes
pub const PARTIAL_SUFFIX: &str = ".part";

/// Extension used when neither media type nor href reveal one
const FALLBACK_EXTENSION: &str = ".bin";

/// Map a media type to a file extension (with leading dot)
///
/// Parameters such as `; application=geotiff` are ignored.
///
/// # Examples
///
/// ```
/// use satstack::utils::extension_for_media_type;
///
/// assert_eq!(extension_for_media_type("image/tiff; application=geotiff; profile=cloud-optimized"), Some(".tif"));
/// assert_eq!(extension_for_media_type("image/jp2"), Some(".jp2"));
/// assert_eq!(extension_for_media_type("application/x-unknown"), None);
/// ```
#[must_use]
pub fn extension_for_media_type(media_type: &str) -> Option<&'static str> {
    let essence = media_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    match essence.as_str() {
        "image/tiff" | "image/geotiff" | "image/vnd.stac.geotiff" => Some(".tif"),
        "image/jp2" => Some(".jp2"),
        "image/png" => Some(".png"),
        "image/jpeg" | "image/jpg" => Some(".jpg"),
        "application/json" | "application/geo+json" => Some(".json"),
        "application/xml" | "text/xml" => Some(".xml"),
        "text/html" => Some(".html"),
        "text/plain" => Some(".txt"),
        "application/x-hdf5" | "application/x-hdf" => Some(".h5"),
        "application/x-netcdf" | "application/netcdf" => Some(".nc"),
        "application/vnd+zarr" => Some(".zarr"),
        _ => None,
    }
}

/// Determine the local extension for an asset
///
/// Media type wins; otherwise the href path extension is used; otherwise `.bin`.
#[must_use]
pub fn extension_for_asset(asset: &AssetRef) -> String {
    if let Some(ext) = asset
        .media_type
        .as_deref()
        .and_then(extension_for_media_type)
    {
        return ext.to_string();
    }

    let last_segment = asset
        .href
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or("");

    match Path::new(last_segment).extension().and_then(|e| e.to_str()) {
        Some(ext) if !ext.is_empty() => format!(".{}", ext.to_ascii_lowercase()),
        _ => FALLBACK_EXTENSION.to_string(),
    }
}

/// Replace characters that are unsafe in file names
fn sanitize_component(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// Deterministic local file name `{item_id}_{asset_key}{ext}`
///
/// # Examples
///
/// ```
/// use satstack::types::AssetRef;
/// use satstack::utils::asset_file_name;
///
/// let asset = AssetRef::new(
///     "B04",
///     "https://example.com/T33/B04.tif".parse().unwrap(),
///     Some("image/tiff; application=geotiff".to_string()),
/// );
/// assert_eq!(asset_file_name("S2A_T33UUP", &asset), "S2A_T33UUP_B04.tif");
/// ```
#[must_use]
pub fn asset_file_name(item_id: &str, asset: &AssetRef) -> String {
    format!(
        "{}_{}{}",
        sanitize_component(item_id),
        sanitize_component(&asset.key),
        extension_for_asset(asset)
    )
}

/// Default merged output name `{item_id}_merged.tif`
#[must_use]
pub fn merged_file_name(item_id: &str) -> String {
    format!("{}_merged.tif", sanitize_component(item_id))
}

/// Sibling path used while a file is being written
#[must_use]
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(PARTIAL_SUFFIX);
    path.with_file_name(name)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn asset(key: &str, href: &str, media_type: Option<&str>) -> AssetRef {
        AssetRef::new(key, href.parse().unwrap(), media_type.map(str::to_string))
    }

    #[test]
    fn media_type_wins_over_href_extension() {
        let a = asset(
            "B02",
            "https://example.com/data/B02.jp2",
            Some("image/tiff; application=geotiff"),
        );
        assert_eq!(extension_for_asset(&a), ".tif");
    }

    #[test]
    fn href_extension_used_without_media_type() {
        let a = asset("B8A", "https://example.com/data/B8A.JP2?sig=abc", None);
        assert_eq!(extension_for_asset(&a), ".jp2");
    }

    #[test]
    fn unknown_media_type_falls_back_to_href() {
        let a = asset(
            "meta",
            "https://example.com/data/MTD.xml",
            Some("application/x-custom"),
        );
        assert_eq!(extension_for_asset(&a), ".xml");
    }

    #[test]
    fn no_hint_falls_back_to_bin() {
        let a = asset("blob", "https://example.com/download", None);
        assert_eq!(extension_for_asset(&a), ".bin");
    }

    #[test]
    fn file_name_sanitizes_separators() {
        let a = asset("a/b", "https://example.com/x.tif", Some("image/tiff"));
        assert_eq!(asset_file_name("item:1", &a), "item_1_a_b.tif");
    }

    #[test]
    fn merged_name_follows_item() {
        assert_eq!(merged_file_name("S2B_X"), "S2B_X_merged.tif");
    }

    #[test]
    fn partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("/out/item_B02.tif")),
            PathBuf::from("/out/item_B02.tif.part")
        );
    }
}
