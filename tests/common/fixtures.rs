//! Raster and catalog fixtures served through a mock asset host

use satstack::raster::write_bands;
use satstack::{BandRaster, Crs};
use std::collections::BTreeMap;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Item id used by the scenarios
pub const ITEM_ID: &str = "S2B_MSIL2A_20240601T101559_T33TUG";

/// Media type advertised for every band
pub const GEOTIFF: &str = "image/tiff; application=geotiff";

/// Top-left corner shared by all fixture bands
pub const ORIGIN: (f64, f64) = (300_000.0, 5_000_040.0);

/// Ground extent of every fixture band (metres)
pub const EXTENT: f64 = 60.0;

/// Square band covering [`EXTENT`] at `pixel_size`, every pixel `value`
pub fn constant_band(name: &str, pixel_size: f64, value: f32) -> BandRaster {
    let side = (EXTENT / pixel_size).round() as u32;
    BandRaster {
        name: name.to_string(),
        pixel_size,
        crs: Crs(32633),
        origin: ORIGIN,
        width: side,
        height: side,
        pixels: vec![value; (side * side) as usize],
        nodata: None,
    }
}

/// Encode a band as GeoTIFF bytes
pub fn geotiff_bytes(band: &BandRaster) -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("band.tif");
    write_bands(&path, std::slice::from_ref(band), &[band.name.clone()], &BTreeMap::new())
        .unwrap();
    std::fs::read(path).unwrap()
}

/// URL path a band is served from
pub fn asset_path(key: &str) -> String {
    format!("/collections/sentinel-2-l2a/items/{ITEM_ID}/{key}.tif")
}

/// Serve `band` at [`asset_path`], optionally requiring a bearer token
pub async fn mount_band(server: &MockServer, band: &BandRaster, bearer: Option<&str>) {
    let mut mock = Mock::given(method("GET")).and(path(asset_path(&band.name)));
    if let Some(token) = bearer {
        mock = mock.and(header("authorization", format!("Bearer {token}").as_str()));
    }
    mock.respond_with(
        ResponseTemplate::new(200)
            .insert_header("content-type", GEOTIFF)
            .set_body_bytes(geotiff_bytes(band)),
    )
    .mount(server)
    .await;
}

/// STAC item offering `keys` from `server`
pub fn stac_item(server: &MockServer, keys: &[&str]) -> serde_json::Value {
    let assets: serde_json::Map<String, serde_json::Value> = keys
        .iter()
        .map(|key| {
            (
                key.to_string(),
                serde_json::json!({
                    "href": format!("{}{}", server.uri(), asset_path(key)),
                    "type": GEOTIFF,
                    "roles": ["data"],
                }),
            )
        })
        .collect();

    serde_json::json!({
        "type": "Feature",
        "stac_version": "1.0.0",
        "id": ITEM_ID,
        "properties": { "datetime": "2024-06-01T10:15:59Z" },
        "assets": assets,
    })
}
