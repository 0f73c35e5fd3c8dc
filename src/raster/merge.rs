//! Stack reconciled bands into one multi-band GeoTIFF.

use super::BandRaster;
use super::geotiff::write_bands;
use crate::error::MergeError;
use crate::utils::partial_path;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Dataset metadata item listing band names in stacking order
pub const BAND_NAMES_KEY: &str = "band_names";

/// Write `bands` to `out_path` in `band_order` on the blocking pool
///
/// See [`write_merged_blocking`].
pub async fn write_merged(
    bands: Vec<BandRaster>,
    band_order: Vec<String>,
    out_path: PathBuf,
    overwrite: bool,
) -> Result<PathBuf, MergeError> {
    let path = out_path.clone();
    tokio::task::spawn_blocking(move || {
        write_merged_blocking(bands, &band_order, &out_path, overwrite)
    })
    .await
    .map_err(|e| {
        tracing::error!(path = %path.display(), error = %e, "merge task panicked");
        MergeError::Write {
            path,
            reason: format!("merge task failed: {e}"),
        }
    })?
}

/// Write `bands` to `out_path`, band `i` being the band named `band_order[i]`
///
/// An empty `band_order` keeps the input order. Each band is described by its
/// name and the file carries a `band_names` item listing them. The file is
/// written next to `out_path` and renamed into place, so a failed merge never
/// leaves a truncated output behind.
pub fn write_merged_blocking(
    bands: Vec<BandRaster>,
    band_order: &[String],
    out_path: &Path,
    overwrite: bool,
) -> Result<PathBuf, MergeError> {
    if bands.is_empty() {
        return Err(MergeError::NoBands);
    }

    let ordered = order_bands(bands, band_order)?;
    check_grid(&ordered)?;

    if !overwrite && out_path.exists() {
        return Err(MergeError::OutputExists(out_path.to_path_buf()));
    }

    let names: Vec<String> = ordered.iter().map(|b| b.name.clone()).collect();
    let metadata = BTreeMap::from([(BAND_NAMES_KEY.to_string(), names.join(","))]);
    let write_err = |reason: String| MergeError::Write {
        path: out_path.to_path_buf(),
        reason,
    };

    if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| write_err(e.to_string()))?;
    }

    let tmp = partial_path(out_path);
    if let Err(e) = write_bands(&tmp, &ordered, &names, &metadata) {
        remove_partial(&tmp);
        return Err(write_err(e.to_string()));
    }
    if let Err(e) = std::fs::rename(&tmp, out_path) {
        remove_partial(&tmp);
        return Err(write_err(e.to_string()));
    }

    let first = &ordered[0];
    tracing::info!(
        path = %out_path.display(),
        bands = %names.join(","),
        width = first.width,
        height = first.height,
        pixel_size = first.pixel_size,
        "merged raster written"
    );
    Ok(out_path.to_path_buf())
}

fn order_bands(
    bands: Vec<BandRaster>,
    band_order: &[String],
) -> Result<Vec<BandRaster>, MergeError> {
    if band_order.is_empty() {
        return Ok(bands);
    }

    let available: Vec<String> = bands.iter().map(|b| b.name.clone()).collect();
    let mut pool: Vec<Option<BandRaster>> = bands.into_iter().map(Some).collect();
    let mut ordered: Vec<BandRaster> = Vec::with_capacity(band_order.len());

    for name in band_order {
        let taken = pool
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|b| &b.name == name))
            .and_then(Option::take);
        let band = match taken {
            Some(band) => band,
            // Repeated name in the order
            None => match ordered.iter().find(|b| &b.name == name) {
                Some(band) => band.clone(),
                None => {
                    return Err(MergeError::MissingBand {
                        band: name.clone(),
                        available,
                    });
                }
            },
        };
        ordered.push(band);
    }

    Ok(ordered)
}

fn check_grid(bands: &[BandRaster]) -> Result<(), MergeError> {
    let Some(first) = bands.first() else {
        return Err(MergeError::NoBands);
    };
    for band in bands {
        if band.crs != first.crs {
            return Err(MergeError::CrsMismatch {
                band: band.name.clone(),
                found: band.crs.to_string(),
                expected: first.crs.to_string(),
            });
        }
        if band.width != first.width
            || band.height != first.height
            || band.pixels.len() != band.expected_len()
        {
            return Err(MergeError::ShapeMismatch {
                band: band.name.clone(),
                width: band.width,
                height: band.height,
                expected_width: first.width,
                expected_height: first.height,
            });
        }
        // Registered when the corners agree within half a pixel
        let tolerance = first.pixel_size / 2.0;
        if (band.origin.0 - first.origin.0).abs() > tolerance
            || (band.origin.1 - first.origin.1).abs() > tolerance
        {
            return Err(MergeError::OriginMismatch {
                band: band.name.clone(),
                origin: band.origin,
                expected: first.origin,
            });
        }
    }
    Ok(())
}

fn remove_partial(tmp: &Path) {
    if let Err(e) = std::fs::remove_file(tmp)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %tmp.display(), error = %e, "failed to remove partial merge output");
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::geotiff::{read_bands, read_metadata};
    use crate::raster::test_support::ramp;
    use crate::raster::Crs;

    fn order(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn three_bands() -> Vec<BandRaster> {
        ["B02", "B03", "B04"]
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let mut band = ramp(name, 10.0, 4, 4);
                band.pixels.iter_mut().for_each(|p| *p += 1000.0 * i as f32);
                band
            })
            .collect()
    }

    #[test]
    fn bands_are_stacked_in_requested_order() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("item_merged.tif");

        let written = write_merged_blocking(
            three_bands(),
            &order(&["B04", "B03", "B02"]),
            &out,
            false,
        )
        .unwrap();

        assert_eq!(written, out);
        let back = read_bands(&out).unwrap();
        let names: Vec<&str> = back.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["B04", "B03", "B02"]);
        assert_eq!(back[0].pixels[0], 2000.0, "B04 data in band 1");
        assert_eq!(back[2].pixels[0], 0.0, "B02 data in band 3");
        assert_eq!(
            read_metadata(&out).unwrap().get(BAND_NAMES_KEY).unwrap(),
            "B04,B03,B02"
        );
        assert!(!partial_path(&out).exists());
    }

    #[test]
    fn subset_order_writes_only_named_bands() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("rg.tif");

        write_merged_blocking(three_bands(), &order(&["B04", "B03"]), &out, false).unwrap();

        assert_eq!(read_bands(&out).unwrap().len(), 2);
    }

    #[test]
    fn missing_band_names_available() {
        let dir = tempfile::tempdir().unwrap();
        let err = write_merged_blocking(
            three_bands(),
            &order(&["B08"]),
            &dir.path().join("x.tif"),
            false,
        )
        .unwrap_err();

        match err {
            MergeError::MissingBand { band, available } => {
                assert_eq!(band, "B08");
                assert_eq!(available, vec!["B02", "B03", "B04"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_input_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err =
            write_merged_blocking(Vec::new(), &order(&["B02"]), &dir.path().join("x.tif"), false)
                .unwrap_err();
        assert!(matches!(err, MergeError::NoBands));
    }

    #[test]
    fn mismatched_grids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("x.tif");

        let mut bands = three_bands();
        bands[1] = ramp("B03", 20.0, 2, 2);
        assert!(matches!(
            write_merged_blocking(bands, &order(&["B02", "B03"]), &out, false),
            Err(MergeError::ShapeMismatch { .. })
        ));

        let mut bands = three_bands();
        bands[2].crs = Crs(32634);
        assert!(matches!(
            write_merged_blocking(bands, &order(&["B02", "B04"]), &out, false),
            Err(MergeError::CrsMismatch { .. })
        ));
        assert!(!out.exists());
    }

    #[test]
    fn shifted_origin_is_rejected_beyond_half_a_pixel() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("x.tif");

        // 4m shift on a 10m grid still registers
        let mut bands = three_bands();
        bands[1].origin.0 += 4.0;
        write_merged_blocking(bands, &order(&["B02", "B03"]), &out, false).unwrap();

        let mut bands = three_bands();
        bands[2].origin.1 -= 10.0;
        let err = write_merged_blocking(bands, &order(&["B02", "B04"]), &out, true).unwrap_err();
        match err {
            MergeError::OriginMismatch {
                band,
                origin,
                expected,
            } => {
                assert_eq!(band, "B04");
                assert_eq!(origin.1, expected.1 - 10.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn existing_output_requires_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("x.tif");
        std::fs::write(&out, b"old").unwrap();

        let err =
            write_merged_blocking(three_bands(), &order(&["B02"]), &out, false).unwrap_err();
        assert!(matches!(err, MergeError::OutputExists(_)));
        assert_eq!(std::fs::read(&out).unwrap(), b"old");

        write_merged_blocking(three_bands(), &order(&["B02"]), &out, true).unwrap();
        assert_eq!(read_bands(&out).unwrap()[0].name, "B02");
    }

    #[tokio::test]
    async fn async_writer_runs_on_blocking_pool() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested").join("x.tif");

        let path = write_merged(three_bands(), order(&["B03"]), out.clone(), false)
            .await
            .unwrap();

        assert_eq!(path, out);
        assert!(out.exists());
    }
}
