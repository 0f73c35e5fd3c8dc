//! Resolution reconciliation: bring every band onto one pixel size.
//!
//! Grids are resampled in place of their own footprint: the origin and CRS are
//! kept, the pixel size changes, and the new dimensions are the old extent
//! divided by the target size, rounded, never below one pixel.

use super::BandRaster;
use crate::error::ResampleError;
use crate::types::MergeSpec;
use serde::{Deserialize, Serialize};

/// Pixel size assumed when there are no bands to derive one from
pub const DEFAULT_PIXEL_SIZE: f64 = 10.0;

/// Largest resampled grid, in samples (4 GiB of `f32`)
pub const MAX_GRID_SAMPLES: u64 = 1 << 30;

/// Interpolation used when a band's pixel size differs from the target
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResamplingMethod {
    /// Value of the source pixel containing the destination centre
    Nearest,
    /// Distance-weighted mean of the four surrounding source centres
    Bilinear,
    /// Mean of the source pixels covered by the destination pixel
    Average,
}

/// Output pixel size for a set of bands
///
/// Explicit target first, then the first band named in `band_order` that is
/// present, then the first band, then [`DEFAULT_PIXEL_SIZE`].
pub fn target_pixel_size(bands: &[BandRaster], spec: &MergeSpec) -> f64 {
    if let Some(size) = spec.target_pixel_size {
        return size;
    }
    spec.band_order
        .iter()
        .find_map(|name| bands.iter().find(|b| &b.name == name))
        .or_else(|| bands.first())
        .map_or(DEFAULT_PIXEL_SIZE, |b| b.pixel_size)
}

/// Interpolation for a band moving from `native` to `target` pixel size
///
/// Finer bands are interpolated bilinearly; coarser or equal bands take the
/// nearest source pixel.
pub fn method_for(native: f64, target: f64) -> ResamplingMethod {
    if native < target {
        ResamplingMethod::Bilinear
    } else {
        ResamplingMethod::Nearest
    }
}

/// Put every band on the target pixel size
///
/// Returns the bands in input order. Bands within `spec.tolerance` of the
/// target are passed through untouched, keeping their pixel buffer.
pub fn reconcile(
    bands: Vec<BandRaster>,
    spec: &MergeSpec,
) -> Result<Vec<BandRaster>, ResampleError> {
    if bands.is_empty() {
        return Err(ResampleError::EmptyInput);
    }
    if !(spec.tolerance.is_finite() && spec.tolerance >= 0.0) {
        return Err(ResampleError::InvalidSpec(format!(
            "tolerance must be non-negative, got {}",
            spec.tolerance
        )));
    }

    let target = target_pixel_size(&bands, spec);
    check_pixel_size("target", target)?;

    let mut out = Vec::with_capacity(bands.len());
    for band in bands {
        check_pixel_size(&band.name, band.pixel_size)?;

        if (band.pixel_size - target).abs() <= spec.tolerance {
            tracing::debug!(band = %band.name, pixel_size = band.pixel_size, "band already at target resolution");
            out.push(band);
            continue;
        }

        let method = method_for(band.pixel_size, target);
        tracing::debug!(
            band = %band.name,
            from = band.pixel_size,
            to = target,
            ?method,
            "resampling band"
        );
        out.push(resample(&band, target, method)?);
    }

    Ok(out)
}

/// Resample one band onto `target` pixel size with `method`
pub fn resample(
    band: &BandRaster,
    target: f64,
    method: ResamplingMethod,
) -> Result<BandRaster, ResampleError> {
    check_pixel_size(&band.name, band.pixel_size)?;
    check_pixel_size("target", target)?;
    if band.width == 0 || band.height == 0 {
        return Err(ResampleError::EmptyGrid {
            band: band.name.clone(),
            pixel_size: band.pixel_size,
        });
    }
    if band.pixels.len() != band.expected_len() {
        return Err(ResampleError::InvalidSpec(format!(
            "band '{}' has {} samples for a {}x{} grid",
            band.name,
            band.pixels.len(),
            band.width,
            band.height
        )));
    }

    let (extent_x, extent_y) = band.extent();
    let too_large = || ResampleError::GridTooLarge {
        band: band.name.clone(),
        pixel_size: target,
        limit: MAX_GRID_SAMPLES,
    };
    let width = grid_len(extent_x, target).ok_or_else(too_large)?;
    let height = grid_len(extent_y, target).ok_or_else(too_large)?;
    let samples = u64::from(width)
        .checked_mul(u64::from(height))
        .filter(|&n| n <= MAX_GRID_SAMPLES)
        .ok_or_else(too_large)?;

    // Source pixels per destination pixel along each axis
    let scale_x = f64::from(band.width) / f64::from(width);
    let scale_y = f64::from(band.height) / f64::from(height);

    let mut pixels = Vec::with_capacity(samples as usize);
    for row in 0..height {
        for col in 0..width {
            let value = match method {
                ResamplingMethod::Nearest => nearest(band, col, row, scale_x, scale_y),
                ResamplingMethod::Bilinear => bilinear(band, col, row, scale_x, scale_y),
                ResamplingMethod::Average => average(band, col, row, scale_x, scale_y),
            };
            pixels.push(value);
        }
    }

    Ok(BandRaster {
        name: band.name.clone(),
        pixel_size: target,
        crs: band.crs,
        origin: band.origin,
        width,
        height,
        pixels,
        nodata: band.nodata,
    })
}

fn check_pixel_size(what: &str, size: f64) -> Result<(), ResampleError> {
    if size.is_finite() && size > 0.0 {
        Ok(())
    } else {
        Err(ResampleError::InvalidSpec(format!(
            "pixel size of '{what}' must be positive, got {size}"
        )))
    }
}

/// Pixels along one axis; `None` when the count does not fit a `u32`
fn grid_len(extent: f64, pixel_size: f64) -> Option<u32> {
    let n = (extent / pixel_size).round();
    if !n.is_finite() || n >= f64::from(u32::MAX) {
        None
    } else {
        Some((n as u32).max(1))
    }
}

fn clamp_index(v: f64, len: u32) -> u32 {
    if v <= 0.0 {
        0
    } else {
        (v as u32).min(len - 1)
    }
}

fn sample(band: &BandRaster, col: u32, row: u32) -> f32 {
    band.pixels[row as usize * band.width as usize + col as usize]
}

fn nearest(band: &BandRaster, col: u32, row: u32, scale_x: f64, scale_y: f64) -> f32 {
    let src_col = clamp_index(((f64::from(col) + 0.5) * scale_x).floor(), band.width);
    let src_row = clamp_index(((f64::from(row) + 0.5) * scale_y).floor(), band.height);
    sample(band, src_col, src_row)
}

fn bilinear(band: &BandRaster, col: u32, row: u32, scale_x: f64, scale_y: f64) -> f32 {
    // Destination centre in source pixel-centre coordinates
    let fx = ((f64::from(col) + 0.5) * scale_x - 0.5).clamp(0.0, f64::from(band.width - 1));
    let fy = ((f64::from(row) + 0.5) * scale_y - 0.5).clamp(0.0, f64::from(band.height - 1));

    let x0 = fx.floor() as u32;
    let y0 = fy.floor() as u32;
    let x1 = (x0 + 1).min(band.width - 1);
    let y1 = (y0 + 1).min(band.height - 1);
    let wx = fx - f64::from(x0);
    let wy = fy - f64::from(y0);

    let taps = [
        (x0, y0, (1.0 - wx) * (1.0 - wy)),
        (x1, y0, wx * (1.0 - wy)),
        (x0, y1, (1.0 - wx) * wy),
        (x1, y1, wx * wy),
    ];

    let mut sum = 0.0;
    let mut weight = 0.0;
    for (x, y, w) in taps {
        let v = sample(band, x, y);
        if w > 0.0 && band.is_valid(v) {
            sum += f64::from(v) * w;
            weight += w;
        }
    }

    if weight > 0.0 {
        (sum / weight) as f32
    } else {
        band.fill_value()
    }
}

fn average(band: &BandRaster, col: u32, row: u32, scale_x: f64, scale_y: f64) -> f32 {
    let x_start = clamp_index((f64::from(col) * scale_x).floor(), band.width);
    let y_start = clamp_index((f64::from(row) * scale_y).floor(), band.height);
    let x_end = clamp_index((f64::from(col + 1) * scale_x).ceil() - 1.0, band.width).max(x_start);
    let y_end = clamp_index((f64::from(row + 1) * scale_y).ceil() - 1.0, band.height).max(y_start);

    let mut sum = 0.0;
    let mut count = 0u32;
    for y in y_start..=y_end {
        for x in x_start..=x_end {
            let v = sample(band, x, y);
            if band.is_valid(v) {
                sum += f64::from(v);
                count += 1;
            }
        }
    }

    if count > 0 {
        (sum / f64::from(count)) as f32
    } else {
        band.fill_value()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::test_support::ramp;

    fn constant(name: &str, pixel_size: f64, side: u32, value: f32) -> BandRaster {
        let mut band = ramp(name, pixel_size, side, side);
        band.pixels.iter_mut().for_each(|p| *p = value);
        band
    }

    #[test]
    fn target_prefers_explicit_then_band_order() {
        let bands = vec![ramp("B02", 10.0, 2, 2), ramp("B05", 20.0, 1, 1)];

        let spec = MergeSpec::new(["B05", "B02"]);
        assert_eq!(target_pixel_size(&bands, &spec), 20.0);

        let spec = MergeSpec::new(["B99"]);
        assert_eq!(target_pixel_size(&bands, &spec), 10.0);

        let spec = MergeSpec::new(["B05"]).with_target_pixel_size(60.0);
        assert_eq!(target_pixel_size(&bands, &spec), 60.0);

        assert_eq!(target_pixel_size(&[], &MergeSpec::new(["B02"])), DEFAULT_PIXEL_SIZE);
    }

    #[test]
    fn method_depends_on_direction() {
        assert_eq!(method_for(10.0, 20.0), ResamplingMethod::Bilinear);
        assert_eq!(method_for(60.0, 20.0), ResamplingMethod::Nearest);
        assert_eq!(method_for(20.0, 20.0), ResamplingMethod::Nearest);
    }

    #[test]
    fn reconcile_empty_input_fails() {
        let err = reconcile(Vec::new(), &MergeSpec::new(["B02"])).unwrap_err();
        assert!(matches!(err, ResampleError::EmptyInput));
    }

    #[test]
    fn within_tolerance_passes_through_identical() {
        let band = ramp("B03", 10.004, 4, 4);
        let buffer = band.pixels.as_ptr();
        let original = band.clone();

        let out = reconcile(vec![band], &MergeSpec::new(["B03"]).with_target_pixel_size(10.0)).unwrap();

        assert_eq!(out[0], original);
        assert_eq!(out[0].pixels.as_ptr(), buffer, "buffer must not be copied");
    }

    #[test]
    fn outside_tolerance_lands_on_target() {
        let bands = vec![
            ramp("B02", 10.0, 6, 6),
            ramp("B03", 20.0, 3, 3),
            ramp("B04", 60.0, 1, 1),
        ];
        let spec = MergeSpec::new(["B04", "B03", "B02"]).with_target_pixel_size(20.0);

        let out = reconcile(bands, &spec).unwrap();

        let names: Vec<&str> = out.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["B02", "B03", "B04"], "input order is kept");
        for band in &out {
            assert_eq!(band.pixel_size, 20.0);
            assert_eq!((band.width, band.height), (3, 3), "{}", band.name);
            assert_eq!(band.origin, (500_000.0, 4_600_000.0));
            assert_eq!(band.pixels.len(), 9);
        }
        // coarse single pixel replicated by nearest
        assert!(out[2].pixels.iter().all(|&p| p == 0.0));
    }

    #[test]
    fn nearest_upsampling_replicates_pixels() {
        let band = ramp("B", 20.0, 2, 2);
        let out = resample(&band, 10.0, ResamplingMethod::Nearest).unwrap();
        assert_eq!((out.width, out.height), (4, 4));
        assert_eq!(
            out.pixels,
            vec![
                0.0, 0.0, 1.0, 1.0, //
                0.0, 0.0, 1.0, 1.0, //
                2.0, 2.0, 3.0, 3.0, //
                2.0, 2.0, 3.0, 3.0,
            ]
        );
    }

    #[test]
    fn bilinear_downsampling_interpolates_between_centres() {
        // 4x1 ramp 0,1,2,3 at 10m -> 2x1 at 20m; centres fall between source centres
        let band = ramp("B", 10.0, 4, 1);
        let out = resample(&band, 20.0, ResamplingMethod::Bilinear).unwrap();
        assert_eq!(out.width, 2);
        assert_eq!(out.pixels, vec![0.5, 2.5]);
    }

    #[test]
    fn bilinear_skips_nodata_neighbours() {
        let mut band = ramp("B", 10.0, 4, 1);
        band.nodata = Some(0.0);
        let out = resample(&band, 20.0, ResamplingMethod::Bilinear).unwrap();
        assert_eq!(out.pixels[0], 1.0, "nodata tap excluded and weights renormalised");

        let mut empty = constant("E", 10.0, 2, -9999.0);
        empty.nodata = Some(-9999.0);
        let out = resample(&empty, 20.0, ResamplingMethod::Bilinear).unwrap();
        assert_eq!(out.pixels, vec![-9999.0]);
    }

    #[test]
    fn average_is_box_mean() {
        let band = ramp("B", 10.0, 4, 4);
        let out = resample(&band, 20.0, ResamplingMethod::Average).unwrap();
        // top-left block: 0,1,4,5
        assert_eq!(out.pixels[0], 2.5);
        assert_eq!(out.pixels.len(), 4);
    }

    #[test]
    fn grid_never_collapses_below_one_pixel() {
        let band = ramp("B", 10.0, 2, 2);
        let out = resample(&band, 60.0, ResamplingMethod::Nearest).unwrap();
        assert_eq!((out.width, out.height), (1, 1));
    }

    #[test]
    fn tiny_target_pixel_size_is_an_error_not_an_allocation() {
        let band = ramp("B", 10.0, 4, 4);

        let err = reconcile(
            vec![band.clone()],
            &MergeSpec::new(["B"]).with_target_pixel_size(1e-9),
        )
        .unwrap_err();
        assert!(matches!(err, ResampleError::GridTooLarge { .. }), "{err}");

        // Fits a u32 per axis but the product exceeds the sample limit
        let err = resample(&band, 0.001, ResamplingMethod::Nearest).unwrap_err();
        match err {
            ResampleError::GridTooLarge { band, limit, .. } => {
                assert_eq!(band, "B");
                assert_eq!(limit, MAX_GRID_SAMPLES);
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        let band = ramp("B", 10.0, 2, 2);
        assert!(matches!(
            resample(&band, 0.0, ResamplingMethod::Nearest),
            Err(ResampleError::InvalidSpec(_))
        ));
        assert!(matches!(
            reconcile(vec![band.clone()], &MergeSpec::new(["B"]).with_tolerance(-1.0)),
            Err(ResampleError::InvalidSpec(_))
        ));

        let mut broken = band.clone();
        broken.pixels.pop();
        assert!(resample(&broken, 20.0, ResamplingMethod::Nearest).is_err());

        let mut empty = band;
        empty.width = 0;
        empty.pixels.clear();
        assert!(matches!(
            resample(&empty, 20.0, ResamplingMethod::Nearest),
            Err(ResampleError::EmptyGrid { .. })
        ));
    }
}
