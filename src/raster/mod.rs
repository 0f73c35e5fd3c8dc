//! In-memory rasters and the resample / GeoTIFF / merge pipeline over them.
//!
//! A [`BandRaster`] is one georeferenced band: a north-up grid of square
//! pixels anchored at its top-left corner.

pub mod geotiff;
pub mod merge;
pub mod resample;

pub use geotiff::{read_band, read_bands, write_bands};
pub use merge::{write_merged, write_merged_blocking};
pub use resample::{ResamplingMethod, method_for, reconcile, resample, target_pixel_size};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coordinate reference system, identified by EPSG code
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Crs(pub u16);

impl Crs {
    /// WGS 84 geographic
    pub const WGS84: Crs = Crs(4326);

    /// EPSG code
    pub fn epsg(self) -> u16 {
        self.0
    }

    /// Whether the code is in the EPSG geographic 2D range
    ///
    /// Geographic CRSs are stored under a different GeoKey than projected ones.
    pub fn is_geographic(self) -> bool {
        (4000..5000).contains(&self.0)
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.0)
    }
}

/// One georeferenced band
#[derive(Clone, Debug, PartialEq)]
pub struct BandRaster {
    /// Band label (usually the asset key, e.g. "B04")
    pub name: String,
    /// Ground size of one pixel in CRS units
    pub pixel_size: f64,
    /// Coordinate reference system
    pub crs: Crs,
    /// Top-left corner (x, y) in CRS units
    pub origin: (f64, f64),
    /// Columns
    pub width: u32,
    /// Rows
    pub height: u32,
    /// Row-major samples, `width * height` long
    pub pixels: Vec<f32>,
    /// Sample value meaning "no data"
    pub nodata: Option<f64>,
}

impl BandRaster {
    /// Ground extent (width, height) in CRS units
    pub fn extent(&self) -> (f64, f64) {
        (
            f64::from(self.width) * self.pixel_size,
            f64::from(self.height) * self.pixel_size,
        )
    }

    /// Sample at (col, row), `None` outside the grid
    pub fn get(&self, col: u32, row: u32) -> Option<f32> {
        if col >= self.width || row >= self.height {
            return None;
        }
        self.pixels
            .get(row as usize * self.width as usize + col as usize)
            .copied()
    }

    /// Whether `value` carries data (not NaN, not the nodata value)
    pub fn is_valid(&self, value: f32) -> bool {
        if value.is_nan() {
            return false;
        }
        match self.nodata {
            Some(nd) => f64::from(value) != nd,
            None => true,
        }
    }

    /// Value written where no source data contributes
    pub(crate) fn fill_value(&self) -> f32 {
        self.nodata.map_or(f32::NAN, |nd| nd as f32)
    }

    /// Sample count implied by the dimensions
    pub(crate) fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize
    }
}
