//! Georeferenced elevation grids.
//!
//! Grids are north-up rasters whose geotransform maps (col, row) to
//! (lon, lat) in degrees, the same convention GDAL uses for WGS84 rasters.

use crate::types::ShadowError;
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};

/// Meters per degree of latitude (and of longitude at the equator).
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// Converts a metric distance to an approximate angular distance at `latitude`.
///
/// Uses the mean of the longitude and latitude scales so the result describes
/// a roughly square buffer.
pub fn meters_to_degrees(meters: f64, latitude: f64) -> f64 {
    let lon_meters_per_degree = METERS_PER_DEGREE * latitude.to_radians().cos();
    let avg_meters_per_degree = (lon_meters_per_degree + METERS_PER_DEGREE) / 2.0;
    meters / avg_meters_per_degree
}

/// Converts a longitude span in degrees to meters at `latitude`.
pub fn degrees_to_meters(degrees: f64, latitude: f64) -> f64 {
    degrees * METERS_PER_DEGREE * latitude.to_radians().cos()
}

/// Affine transform in GDAL order.
///
/// ```text
/// lon = origin_x + col * pixel_width + row * row_rotation
/// lat = origin_y + col * col_rotation + row * pixel_height
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub pixel_width: f64,
    pub row_rotation: f64,
    pub origin_y: f64,
    pub col_rotation: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform without rotation.
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            pixel_width,
            row_rotation: 0.0,
            origin_y,
            col_rotation: 0.0,
            pixel_height,
        }
    }

    /// North-up transform whose cells are `cell_size_m` meters wide at `origin_lat`.
    pub fn from_cell_size_meters(origin_lon: f64, origin_lat: f64, cell_size_m: f64) -> Self {
        let lon_scale = METERS_PER_DEGREE * origin_lat.to_radians().cos();
        Self::new(
            origin_lon,
            origin_lat,
            cell_size_m / lon_scale,
            -cell_size_m / METERS_PER_DEGREE,
        )
    }

    pub fn from_gdal(coeffs: [f64; 6]) -> Self {
        Self {
            origin_x: coeffs[0],
            pixel_width: coeffs[1],
            row_rotation: coeffs[2],
            origin_y: coeffs[3],
            col_rotation: coeffs[4],
            pixel_height: coeffs[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.origin_x,
            self.pixel_width,
            self.row_rotation,
            self.origin_y,
            self.col_rotation,
            self.pixel_height,
        ]
    }

    /// Coordinates of a fractional pixel position (corner convention).
    pub fn pixel_to_world(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.origin_x + col * self.pixel_width + row * self.row_rotation;
        let y = self.origin_y + col * self.col_rotation + row * self.pixel_height;
        (x, y)
    }

    /// Coordinates of the centre of cell (`row`, `col`).
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        self.pixel_to_world(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// Fractional (col, row) of a world coordinate. NaN for a degenerate transform.
    pub fn world_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        let det = self.pixel_width * self.pixel_height - self.row_rotation * self.col_rotation;
        if det.abs() < f64::EPSILON * f64::EPSILON {
            return (f64::NAN, f64::NAN);
        }

        let dx = x - self.origin_x;
        let dy = y - self.origin_y;
        let col = (self.pixel_height * dx - self.row_rotation * dy) / det;
        let row = (-self.col_rotation * dx + self.pixel_width * dy) / det;
        (col, row)
    }

    /// Horizontal cell size in meters, evaluated at `latitude`.
    pub fn cell_size_meters(&self, latitude: f64) -> f64 {
        degrees_to_meters(self.pixel_width.abs(), latitude)
    }

    /// Transform of a sub-window starting at (`row`, `col`).
    pub fn offset(&self, row: usize, col: usize) -> Self {
        let (origin_x, origin_y) = self.pixel_to_world(col as f64, row as f64);
        Self {
            origin_x,
            origin_y,
            ..*self
        }
    }

    /// Equal to within a millionth of a cell.
    fn approx_eq(&self, other: &Self) -> bool {
        let tolerance = 1e-6 * self.pixel_width.abs().max(self.pixel_height.abs());
        self.to_gdal()
            .iter()
            .zip(other.to_gdal().iter())
            .all(|(a, b)| (a - b).abs() <= tolerance)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridBounds {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

/// Half-open index region `[row_start, row_end) x [col_start, col_end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridWindow {
    pub row_start: usize,
    pub row_end: usize,
    pub col_start: usize,
    pub col_end: usize,
}

impl GridWindow {
    pub fn rows(&self) -> usize {
        self.row_end - self.row_start
    }

    pub fn cols(&self) -> usize {
        self.col_end - self.col_start
    }

    pub fn dim(&self) -> (usize, usize) {
        (self.rows(), self.cols())
    }
}

/// Immutable height raster in meters.
#[derive(Debug, Clone)]
pub struct ElevationGrid {
    data: Array2<f32>,
    transform: GeoTransform,
}

impl ElevationGrid {
    /// Builds a grid; cells equal to `no_data` become NaN.
    pub fn new(mut data: Array2<f32>, transform: GeoTransform, no_data: Option<f32>) -> Self {
        if let Some(no_data) = no_data {
            data.mapv_inplace(|h| if h == no_data { f32::NAN } else { h });
        }
        Self { data, transform }
    }

    /// Grid with every cell at `height`.
    pub fn filled(n_rows: usize, n_cols: usize, height: f32, transform: GeoTransform) -> Self {
        Self::new(Array2::from_elem((n_rows, n_cols), height), transform, None)
    }

    pub fn data(&self) -> &Array2<f32> {
        &self.data
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        self.data.get((row, col)).copied()
    }

    pub fn bounds(&self) -> GridBounds {
        let (n_rows, n_cols) = self.dim();
        let corners = [
            self.transform.pixel_to_world(0.0, 0.0),
            self.transform.pixel_to_world(n_cols as f64, 0.0),
            self.transform.pixel_to_world(0.0, n_rows as f64),
            self.transform.pixel_to_world(n_cols as f64, n_rows as f64),
        ];
        GridBounds {
            min_lon: corners.iter().map(|c| c.0).fold(f64::INFINITY, f64::min),
            max_lon: corners.iter().map(|c| c.0).fold(f64::NEG_INFINITY, f64::max),
            min_lat: corners.iter().map(|c| c.1).fold(f64::INFINITY, f64::min),
            max_lat: corners.iter().map(|c| c.1).fold(f64::NEG_INFINITY, f64::max),
        }
    }

    /// True when the grid looks like lon/lat degrees: sub-degree cells and
    /// bounds inside the valid longitude and latitude ranges.
    pub fn is_geographic(&self) -> bool {
        let b = self.bounds();
        self.transform.pixel_width.abs() < 1.0
            && b.min_lon >= -180.0
            && b.max_lon <= 180.0
            && b.min_lat >= -90.0
            && b.max_lat <= 90.0
    }

    /// Latitude of the grid centre.
    pub fn center_latitude(&self) -> f64 {
        let (n_rows, n_cols) = self.dim();
        self.transform
            .pixel_to_world(n_cols as f64 / 2.0, n_rows as f64 / 2.0)
            .1
    }

    /// Copies the cells of `window` into a new grid with a shifted transform.
    pub fn subset(&self, window: &GridWindow) -> Result<Self, ShadowError> {
        let (n_rows, n_cols) = self.dim();
        if window.row_end > n_rows
            || window.col_end > n_cols
            || window.row_start >= window.row_end
            || window.col_start >= window.col_end
        {
            return Err(ShadowError::Config(format!(
                "Invalid clip region: rows {}-{}, cols {}-{} of {}x{} grid",
                window.row_start, window.row_end, window.col_start, window.col_end, n_rows, n_cols
            )));
        }

        let data = self
            .data
            .slice(s![
                window.row_start..window.row_end,
                window.col_start..window.col_end
            ])
            .to_owned();

        Ok(Self {
            data,
            transform: self.transform.offset(window.row_start, window.col_start),
        })
    }

    /// Number of no-data (non-finite) cells.
    pub fn no_data_cells(&self) -> usize {
        self.data.iter().filter(|h| !h.is_finite()).count()
    }
}

/// Fails unless both grids share shape and geotransform.
pub fn ensure_coregistered(dtm: &ElevationGrid, dsm: &ElevationGrid) -> Result<(), ShadowError> {
    if dtm.dim() != dsm.dim() {
        return Err(ShadowError::GridMismatch(format!(
            "DTM is {:?} cells but DSM is {:?}",
            dtm.dim(),
            dsm.dim()
        )));
    }
    if !dtm.transform.approx_eq(&dsm.transform) {
        return Err(ShadowError::GridMismatch(format!(
            "DTM transform {:?} differs from DSM transform {:?}",
            dtm.transform.to_gdal(),
            dsm.transform.to_gdal()
        )));
    }
    Ok(())
}
