use crate::grid::{meters_to_degrees, GeoTransform, GridWindow};
use crate::types::ShadowError;
use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::{Area, Centroid, Contains};
use geo_types::{Coord, Line, LineString, Polygon};
use ndarray::Array2;

/// User-drawn analysis polygon in (lon, lat). Winding order is not significant.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaOfInterest {
    polygon: Polygon<f64>,
}

impl AreaOfInterest {
    /// Validates and closes the ring. Rejects fewer than three distinct
    /// vertices, zero area and self-intersections.
    pub fn from_vertices(vertices: &[[f64; 2]]) -> Result<Self, ShadowError> {
        if vertices.is_empty() {
            return Err(ShadowError::InvalidAoi("AOI is empty".to_string()));
        }
        if vertices.iter().flatten().any(|v| !v.is_finite()) {
            return Err(ShadowError::InvalidAoi(
                "AOI contains non-finite coordinates".to_string(),
            ));
        }

        let mut coords: Vec<Coord<f64>> =
            vertices.iter().map(|v| Coord { x: v[0], y: v[1] }).collect();
        coords.dedup();
        if coords.len() > 1 && coords.first() == coords.last() {
            coords.pop();
        }
        if coords.len() < 3 {
            return Err(ShadowError::InvalidAoi(format!(
                "AOI needs at least 3 distinct vertices, got {}",
                coords.len()
            )));
        }
        if has_self_intersection(&coords) {
            return Err(ShadowError::InvalidAoi("AOI is self-intersecting".to_string()));
        }

        let polygon = Polygon::new(LineString::from(coords), vec![]);
        if polygon.unsigned_area() <= 0.0 {
            return Err(ShadowError::InvalidAoi("AOI has zero area".to_string()));
        }

        Ok(Self { polygon })
    }

    /// Area centroid as (lon, lat).
    pub fn centroid(&self) -> (f64, f64) {
        match self.polygon.centroid() {
            Some(point) => (point.x(), point.y()),
            None => {
                let (min_x, min_y, max_x, max_y) = self.bounds();
                ((min_x + max_x) / 2.0, (min_y + max_y) / 2.0)
            }
        }
    }

    /// (min_lon, min_lat, max_lon, max_lat)
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        let coords = self.polygon.exterior().coords();
        let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
        let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for c in coords {
            min_x = min_x.min(c.x);
            min_y = min_y.min(c.y);
            max_x = max_x.max(c.x);
            max_y = max_y.max(c.y);
        }
        (min_x, min_y, max_x, max_y)
    }

    /// Bounds grown by `buffer_m` meters on every side.
    pub fn buffered_bounds(&self, buffer_m: f64) -> (f64, f64, f64, f64) {
        let (_, center_lat) = self.centroid();
        let buffer = meters_to_degrees(buffer_m, center_lat);
        let (min_x, min_y, max_x, max_y) = self.bounds();
        (min_x - buffer, min_y - buffer, max_x + buffer, max_y + buffer)
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        self.polygon.contains(&Coord { x: lon, y: lat })
    }

    /// Cells of a `(n_rows, n_cols)` grid covering the buffered bounds,
    /// clamped to the grid extent.
    pub fn grid_window(
        &self,
        transform: &GeoTransform,
        dims: (usize, usize),
        buffer_m: f64,
    ) -> Result<GridWindow, ShadowError> {
        let (n_rows, n_cols) = dims;
        let (min_x, min_y, max_x, max_y) = self.buffered_bounds(buffer_m);

        let corners = [
            transform.world_to_pixel(min_x, min_y),
            transform.world_to_pixel(min_x, max_y),
            transform.world_to_pixel(max_x, min_y),
            transform.world_to_pixel(max_x, max_y),
        ];
        let col_lo = corners.iter().map(|c| c.0).fold(f64::INFINITY, f64::min);
        let col_hi = corners.iter().map(|c| c.0).fold(f64::NEG_INFINITY, f64::max);
        let row_lo = corners.iter().map(|c| c.1).fold(f64::INFINITY, f64::min);
        let row_hi = corners.iter().map(|c| c.1).fold(f64::NEG_INFINITY, f64::max);

        if !(col_lo.is_finite() && col_hi.is_finite() && row_lo.is_finite() && row_hi.is_finite()) {
            return Err(ShadowError::Config("Degenerate raster geotransform".to_string()));
        }
        if col_lo >= n_cols as f64 || row_lo >= n_rows as f64 || col_hi <= 0.0 || row_hi <= 0.0 {
            return Err(ShadowError::AoiOutsideRaster(format!(
                "pixel coords ({:.1},{:.1}) to ({:.1},{:.1}), raster size {}x{}",
                col_lo, row_lo, col_hi, row_hi, n_cols, n_rows
            )));
        }

        // Corners that land on a cell edge up to rounding noise stay on it.
        const EDGE_TOLERANCE: f64 = 1e-9;
        let window = GridWindow {
            row_start: (row_lo + EDGE_TOLERANCE).floor().max(0.0) as usize,
            row_end: ((row_hi - EDGE_TOLERANCE).ceil() as usize).min(n_rows),
            col_start: (col_lo + EDGE_TOLERANCE).floor().max(0.0) as usize,
            col_end: ((col_hi - EDGE_TOLERANCE).ceil() as usize).min(n_cols),
        };
        if window.row_end <= window.row_start || window.col_end <= window.col_start {
            return Err(ShadowError::AoiOutsideRaster(format!(
                "empty clip region: rows {}-{}, cols {}-{}",
                window.row_start, window.row_end, window.col_start, window.col_end
            )));
        }
        Ok(window)
    }

    /// True for cells whose centre lies inside the polygon.
    pub fn cell_mask(&self, transform: &GeoTransform, dims: (usize, usize)) -> Array2<bool> {
        Array2::from_shape_fn(dims, |(row, col)| {
            let (lon, lat) = transform.cell_center(row, col);
            self.contains(lon, lat)
        })
    }
}

/// Checks every pair of ring edges. Adjacent edges may only share their
/// common vertex.
fn has_self_intersection(coords: &[Coord<f64>]) -> bool {
    let n = coords.len();
    let edges: Vec<Line<f64>> = (0..n)
        .map(|i| Line::new(coords[i], coords[(i + 1) % n]))
        .collect();

    for i in 0..n {
        for j in (i + 1)..n {
            let adjacent = j == i + 1 || (i == 0 && j == n - 1);
            match line_intersection(edges[i], edges[j]) {
                None => {}
                Some(LineIntersection::Collinear { .. }) => return true,
                Some(LineIntersection::SinglePoint { is_proper, .. }) => {
                    if !adjacent || is_proper {
                        return true;
                    }
                }
            }
        }
    }
    false
}
