use crate::grid::{ensure_coregistered, ElevationGrid};
use crate::types::ShadowError;
use ndarray::Array2;
use tracing::debug;

/// Interpolated height queries over a co-registered DTM/DSM pair.
///
/// Positions are fractional (row, col) indices with cell centres at integers.
/// Queries outside the grid return `None`, which callers treat as open sky.
#[derive(Debug, Clone)]
pub struct TerrainSampler {
    dtm: ElevationGrid,
    dsm: ElevationGrid,
    cell_size: f64,
}

impl TerrainSampler {
    /// Cell size is taken from the geotransform. Degree grids are converted at
    /// their centre latitude; projected grids use the pixel width as meters.
    pub fn new(dtm: ElevationGrid, dsm: ElevationGrid) -> Result<Self, ShadowError> {
        let cell_size = if dsm.is_geographic() {
            dsm.transform().cell_size_meters(dsm.center_latitude())
        } else {
            debug!("Grid is not in degrees, using pixel width as cell size");
            dsm.transform().pixel_width.abs()
        };
        Self::with_cell_size(dtm, dsm, cell_size)
    }

    /// Uses an explicit cell size in meters, overriding what the transform implies.
    pub fn with_cell_size(
        dtm: ElevationGrid,
        dsm: ElevationGrid,
        cell_size: f64,
    ) -> Result<Self, ShadowError> {
        ensure_coregistered(&dtm, &dsm)?;
        if !(cell_size.is_finite() && cell_size > 0.0) {
            return Err(ShadowError::Config(format!(
                "Cell size must be positive, got {}",
                cell_size
            )));
        }
        let (n_rows, n_cols) = dsm.dim();
        if n_rows == 0 || n_cols == 0 {
            return Err(ShadowError::Config("Elevation grids are empty".to_string()));
        }

        Ok(Self {
            dtm,
            dsm,
            cell_size,
        })
    }

    pub fn dim(&self) -> (usize, usize) {
        self.dsm.dim()
    }

    /// Cell size in meters.
    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn dtm(&self) -> &ElevationGrid {
        &self.dtm
    }

    pub fn dsm(&self) -> &ElevationGrid {
        &self.dsm
    }

    pub fn in_bounds(&self, row: f64, col: f64) -> bool {
        let (n_rows, n_cols) = self.dim();
        row >= 0.0 && col >= 0.0 && row <= (n_rows - 1) as f64 && col <= (n_cols - 1) as f64
    }

    /// Bare-ground height.
    pub fn ground_height(&self, row: f64, col: f64) -> Option<f32> {
        self.interpolate(self.dtm.data(), row, col)
    }

    /// Height including buildings and vegetation.
    pub fn surface_height(&self, row: f64, col: f64) -> Option<f32> {
        self.interpolate(self.dsm.data(), row, col)
    }

    /// Height a shadow ray starts from: the surface (a rooftop where one
    /// exists), falling back to the ground where the DSM has no data.
    pub fn origin_height(&self, row: f64, col: f64) -> Option<f32> {
        self.surface_height(row, col)
            .or_else(|| self.ground_height(row, col))
    }

    /// Bilinear interpolation over the four surrounding nodes.
    /// `None` when out of bounds or when any node is no-data.
    fn interpolate(&self, data: &Array2<f32>, row: f64, col: f64) -> Option<f32> {
        if !self.in_bounds(row, col) {
            return None;
        }

        let (n_rows, n_cols) = data.dim();
        let r0 = row.floor() as usize;
        let c0 = col.floor() as usize;
        let r1 = (r0 + 1).min(n_rows - 1);
        let c1 = (c0 + 1).min(n_cols - 1);

        let fx = col - c0 as f64;
        let fy = row - r0 as f64;

        // Zero-weight nodes are skipped so a no-data neighbour does not
        // poison an exact hit on a valid node.
        let nodes = [
            (r0, c0, (1.0 - fy) * (1.0 - fx)),
            (r0, c1, (1.0 - fy) * fx),
            (r1, c0, fy * (1.0 - fx)),
            (r1, c1, fy * fx),
        ];
        let height: f64 = nodes
            .iter()
            .filter(|(_, _, weight)| *weight > 0.0)
            .map(|&(r, c, weight)| weight * data[[r, c]] as f64)
            .sum();

        height.is_finite().then_some(height as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GeoTransform;
    use approx::assert_relative_eq;

    fn transform() -> GeoTransform {
        GeoTransform::new(0.0, 0.0, 1.0, -1.0)
    }

    fn ramp_sampler() -> TerrainSampler {
        let dtm = ElevationGrid::filled(3, 3, 0.0, transform());
        let dsm_data = Array2::from_shape_fn((3, 3), |(r, c)| (r * 10 + c) as f32);
        let dsm = ElevationGrid::new(dsm_data, transform(), None);
        TerrainSampler::with_cell_size(dtm, dsm, 1.0).unwrap()
    }

    #[test]
    fn test_exact_nodes() {
        let sampler = ramp_sampler();
        assert_relative_eq!(sampler.surface_height(1.0, 2.0).unwrap(), 12.0);
        assert_relative_eq!(sampler.surface_height(2.0, 2.0).unwrap(), 22.0);
        assert_relative_eq!(sampler.ground_height(2.0, 2.0).unwrap(), 0.0);
    }

    #[test]
    fn test_bilinear_midpoint() {
        let sampler = ramp_sampler();
        // Mean of 0, 1, 10, 11
        assert_relative_eq!(sampler.surface_height(0.5, 0.5).unwrap(), 5.5, epsilon = 1e-6);
        assert_relative_eq!(sampler.surface_height(1.25, 0.0).unwrap(), 12.5, epsilon = 1e-6);
    }

    #[test]
    fn test_out_of_bounds_is_open_sky() {
        let sampler = ramp_sampler();
        assert_eq!(sampler.surface_height(-0.1, 1.0), None);
        assert_eq!(sampler.surface_height(1.0, 2.01), None);
        assert_eq!(sampler.ground_height(3.0, 0.0), None);
        assert!(!sampler.in_bounds(f64::NAN, 0.0));
    }

    #[test]
    fn test_no_data_falls_back_to_ground() {
        let dtm = ElevationGrid::filled(2, 2, 3.0, transform());
        let dsm_data = Array2::from_shape_vec((2, 2), vec![f32::NAN, 5.0, 5.0, 5.0]).unwrap();
        let dsm = ElevationGrid::new(dsm_data, transform(), None);
        let sampler = TerrainSampler::with_cell_size(dtm, dsm, 1.0).unwrap();
        assert_eq!(sampler.surface_height(0.0, 0.0), None);
        assert_eq!(sampler.surface_height(0.5, 0.5), None);
        assert_relative_eq!(sampler.origin_height(0.0, 0.0).unwrap(), 3.0);
        assert_relative_eq!(sampler.origin_height(1.0, 1.0).unwrap(), 5.0);
        assert_relative_eq!(sampler.surface_height(0.0, 1.0).unwrap(), 5.0);
    }

    #[test]
    fn test_rejects_mismatched_grids() {
        let dtm = ElevationGrid::filled(3, 3, 0.0, transform());
        let dsm = ElevationGrid::filled(3, 4, 0.0, transform());
        assert!(matches!(
            TerrainSampler::with_cell_size(dtm, dsm, 1.0),
            Err(ShadowError::GridMismatch(_))
        ));
    }

    #[test]
    fn test_cell_size_from_geographic_transform() {
        let transform = GeoTransform::from_cell_size_meters(8.0, 50.0, 2.0);
        let dtm = ElevationGrid::filled(4, 4, 0.0, transform);
        let dsm = dtm.clone();
        let sampler = TerrainSampler::new(dtm, dsm).unwrap();
        assert_relative_eq!(sampler.cell_size(), 2.0, epsilon = 1e-3);
    }

    #[test]
    fn test_cell_size_from_projected_transform() {
        let transform = GeoTransform::new(500000.0, 5600000.0, 2.0, -2.0);
        let dtm = ElevationGrid::filled(4, 4, 0.0, transform);
        assert!(!dtm.is_geographic());
        let sampler = TerrainSampler::new(dtm.clone(), dtm).unwrap();
        assert_eq!(sampler.cell_size(), 2.0);
    }
}
