use crate::terrain::TerrainSampler;
use crate::types::SunPosition;

/// Horizontal march increment in cells.
pub const STEP_CELLS: f64 = 0.5;

/// Direction toward the sun.
///
/// `east` and `north` are the horizontal unit components, `rise` is the
/// altitude gained per cell of horizontal travel, in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SunVector {
    pub east: f64,
    pub north: f64,
    pub rise: f64,
    pub elevation: f64,
}

impl SunVector {
    pub fn from_angles(sun: &SunPosition, cell_size: f64) -> Self {
        let azimuth = sun.azimuth.to_radians();
        let elevation = sun.elevation.to_radians();
        Self {
            east: azimuth.sin(),
            north: azimuth.cos(),
            rise: elevation.tan() * cell_size,
            elevation: sun.elevation,
        }
    }

    pub fn is_above_horizon(&self) -> bool {
        self.elevation > 0.0
    }
}

/// Result of one ray. Sampling problems are values, never errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RayOutcome {
    Lit,
    Shadowed,
    /// The ray origin has no height; reported as unshadowed.
    Undefined,
}

impl RayOutcome {
    pub fn fraction(self) -> f32 {
        match self {
            RayOutcome::Shadowed => 1.0,
            RayOutcome::Lit | RayOutcome::Undefined => 0.0,
        }
    }
}

/// Binary line-of-sight test against the surface model.
#[derive(Debug, Clone)]
pub struct ShadowRayMarcher<'a> {
    sampler: &'a TerrainSampler,
    max_distance_cells: f64,
    max_surface: f64,
}

impl<'a> ShadowRayMarcher<'a> {
    /// Rays stop after `buffer_meters`, but never before they could cross
    /// the whole grid.
    pub fn new(sampler: &'a TerrainSampler, buffer_meters: f64) -> Self {
        let (n_rows, n_cols) = sampler.dim();
        let diagonal = ((n_rows * n_rows + n_cols * n_cols) as f64).sqrt();
        let max_surface = sampler
            .dsm()
            .data()
            .iter()
            .filter(|h| h.is_finite())
            .fold(f32::NEG_INFINITY, |acc, &h| acc.max(h)) as f64;

        Self {
            sampler,
            max_distance_cells: (buffer_meters / sampler.cell_size()).max(diagonal),
            max_surface,
        }
    }

    pub fn sampler(&self) -> &TerrainSampler {
        self.sampler
    }

    pub fn max_distance_cells(&self) -> f64 {
        self.max_distance_cells
    }

    /// Marches from fractional (`row`, `col`) toward the sun. Rows grow southward.
    pub fn march(&self, row: f64, col: f64, sun: &SunVector) -> RayOutcome {
        let origin = match self.sampler.origin_height(row, col) {
            Some(h) => h as f64,
            None => return RayOutcome::Undefined,
        };
        if !sun.is_above_horizon() {
            return RayOutcome::Shadowed;
        }

        let mut step = 1usize;
        loop {
            // Positions are recomputed from the origin so error does not accumulate.
            let distance = step as f64 * STEP_CELLS;
            if distance > self.max_distance_cells {
                return RayOutcome::Lit;
            }

            let altitude = origin + distance * sun.rise;
            if altitude > self.max_surface {
                return RayOutcome::Lit;
            }

            let r = row - sun.north * distance;
            let c = col + sun.east * distance;
            if !self.sampler.in_bounds(r, c) {
                return RayOutcome::Lit;
            }

            // No-data samples are open sky.
            if let Some(surface) = self.sampler.surface_height(r, c) {
                if surface as f64 > altitude {
                    return RayOutcome::Shadowed;
                }
            }
            step += 1;
        }
    }

    /// Marches from the centre of cell (`row`, `col`).
    pub fn march_cell(&self, row: usize, col: usize, sun: &SunVector) -> RayOutcome {
        self.march(row as f64, col as f64, sun)
    }
}
