use crate::ray_march::{ShadowRayMarcher, SunVector};
use crate::types::ShadowQuality;
use ndarray::Array2;
use rayon::prelude::*;

/// Decides which cells sit on a shadow boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgePolicy {
    /// 4-connected neighbours whose binary state must differ from the cell's.
    pub min_disagreements: usize,
}

impl Default for EdgePolicy {
    fn default() -> Self {
        Self {
            min_disagreements: 1,
        }
    }
}

impl EdgePolicy {
    pub fn new(min_disagreements: usize) -> Self {
        Self { min_disagreements }
    }

    /// Border cells only count their in-bounds neighbours.
    pub fn is_edge(&self, binary: &Array2<f32>, row: usize, col: usize) -> bool {
        let (n_rows, n_cols) = binary.dim();
        let shadowed = binary[[row, col]] > 0.5;
        let neighbours = [
            (row.checked_sub(1), Some(col)),
            ((row + 1 < n_rows).then_some(row + 1), Some(col)),
            (Some(row), col.checked_sub(1)),
            (Some(row), (col + 1 < n_cols).then_some(col + 1)),
        ];

        let disagreements = neighbours
            .iter()
            .filter_map(|&(r, c)| Some((r?, c?)))
            .filter(|&(r, c)| (binary[[r, c]] > 0.5) != shadowed)
            .count();

        disagreements >= self.min_disagreements
    }
}

/// Sub-pixel anti-aliasing of shadow boundaries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityRefiner {
    quality: ShadowQuality,
    policy: EdgePolicy,
}

impl QualityRefiner {
    pub fn new(quality: ShadowQuality, policy: EdgePolicy) -> Self {
        Self { quality, policy }
    }

    pub fn quality(&self) -> ShadowQuality {
        self.quality
    }

    /// Replaces edge cells of a binary map with the mean of an N x N
    /// sub-point grid. Other cells are returned untouched.
    pub fn refine(
        &self,
        marcher: &ShadowRayMarcher,
        sun: &SunVector,
        binary: Array2<f32>,
    ) -> Array2<f32> {
        let samples = self.quality.sub_samples();
        if samples <= 1 {
            return binary;
        }

        let (n_rows, n_cols) = binary.dim();
        let edge_coords: Vec<(usize, usize)> = (0..n_rows)
            .into_par_iter()
            .flat_map_iter(|row| (0..n_cols).map(move |col| (row, col)))
            .filter(|&(row, col)| self.policy.is_edge(&binary, row, col))
            .collect();

        let refined_values: Vec<f32> = edge_coords
            .par_iter()
            .map(|&(row, col)| subsample(marcher, sun, row, col, samples))
            .collect();

        let mut refined = binary;
        for (&(row, col), &value) in edge_coords.iter().zip(refined_values.iter()) {
            refined[[row, col]] = value;
        }
        refined
    }
}

/// Mean outcome over `samples` x `samples` evenly spaced points of the cell
/// footprint. One sample lands on the cell centre. Points past the outer
/// cell centres of the grid are pulled back onto them.
pub fn subsample(
    marcher: &ShadowRayMarcher,
    sun: &SunVector,
    row: usize,
    col: usize,
    samples: usize,
) -> f32 {
    let (n_rows, n_cols) = marcher.sampler().dim();
    let max_row = n_rows.saturating_sub(1) as f64;
    let max_col = n_cols.saturating_sub(1) as f64;
    let step = 1.0 / samples as f64;
    let mut shadowed = 0.0f32;

    for i in 0..samples {
        for j in 0..samples {
            let sub_row = (row as f64 - 0.5 + (i as f64 + 0.5) * step).clamp(0.0, max_row);
            let sub_col = (col as f64 - 0.5 + (j as f64 + 0.5) * step).clamp(0.0, max_col);
            shadowed += marcher.march(sub_row, sub_col, sun).fraction();
        }
    }

    shadowed / (samples * samples) as f32
}
