use crate::progress::{ProgressReporter, ProgressUpdate};
use crate::ray_march::{ShadowRayMarcher, SunVector};
use crate::refine::{EdgePolicy, QualityRefiner};
use crate::sun_position::SunCalculator;
use crate::terrain::TerrainSampler;
use crate::types::*;
use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use ndarray::parallel::prelude::*;
use ndarray::{s, Array2, Array3, Axis};
use std::collections::HashMap;
use tracing::{debug, info};

/// Upper bound on memoised shadow maps per run.
const MAX_CACHED_SLICES: usize = 256;

/// Runs the ray marcher and refiner over every cell and timestamp.
///
/// Work is timestamp-major: the solar position is computed once per slice
/// and cells are spread over a pool sized by `cpu_cores`.
pub struct ShadowEngine {
    sampler: TerrainSampler,
    sun_calculator: SunCalculator,
    refiner: QualityRefiner,
    buffer_meters: f64,
    angle_precision: f64,
    pool: rayon::ThreadPool,
    progress: ProgressReporter,
}

impl ShadowEngine {
    pub fn new(
        sampler: TerrainSampler,
        sun_calculator: SunCalculator,
        config: &Config,
        buffer_meters: f64,
    ) -> Result<Self, ShadowError> {
        let cpu_cores = config.get_cpu_cores();
        info!("Setting up thread pool with {} cores", cpu_cores);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(cpu_cores)
            .build()?;

        Ok(Self {
            sampler,
            sun_calculator,
            refiner: QualityRefiner::new(
                config.shadow_quality,
                EdgePolicy::new(config.edge_min_disagreements),
            ),
            buffer_meters,
            angle_precision: config.angle_precision,
            pool,
            progress: ProgressReporter::disabled(),
        })
    }

    pub fn with_progress(mut self, sender: Sender<ProgressUpdate>) -> Self {
        self.progress = ProgressReporter::new(sender);
        self
    }

    pub fn with_reporter(mut self, reporter: ProgressReporter) -> Self {
        self.progress = reporter;
        self
    }

    pub fn sampler(&self) -> &TerrainSampler {
        &self.sampler
    }

    /// Shadow fractions of every cell for one solar position.
    pub fn shadow_map(&self, sun: &SunPosition) -> Array2<f32> {
        self.pool.install(|| self.compute_shadow_map(sun))
    }

    /// Fills the `[time, row, col]` cube, or stops between slices once
    /// `cancel` is set.
    pub fn calculate_shadows(
        &self,
        timestamps: &[DateTime<Utc>],
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let n_times = timestamps.len();
        let (n_rows, n_cols) = self.sampler.dim();
        let mut shadow_fraction = Array3::<f32>::zeros((n_times, n_rows, n_cols));
        let mut memo: HashMap<(i64, i64), Array2<f32>> = HashMap::new();
        let mut cache_hits = 0usize;

        self.progress.emit(
            0.0,
            "Initializing shadow calculation...",
            Some(n_times),
            Some(0),
        );

        for (t_idx, timestamp) in timestamps.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("Shadow calculation cancelled after {}/{} slices", t_idx, n_times);
                return RunOutcome::Cancelled {
                    completed_steps: t_idx,
                    total_steps: n_times,
                };
            }

            let sun = self
                .sun_calculator
                .position(timestamp)
                .rounded(self.angle_precision);
            let key = sun.key(self.angle_precision);
            let mut slice = shadow_fraction.slice_mut(s![t_idx, .., ..]);

            match memo.get(&key) {
                Some(cached) => {
                    slice.assign(cached);
                    cache_hits += 1;
                }
                None => {
                    let shadow_map = self.shadow_map(&sun);
                    slice.assign(&shadow_map);
                    if memo.len() < MAX_CACHED_SLICES {
                        memo.insert(key, shadow_map);
                    }
                }
            }
            debug!(
                "Slice {}/{} at {}: azimuth {:.1}, elevation {:.1}",
                t_idx + 1,
                n_times,
                timestamp,
                sun.azimuth,
                sun.elevation
            );

            let progress = (t_idx + 1) as f64 / n_times as f64 * 100.0;
            self.progress.emit(
                progress,
                "Calculating shadows...",
                Some(n_times),
                Some(t_idx + 1),
            );
        }

        self.progress.emit(
            100.0,
            "Shadow calculation complete",
            Some(n_times),
            Some(n_times),
        );
        info!(
            "Computed {} slices of {}x{} cells ({} reused from cache)",
            n_times, n_rows, n_cols, cache_hits
        );

        RunOutcome::Completed(ShadowCube {
            shadow_fraction,
            timestamps: timestamps.to_vec(),
        })
    }

    fn compute_shadow_map(&self, sun: &SunPosition) -> Array2<f32> {
        let (n_rows, n_cols) = self.sampler.dim();
        if sun.elevation <= 0.0 {
            return Array2::<f32>::ones((n_rows, n_cols));
        }

        let marcher = ShadowRayMarcher::new(&self.sampler, self.buffer_meters);
        let sun_vector = SunVector::from_angles(sun, self.sampler.cell_size());

        // Each row is written by exactly one task.
        let mut binary = Array2::<f32>::zeros((n_rows, n_cols));
        binary
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(row, mut line)| {
                for (col, value) in line.iter_mut().enumerate() {
                    *value = marcher.march_cell(row, col, &sun_vector).fraction();
                }
            });

        self.refiner.refine(&marcher, &sun_vector, binary)
    }
}
