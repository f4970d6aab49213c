//! One shadow analysis from elevation grids to summary layers.
//!
//! Order of work: validate the config and rasters, generate daylight
//! timestamps, resolve the buffer, clip the rasters, run the engine and
//! aggregate. Configuration problems fail before any shadow is computed.

use crate::buffer::{BufferContext, BufferResolver, BufferStrategy};
use crate::grid::{ensure_coregistered, ElevationGrid};
use crate::progress::{ProgressReporter, ProgressUpdate};
use crate::shadow_engine::ShadowEngine;
use crate::summary::{SeasonalAnalysis, SummaryAggregator};
use crate::sun_position::SunCalculator;
use crate::terrain::TerrainSampler;
use crate::timestamps::TimestampGenerator;
use crate::types::*;
use crossbeam_channel::Sender;
use tracing::{info, warn};

#[derive(Debug)]
pub enum AnalysisOutcome {
    Completed(Box<ShadowResult>),
    Cancelled {
        completed_steps: usize,
        total_steps: usize,
    },
}

impl AnalysisOutcome {
    pub fn completed(self) -> Option<ShadowResult> {
        match self {
            AnalysisOutcome::Completed(result) => Some(*result),
            AnalysisOutcome::Cancelled { .. } => None,
        }
    }
}

pub struct ShadowAnalysis {
    config: Config,
    buffer: BufferResolver,
    cell_size: Option<f64>,
    progress: ProgressReporter,
    cancel: CancellationToken,
}

impl ShadowAnalysis {
    pub fn new(config: Config) -> Self {
        let buffer = BufferResolver::from_config(&config);
        Self {
            config,
            buffer,
            cell_size: None,
            progress: ProgressReporter::disabled(),
            cancel: CancellationToken::new(),
        }
    }

    /// Replaces the buffer policy chosen from the config.
    pub fn with_buffer_strategy(mut self, strategy: Box<dyn BufferStrategy>) -> Self {
        self.buffer = BufferResolver::new(strategy);
        self
    }

    /// Cell size in meters, overriding the one derived from the geotransform.
    pub fn with_cell_size(mut self, meters: f64) -> Self {
        self.cell_size = Some(meters);
        self
    }

    pub fn with_progress(mut self, sender: Sender<ProgressUpdate>) -> Self {
        self.progress = ProgressReporter::new(sender);
        self
    }

    pub fn with_reporter(mut self, reporter: ProgressReporter) -> Self {
        self.progress = reporter;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn run(
        &self,
        dtm: &ElevationGrid,
        dsm: &ElevationGrid,
    ) -> Result<AnalysisOutcome, ShadowError> {
        self.config.validate()?;
        ensure_coregistered(dtm, dsm)?;

        let aoi = self.config.to_polygon()?;
        let (center_lon, center_lat) = aoi.centroid();
        let sun = SunCalculator::new(center_lat, center_lon);
        info!(
            "AOI centroid at ({:.5}, {:.5}), {:.1} h of daylight on {}",
            center_lon,
            center_lat,
            sun.day_length_hours(&self.config.start_date),
            self.config.start_date.date_naive()
        );

        self.progress.emit(0.0, "Generating timestamps...", None, None);
        let timestamps = TimestampGenerator::new(
            &sun,
            self.config.start_date,
            self.config.end_date,
            self.config.hour_interval,
        )?
        .generate();
        if timestamps.is_empty() {
            warn!(
                "No daylight timestamps between {} and {}",
                self.config.start_date, self.config.end_date
            );
        } else {
            info!("Generated {} daylight timestamps", timestamps.len());
        }

        self.progress.emit(0.0, "Resolving analysis buffer...", None, None);
        let context = BufferContext::from_terrain(dtm, dsm, &aoi, &sun, &timestamps);
        let buffer_meters = self.buffer.resolve(&context);

        let window = aoi.grid_window(dsm.transform(), dsm.dim(), buffer_meters)?;
        let dtm_clipped = dtm.subset(&window)?;
        let dsm_clipped = dsm.subset(&window)?;
        info!(
            "Clipped to rows {}..{}, cols {}..{} ({}x{} cells)",
            window.row_start,
            window.row_end,
            window.col_start,
            window.col_end,
            window.rows(),
            window.cols()
        );
        let missing = dsm_clipped.no_data_cells();
        if missing > 0 {
            warn!("{} DSM cells have no data and will use the DTM as ray origin", missing);
        }

        let bounds = dsm_clipped.bounds();
        let transform = *dsm_clipped.transform();
        let sampler = match self.cell_size {
            Some(meters) => TerrainSampler::with_cell_size(dtm_clipped, dsm_clipped, meters)?,
            None => TerrainSampler::new(dtm_clipped, dsm_clipped)?,
        };
        info!("Cell size {:.3} m", sampler.cell_size());

        let engine = ShadowEngine::new(sampler, sun, &self.config, buffer_meters)?
            .with_reporter(self.progress.clone());
        let cube = match engine.calculate_shadows(&timestamps, &self.cancel) {
            RunOutcome::Completed(cube) => cube,
            RunOutcome::Cancelled {
                completed_steps,
                total_steps,
            } => {
                return Ok(AnalysisOutcome::Cancelled {
                    completed_steps,
                    total_steps,
                })
            }
        };

        let summary_stats = SummaryAggregator::new(self.config.hour_interval, sun).aggregate(&cube);
        let metadata = AnalysisMetadata {
            bounds,
            transform: transform.to_gdal(),
            dimensions: window.dim(),
            timestamp_count: cube.timestamps.len(),
            timestamps: cube.timestamps.clone(),
            hour_interval: self.config.hour_interval,
            buffer_meters,
            shadow_quality: self.config.shadow_quality,
        };

        Ok(AnalysisOutcome::Completed(Box::new(ShadowResult {
            shadow_fraction: cube.shadow_fraction,
            timestamps: cube.timestamps,
            summary_stats,
            metadata,
            aoi,
        })))
    }
}

impl ShadowResult {
    /// Monthly and seasonal statistics of this result.
    pub fn seasonal_analysis(&self) -> SeasonalAnalysis {
        let (lon, lat) = self.aoi.centroid();
        SummaryAggregator::new(self.metadata.hour_interval, SunCalculator::new(lat, lon))
            .seasonal_analysis(&self.shadow_fraction, &self.timestamps)
    }
}
