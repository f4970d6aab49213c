use crate::aoi::AreaOfInterest;
use crate::grid::{GeoTransform, GridBounds};
use crate::summary::SummaryLayers;
use crate::timestamps::interval_from_hours;
use chrono::{DateTime, Utc};
use ndarray::{s, Array3, ArrayView2};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn default_hour_interval() -> f64 {
    1.0
}

fn default_angle_precision() -> f64 {
    0.1
}

fn default_edge_min_disagreements() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub aoi: Vec<[f64; 2]>, // [lon, lat] vertices
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default = "default_hour_interval")]
    pub hour_interval: f64,
    #[serde(default = "default_angle_precision")]
    pub angle_precision: f64,
    #[serde(default)]
    pub shadow_quality: ShadowQuality,
    /// Analysis margin around the AOI; derived from terrain and sun when absent.
    #[serde(default)]
    pub buffer_meters: Option<f64>,
    #[serde(default)]
    pub cpu_cores: Option<usize>,
    /// 4-connected neighbours that must disagree before a cell is refined.
    #[serde(default = "default_edge_min_disagreements")]
    pub edge_min_disagreements: usize,
}

impl Config {
    pub fn new(aoi: Vec<[f64; 2]>, start_date: DateTime<Utc>, end_date: DateTime<Utc>) -> Self {
        Self {
            aoi,
            start_date,
            end_date,
            hour_interval: default_hour_interval(),
            angle_precision: default_angle_precision(),
            shadow_quality: ShadowQuality::default(),
            buffer_meters: None,
            cpu_cores: None,
            edge_min_disagreements: default_edge_min_disagreements(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ShadowError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ShadowError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_polygon(&self) -> Result<AreaOfInterest, ShadowError> {
        AreaOfInterest::from_vertices(&self.aoi)
    }

    pub fn get_cpu_cores(&self) -> usize {
        self.cpu_cores.unwrap_or_else(num_cpus::get).max(1)
    }

    /// Checks every option before any work is scheduled.
    pub fn validate(&self) -> Result<(), ShadowError> {
        self.to_polygon()?;

        if self.end_date <= self.start_date {
            return Err(ShadowError::EmptyTimeRange {
                start: self.start_date,
                end: self.end_date,
            });
        }
        if interval_from_hours(self.hour_interval).is_none() {
            return Err(ShadowError::Config(format!(
                "hour_interval must be a positive number of hours, got {}",
                self.hour_interval
            )));
        }
        if !(self.angle_precision.is_finite() && self.angle_precision > 0.0) {
            return Err(ShadowError::Config(format!(
                "angle_precision must be positive, got {}",
                self.angle_precision
            )));
        }
        if let Some(buffer) = self.buffer_meters {
            if !(buffer.is_finite() && buffer >= 0.0) {
                return Err(ShadowError::Config(format!(
                    "buffer_meters must be non-negative, got {}",
                    buffer
                )));
            }
        }
        if self.cpu_cores == Some(0) {
            return Err(ShadowError::Config("cpu_cores must be at least 1".to_string()));
        }
        if !(1..=4).contains(&self.edge_min_disagreements) {
            return Err(ShadowError::Config(format!(
                "edge_min_disagreements must be within 1..=4, got {}",
                self.edge_min_disagreements
            )));
        }
        Ok(())
    }
}

/// Sub-pixel refinement tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ShadowQuality {
    Fast,
    #[default]
    Normal,
    High,
    Scientific,
}

impl ShadowQuality {
    /// Side length of the sub-point grid sampled inside an edge cell.
    pub fn sub_samples(self) -> usize {
        match self {
            ShadowQuality::Fast => 1,
            ShadowQuality::Normal => 2,
            ShadowQuality::High => 4,
            ShadowQuality::Scientific => 8,
        }
    }
}

/// Solar angles in degrees: azimuth clockwise from north, elevation above the horizon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SunPosition {
    pub azimuth: f64,
    pub elevation: f64,
}

impl SunPosition {
    pub fn new(azimuth: f64, elevation: f64) -> Self {
        Self { azimuth, elevation }
    }

    /// Both angles rounded to a multiple of `precision` degrees. A sun above
    /// the horizon stays at least `precision` above it.
    pub fn rounded(&self, precision: f64) -> Self {
        let mut elevation = round_to(self.elevation, precision);
        if self.elevation > 0.0 && elevation <= 0.0 {
            elevation = precision;
        }
        Self {
            azimuth: round_to(self.azimuth, precision).rem_euclid(360.0),
            elevation,
        }
    }

    /// Memo key in units of `precision`.
    pub fn key(&self, precision: f64) -> (i64, i64) {
        (
            (self.azimuth / precision).round() as i64,
            (self.elevation / precision).round() as i64,
        )
    }
}

fn round_to(value: f64, precision: f64) -> f64 {
    (value / precision).round() * precision
}

/// Dense `[time, row, col]` shadow fractions plus the instants of the time axis.
#[derive(Debug, Clone)]
pub struct ShadowCube {
    pub shadow_fraction: Array3<f32>,
    pub timestamps: Vec<DateTime<Utc>>,
}

impl ShadowCube {
    pub fn slice_at(&self, time_index: usize) -> Option<ArrayView2<'_, f32>> {
        (time_index < self.timestamps.len())
            .then(|| self.shadow_fraction.slice(s![time_index, .., ..]))
    }

    /// (rows, cols) of the spatial axes.
    pub fn spatial_dim(&self) -> (usize, usize) {
        let (_, n_rows, n_cols) = self.shadow_fraction.dim();
        (n_rows, n_cols)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub bounds: GridBounds,
    pub transform: [f64; 6],
    pub dimensions: (usize, usize), // (rows, cols)
    pub timestamps: Vec<DateTime<Utc>>,
    pub timestamp_count: usize,
    pub hour_interval: f64,
    pub buffer_meters: f64,
    pub shadow_quality: ShadowQuality,
}

impl AnalysisMetadata {
    pub fn geo_transform(&self) -> GeoTransform {
        GeoTransform::from_gdal(self.transform)
    }
}

#[derive(Debug, Clone)]
pub struct ShadowResult {
    pub shadow_fraction: Array3<f32>,
    pub timestamps: Vec<DateTime<Utc>>,
    pub summary_stats: SummaryLayers,
    pub metadata: AnalysisMetadata,
    pub aoi: AreaOfInterest,
}

impl ShadowResult {
    pub fn shadow_at_time(&self, time_index: usize) -> Option<ArrayView2<'_, f32>> {
        (time_index < self.timestamps.len())
            .then(|| self.shadow_fraction.slice(s![time_index, .., ..]))
    }
}

/// Terminal state of a scheduled run.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(ShadowCube),
    Cancelled {
        completed_steps: usize,
        total_steps: usize,
    },
}

/// Shared flag checked between time slices.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ShadowError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("DTM and DSM are not co-registered: {0}")]
    GridMismatch(String),
    #[error("Invalid AOI: {0}")]
    InvalidAoi(String),
    #[error("AOI is outside raster bounds: {0}")]
    AoiOutsideRaster(String),
    #[error("Empty time range: {start} to {end}")]
    EmptyTimeRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
