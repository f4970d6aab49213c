//! Terrain and object shadow simulation over co-registered DTM/DSM grids.
//!
//! [`analysis::ShadowAnalysis`] runs the whole pipeline; the modules below
//! expose each stage on its own.

pub mod analysis;
pub mod aoi;
pub mod buffer;
pub mod export;
pub mod grid;
pub mod progress;
#[cfg(feature = "gdal")]
pub mod raster_io;
pub mod ray_march;
pub mod refine;
pub mod shadow_engine;
pub mod summary;
pub mod sun_position;
pub mod terrain;
pub mod timestamps;
pub mod types;

pub use analysis::{AnalysisOutcome, ShadowAnalysis};
pub use grid::{ElevationGrid, GeoTransform};
pub use shadow_engine::ShadowEngine;
pub use sun_position::SunCalculator;
pub use types::{CancellationToken, Config, ShadowError, ShadowQuality, ShadowResult};
