use crate::aoi::AreaOfInterest;
use crate::grid::ElevationGrid;
use crate::sun_position::SunCalculator;
use crate::types::Config;
use chrono::{DateTime, Utc};
use std::fmt::Debug;
use tracing::{debug, info, warn};

/// Search margin around the AOI when looking for the tallest obstruction.
const OBSTRUCTION_SEARCH_METERS: f64 = 500.0;
/// Used when neither raster has data near the AOI.
const FALLBACK_HEIGHT_DIFFERENCE: f64 = 100.0;
const MIN_HEIGHT_DIFFERENCE: f64 = 10.0;
/// Local solar hours considered when looking for the lowest useful sun.
const DAYTIME_WINDOW: (f64, f64) = (8.0, 16.0);

/// Terrain and sun facts a buffer strategy may draw on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferContext {
    /// Tallest surface near the AOI minus the lowest ground inside it, meters.
    pub max_obstruction_height: f64,
    /// Lowest daytime solar elevation over the run, degrees. `None` without timestamps.
    pub min_solar_elevation: Option<f64>,
}

impl BufferContext {
    pub fn from_terrain(
        dtm: &ElevationGrid,
        dsm: &ElevationGrid,
        aoi: &AreaOfInterest,
        sun: &SunCalculator,
        timestamps: &[DateTime<Utc>],
    ) -> Self {
        Self {
            max_obstruction_height: max_obstruction_height(dtm, dsm, aoi),
            min_solar_elevation: min_daytime_elevation(sun, timestamps),
        }
    }
}

fn max_obstruction_height(dtm: &ElevationGrid, dsm: &ElevationGrid, aoi: &AreaOfInterest) -> f64 {
    let surface_max = aoi
        .grid_window(dsm.transform(), dsm.dim(), OBSTRUCTION_SEARCH_METERS)
        .ok()
        .and_then(|window| dsm.subset(&window).ok())
        .and_then(|near| extreme(near.data().iter().copied(), f32::max));

    let ground_min = aoi
        .grid_window(dtm.transform(), dtm.dim(), 0.0)
        .ok()
        .and_then(|window| dtm.subset(&window).ok())
        .and_then(|inside| {
            let mask = aoi.cell_mask(inside.transform(), inside.dim());
            let masked = inside
                .data()
                .iter()
                .zip(mask.iter())
                .filter(|&(_, &keep)| keep)
                .map(|(h, _)| *h);
            extreme(masked, f32::min)
        });

    match (surface_max, ground_min) {
        (Some(max), Some(min)) => {
            let difference = (max - min) as f64;
            debug!("Max DSM near AOI {:.1} m, min DTM in AOI {:.1} m", max, min);
            difference.max(MIN_HEIGHT_DIFFERENCE)
        }
        _ => {
            warn!(
                "No elevation data near AOI; assuming {} m obstructions",
                FALLBACK_HEIGHT_DIFFERENCE
            );
            FALLBACK_HEIGHT_DIFFERENCE
        }
    }
}

/// Max or min of the finite values, depending on `pick`.
fn extreme<I: Iterator<Item = f32>>(values: I, pick: fn(f32, f32) -> f32) -> Option<f32> {
    values
        .filter(|h| h.is_finite())
        .fold(None, |acc, h| Some(acc.map_or(h, |m| pick(m, h))))
}

fn min_daytime_elevation(sun: &SunCalculator, timestamps: &[DateTime<Utc>]) -> Option<f64> {
    let elevation = |t: &DateTime<Utc>| sun.position(t).elevation;
    let (from, to) = DAYTIME_WINDOW;

    let daytime = timestamps
        .iter()
        .filter(|t| (from..=to).contains(&sun.local_solar_time(t)))
        .map(elevation)
        .reduce(f64::min);

    daytime.or_else(|| timestamps.iter().map(elevation).reduce(f64::min))
}

/// Policy turning terrain and sun facts into an analysis margin in meters.
pub trait BufferStrategy: Send + Sync + Debug {
    fn buffer_meters(&self, context: &BufferContext) -> f64;
}

/// A margin chosen by the user.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedBuffer(pub f64);

impl BufferStrategy for FixedBuffer {
    fn buffer_meters(&self, _context: &BufferContext) -> f64 {
        self.0.max(0.0)
    }
}

/// Longest shadow the tallest obstruction can cast at the lowest daytime sun.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowLengthBuffer {
    pub safety_factor: f64,
    pub min_meters: f64,
    pub max_meters: f64,
    /// Shadow length assumed when the sun is at or below `low_sun_threshold`.
    pub low_sun_length: f64,
    pub low_sun_threshold: f64,
}

impl Default for ShadowLengthBuffer {
    fn default() -> Self {
        Self {
            safety_factor: 1.2,
            min_meters: 50.0,
            max_meters: 5000.0,
            low_sun_length: 2000.0,
            low_sun_threshold: 0.1,
        }
    }
}

impl BufferStrategy for ShadowLengthBuffer {
    fn buffer_meters(&self, context: &BufferContext) -> f64 {
        let shadow_length = match context.min_solar_elevation {
            Some(elevation) if elevation > self.low_sun_threshold => {
                context.max_obstruction_height / elevation.to_radians().tan()
            }
            _ => self.low_sun_length,
        };
        (shadow_length * self.safety_factor).clamp(self.min_meters, self.max_meters)
    }
}

/// Resolves the margin added around the AOI before clipping.
#[derive(Debug)]
pub struct BufferResolver {
    strategy: Box<dyn BufferStrategy>,
}

impl BufferResolver {
    pub fn new(strategy: Box<dyn BufferStrategy>) -> Self {
        Self { strategy }
    }

    /// Fixed when the config names a buffer, shadow-length based otherwise.
    pub fn from_config(config: &Config) -> Self {
        match config.buffer_meters {
            Some(meters) => Self::new(Box::new(FixedBuffer(meters))),
            None => Self::new(Box::new(ShadowLengthBuffer::default())),
        }
    }

    pub fn resolve(&self, context: &BufferContext) -> f64 {
        let meters = self.strategy.buffer_meters(context);
        info!(
            "Buffer {:.1} m ({:?}; obstruction {:.1} m, min sun {:?})",
            meters, self.strategy, context.max_obstruction_height, context.min_solar_elevation
        );
        meters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GeoTransform;
    use approx::assert_relative_eq;
    use chrono::TimeZone;
    use ndarray::Array2;

    fn context(height: f64, elevation: Option<f64>) -> BufferContext {
        BufferContext {
            max_obstruction_height: height,
            min_solar_elevation: elevation,
        }
    }

    #[test]
    fn test_shadow_length_formula() {
        let strategy = ShadowLengthBuffer::default();
        // 50 m / tan(30) * 1.2
        let expected = 50.0 / 30f64.to_radians().tan() * 1.2;
        assert_relative_eq!(
            strategy.buffer_meters(&context(50.0, Some(30.0))),
            expected,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_shadow_length_clamps() {
        let strategy = ShadowLengthBuffer::default();
        assert_relative_eq!(strategy.buffer_meters(&context(10.0, Some(80.0))), 50.0);
        assert_relative_eq!(strategy.buffer_meters(&context(500.0, Some(2.0))), 5000.0);
        // Sun barely above the horizon: 2000 m * 1.2
        assert_relative_eq!(strategy.buffer_meters(&context(10.0, Some(0.05))), 2400.0);
        assert_relative_eq!(strategy.buffer_meters(&context(10.0, None)), 2400.0);
    }

    #[test]
    fn test_resolver_prefers_configured_buffer() {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap();
        let square = vec![[0.0, 0.0], [0.001, 0.0], [0.001, 0.001], [0.0, 0.001]];

        let mut config = Config::new(square.clone(), start, end);
        config.buffer_meters = Some(0.0);
        let resolver = BufferResolver::from_config(&config);
        assert_relative_eq!(resolver.resolve(&context(80.0, Some(5.0))), 0.0);

        let resolver = BufferResolver::from_config(&Config::new(square, start, end));
        assert!(resolver.resolve(&context(80.0, Some(5.0))) > 50.0);
    }

    #[test]
    fn test_context_from_terrain() {
        let transform = GeoTransform::from_cell_size_meters(0.0, 45.0, 1.0);
        let dtm = ElevationGrid::filled(40, 40, 100.0, transform);
        let mut surface = Array2::from_elem((40, 40), 100.0f32);
        surface[[5, 5]] = 130.0;
        let dsm = ElevationGrid::new(surface, transform, None);

        let (x0, y0) = transform.pixel_to_world(10.0, 10.0);
        let (x1, y1) = transform.pixel_to_world(30.0, 30.0);
        let aoi = AreaOfInterest::from_vertices(&[[x0, y0], [x1, y0], [x1, y1], [x0, y1]]).unwrap();

        let sun = SunCalculator::new(45.0, 0.0);
        let timestamps: Vec<_> = (6..=18)
            .map(|h| Utc.with_ymd_and_hms(2024, 6, 21, h, 0, 0).unwrap())
            .collect();
        let ctx = BufferContext::from_terrain(&dtm, &dsm, &aoi, &sun, &timestamps);

        assert_relative_eq!(ctx.max_obstruction_height, 30.0, epsilon = 1e-6);
        // Lowest sun between 08:00 and 16:00 solar time, not at 06:00.
        let at_eight = sun.position(&timestamps[2]).elevation;
        let min = ctx.min_solar_elevation.unwrap();
        assert!(min >= at_eight - 1.0);
        assert!(min > sun.position(&timestamps[0]).elevation);
    }

    #[test]
    fn test_context_on_flat_ground_uses_floor() {
        let transform = GeoTransform::from_cell_size_meters(0.0, 45.0, 1.0);
        let dtm = ElevationGrid::filled(10, 10, 5.0, transform);
        let dsm = dtm.clone();
        let (x1, y1) = transform.pixel_to_world(10.0, 10.0);
        let aoi =
            AreaOfInterest::from_vertices(&[[0.0, 45.0], [x1, 45.0], [x1, y1], [0.0, y1]]).unwrap();
        let sun = SunCalculator::new(45.0, 0.0);
        let ctx = BufferContext::from_terrain(&dtm, &dsm, &aoi, &sun, &[]);
        assert_relative_eq!(ctx.max_obstruction_height, MIN_HEIGHT_DIFFERENCE);
        assert_eq!(ctx.min_solar_elevation, None);
    }
}
