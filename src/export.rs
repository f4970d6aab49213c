//! Layouts handed to the raster and table writers.

use crate::types::{ShadowError, ShadowResult};
use chrono::{DateTime, Utc};
use ndarray::{s, Array2, Array3};
use std::io::Write;

/// Summary bands, in the order they lead every exported stack.
pub const SUMMARY_BAND_NAMES: [&str; 8] = [
    "Total Shadow Hours",
    "Average Shadow Percentage",
    "Max Consecutive Shadow Hours",
    "Morning Shadow Hours",
    "Noon Shadow Hours",
    "Afternoon Shadow Hours",
    "Daily Solar Hours",
    "Total Available Solar Hours",
];

pub fn timestamp_band_name(timestamp: &DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d_%H:%M_UTC").to_string()
}

/// Summary bands followed by one band per timestamp, plus band descriptions.
pub fn stack_bands(result: &ShadowResult) -> (Array3<f32>, Vec<String>) {
    let (n_times, n_rows, n_cols) = result.shadow_fraction.dim();
    let summary = result.summary_stats.bands();
    let mut stack = Array3::<f32>::zeros((summary.len() + n_times, n_rows, n_cols));

    for (idx, layer) in summary.iter().enumerate() {
        stack.slice_mut(s![idx, .., ..]).assign(*layer);
    }
    stack
        .slice_mut(s![summary.len().., .., ..])
        .assign(&result.shadow_fraction);

    let descriptions = SUMMARY_BAND_NAMES
        .iter()
        .map(|name| name.to_string())
        .chain(result.timestamps.iter().map(timestamp_band_name))
        .collect();

    (stack, descriptions)
}

/// Cells whose centre lies inside the AOI.
pub fn aoi_mask(result: &ShadowResult) -> Array2<bool> {
    let (_, n_rows, n_cols) = result.shadow_fraction.dim();
    result
        .aoi
        .cell_mask(&result.metadata.geo_transform(), (n_rows, n_cols))
}

/// Long-format table: one line per (cell, timestamp). `cell_id` is
/// `row * n_cols + col`, so ids stay stable when a mask skips cells.
/// Returns the number of data lines written.
pub fn write_csv<W: Write>(
    writer: &mut W,
    result: &ShadowResult,
    mask: Option<&Array2<bool>>,
) -> Result<usize, ShadowError> {
    writeln!(writer, "cell_id,lat,lon,datetime,shadow_fraction")?;

    let (n_times, n_rows, n_cols) = result.shadow_fraction.dim();
    let transform = result.metadata.geo_transform();
    let datetimes: Vec<String> = result.timestamps.iter().map(|t| t.to_rfc3339()).collect();
    let mut lines = 0;

    for row in 0..n_rows {
        for col in 0..n_cols {
            if let Some(mask) = mask {
                if !mask.get((row, col)).copied().unwrap_or(false) {
                    continue;
                }
            }
            let cell_id = row * n_cols + col;
            let (lon, lat) = transform.cell_center(row, col);

            for t_idx in 0..n_times {
                writeln!(
                    writer,
                    "{},{:.6},{:.6},{},{}",
                    cell_id,
                    lat,
                    lon,
                    datetimes[t_idx],
                    result.shadow_fraction[[t_idx, row, col]]
                )?;
                lines += 1;
            }
        }
    }

    Ok(lines)
}

/// Metadata record as pretty-printed JSON.
pub fn metadata_json(result: &ShadowResult) -> Result<String, ShadowError> {
    Ok(serde_json::to_string_pretty(&result.metadata)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aoi::AreaOfInterest;
    use crate::grid::{GeoTransform, GridBounds};
    use crate::summary::SummaryLayers;
    use crate::types::{AnalysisMetadata, ShadowQuality};
    use chrono::TimeZone;

    fn result() -> ShadowResult {
        let transform = GeoTransform::new(0.0, 2.0, 1.0, -1.0);
        let layer = |v: f32| Array2::from_elem((2, 2), v);
        let timestamps = vec![
            Utc.with_ymd_and_hms(2024, 6, 21, 9, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 6, 21, 10, 30, 0).unwrap(),
        ];
        let shadow_fraction =
            Array3::from_shape_fn((2, 2, 2), |(t, r, c)| (t * 4 + r * 2 + c) as f32 / 8.0);

        ShadowResult {
            shadow_fraction,
            summary_stats: SummaryLayers {
                total_shadow_hours: layer(1.0),
                avg_shadow_percentage: layer(2.0),
                max_consecutive_shadow: layer(3.0),
                morning_shadow_hours: layer(4.0),
                noon_shadow_hours: layer(5.0),
                afternoon_shadow_hours: layer(6.0),
                solar_efficiency_percentage: layer(98.0),
                daily_solar_hours: layer(7.0),
                total_available_solar_hours: layer(8.0),
            },
            metadata: AnalysisMetadata {
                bounds: GridBounds {
                    min_lon: 0.0,
                    max_lon: 2.0,
                    min_lat: 0.0,
                    max_lat: 2.0,
                },
                transform: transform.to_gdal(),
                dimensions: (2, 2),
                timestamps: timestamps.clone(),
                timestamp_count: 2,
                hour_interval: 1.0,
                buffer_meters: 0.0,
                shadow_quality: ShadowQuality::Normal,
            },
            timestamps,
            aoi: AreaOfInterest::from_vertices(&[[0.0, 0.0], [2.2, 0.0], [0.0, 2.2]]).unwrap(),
        }
    }

    #[test]
    fn test_band_order_and_names() {
        let result = result();
        let (stack, names) = stack_bands(&result);
        assert_eq!(stack.dim(), (10, 2, 2));
        for band in 0..8 {
            assert_eq!(stack[[band, 1, 1]], (band + 1) as f32);
        }
        assert_eq!(stack[[8, 0, 1]], result.shadow_fraction[[0, 0, 1]]);
        assert_eq!(stack[[9, 1, 0]], result.shadow_fraction[[1, 1, 0]]);

        assert_eq!(names.len(), 10);
        assert_eq!(names[0], "Total Shadow Hours");
        assert_eq!(names[9], "2024-06-21_10:30_UTC");
    }

    #[test]
    fn test_csv_rows() {
        let result = result();
        let mut out = Vec::new();
        let lines = write_csv(&mut out, &result, None).unwrap();
        assert_eq!(lines, 8);

        let text = String::from_utf8(out).unwrap();
        let rows: Vec<&str> = text.lines().collect();
        assert_eq!(rows[0], "cell_id,lat,lon,datetime,shadow_fraction");
        assert_eq!(rows[1], "0,1.500000,0.500000,2024-06-21T09:00:00+00:00,0");
        assert_eq!(rows.len(), 9);
    }

    #[test]
    fn test_csv_with_aoi_mask() {
        let result = result();
        let mask = aoi_mask(&result);
        assert!(!mask[[0, 1]]);
        assert_eq!(mask.iter().filter(|&&inside| inside).count(), 3);

        let mut out = Vec::new();
        let lines = write_csv(&mut out, &result, Some(&mask)).unwrap();
        assert_eq!(lines, 6);
        let text = String::from_utf8(out).unwrap();
        assert!(!text.lines().any(|line| line.starts_with("1,")));
        assert!(text.lines().any(|line| line.starts_with("3,")));
    }

    #[test]
    fn test_metadata_json() {
        let json = metadata_json(&result()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["timestamp_count"], 2);
        assert_eq!(value["shadow_quality"], "Normal");
    }
}
