//! Reduction of a shadow cube into per-cell statistic layers.
//!
//! Every layer is computed per cell from that cell's time series alone, so
//! the reductions run in parallel over cells.

use crate::sun_position::SunCalculator;
use crate::timestamps::TimeBucket;
use crate::types::ShadowCube;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use ndarray::{Array2, Array3, ArrayView1, Axis, Zip};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Fractions above this count as shadowed when measuring runs.
const RUN_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryLayers {
    pub total_shadow_hours: Array2<f32>,
    /// Mean shadow fraction as a percentage, 0-100.
    pub avg_shadow_percentage: Array2<f32>,
    pub max_consecutive_shadow: Array2<f32>,
    pub morning_shadow_hours: Array2<f32>,
    pub noon_shadow_hours: Array2<f32>,
    pub afternoon_shadow_hours: Array2<f32>,
    /// 100 minus the average shadow percentage.
    pub solar_efficiency_percentage: Array2<f32>,
    /// Daylight hours per analysed day; the same for every cell.
    pub daily_solar_hours: Array2<f32>,
    /// Daylight hours over the whole run; the same for every cell.
    pub total_available_solar_hours: Array2<f32>,
}

impl SummaryLayers {
    /// Layers in export band order.
    pub fn bands(&self) -> [&Array2<f32>; 8] {
        [
            &self.total_shadow_hours,
            &self.avg_shadow_percentage,
            &self.max_consecutive_shadow,
            &self.morning_shadow_hours,
            &self.noon_shadow_hours,
            &self.afternoon_shadow_hours,
            &self.daily_solar_hours,
            &self.total_available_solar_hours,
        ]
    }
}

/// Shadow statistics for a subset of the time axis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodLayers {
    pub total_shadow_hours: Array2<f32>,
    pub avg_shadow_percentage: Array2<f32>,
    pub max_consecutive_shadow: Array2<f32>,
    pub solar_efficiency_percentage: Array2<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlySummary {
    pub year: i32,
    pub month: u32,
    pub layers: PeriodLayers,
    pub days_in_analysis: usize,
}

/// Meteorological seasons (northern hemisphere naming).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Season {
    Spring,
    Summer,
    Fall,
    Winter,
}

impl Season {
    pub fn from_month(month: u32) -> Self {
        match month {
            3..=5 => Season::Spring,
            6..=8 => Season::Summer,
            9..=11 => Season::Fall,
            _ => Season::Winter,
        }
    }

    pub fn months(self) -> [u32; 3] {
        match self {
            Season::Spring => [3, 4, 5],
            Season::Summer => [6, 7, 8],
            Season::Fall => [9, 10, 11],
            Season::Winter => [12, 1, 2],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonSummary {
    pub season: Season,
    pub months: Vec<u32>,
    pub layers: PeriodLayers,
    pub total_days: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonalAnalysis {
    pub monthly: Vec<MonthlySummary>,
    pub seasonal: Vec<SeasonSummary>,
    pub analysis_period: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

#[derive(Debug, Clone, Copy, Default)]
struct CellStats {
    total: f64,
    mean_fraction: f64,
    max_run: f64,
    morning: f64,
    noon: f64,
    afternoon: f64,
}

pub struct SummaryAggregator {
    hour_interval: f64,
    sun: SunCalculator,
}

impl SummaryAggregator {
    pub fn new(hour_interval: f64, sun: SunCalculator) -> Self {
        Self { hour_interval, sun }
    }

    pub fn aggregate(&self, cube: &ShadowCube) -> SummaryLayers {
        let dim = cube.spatial_dim();
        let n_times = cube.timestamps.len();
        let buckets: Vec<TimeBucket> = cube
            .timestamps
            .iter()
            .map(|t| TimeBucket::classify(&self.sun, t))
            .collect();

        let stats = Zip::from(cube.shadow_fraction.lanes(Axis(0)))
            .par_map_collect(|series| self.cell_stats(series, &buckets));

        let total_available = n_times as f64 * self.hour_interval;
        let days = distinct_days(&cube.timestamps);
        let daily = if days > 0 {
            total_available / days as f64
        } else {
            0.0
        };
        tracing::debug!(
            "{} timestamps over {} days: {:.2} h available, {:.2} h per day",
            n_times,
            days,
            total_available,
            daily
        );

        let layer = |f: fn(&CellStats) -> f64| stats.map(|s| f(s) as f32);
        let avg_shadow_percentage = layer(|s| s.mean_fraction * 100.0);
        let solar_efficiency_percentage = avg_shadow_percentage.mapv(|avg| 100.0 - avg);

        SummaryLayers {
            total_shadow_hours: layer(|s| s.total),
            avg_shadow_percentage,
            max_consecutive_shadow: layer(|s| s.max_run),
            morning_shadow_hours: layer(|s| s.morning),
            noon_shadow_hours: layer(|s| s.noon),
            afternoon_shadow_hours: layer(|s| s.afternoon),
            solar_efficiency_percentage,
            daily_solar_hours: Array2::from_elem(dim, daily as f32),
            total_available_solar_hours: Array2::from_elem(dim, total_available as f32),
        }
    }

    /// Per-month layers followed by per-season roll-ups.
    pub fn seasonal_analysis(
        &self,
        shadow_fraction: &Array3<f32>,
        timestamps: &[DateTime<Utc>],
    ) -> SeasonalAnalysis {
        let mut months: BTreeMap<(i32, u32), Vec<usize>> = BTreeMap::new();
        for (idx, t) in timestamps.iter().enumerate() {
            months.entry((t.year(), t.month())).or_default().push(idx);
        }

        let monthly: Vec<MonthlySummary> = months
            .into_iter()
            .map(|((year, month), indices)| {
                let days: Vec<_> = indices.iter().map(|&i| timestamps[i]).collect();
                MonthlySummary {
                    year,
                    month,
                    layers: self.period_layers(shadow_fraction, &indices),
                    days_in_analysis: distinct_days(&days),
                }
            })
            .collect();

        let seasons: BTreeSet<Season> =
            monthly.iter().map(|m| Season::from_month(m.month)).collect();
        let seasonal = seasons
            .into_iter()
            .filter_map(|season| combine_months(season, &monthly))
            .collect();

        SeasonalAnalysis {
            monthly,
            seasonal,
            analysis_period: timestamps.first().zip(timestamps.last()).map(|(a, b)| (*a, *b)),
        }
    }

    fn period_layers(&self, shadow_fraction: &Array3<f32>, indices: &[usize]) -> PeriodLayers {
        let period = shadow_fraction.select(Axis(0), indices);
        let stats = Zip::from(period.lanes(Axis(0))).par_map_collect(|series| {
            let sum: f64 = series.iter().map(|&v| v as f64).sum();
            let mean = if series.is_empty() {
                0.0
            } else {
                sum / series.len() as f64
            };
            (sum * self.hour_interval, mean, self.longest_run(series))
        });

        let avg_shadow_percentage = stats.map(|s| (s.1 * 100.0) as f32);
        PeriodLayers {
            total_shadow_hours: stats.map(|s| s.0 as f32),
            solar_efficiency_percentage: avg_shadow_percentage.mapv(|avg| 100.0 - avg),
            avg_shadow_percentage,
            max_consecutive_shadow: stats.map(|s| s.2 as f32),
        }
    }

    fn cell_stats(&self, series: ArrayView1<'_, f32>, buckets: &[TimeBucket]) -> CellStats {
        let mut stats = CellStats::default();
        if series.is_empty() {
            return stats;
        }

        let mut fraction_sum = 0.0;
        for (&fraction, bucket) in series.iter().zip(buckets) {
            let fraction = fraction as f64;
            let hours = fraction * self.hour_interval;
            fraction_sum += fraction;
            stats.total += hours;
            match bucket {
                TimeBucket::Morning => stats.morning += hours,
                TimeBucket::Noon => stats.noon += hours,
                TimeBucket::Afternoon => stats.afternoon += hours,
            }
        }
        stats.mean_fraction = fraction_sum / series.len() as f64;
        stats.max_run = self.longest_run(series);
        stats
    }

    /// Longest run of shadowed samples, in hours.
    fn longest_run(&self, series: ArrayView1<'_, f32>) -> f64 {
        let mut current = 0usize;
        let mut longest = 0usize;
        for &fraction in series.iter() {
            if fraction > RUN_THRESHOLD {
                current += 1;
                longest = longest.max(current);
            } else {
                current = 0;
            }
        }
        longest as f64 * self.hour_interval
    }
}

/// Sums hours, averages percentages and takes the longest run over the
/// months of `season`.
fn combine_months(season: Season, monthly: &[MonthlySummary]) -> Option<SeasonSummary> {
    let members: Vec<&MonthlySummary> = monthly
        .iter()
        .filter(|m| Season::from_month(m.month) == season)
        .collect();
    let first = members.first()?;
    let dim = first.layers.total_shadow_hours.dim();

    let mut total = Array2::<f32>::zeros(dim);
    let mut avg = Array2::<f32>::zeros(dim);
    let mut longest = Array2::<f32>::zeros(dim);
    for member in &members {
        total += &member.layers.total_shadow_hours;
        avg += &member.layers.avg_shadow_percentage;
        Zip::from(&mut longest)
            .and(&member.layers.max_consecutive_shadow)
            .for_each(|l, &m| *l = l.max(m));
    }
    avg /= members.len() as f32;

    Some(SeasonSummary {
        season,
        months: season.months().to_vec(),
        layers: PeriodLayers {
            total_shadow_hours: total,
            solar_efficiency_percentage: avg.mapv(|a| 100.0 - a),
            avg_shadow_percentage: avg,
            max_consecutive_shadow: longest,
        },
        total_days: members.iter().map(|m| m.days_in_analysis).sum(),
    })
}

fn distinct_days(timestamps: &[DateTime<Utc>]) -> usize {
    timestamps
        .iter()
        .map(|t| t.date_naive())
        .collect::<BTreeSet<NaiveDate>>()
        .len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn cube_from(series: &[f32], timestamps: Vec<DateTime<Utc>>) -> ShadowCube {
        let shadow_fraction = Array3::from_shape_fn((series.len(), 1, 2), |(t, _, col)| {
            if col == 0 {
                series[t]
            } else {
                0.0
            }
        });
        ShadowCube {
            shadow_fraction,
            timestamps,
        }
    }

    fn june_hours(hours: &[u32]) -> Vec<DateTime<Utc>> {
        hours
            .iter()
            .map(|&h| Utc.with_ymd_and_hms(2024, 6, 21, h, 0, 0).unwrap())
            .collect()
    }

    #[test]
    fn test_layers_for_one_cell() {
        let series = [1.0, 1.0, 0.25, 0.0, 1.0, 1.0, 1.0];
        let cube = cube_from(&series, june_hours(&[7, 8, 9, 11, 13, 15, 16]));
        let aggregator = SummaryAggregator::new(1.0, SunCalculator::new(45.0, 0.0));
        let layers = aggregator.aggregate(&cube);

        assert_relative_eq!(layers.total_shadow_hours[[0, 0]], 5.25);
        assert_relative_eq!(layers.avg_shadow_percentage[[0, 0]], 75.0, epsilon = 1e-4);
        assert_relative_eq!(layers.solar_efficiency_percentage[[0, 0]], 25.0, epsilon = 1e-4);
        assert_relative_eq!(layers.max_consecutive_shadow[[0, 0]], 3.0);
        // Solar time at lon 0 is within two minutes of UTC.
        assert_relative_eq!(layers.morning_shadow_hours[[0, 0]], 2.25);
        assert_relative_eq!(layers.noon_shadow_hours[[0, 0]], 1.0);
        assert_relative_eq!(layers.afternoon_shadow_hours[[0, 0]], 2.0);

        assert_relative_eq!(layers.total_shadow_hours[[0, 1]], 0.0);
        assert_relative_eq!(layers.solar_efficiency_percentage[[0, 1]], 100.0);
        assert_relative_eq!(layers.total_available_solar_hours[[0, 1]], 7.0);
        assert_relative_eq!(layers.daily_solar_hours[[0, 0]], 7.0);
    }

    #[test]
    fn test_interval_scales_hours() {
        let cube = cube_from(&[1.0, 1.0], june_hours(&[9, 10]));
        let layers = SummaryAggregator::new(0.5, SunCalculator::new(45.0, 0.0)).aggregate(&cube);
        assert_relative_eq!(layers.total_shadow_hours[[0, 0]], 1.0);
        assert_relative_eq!(layers.max_consecutive_shadow[[0, 0]], 1.0);
        assert_relative_eq!(layers.total_available_solar_hours[[0, 0]], 1.0);
    }

    #[test]
    fn test_daily_hours_average_over_days() {
        let timestamps = vec![
            Utc.with_ymd_and_hms(2024, 6, 21, 9, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 6, 21, 10, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 6, 22, 9, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 6, 22, 10, 0, 0).unwrap(),
        ];
        let cube = cube_from(&[0.0; 4], timestamps);
        let layers = SummaryAggregator::new(1.0, SunCalculator::new(45.0, 0.0)).aggregate(&cube);
        assert_relative_eq!(layers.daily_solar_hours[[0, 0]], 2.0);
        assert_relative_eq!(layers.total_available_solar_hours[[0, 0]], 4.0);
    }

    #[test]
    fn test_empty_cube() {
        let cube = ShadowCube {
            shadow_fraction: Array3::zeros((0, 2, 3)),
            timestamps: Vec::new(),
        };
        let layers = SummaryAggregator::new(1.0, SunCalculator::new(80.0, 0.0)).aggregate(&cube);
        assert_eq!(layers.total_shadow_hours.dim(), (2, 3));
        assert!(layers.avg_shadow_percentage.iter().all(|&v| v == 0.0));
        assert!(layers.daily_solar_hours.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_monthly_totals_sum_to_annual() {
        let timestamps: Vec<_> = [(5, 31), (6, 1), (6, 15), (7, 1), (12, 24)]
            .iter()
            .map(|&(m, d)| Utc.with_ymd_and_hms(2024, m, d, 12, 0, 0).unwrap())
            .collect();
        let series = [0.5, 1.0, 0.25, 0.0, 1.0];
        let cube = cube_from(&series, timestamps);
        let aggregator = SummaryAggregator::new(2.0, SunCalculator::new(45.0, 0.0));

        let annual = aggregator.aggregate(&cube);
        let analysis = aggregator.seasonal_analysis(&cube.shadow_fraction, &cube.timestamps);
        assert_eq!(analysis.monthly.len(), 4);
        let monthly_sum: f32 = analysis
            .monthly
            .iter()
            .map(|m| m.layers.total_shadow_hours[[0, 0]])
            .sum();
        assert_relative_eq!(monthly_sum, annual.total_shadow_hours[[0, 0]], epsilon = 1e-5);

        let june = &analysis.monthly[1];
        assert_eq!((june.year, june.month, june.days_in_analysis), (2024, 6, 2));
        assert_relative_eq!(june.layers.avg_shadow_percentage[[0, 0]], 62.5);
    }

    #[test]
    fn test_seasons_roll_up_months() {
        let timestamps: Vec<_> = [(6, 1), (7, 1), (8, 1), (12, 1)]
            .iter()
            .map(|&(m, d)| Utc.with_ymd_and_hms(2024, m, d, 12, 0, 0).unwrap())
            .collect();
        let cube = cube_from(&[1.0, 0.0, 0.5, 1.0], timestamps);
        let analysis = SummaryAggregator::new(1.0, SunCalculator::new(45.0, 0.0))
            .seasonal_analysis(&cube.shadow_fraction, &cube.timestamps);

        assert_eq!(analysis.seasonal.len(), 2);
        let summer = &analysis.seasonal[0];
        assert_eq!(summer.season, Season::Summer);
        assert_eq!(summer.months, vec![6, 7, 8]);
        assert_eq!(summer.total_days, 3);
        assert_relative_eq!(summer.layers.total_shadow_hours[[0, 0]], 1.5);
        assert_relative_eq!(summer.layers.avg_shadow_percentage[[0, 0]], 50.0);
        assert_relative_eq!(summer.layers.max_consecutive_shadow[[0, 0]], 1.0);
        assert_eq!(analysis.seasonal[1].season, Season::Winter);
        assert_eq!(Season::from_month(1), Season::Winter);
    }
}
