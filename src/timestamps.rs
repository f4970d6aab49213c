use crate::sun_position::SunCalculator;
use crate::types::ShadowError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// `hours` as a whole number of seconds, never zero. `None` when the value
/// is not positive or does not fit a `Duration`.
pub fn interval_from_hours(hours: f64) -> Option<Duration> {
    if !(hours.is_finite() && hours > 0.0) {
        return None;
    }
    let seconds = (hours * 3600.0).round() as i64;
    Duration::try_seconds(seconds.max(1))
}

/// Daylight instants between `start` (inclusive) and `end` (exclusive),
/// spaced `hour_interval` hours apart.
pub struct TimestampGenerator<'a> {
    sun: &'a SunCalculator,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    interval: Duration,
}

impl<'a> TimestampGenerator<'a> {
    pub fn new(
        sun: &'a SunCalculator,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        hour_interval: f64,
    ) -> Result<Self, ShadowError> {
        let interval = interval_from_hours(hour_interval).ok_or_else(|| {
            ShadowError::Config(format!("hour_interval {} is out of range", hour_interval))
        })?;
        Ok(Self {
            sun,
            start,
            end,
            interval,
        })
    }

    /// Every interval-spaced instant, before the daylight filter.
    pub fn candidates(&self) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        let mut next = Some(self.start);
        std::iter::from_fn(move || {
            let instant = next.filter(|t| *t < self.end)?;
            // Stepping past the representable range ends the series.
            next = instant.checked_add_signed(self.interval);
            Some(instant)
        })
    }

    /// Sorted, deduplicated instants whose solar elevation at the site is above zero.
    pub fn generate(&self) -> Vec<DateTime<Utc>> {
        let mut timestamps: Vec<DateTime<Utc>> = self
            .candidates()
            .filter(|instant| self.sun.position(instant).elevation > 0.0)
            .collect();
        timestamps.dedup();
        timestamps
    }
}

/// Part of the day by local solar time: morning before 10:00, noon from
/// 10:00 to 14:00 (solar noon +/- 2 h), afternoon after 14:00.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeBucket {
    Morning,
    Noon,
    Afternoon,
}

impl TimeBucket {
    pub fn from_solar_time(hours: f64) -> Self {
        if hours < 10.0 {
            TimeBucket::Morning
        } else if hours <= 14.0 {
            TimeBucket::Noon
        } else {
            TimeBucket::Afternoon
        }
    }

    pub fn classify(sun: &SunCalculator, instant: &DateTime<Utc>) -> Self {
        Self::from_solar_time(sun.local_solar_time(instant))
    }
}
