use crate::types::SunPosition;
use chrono::{DateTime, Datelike, Timelike, Utc};

/// Apparent horizon including refraction and the solar disc, degrees.
const HORIZON_ELEVATION: f64 = -0.833;

/// Solar geometry for one site. Stateless: callers round or memoize results.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SunCalculator {
    latitude: f64,
    longitude: f64,
}

impl SunCalculator {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn position(&self, datetime: &DateTime<Utc>) -> SunPosition {
        let julian_day = julian_day(datetime);
        let declination = solar_declination(julian_day);
        let hour_angle = self.hour_angle(datetime, julian_day);

        let lat_rad = self.latitude.to_radians();
        let dec_rad = declination.to_radians();
        let hour_rad = hour_angle.to_radians();

        let sin_elevation =
            lat_rad.sin() * dec_rad.sin() + lat_rad.cos() * dec_rad.cos() * hour_rad.cos();
        let elevation = sin_elevation.clamp(-1.0, 1.0).asin();

        let cos_elevation = elevation.cos();
        let azimuth = if cos_elevation < 1e-9 {
            // Sun at the zenith or nadir; any azimuth is valid.
            180.0
        } else {
            let cos_azimuth = (dec_rad.sin() * lat_rad.cos()
                - dec_rad.cos() * lat_rad.sin() * hour_rad.cos())
                / cos_elevation;
            let azimuth = cos_azimuth.clamp(-1.0, 1.0).acos().to_degrees();
            if hour_angle > 0.0 {
                360.0 - azimuth
            } else {
                azimuth
            }
        };

        SunPosition {
            azimuth,
            elevation: elevation.to_degrees(),
        }
    }

    /// Local apparent solar time in hours, wrapped into `[0, 24)`.
    pub fn local_solar_time(&self, datetime: &DateTime<Utc>) -> f64 {
        self.solar_time(datetime, julian_day(datetime))
            .rem_euclid(24.0)
    }

    /// Instant at which the hour angle is zero on the UTC date of `date`.
    pub fn solar_noon(&self, date: &DateTime<Utc>) -> DateTime<Utc> {
        let midnight = date
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|naive| naive.and_utc())
            .unwrap_or(*date);
        let base = midnight + chrono::Duration::hours(12);
        let equation_of_time = equation_of_time(julian_day(&base));
        let noon_hours = 12.0 - equation_of_time / 60.0 - self.longitude / 15.0;
        midnight + chrono::Duration::seconds((noon_hours * 3600.0).round() as i64)
    }

    /// Sunrise and sunset around the solar noon of `date`, using the
    /// apparent horizon. `None` during polar day or polar night.
    pub fn sunrise_sunset(&self, date: &DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let noon = self.solar_noon(date);
        let half_day = chrono::Duration::hours(12);
        if self.position(&noon).elevation <= HORIZON_ELEVATION {
            return None;
        }
        let sunrise = self.horizon_crossing(noon - half_day, noon)?;
        let sunset = self.horizon_crossing(noon + half_day, noon)?;
        Some((sunrise, sunset))
    }

    /// Hours between sunrise and sunset; 24 in polar day, 0 in polar night.
    pub fn day_length_hours(&self, date: &DateTime<Utc>) -> f64 {
        match self.sunrise_sunset(date) {
            Some((sunrise, sunset)) => (sunset - sunrise).num_seconds() as f64 / 3600.0,
            None if self.position(&self.solar_noon(date)).elevation > HORIZON_ELEVATION => 24.0,
            None => 0.0,
        }
    }

    /// Bisects between a `below` instant and an `above` instant down to one minute.
    fn horizon_crossing(
        &self,
        mut below: DateTime<Utc>,
        mut above: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if self.position(&below).elevation > HORIZON_ELEVATION {
            return None;
        }
        let tolerance = chrono::Duration::minutes(1);
        while (above - below).abs() > tolerance {
            let mid = below + (above - below) / 2;
            if self.position(&mid).elevation > HORIZON_ELEVATION {
                above = mid;
            } else {
                below = mid;
            }
        }
        Some(below + (above - below) / 2)
    }

    fn hour_angle(&self, datetime: &DateTime<Utc>, julian_day: f64) -> f64 {
        let solar_time = self.solar_time(datetime, julian_day);
        (15.0 * (solar_time - 12.0) + 180.0).rem_euclid(360.0) - 180.0
    }

    fn solar_time(&self, datetime: &DateTime<Utc>, julian_day: f64) -> f64 {
        utc_hours(datetime) + equation_of_time(julian_day) / 60.0 + self.longitude / 15.0
    }
}

fn utc_hours(datetime: &DateTime<Utc>) -> f64 {
    datetime.hour() as f64 + datetime.minute() as f64 / 60.0 + datetime.second() as f64 / 3600.0
}

/// Julian date including the fraction of the day.
pub fn julian_day(datetime: &DateTime<Utc>) -> f64 {
    let a = (14 - datetime.month() as i32) / 12;
    let y = datetime.year() + 4800 - a;
    let m = datetime.month() as i32 + 12 * a - 3;

    let day_number = datetime.day() as f64 + ((153 * m + 2) / 5) as f64 + 365.0 * y as f64
        + (y / 4) as f64
        - (y / 100) as f64
        + (y / 400) as f64
        - 32045.0;

    day_number + (utc_hours(datetime) - 12.0) / 24.0
}

/// Mean longitude, mean anomaly (radians) and ecliptic longitude (radians).
fn solar_longitudes(julian_day: f64) -> (f64, f64, f64) {
    let n = julian_day - 2451545.0;
    let l = (280.460 + 0.9856474 * n).rem_euclid(360.0);
    let g = (357.528 + 0.9856003 * n).rem_euclid(360.0).to_radians();
    let lambda = (l + 1.915 * g.sin() + 0.020 * (2.0 * g).sin()).to_radians();
    (l, g, lambda)
}

fn obliquity(julian_day: f64) -> f64 {
    (23.439 - 0.0000004 * (julian_day - 2451545.0)).to_radians()
}

/// Equation of time in minutes.
pub fn equation_of_time(julian_day: f64) -> f64 {
    let (l, _, lambda) = solar_longitudes(julian_day);
    let epsilon = obliquity(julian_day);
    let right_ascension = (epsilon.cos() * lambda.sin())
        .atan2(lambda.cos())
        .to_degrees();
    let difference = (l - 0.0057183 - right_ascension + 180.0).rem_euclid(360.0) - 180.0;
    4.0 * difference
}

/// Solar declination in degrees.
pub fn solar_declination(julian_day: f64) -> f64 {
    let (_, _, lambda) = solar_longitudes(julian_day);
    (obliquity(julian_day).sin() * lambda.sin())
        .asin()
        .to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use chrono::TimeZone;

    #[test]
    fn test_julian_day_epoch() {
        let j2000 = Utc.with_ymd_and_hms(2000, 1, 1, 12, 0, 0).unwrap();
        assert_abs_diff_eq!(julian_day(&j2000), 2451545.0, epsilon = 1e-9);
    }

    #[test]
    fn test_declination_at_solstices() {
        let june = julian_day(&Utc.with_ymd_and_hms(2024, 6, 20, 12, 0, 0).unwrap());
        let december = julian_day(&Utc.with_ymd_and_hms(2024, 12, 21, 12, 0, 0).unwrap());
        assert_abs_diff_eq!(solar_declination(june), 23.44, epsilon = 0.1);
        assert_abs_diff_eq!(solar_declination(december), -23.44, epsilon = 0.1);
    }

    #[test]
    fn test_equation_of_time_extremes() {
        let november = julian_day(&Utc.with_ymd_and_hms(2024, 11, 3, 12, 0, 0).unwrap());
        let february = julian_day(&Utc.with_ymd_and_hms(2024, 2, 11, 12, 0, 0).unwrap());
        assert_abs_diff_eq!(equation_of_time(november), 16.4, epsilon = 0.5);
        assert_abs_diff_eq!(equation_of_time(february), -14.2, epsilon = 0.5);
    }

    #[test]
    fn test_noon_elevation_and_azimuth() {
        let calc = SunCalculator::new(45.0, 0.0);
        let noon = calc.solar_noon(&Utc.with_ymd_and_hms(2024, 6, 20, 0, 0, 0).unwrap());
        let position = calc.position(&noon);
        // 90 - latitude + declination
        assert_abs_diff_eq!(position.elevation, 68.44, epsilon = 0.2);
        assert_abs_diff_eq!(position.azimuth, 180.0, epsilon = 1.0);
    }

    #[test]
    fn test_morning_east_afternoon_west() {
        let calc = SunCalculator::new(52.0, 13.0);
        let morning = calc.position(&Utc.with_ymd_and_hms(2024, 6, 20, 6, 0, 0).unwrap());
        let afternoon = calc.position(&Utc.with_ymd_and_hms(2024, 6, 20, 16, 0, 0).unwrap());
        assert!(morning.azimuth > 45.0 && morning.azimuth < 135.0);
        assert!(afternoon.azimuth > 225.0 && afternoon.azimuth < 315.0);
        assert!(morning.elevation > 0.0 && afternoon.elevation > 0.0);
    }

    #[test]
    fn test_night_is_below_horizon() {
        let calc = SunCalculator::new(45.0, 0.0);
        let midnight = calc.position(&Utc.with_ymd_and_hms(2024, 6, 21, 0, 0, 0).unwrap());
        assert!(midnight.elevation < 0.0);
        assert!(midnight.azimuth >= 0.0 && midnight.azimuth < 360.0);
    }

    #[test]
    fn test_local_solar_time_follows_longitude() {
        let instant = Utc.with_ymd_and_hms(2024, 3, 20, 12, 0, 0).unwrap();
        let greenwich = SunCalculator::new(0.0, 0.0).local_solar_time(&instant);
        let east = SunCalculator::new(0.0, 90.0).local_solar_time(&instant);
        let west = SunCalculator::new(0.0, -90.0).local_solar_time(&instant);
        let wrapped = SunCalculator::new(0.0, 180.0).local_solar_time(&instant);
        assert_abs_diff_eq!(greenwich, 12.0, epsilon = 0.2);
        assert_abs_diff_eq!(east, 18.0, epsilon = 0.2);
        assert_abs_diff_eq!(west, 6.0, epsilon = 0.2);
        assert!((0.0..24.0).contains(&wrapped));
        assert_abs_diff_eq!(wrapped, 23.9, epsilon = 0.2);
    }

    #[test]
    fn test_sunrise_sunset_brackets_noon() {
        let calc = SunCalculator::new(45.0, 0.0);
        let date = Utc.with_ymd_and_hms(2024, 6, 21, 0, 0, 0).unwrap();
        let (sunrise, sunset) = calc.sunrise_sunset(&date).unwrap();
        let noon = calc.solar_noon(&date);
        assert!(sunrise < noon && noon < sunset);
        assert_abs_diff_eq!(calc.position(&sunrise).elevation, -0.833, epsilon = 0.2);
        assert_abs_diff_eq!(calc.position(&sunset).elevation, -0.833, epsilon = 0.2);
        // About 15.5 h at 45N on the June solstice.
        assert_abs_diff_eq!(calc.day_length_hours(&date), 15.5, epsilon = 0.3);
    }

    #[test]
    fn test_day_length_in_polar_day_and_night() {
        let calc = SunCalculator::new(80.0, 15.0);
        let june = Utc.with_ymd_and_hms(2024, 6, 21, 0, 0, 0).unwrap();
        let december = Utc.with_ymd_and_hms(2024, 12, 21, 0, 0, 0).unwrap();
        assert!(calc.sunrise_sunset(&june).is_none());
        assert_eq!(calc.day_length_hours(&june), 24.0);
        assert!(calc.sunrise_sunset(&december).is_none());
        assert_eq!(calc.day_length_hours(&december), 0.0);
    }

    #[test]
    fn test_position_is_pure() {
        let calc = SunCalculator::new(-33.9, 151.2);
        let instant = Utc.with_ymd_and_hms(2024, 1, 15, 2, 30, 0).unwrap();
        assert_eq!(calc.position(&instant), calc.position(&instant));
    }
}
