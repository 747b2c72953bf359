//! Angle strings printed on map margins and the geographic box they span.

use crate::error::{GeoMapError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

const EARTH_RADIUS_KM: f64 = 6371.0088;

fn angle_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"^(\d+)\s*°\s*(\d+)\s*['′]\s*(?:(\d+(?:\.\d+)?)\s*(?:"|″|''))?\s*([NSEW])$"#)
            .expect("Invalid regex pattern")
    })
}

struct Angle {
    degrees: u32,
    minutes: u32,
    seconds: f64,
    hemisphere: char,
}

fn parse_angle(raw: &str) -> Result<Angle> {
    let invalid = || GeoMapError::InvalidInput(format!("Invalid angle: {}", raw));
    let caps = angle_pattern().captures(raw.trim()).ok_or_else(invalid)?;

    let degrees = caps[1].parse().map_err(|_| invalid())?;
    let minutes = caps[2].parse().map_err(|_| invalid())?;
    let seconds = match caps.get(3) {
        Some(s) => s.as_str().parse().map_err(|_| invalid())?,
        None => 0.0,
    };
    let hemisphere = caps[4].chars().next().ok_or_else(invalid)?;
    Ok(Angle {
        degrees,
        minutes,
        seconds,
        hemisphere,
    })
}

/// Decimal degrees for an angle such as `120°30'E` or `30°15'20"S`.
///
/// South and west are negative.
pub fn decode_angle(raw: &str) -> Result<f64> {
    let a = parse_angle(raw)?;
    let value = a.degrees as f64 + a.minutes as f64 / 60.0 + a.seconds / 3600.0;
    Ok(match a.hemisphere {
        'S' | 'W' => -value,
        _ => value,
    })
}

/// Normalised `D°M'H` form (seconds dropped)
pub fn polish_angle(raw: &str) -> Result<String> {
    let a = parse_angle(raw)?;
    Ok(format!("{}°{}'{}", a.degrees, a.minutes, a.hemisphere))
}

/// Geographic bounding box in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl GeoBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    /// Box spanning the extreme values of the given longitude and latitude strings
    pub fn from_ranges(longitude: &[String], latitude: &[String]) -> Result<Self> {
        let lons = longitude
            .iter()
            .map(|s| decode_angle(s))
            .collect::<Result<Vec<_>>>()?;
        let lats = latitude
            .iter()
            .map(|s| decode_angle(s))
            .collect::<Result<Vec<_>>>()?;
        if lons.is_empty() || lats.is_empty() {
            return Err(GeoMapError::InvalidInput(
                "Longitude and latitude ranges must not be empty".to_string(),
            ));
        }

        let fold = |v: &[f64]| {
            v.iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), x| (lo.min(*x), hi.max(*x)))
        };
        let (min_lon, max_lon) = fold(&lons);
        let (min_lat, max_lat) = fold(&lats);
        Ok(Self::new(min_lon, min_lat, max_lon, max_lat))
    }

    /// Longitudes within [-180, 180] and latitudes within [-90, 90]
    pub fn is_valid(&self) -> bool {
        let lon_ok = |v: f64| (-180.0..=180.0).contains(&v);
        let lat_ok = |v: f64| (-90.0..=90.0).contains(&v);
        lon_ok(self.min_lon) && lon_ok(self.max_lon) && lat_ok(self.min_lat) && lat_ok(self.max_lat)
    }

    /// Expanded by `margin` degrees on every side
    pub fn expand(&self, margin: f64) -> Self {
        Self::new(
            self.min_lon - margin,
            self.min_lat - margin,
            self.max_lon + margin,
            self.max_lat + margin,
        )
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        self.min_lon <= lon && lon <= self.max_lon && self.min_lat <= lat && lat <= self.max_lat
    }

    /// Surface area on a spherical earth, in km²
    pub fn area_km2(&self) -> f64 {
        let d_lon = (self.max_lon - self.min_lon).to_radians();
        let d_sin = (self.max_lat.to_radians().sin() - self.min_lat.to_radians().sin()).abs();
        EARTH_RADIUS_KM * EARTH_RADIUS_KM * d_lon.abs() * d_sin
    }
}

/// Great-circle distance between two points, in km
pub fn haversine_km(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_angle() {
        assert_eq!(decode_angle("120°30'E").unwrap(), 120.5);
        assert_eq!(decode_angle("30°15'S").unwrap(), -30.25);
        assert_eq!(decode_angle(" 109°40'W ").unwrap(), -(109.0 + 40.0 / 60.0));
        let with_seconds = decode_angle("30°15'36\"N").unwrap();
        assert!((with_seconds - 30.26).abs() < 1e-9);
    }

    #[test]
    fn test_decode_angle_rejects_malformed() {
        for bad in ["120.5E", "120°30'", "abc", "120°30'X", ""] {
            assert!(decode_angle(bad).is_err(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn test_polish_angle() {
        assert_eq!(polish_angle("30°15'36\"N").unwrap(), "30°15'N");
        assert_eq!(polish_angle("120°05'E").unwrap(), "120°5'E");
    }

    #[test]
    fn test_box_from_ranges() {
        let lon = vec!["121°00'E".to_string(), "120°00'E".to_string()];
        let lat = vec!["30°30'N".to_string(), "31°30'N".to_string()];
        let b = GeoBox::from_ranges(&lon, &lat).unwrap();
        assert_eq!(b, GeoBox::new(120.0, 30.5, 121.0, 31.5));
        assert!(b.is_valid());

        let lat = vec!["120°00'N".to_string(), "121°00'N".to_string()];
        assert!(!GeoBox::from_ranges(&lon, &lat).unwrap().is_valid());
        assert!(GeoBox::from_ranges(&lon, &[]).is_err());
    }

    #[test]
    fn test_geometry() {
        // one degree of latitude is about 111 km
        let d = haversine_km(0.0, 0.0, 0.0, 1.0);
        assert!((d - 111.19).abs() < 0.1);

        let area = GeoBox::new(0.0, 0.0, 1.0, 1.0).area_km2();
        assert!((area - 12364.0).abs() < 50.0);
    }
}
