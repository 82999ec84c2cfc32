//! Geographic value objects and great-circle distance.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Mean Earth radius used by the Haversine formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Two coordinates closer than this (in degrees, per axis) are the same place.
pub const COORDINATE_TOLERANCE: f64 = 1e-4;

pub const MIN_DISTANCE_KM: f64 = 1.0;
pub const MAX_DISTANCE_KM: f64 = 1000.0;

/// A validated latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "RawCoordinate")]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
}

#[derive(Deserialize)]
struct RawCoordinate {
    latitude: f64,
    longitude: f64,
}

impl TryFrom<RawCoordinate> for Coordinate {
    type Error = Error;

    fn try_from(raw: RawCoordinate) -> Result<Self> {
        Coordinate::new(raw.latitude, raw.longitude)
    }
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(Error::InvalidCoordinate(format!(
                "latitude must be between -90 and 90 degrees, got {latitude}"
            )));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(Error::InvalidCoordinate(format!(
                "longitude must be between -180 and 180 degrees, got {longitude}"
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

// Tolerance-based equality is not transitive, so no `Eq`.
impl PartialEq for Coordinate {
    fn eq(&self, other: &Self) -> bool {
        (self.latitude - other.latitude).abs() < COORDINATE_TOLERANCE
            && (self.longitude - other.longitude).abs() < COORDINATE_TOLERANCE
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.latitude, self.longitude)
    }
}

impl std::str::FromStr for Coordinate {
    type Err = Error;

    /// Parses `"lat,lon"`.
    fn from_str(s: &str) -> Result<Self> {
        let (lat, lon) = s
            .split_once(',')
            .ok_or_else(|| Error::InvalidCoordinate(format!("expected LAT,LON, got '{s}'")))?;
        let parse = |part: &str| {
            part.trim()
                .parse::<f64>()
                .map_err(|e| Error::InvalidCoordinate(format!("'{}': {}", part.trim(), e)))
        };
        Coordinate::new(parse(lat)?, parse(lon)?)
    }
}

/// A deliverable distance in kilometers, rounded to two decimals.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Distance(f64);

impl Distance {
    pub fn new(kilometers: f64) -> Result<Self> {
        if !(MIN_DISTANCE_KM..=MAX_DISTANCE_KM).contains(&kilometers) {
            return Err(Error::InvalidDistance { km: kilometers });
        }
        Ok(Self((kilometers * 100.0).round() / 100.0))
    }

    pub fn kilometers(&self) -> f64 {
        self.0
    }

    pub fn interval(&self) -> DistanceInterval {
        DistanceInterval::for_kilometers(self.0)
    }
}

impl TryFrom<f64> for Distance {
    type Error = Error;

    fn try_from(km: f64) -> Result<Self> {
        Distance::new(km)
    }
}

impl From<Distance> for f64 {
    fn from(distance: Distance) -> Self {
        distance.0
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} km", self.0)
    }
}

/// Pricing band for a distance.
///
/// Bands are `[1, 50]`, `(50, 200]`, `(200, 500]` and `(500, 1000]`, so every
/// valid distance falls in exactly one band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceInterval {
    UpTo50,
    UpTo200,
    UpTo500,
    UpTo1000,
}

impl DistanceInterval {
    pub const ALL: [DistanceInterval; 4] = [
        DistanceInterval::UpTo50,
        DistanceInterval::UpTo200,
        DistanceInterval::UpTo500,
        DistanceInterval::UpTo1000,
    ];

    fn for_kilometers(km: f64) -> Self {
        if km <= 50.0 {
            DistanceInterval::UpTo50
        } else if km <= 200.0 {
            DistanceInterval::UpTo200
        } else if km <= 500.0 {
            DistanceInterval::UpTo500
        } else {
            DistanceInterval::UpTo1000
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DistanceInterval::UpTo50 => "1-50 km",
            DistanceInterval::UpTo200 => "51-200 km",
            DistanceInterval::UpTo500 => "201-500 km",
            DistanceInterval::UpTo1000 => "501-1000 km",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|i| i.label() == label)
    }

    /// Upper bound of the band in kilometers (inclusive).
    pub fn upper_km(&self) -> f64 {
        match self {
            DistanceInterval::UpTo50 => 50.0,
            DistanceInterval::UpTo200 => 200.0,
            DistanceInterval::UpTo500 => 500.0,
            DistanceInterval::UpTo1000 => 1000.0,
        }
    }
}

impl fmt::Display for DistanceInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Great-circle distance between two coordinates (Haversine).
///
/// Fails when the result is not deliverable, which includes identical points.
pub fn calculate_distance(origin: &Coordinate, destination: &Coordinate) -> Result<Distance> {
    Distance::new(haversine_km(origin, destination))
}

fn haversine_km(a: &Coordinate, b: &Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coord(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon).unwrap()
    }

    #[test]
    fn test_coordinate_rejects_out_of_range() {
        assert!(matches!(
            Coordinate::new(90.5, 0.0),
            Err(Error::InvalidCoordinate(_))
        ));
        assert!(matches!(
            Coordinate::new(0.0, -180.1),
            Err(Error::InvalidCoordinate(_))
        ));
        assert!(Coordinate::new(-90.0, 180.0).is_ok());
    }

    #[test]
    fn test_coordinate_equality_uses_tolerance() {
        assert_eq!(coord(10.0, 20.0), coord(10.00005, 19.99995));
        assert_ne!(coord(10.0, 20.0), coord(10.0002, 20.0));
    }

    #[test]
    fn test_coordinate_parse() {
        let c: Coordinate = "-12.046374, -77.042793".parse().unwrap();
        assert_eq!(c, coord(-12.046374, -77.042793));
        assert!("12.0".parse::<Coordinate>().is_err());
        assert!("abc,1".parse::<Coordinate>().is_err());
    }

    #[test]
    fn test_lima_scenario() {
        let origin = coord(-12.046374, -77.042793);
        let destination = coord(-12.066667, -77.116667);

        let distance = calculate_distance(&origin, &destination).unwrap();
        assert!((distance.kilometers() - 8.34).abs() < 0.05);
        assert_eq!(distance.interval(), DistanceInterval::UpTo50);
        assert_eq!(distance.interval().label(), "1-50 km");
    }

    #[test]
    fn test_distance_is_symmetric() {
        let a = coord(40.4168, -3.7038);
        let b = coord(41.3874, 2.1686);
        let ab = calculate_distance(&a, &b).unwrap();
        let ba = calculate_distance(&b, &a).unwrap();
        assert_eq!(ab, ba);
        assert!((ab.kilometers() - 505.0).abs() < 5.0);
    }

    #[test]
    fn test_identical_points_are_rejected() {
        let a = coord(4.711, -74.0721);
        assert!(matches!(
            calculate_distance(&a, &a),
            Err(Error::InvalidDistance { .. })
        ));
    }

    #[test]
    fn test_distance_out_of_range() {
        // Bogotá to Madrid is far beyond the service radius.
        let bogota = coord(4.711, -74.0721);
        let madrid = coord(40.4168, -3.7038);
        assert!(calculate_distance(&bogota, &madrid).is_err());

        assert!(Distance::new(0.99).is_err());
        assert!(Distance::new(1000.01).is_err());
        assert!(Distance::new(f64::NAN).is_err());
    }

    #[test]
    fn test_distance_rounds_to_two_decimals() {
        assert_eq!(Distance::new(12.3456).unwrap().kilometers(), 12.35);
    }

    #[test]
    fn test_interval_boundaries() {
        let cases = [
            (1.0, DistanceInterval::UpTo50),
            (50.0, DistanceInterval::UpTo50),
            (50.5, DistanceInterval::UpTo200),
            (51.0, DistanceInterval::UpTo200),
            (200.0, DistanceInterval::UpTo200),
            (201.0, DistanceInterval::UpTo500),
            (500.0, DistanceInterval::UpTo500),
            (501.0, DistanceInterval::UpTo1000),
            (1000.0, DistanceInterval::UpTo1000),
        ];
        for (km, expected) in cases {
            assert_eq!(Distance::new(km).unwrap().interval(), expected, "{km} km");
        }
    }

    #[test]
    fn test_interval_label_round_trip() {
        for interval in DistanceInterval::ALL {
            assert_eq!(DistanceInterval::from_label(interval.label()), Some(interval));
        }
        assert_eq!(DistanceInterval::from_label("Invalid range"), None);
    }
}
