use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    /// Builds a coordinate from a device claim. Missing or out-of-range values
    /// mean the device could not give us a usable fix.
    pub fn from_claim(lat: Option<f64>, lng: Option<f64>) -> AppResult<Self> {
        let (Some(lat), Some(lng)) = (lat, lng) else {
            return Err(AppError::LocationUnsupported(
                "Location is unavailable. Enable location services and try again".to_string(),
            ));
        };
        if !lat.is_finite()
            || !lng.is_finite()
            || !(-90.0..=90.0).contains(&lat)
            || !(-180.0..=180.0).contains(&lng)
        {
            return Err(AppError::LocationUnsupported(
                "Location reading is not valid. Refresh your location and try again".to_string(),
            ));
        }
        Ok(Self { lat, lng })
    }

    pub fn to_location_string(&self) -> String {
        format!("{},{}", self.lat, self.lng)
    }
}

/// Great-circle distance in meters.
pub fn haversine_distance_meters(a: Coordinate, b: Coordinate) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().min(1.0).asin()
}

#[derive(Debug, Clone, Copy)]
pub struct Geofence {
    pub center: Coordinate,
    pub max_distance_meters: f64,
}

impl Geofence {
    pub fn new(center: Coordinate, max_distance_meters: f64) -> Self {
        Self {
            center,
            max_distance_meters,
        }
    }

    /// Returns the distance to the facility when inside the fence.
    pub fn check(&self, position: Coordinate) -> AppResult<f64> {
        let distance = haversine_distance_meters(self.center, position);
        if distance <= self.max_distance_meters {
            Ok(distance)
        } else {
            Err(AppError::LocationInvalid(format!(
                "You are {:.0} m from the gym. Move within {:.0} m of the entrance and try again",
                distance, self.max_distance_meters
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GYM: Coordinate = Coordinate {
        lat: 40.7128,
        lng: -74.0060,
    };

    // 1000 m due north: one degree of latitude is about 111 195 m
    fn north_of(origin: Coordinate, meters: f64) -> Coordinate {
        Coordinate {
            lat: origin.lat + (meters / EARTH_RADIUS_METERS).to_degrees(),
            lng: origin.lng,
        }
    }

    #[test]
    fn test_haversine_known_distance() {
        let d = haversine_distance_meters(GYM, north_of(GYM, 1000.0));
        assert!((d - 1000.0).abs() < 0.5, "got {d}");
        assert_eq!(haversine_distance_meters(GYM, GYM), 0.0);
    }

    #[test]
    fn test_geofence_accepts_at_zero_and_rejects_far_away() {
        let fence = Geofence::new(GYM, 100.0);
        assert_eq!(fence.check(GYM).unwrap(), 0.0);
        assert!(fence.check(north_of(GYM, 99.0)).is_ok());

        let err = fence.check(north_of(GYM, 1000.0)).unwrap_err();
        match err {
            AppError::LocationInvalid(msg) => assert!(msg.contains("1000 m")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_or_out_of_range_coordinates_are_unsupported() {
        assert!(matches!(
            Coordinate::from_claim(None, Some(1.0)),
            Err(AppError::LocationUnsupported(_))
        ));
        assert!(matches!(
            Coordinate::from_claim(Some(91.0), Some(0.0)),
            Err(AppError::LocationUnsupported(_))
        ));
        assert!(matches!(
            Coordinate::from_claim(Some(f64::NAN), Some(0.0)),
            Err(AppError::LocationUnsupported(_))
        ));
        let c = Coordinate::from_claim(Some(40.0), Some(-74.0)).unwrap();
        assert_eq!(c.to_location_string(), "40,-74");
    }
}
