use log::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mean earth radius in metres (IUGG).
pub const EARTH_RADIUS: f64 = 6_371_008.8;

/// Tolerance in metres below which two positions are considered identical.
pub const DISTANCE_EPSILON: f64 = 1e-6;

/// The largest number of subdivisions `Track::densify` makes per segment.
pub const MAX_DENSIFY_FACTOR: usize = 1000;

/// Errors that make a track unusable before any network cost is incurred.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TrackError {
    #[error("a track needs at least 2 points, got {0}")]
    TooFewPoints(usize),
    #[error("point {index} has an invalid coordinate ({lat}, {lng})")]
    InvalidCoordinate { index: usize, lat: f64, lng: f64 },
    #[error("sample spacing must be a positive finite distance, got {0}")]
    InvalidSpacing(f64),
    #[error("the sample budget is zero")]
    ZeroBudget,
    #[error("track of {total} m is too short for a spacing of {spacing} m")]
    InsufficientTrackLength { total: f64, spacing: f64 },
}

/// A position on the WGS84 ellipsoid, in degrees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    #[serde(alias = "lon")]
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevation: Option<f64>,
    /// RFC 3339 time of the fix, when the recording device provided one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self {
            lat,
            lng,
            elevation: None,
            time: None,
        }
    }

    pub fn with_elevation(self, elevation: f64) -> Self {
        Self {
            elevation: Some(elevation),
            ..self
        }
    }

    fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    /// Great-circle distance to `other` in metres (haversine).
    pub fn distance(&self, other: &GeoPoint) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let dlat = lat2 - lat1;
        let dlng = (other.lng - self.lng).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS * a.sqrt().atan2((1.0 - a).sqrt())
    }

    /// Initial great-circle bearing towards `other`, in degrees within `[0, 360)`.
    pub fn bearing(&self, other: &GeoPoint) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let dlng = (other.lng - self.lng).to_radians();
        let y = dlng.sin() * lat2.cos();
        let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlng.cos();
        y.atan2(x).to_degrees().rem_euclid(360.0)
    }

    /// Whether the great circle through `self` and `other` is undefined.
    pub fn is_antipodal_to(&self, other: &GeoPoint) -> bool {
        std::f64::consts::PI - self.distance(other) / EARTH_RADIUS < 1e-9
    }

    /// The point a `fraction` of the way along the great circle towards `other`.
    ///
    /// Antipodal points have no unique great circle; see [`GeoPoint::is_antipodal_to`].
    pub fn intermediate(&self, other: &GeoPoint, fraction: f64) -> GeoPoint {
        let delta = self.distance(other) / EARTH_RADIUS;
        if delta < f64::EPSILON {
            return self.clone();
        }
        let (lat1, lng1) = (self.lat.to_radians(), self.lng.to_radians());
        let (lat2, lng2) = (other.lat.to_radians(), other.lng.to_radians());
        let a = ((1.0 - fraction) * delta).sin() / delta.sin();
        let b = (fraction * delta).sin() / delta.sin();
        let x = a * lat1.cos() * lng1.cos() + b * lat2.cos() * lng2.cos();
        let y = a * lat1.cos() * lng1.sin() + b * lat2.cos() * lng2.sin();
        let z = a * lat1.sin() + b * lat2.sin();
        let elevation = match (self.elevation, other.elevation) {
            (Some(e1), Some(e2)) => Some(e1 + (e2 - e1) * fraction),
            _ => None,
        };
        GeoPoint {
            lat: z.atan2((x * x + y * y).sqrt()).to_degrees(),
            lng: y.atan2(x).to_degrees(),
            elevation,
            time: None,
        }
    }
}

/// An ordered recording of positions with its cumulative distance parameterization.
///
/// A track always has at least two points and its cumulative distances are
/// monotonically non-decreasing. Consecutive duplicate points are kept; they
/// simply contribute zero-length segments.
#[derive(Debug, Clone)]
pub struct Track {
    points: Vec<GeoPoint>,
    cumulative: Vec<f64>,
}

impl Track {
    pub fn new(points: Vec<GeoPoint>) -> Result<Self, TrackError> {
        if points.len() < 2 {
            return Err(TrackError::TooFewPoints(points.len()));
        }
        if let Some((index, point)) = points.iter().enumerate().find(|(_, p)| !p.is_valid()) {
            return Err(TrackError::InvalidCoordinate {
                index,
                lat: point.lat,
                lng: point.lng,
            });
        }
        let mut cumulative = Vec::with_capacity(points.len());
        let mut total = 0.0;
        cumulative.push(total);
        for pair in points.windows(2) {
            total += pair[0].distance(&pair[1]);
            cumulative.push(total);
        }
        Ok(Self { points, cumulative })
    }

    pub fn points(&self) -> &[GeoPoint] {
        &self.points
    }

    /// Distance from the start of the track to each point, in metres.
    pub fn cumulative_distances(&self) -> &[f64] {
        &self.cumulative
    }

    pub fn total_distance(&self) -> f64 {
        self.cumulative[self.cumulative.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Length of the segment starting at point `index`.
    pub fn segment_length(&self, index: usize) -> f64 {
        self.cumulative[index + 1] - self.cumulative[index]
    }

    /// Bearing of the travel direction at point `index`.
    ///
    /// This looks forward to the next point that is not a duplicate. When there is none
    /// (the tail of the track), the bearing of the last real segment is used instead.
    /// Returns `None` only if every point of the track is identical.
    pub fn heading_at(&self, index: usize) -> Option<f64> {
        let ahead = (index + 1..self.points.len())
            .find(|&j| self.cumulative[j] - self.cumulative[index] > DISTANCE_EPSILON);
        if let Some(j) = ahead {
            return Some(self.points[index].bearing(&self.points[j]));
        }
        (0..self.points.len() - 1)
            .rev()
            .find(|&i| self.segment_length(i) > DISTANCE_EPSILON)
            .map(|i| self.points[i].bearing(&self.points[i + 1]))
    }

    /// Insert `factor - 1` great-circle intermediate points into every segment.
    ///
    /// A factor below 2 returns the track unchanged, and factors above
    /// [`MAX_DENSIFY_FACTOR`] are clamped. Antipodal segments are left as they are.
    pub fn densify(&self, factor: usize) -> Track {
        if factor < 2 {
            return self.clone();
        }
        if factor > MAX_DENSIFY_FACTOR {
            warn!("clamping the interpolation factor {} to {}", factor, MAX_DENSIFY_FACTOR);
        }
        let factor = factor.min(MAX_DENSIFY_FACTOR);
        let capacity = (self.points.len() - 1)
            .checked_mul(factor)
            .and_then(|n| n.checked_add(1))
            .unwrap_or(self.points.len());
        let mut points = Vec::with_capacity(capacity);
        for (ix, pair) in self.points.windows(2).enumerate() {
            points.push(pair[0].clone());
            if pair[0].is_antipodal_to(&pair[1]) {
                warn!("segment {} joins antipodal points, not interpolating it", ix);
                continue;
            }
            points.extend(
                (1..factor).map(|step| pair[0].intermediate(&pair[1], step as f64 / factor as f64)),
            );
        }
        points.push(self.points[self.points.len() - 1].clone());
        match Track::new(points) {
            Ok(track) => track,
            Err(e) => {
                warn!("interpolation produced an invalid track ({}), keeping the original", e);
                self.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rejects_short_tracks() {
        assert_eq!(
            Track::new(vec![GeoPoint::new(0.0, 0.0)]).unwrap_err(),
            TrackError::TooFewPoints(1)
        );
        assert_eq!(Track::new(vec![]).unwrap_err(), TrackError::TooFewPoints(0));
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        let err = Track::new(vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(91.0, 0.0)]).unwrap_err();
        assert!(matches!(err, TrackError::InvalidCoordinate { index: 1, .. }));
    }

    #[test]
    fn one_degree_of_longitude_at_the_equator() {
        let a = GeoPoint::new(0.0, 0.0);
        let b = GeoPoint::new(0.0, 1.0);
        assert_relative_eq!(a.distance(&b), EARTH_RADIUS * 1f64.to_radians(), epsilon = 1e-6);
        assert_relative_eq!(a.bearing(&b), 90.0, epsilon = 1e-9);
        assert_relative_eq!(b.bearing(&a), 270.0, epsilon = 1e-9);
    }

    #[test]
    fn bearing_north_is_zero() {
        let a = GeoPoint::new(10.0, 20.0);
        let b = GeoPoint::new(11.0, 20.0);
        assert_relative_eq!(a.bearing(&b), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn duplicate_points_do_not_break_headings() {
        let track = Track::new(vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 0.001),
            GeoPoint::new(0.0, 0.001),
        ])
        .unwrap();
        assert_relative_eq!(track.heading_at(0).unwrap(), 90.0, epsilon = 1e-6);
        assert_relative_eq!(track.heading_at(1).unwrap(), 90.0, epsilon = 1e-6);
        assert_relative_eq!(track.heading_at(3).unwrap(), 90.0, epsilon = 1e-6);
        let cumulative = track.cumulative_distances();
        assert!(cumulative.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn densify_preserves_length_and_endpoints() {
        let track = Track::new(vec![
            GeoPoint::new(45.0, 7.0),
            GeoPoint::new(45.01, 7.02),
            GeoPoint::new(45.015, 7.03),
        ])
        .unwrap();
        let dense = track.densify(4);
        assert_eq!(dense.len(), 2 * 4 + 1);
        assert_eq!(dense.points()[0], track.points()[0]);
        assert_eq!(dense.points()[8], track.points()[2]);
        assert_relative_eq!(dense.total_distance(), track.total_distance(), max_relative = 1e-9);
    }

    #[test]
    fn densify_leaves_antipodal_segments_alone() {
        let track = Track::new(vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 180.0),
            GeoPoint::new(0.0, 179.0),
        ])
        .unwrap();
        assert!(track.points()[0].is_antipodal_to(&track.points()[1]));
        let dense = track.densify(3);
        assert_eq!(dense.len(), 1 + 1 + 3);
        assert_eq!(dense.points()[1], track.points()[1]);
        assert!(dense.points().iter().all(|p| p.lat.is_finite() && p.lng.is_finite()));
        assert_relative_eq!(dense.total_distance(), track.total_distance(), max_relative = 1e-9);
    }

    #[test]
    fn densify_clamps_the_factor() {
        let track = Track::new(vec![GeoPoint::new(45.0, 7.0), GeoPoint::new(45.01, 7.0)]).unwrap();
        assert_eq!(track.densify(usize::MAX).len(), MAX_DENSIFY_FACTOR + 1);
    }
}
