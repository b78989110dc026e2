use crate::track::{GeoPoint, Track, TrackError, DISTANCE_EPSILON};
use log::*;
use serde::Serialize;

/// Metres in one statute mile.
pub const METRES_PER_MILE: f64 = 1609.344;

/// How far apart consecutive waypoints should be.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Spacing {
    /// A fixed target distance in metres.
    Distance(f64),
    /// A maximum number of sampling intervals; the spacing becomes `total / budget`.
    Budget(usize),
    /// A maximum spend. At most `floor(max_spend / cost_per_sample)` waypoints are
    /// affordable, which is one more than the number of intervals.
    Spend { max_spend: f64, cost_per_sample: f64 },
}

impl Spacing {
    pub fn frames_per_mile(frames: f64) -> Self {
        Spacing::Distance(METRES_PER_MILE / frames)
    }

    /// Resolve the target spacing in metres for a track of `total_distance` metres.
    pub fn resolve(&self, total_distance: f64) -> Result<f64, TrackError> {
        let spacing = match *self {
            Spacing::Distance(spacing) => spacing,
            Spacing::Budget(0) => return Err(TrackError::ZeroBudget),
            Spacing::Budget(budget) => total_distance / budget as f64,
            Spacing::Spend {
                max_spend,
                cost_per_sample,
            } => {
                if cost_per_sample.is_nan() || cost_per_sample <= 0.0 || !max_spend.is_finite() {
                    return Err(TrackError::ZeroBudget);
                }
                let affordable = (max_spend / cost_per_sample).floor();
                // Two waypoints are the least a plan can hold.
                if affordable < 2.0 {
                    return Err(TrackError::ZeroBudget);
                }
                return Spacing::Budget(affordable as usize - 1).resolve(total_distance);
            }
        };
        if !spacing.is_finite() || spacing <= 0.0 {
            if total_distance <= DISTANCE_EPSILON {
                return Err(TrackError::InsufficientTrackLength {
                    total: total_distance,
                    spacing,
                });
            }
            return Err(TrackError::InvalidSpacing(spacing));
        }
        Ok(spacing)
    }
}

/// A selected track point at which one image is requested.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Waypoint {
    /// Position of this waypoint in the sampled sequence.
    pub index: usize,
    pub point: GeoPoint,
    /// Distance along the track from its start, in metres.
    pub distance: f64,
    /// Direction of travel in degrees clockwise from north.
    pub heading: f64,
}

/// The result of sampling a track.
#[derive(Debug, Clone)]
pub struct SamplePlan {
    pub waypoints: Vec<Waypoint>,
    pub spacing: f64,
    pub total_distance: f64,
}

impl SamplePlan {
    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    /// Cost of requesting one image per waypoint.
    pub fn estimated_cost(&self, cost_per_sample: f64) -> f64 {
        self.waypoints.len() as f64 * cost_per_sample
    }
}

/// Select evenly spaced waypoints along `track`.
///
/// This walks the cumulative distance parameterization once and greedily keeps the
/// first point whose distance reaches the last kept distance plus the spacing.
/// Every raw point is considered, so consecutive waypoints are never closer
/// than the spacing. The output only depends on the inputs.
pub fn sample(track: &Track, spacing: Spacing) -> Result<SamplePlan, TrackError> {
    let total_distance = track.total_distance();
    let spacing = spacing.resolve(total_distance)?;
    if total_distance + DISTANCE_EPSILON < spacing || total_distance <= DISTANCE_EPSILON {
        return Err(TrackError::InsufficientTrackLength {
            total: total_distance,
            spacing,
        });
    }

    let cumulative = track.cumulative_distances();
    let mut waypoints: Vec<Waypoint> = Vec::new();
    let mut next_distance = 0.0;
    for (ix, &distance) in cumulative.iter().enumerate() {
        if distance + DISTANCE_EPSILON < next_distance {
            continue;
        }
        let heading = track
            .heading_at(ix)
            .or_else(|| waypoints.last().map(|w| w.heading))
            .unwrap_or(0.0);
        waypoints.push(Waypoint {
            index: waypoints.len(),
            point: track.points()[ix].clone(),
            distance,
            heading,
        });
        next_distance = distance + spacing;
    }

    debug!(
        "sampled {} waypoints from {} points with spacing {:.2} m over {:.2} m",
        waypoints.len(),
        track.len(),
        spacing,
        total_distance
    );
    if waypoints.len() < 2 {
        return Err(TrackError::InsufficientTrackLength {
            total: total_distance,
            spacing,
        });
    }
    Ok(SamplePlan {
        waypoints,
        spacing,
        total_distance,
    })
}
