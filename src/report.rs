use crate::retrieve::{LatLng, PanoramaSelection};
use crate::sampler::SamplePlan;
use crate::track::Track;
use serde::Serialize;

/// What a run will request (or requested), printed for dry runs and `--print-metadata`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    /// Track length in metres.
    pub distance: f64,
    /// Number of images that will be requested.
    pub frames: usize,
    pub spacing: f64,
    pub estimated_cost: f64,
    /// Positions images are requested at, or the panoramas they resolved to.
    pub gps_points: Vec<LatLng>,
    pub original_points: Vec<LatLng>,
    /// Mean distance in metres between waypoints and their panoramas, once known.
    pub average_error: Option<f64>,
}

impl Report {
    pub fn new(track: &Track, plan: &SamplePlan, cost_per_sample: f64) -> Self {
        Self {
            distance: plan.total_distance,
            frames: plan.len(),
            spacing: plan.spacing,
            estimated_cost: plan.estimated_cost(cost_per_sample),
            gps_points: plan.waypoints.iter().map(|w| LatLng::from(&w.point)).collect(),
            original_points: track.points().iter().map(LatLng::from).collect(),
            average_error: None,
        }
    }

    /// Replace the sampled positions with the panoramas they resolved to.
    pub fn with_selection(self, selection: &PanoramaSelection, cost_per_sample: f64) -> Self {
        let frames = selection.waypoints.len();
        Self {
            frames,
            estimated_cost: frames as f64 * cost_per_sample,
            gps_points: selection.panoramas.clone(),
            average_error: selection.average_error(),
            ..self
        }
    }
}
