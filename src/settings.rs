use log::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The family of geometric transform estimated between consecutive frames.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformModel {
    /// Rotation, uniform scale and translation (4 degrees of freedom).
    Similarity,
    /// Full projective transform (8 degrees of freedom).
    Homography,
}

/// The settings for the hyperlapse process.
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct HyperlapseSettings {
    /// The detector response threshold used for akaze
    #[serde(default = "default_akaze_threshold")]
    pub akaze_threshold: f64,
    /// Frames with fewer keypoints than this produce an insufficient descriptor set
    #[serde(default = "default_minimum_keypoints")]
    pub minimum_keypoints: usize,
    /// The best match must be closer than this fraction of the second best match
    #[serde(default = "default_lowes_ratio")]
    pub lowes_ratio: f32,
    /// The minimum number of filtered matches (and consensus inliers) to accept an alignment
    #[serde(default = "default_minimum_matches")]
    pub minimum_matches: usize,
    /// The residual in pixels below which a match is an inlier during sample consensus
    #[serde(default = "default_consensus_threshold")]
    pub consensus_threshold: f64,
    /// The transform estimated between consecutive frames
    #[serde(default = "default_transform_model")]
    pub transform_model: TransformModel,
    /// Pairwise transforms that scale the image area by more than this factor are rejected
    #[serde(default = "default_maximum_scale_change")]
    pub maximum_scale_change: f64,
    /// The number of pixel rows at the bottom of every frame ignored by feature extraction
    #[serde(default = "default_crop_bottom")]
    pub crop_bottom: u32,
    /// Drop frames that could not be aligned instead of rendering them unwarped
    #[serde(default = "default_strict_continuity")]
    pub strict_continuity: bool,
    /// The maximum number of image requests in flight
    #[serde(default = "default_network_concurrency")]
    pub network_concurrency: usize,
    /// The number of retrieved frames that may wait for alignment
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// The price of a single image request
    #[serde(default = "default_cost_per_sample")]
    pub cost_per_sample: f64,
    /// The horizontal field of view requested for each image, in degrees
    #[serde(default = "default_field_of_view")]
    pub field_of_view: f64,
    /// The camera pitch requested for each image, in degrees
    #[serde(default = "default_pitch")]
    pub pitch: f64,
    /// The width of requested images and of the rendered canvas
    #[serde(default = "default_image_width")]
    pub image_width: u32,
    /// The height of requested images and of the rendered canvas
    #[serde(default = "default_image_height")]
    pub image_height: u32,
    /// The output video framerate
    #[serde(default = "default_framerate")]
    pub framerate: u32,
    /// The output video constant rate factor
    #[serde(default = "default_crf")]
    pub crf: u32,
}

impl HyperlapseSettings {
    /// Load settings from a JSON file, using the defaults when it is absent or invalid.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let settings = std::fs::File::open(path.as_ref())
            .ok()
            .and_then(|file| match serde_json::from_reader(file) {
                Ok(settings) => Some(settings),
                Err(e) => {
                    warn!("ignoring invalid settings file {}: {}", path.as_ref().display(), e);
                    None
                }
            });
        if settings.is_some() {
            info!("loaded existing settings");
        } else {
            info!("used default settings");
        }
        settings.unwrap_or_default()
    }
}

impl Default for HyperlapseSettings {
    fn default() -> Self {
        Self {
            akaze_threshold: default_akaze_threshold(),
            minimum_keypoints: default_minimum_keypoints(),
            lowes_ratio: default_lowes_ratio(),
            minimum_matches: default_minimum_matches(),
            consensus_threshold: default_consensus_threshold(),
            transform_model: default_transform_model(),
            maximum_scale_change: default_maximum_scale_change(),
            crop_bottom: default_crop_bottom(),
            strict_continuity: default_strict_continuity(),
            network_concurrency: default_network_concurrency(),
            queue_capacity: default_queue_capacity(),
            cost_per_sample: default_cost_per_sample(),
            field_of_view: default_field_of_view(),
            pitch: default_pitch(),
            image_width: default_image_width(),
            image_height: default_image_height(),
            framerate: default_framerate(),
            crf: default_crf(),
        }
    }
}

fn default_akaze_threshold() -> f64 {
    0.001
}

fn default_minimum_keypoints() -> usize {
    10
}

fn default_lowes_ratio() -> f32 {
    0.75
}

fn default_minimum_matches() -> usize {
    8
}

fn default_consensus_threshold() -> f64 {
    3.0
}

fn default_transform_model() -> TransformModel {
    TransformModel::Similarity
}

fn default_maximum_scale_change() -> f64 {
    2.0
}

fn default_crop_bottom() -> u32 {
    19
}

fn default_strict_continuity() -> bool {
    false
}

fn default_network_concurrency() -> usize {
    40
}

fn default_queue_capacity() -> usize {
    8
}

fn default_cost_per_sample() -> f64 {
    0.007
}

fn default_field_of_view() -> f64 {
    120.0
}

fn default_pitch() -> f64 {
    0.0
}

fn default_image_width() -> u32 {
    640
}

fn default_image_height() -> u32 {
    480
}

fn default_framerate() -> u32 {
    24
}

fn default_crf() -> u32 {
    17
}
