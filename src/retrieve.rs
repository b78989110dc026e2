use crate::sampler::Waypoint;
use crate::settings::HyperlapseSettings;
use crate::track::GeoPoint;
use async_trait::async_trait;
use float_ord::FloatOrd;
use futures::{stream, StreamExt};
use image::RgbImage;
use log::*;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const STREET_VIEW_URL: &str = "https://maps.googleapis.com/maps/api/streetview";

/// A failure to retrieve one waypoint's image. The waypoint is skipped.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server responded with status {0}")]
    Status(u16),
    #[error("request quota exceeded (status {0})")]
    QuotaExceeded(u16),
    #[error("no imagery near {lat}, {lng} ({status})")]
    NoImagery { lat: f64, lng: f64, status: String },
    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Anything that can produce the image seen from a waypoint.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch(&self, waypoint: &Waypoint) -> Result<RgbImage, RetrievalError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl From<&GeoPoint> for LatLng {
    fn from(point: &GeoPoint) -> Self {
        Self {
            lat: point.lat,
            lng: point.lng,
        }
    }
}

/// The panorama the imagery provider resolves a location to.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PanoramaMetadata {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub pano_id: String,
    #[serde(default)]
    pub location: LatLng,
    #[serde(default)]
    pub date: String,
}

impl PanoramaMetadata {
    pub fn is_ok(&self) -> bool {
        self.status == "OK"
    }

    fn failed(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            ..Default::default()
        }
    }
}

/// The waypoints left after collapsing those that resolve to the same panorama.
#[derive(Debug, Clone, Default)]
pub struct PanoramaSelection {
    pub waypoints: Vec<Waypoint>,
    pub panoramas: Vec<LatLng>,
    /// Distance in metres between each kept waypoint and its panorama.
    pub errors: Vec<f64>,
}

impl PanoramaSelection {
    pub fn average_error(&self) -> Option<f64> {
        if self.errors.is_empty() {
            None
        } else {
            Some(self.errors.iter().sum::<f64>() / self.errors.len() as f64)
        }
    }
}

/// Drop waypoints without imagery and keep one waypoint per run of identical panoramas.
///
/// Within a run of consecutive waypoints resolving to the same panorama the waypoint
/// closest to the panorama is kept. `metadata` is indexed like `waypoints`.
pub fn select_panoramas(waypoints: Vec<Waypoint>, metadata: Vec<PanoramaMetadata>) -> PanoramaSelection {
    let mut groups: Vec<Vec<(Waypoint, LatLng, f64)>> = vec![];
    let mut last_pano: Option<String> = None;
    for (waypoint, meta) in waypoints.into_iter().zip(metadata) {
        if !meta.is_ok() {
            debug!("waypoint {} has no panorama: {}", waypoint.index, meta.status);
            continue;
        }
        let panorama = GeoPoint::new(meta.location.lat, meta.location.lng);
        let error = waypoint.point.distance(&panorama);
        if last_pano.as_deref() != Some(meta.pano_id.as_str()) {
            groups.push(vec![]);
        }
        last_pano = Some(meta.pano_id);
        if let Some(group) = groups.last_mut() {
            group.push((waypoint, meta.location, error));
        }
    }

    let mut selection = PanoramaSelection::default();
    for group in groups {
        if let Some((waypoint, location, error)) = group
            .into_iter()
            .min_by_key(|&(_, _, error)| FloatOrd(error))
        {
            selection.waypoints.push(waypoint);
            selection.panoramas.push(location);
            selection.errors.push(error);
        }
    }
    selection
}

/// Retrieves images and panorama metadata from the Street View static API.
#[derive(Debug, Clone)]
pub struct StreetViewClient {
    client: Client,
    base_url: String,
    api_key: String,
    width: u32,
    height: u32,
    field_of_view: f64,
    pitch: f64,
}

impl StreetViewClient {
    pub fn new(api_key: impl Into<String>, settings: &HyperlapseSettings) -> Result<Self, RetrievalError> {
        Ok(Self {
            client: Client::builder().build()?,
            base_url: STREET_VIEW_URL.to_owned(),
            api_key: api_key.into(),
            width: settings.image_width,
            height: settings.image_height,
            field_of_view: settings.field_of_view,
            pitch: settings.pitch,
        })
    }

    /// Send requests somewhere other than the public endpoint.
    pub fn with_base_url(self, base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..self
        }
    }

    fn location(waypoint: &Waypoint) -> String {
        format!("{},{}", waypoint.point.lat, waypoint.point.lng)
    }

    /// Look up the panorama nearest to a waypoint. Metadata requests are not billed.
    pub async fn metadata(&self, waypoint: &Waypoint) -> Result<PanoramaMetadata, RetrievalError> {
        let response = self
            .client
            .get(format!("{}/metadata", self.base_url))
            .query(&[
                ("location", Self::location(waypoint)),
                ("source", "outdoor".to_owned()),
                ("key", self.api_key.clone()),
            ])
            .send()
            .await?;
        check_status(response.status())?;
        Ok(response.json().await?)
    }

    /// Look up every waypoint with at most `concurrency` requests in flight.
    ///
    /// The result is indexed like `waypoints`; failed lookups are reported with an
    /// `ERROR` status so that the waypoint is dropped by [`select_panoramas`].
    pub async fn metadata_all(&self, waypoints: &[Waypoint], concurrency: usize) -> Vec<PanoramaMetadata> {
        stream::iter(waypoints)
            .map(|waypoint| async move {
                self.metadata(waypoint).await.unwrap_or_else(|e| {
                    warn!("metadata lookup for waypoint {} failed: {}", waypoint.index, e);
                    PanoramaMetadata::failed("ERROR")
                })
            })
            .buffered(concurrency.max(1))
            .collect()
            .await
    }
}

#[async_trait]
impl ImageSource for StreetViewClient {
    async fn fetch(&self, waypoint: &Waypoint) -> Result<RgbImage, RetrievalError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("size", format!("{}x{}", self.width, self.height)),
                ("location", Self::location(waypoint)),
                ("fov", self.field_of_view.to_string()),
                ("source", "outdoor".to_owned()),
                ("heading", waypoint.heading.to_string()),
                ("pitch", self.pitch.to_string()),
                ("key", self.api_key.clone()),
            ])
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RetrievalError::NoImagery {
                lat: waypoint.point.lat,
                lng: waypoint.point.lng,
                status: status.to_string(),
            });
        }
        check_status(status)?;
        let bytes = response.bytes().await?;
        Ok(image::load_from_memory(&bytes)?.to_rgb8())
    }
}

fn check_status(status: StatusCode) -> Result<(), RetrievalError> {
    match status {
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => Err(RetrievalError::QuotaExceeded(status.as_u16())),
        status if !status.is_success() => Err(RetrievalError::Status(status.as_u16())),
        _ => Ok(()),
    }
}
