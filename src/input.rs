use crate::track::{GeoPoint, Track, TrackError};
use log::*;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InputError {
    #[error("could not read track file: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse gpx: {0}")]
    Gpx(String),
    #[error("could not parse json track: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Track(#[from] TrackError),
}

/// The on-disk formats a track can be read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackFormat {
    /// GPS exchange format; every track and segment is concatenated in order.
    Gpx,
    /// A JSON array of `{"lat": .., "lng": ..}` objects.
    Json,
}

impl TrackFormat {
    /// Files ending in `.gpx` are GPX, everything else is read as JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("gpx") => TrackFormat::Gpx,
            _ => TrackFormat::Json,
        }
    }
}

/// Load and validate the track stored at `path`.
pub fn load_track(path: impl AsRef<Path>) -> Result<Track, InputError> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let points = read_points(reader, TrackFormat::from_path(path))?;
    info!("read {} points from {}", points.len(), path.display());
    Ok(Track::new(points)?)
}

pub fn read_points<R: Read>(reader: R, format: TrackFormat) -> Result<Vec<GeoPoint>, InputError> {
    match format {
        TrackFormat::Gpx => read_gpx(reader),
        TrackFormat::Json => read_json(reader),
    }
}

fn read_gpx<R: Read>(reader: R) -> Result<Vec<GeoPoint>, InputError> {
    let gpx = gpx::read(reader).map_err(|e| InputError::Gpx(e.to_string()))?;
    let points = gpx
        .tracks
        .into_iter()
        .flat_map(|track| track.segments)
        .flat_map(|segment| segment.points)
        .map(|waypoint| {
            let position = waypoint.point();
            GeoPoint {
                lat: position.y(),
                lng: position.x(),
                elevation: waypoint.elevation,
                time: waypoint.time.and_then(|time| time.format().ok()),
            }
        })
        .collect();
    Ok(points)
}

fn read_json<R: Read>(reader: R) -> Result<Vec<GeoPoint>, InputError> {
    #[derive(Deserialize)]
    struct JsonPoint {
        lat: f64,
        #[serde(alias = "lon")]
        lng: f64,
    }

    let points: Vec<JsonPoint> = serde_json::from_reader(reader)?;
    Ok(points
        .into_iter()
        .map(|point| GeoPoint::new(point.lat, point.lng))
        .collect())
}
