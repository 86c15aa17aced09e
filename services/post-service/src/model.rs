//! Core data types shared by the ingestion and search paths.

use crate::error::PostError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Search radius used when a request does not specify one
pub const DEFAULT_RADIUS_KM: f64 = 200.0;

/// Geographic point in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

impl Location {
    /// Build a location, rejecting coordinates outside the valid range
    pub fn new(lat: f64, lon: f64) -> Result<Self, PostError> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(PostError::InvalidCoordinate {
                field: "lat",
                value: lat.to_string(),
            });
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(PostError::InvalidCoordinate {
                field: "lon",
                value: lon.to_string(),
            });
        }
        Ok(Self { lat, lon })
    }

    /// Parse a location from the raw decimal strings of a request
    pub fn parse(lat: &str, lon: &str, mode: CoordinateParsing) -> Result<Self, PostError> {
        let lat = parse_coordinate("lat", lat, mode)?;
        let lon = parse_coordinate("lon", lon, mode)?;
        Self::new(lat, lon)
    }
}

/// How malformed coordinate strings are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoordinateParsing {
    /// Unparseable values are rejected with `InvalidCoordinate`
    #[default]
    Strict,
    /// Unparseable values become 0.0 (legacy client behaviour)
    Lenient,
}

fn parse_coordinate(
    field: &'static str,
    raw: &str,
    mode: CoordinateParsing,
) -> Result<f64, PostError> {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ if mode == CoordinateParsing::Lenient => Ok(0.0),
        _ => Err(PostError::InvalidCoordinate {
            field,
            value: raw.to_string(),
        }),
    }
}

/// A location-tagged post as stored in the search index and returned to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub user: String,
    pub message: String,
    pub location: Location,
    /// Public image URL, only present once the image upload succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Globally unique post identifier, shared by the blob key, the search
/// document id and the record row key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(Uuid);

impl PostId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PostId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Authenticated user identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal(String);

impl Principal {
    pub fn new(user: impl Into<String>) -> Result<Self, PostError> {
        let user = user.into();
        if user.trim().is_empty() {
            return Err(PostError::Unauthenticated(
                "principal identity is empty".to_string(),
            ));
        }
        Ok(Self(user))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Raw image part of a submission
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub bytes: Bytes,
    pub content_type: Option<String>,
    pub file_name: Option<String>,
}

/// One inbound post, already decoded from the transport
#[derive(Debug, Clone)]
pub struct PostSubmission {
    pub message: String,
    pub location: Location,
    pub image: Option<ImageUpload>,
}

/// Search radius in kilometres
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Radius(f64);

impl Radius {
    pub fn from_km(km: f64) -> Result<Self, PostError> {
        if !km.is_finite() || km < 0.0 {
            return Err(PostError::InvalidRadius(km.to_string()));
        }
        Ok(Self(km))
    }

    /// Parse the bare-number `range` parameter, falling back to `default` when absent
    pub fn parse(raw: Option<&str>, default: Radius) -> Result<Self, PostError> {
        match raw.map(str::trim).filter(|r| !r.is_empty()) {
            None => Ok(default),
            Some(r) => r
                .parse::<f64>()
                .map_err(|_| PostError::InvalidRadius(r.to_string()))
                .and_then(Self::from_km),
        }
    }

    pub fn km(&self) -> f64 {
        self.0
    }

    /// Distance string understood by the search index, e.g. `"10km"`
    pub fn as_distance(&self) -> String {
        format!("{}km", self.0)
    }
}

impl Default for Radius {
    fn default() -> Self {
        Self(DEFAULT_RADIUS_KM)
    }
}

/// Circle query: every post within `radius` of `center`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchQuery {
    pub center: Location,
    pub radius: Radius,
}
