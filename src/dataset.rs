use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::availability::Availability;
use crate::constants::{ALTITUDE_HIGH_MAX_KM, ALTITUDE_LOW_MAX_KM, ALTITUDE_MEDIUM_MAX_KM};
use crate::http_client::{HttpRequest, HttpTransport, TransportError};
use crate::snapshot::TimeIndex;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AltitudeBand {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl AltitudeBand {
    pub fn for_altitude_km(altitude_km: f64) -> Self {
        if altitude_km < ALTITUDE_LOW_MAX_KM {
            Self::Low
        } else if altitude_km < ALTITUDE_MEDIUM_MAX_KM {
            Self::Medium
        } else if altitude_km < ALTITUDE_HIGH_MAX_KM {
            Self::High
        } else {
            Self::VeryHigh
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            Self::Low => "#3388ff",
            Self::Medium => "#33ff88",
            Self::High => "#ffff33",
            Self::VeryHigh => "#ff3333",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRecord {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_km: f64,
}

impl PositionRecord {
    /// Accepts only `[lat, lon, altitudeKm]` with three finite numbers and
    /// in-range coordinates.
    pub fn from_value(value: &Value) -> Option<Self> {
        let [lat, lon, alt] = value.as_array()?.as_slice() else {
            return None;
        };
        let latitude = lat.as_f64().filter(|value| value.is_finite())?;
        let longitude = lon.as_f64().filter(|value| value.is_finite())?;
        let altitude_km = alt.as_f64().filter(|value| value.is_finite())?;
        if latitude.abs() > 90.0 || longitude.abs() > 180.0 {
            return None;
        }
        Some(Self {
            latitude,
            longitude,
            altitude_km,
        })
    }

    pub fn altitude_band(&self) -> AltitudeBand {
        AltitudeBand::for_altitude_km(self.altitude_km)
    }
}

/// Drops every entry that is not a well-formed position tuple.
pub fn filter_positions(entries: &[Value]) -> Vec<PositionRecord> {
    entries.iter().filter_map(PositionRecord::from_value).collect()
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("snapshot {0} does not exist")]
    Missing(TimeIndex),

    #[error("snapshot {0} is not a JSON array of positions")]
    InvalidFormat(TimeIndex),

    #[error("snapshot {index} request failed with status {status}")]
    ServerError { index: TimeIndex, status: u16 },

    #[error("snapshot {index} request got no response: {reason}")]
    NoResponse { index: TimeIndex, reason: String },
}

impl FetchError {
    /// Message shown to the person viewing the map.
    pub fn user_message(&self) -> String {
        const GENERIC: &str = "Failed to fetch balloon data. Please try again later.";
        match self {
            Self::Missing(index) => format!(
                "No balloon data exists for {}. Please select a different time period.",
                index.label().to_lowercase()
            ),
            Self::InvalidFormat(index) => format!(
                "Invalid JSON format in data file for {}. Please select a different time period.",
                index.label().to_lowercase()
            ),
            Self::ServerError { status, .. } => format!("{GENERIC} (Status: {status})"),
            Self::NoResponse { .. } => format!("{GENERIC} (No response from server)"),
        }
    }

    /// True when the failure means the index should be treated as invalid
    /// from now on.
    pub fn reclassifies_as_invalid(&self) -> bool {
        matches!(self, Self::InvalidFormat(_))
    }
}

pub struct BalloonDatasetFetcher<T> {
    transport: T,
    base_url: String,
    timeout: Duration,
}

impl<T: HttpTransport> BalloonDatasetFetcher<T> {
    pub fn new(transport: T, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            timeout,
        }
    }

    pub async fn fetch(
        &self,
        index: TimeIndex,
        availability: &Availability,
    ) -> Result<Vec<PositionRecord>, FetchError> {
        if !availability.valid().is_empty() && !availability.is_valid(index) {
            return Ok(Vec::new());
        }
        if availability.is_missing(index) {
            return Err(FetchError::Missing(index));
        }
        if availability.is_invalid(index) {
            return Err(FetchError::InvalidFormat(index));
        }

        let url = index.url(&self.base_url);
        let response = self
            .transport
            .get(&HttpRequest::new(url.as_str(), self.timeout))
            .await
            .map_err(|error| classify_transport_error(index, error))?;

        if !response.is_success() {
            warn!("Snapshot {index} returned status {}", response.status);
            return Err(FetchError::ServerError {
                index,
                status: response.status,
            });
        }

        let parsed: Value = serde_json::from_slice(&response.body).map_err(|error| {
            warn!("Snapshot {index} body is not JSON: {error}");
            FetchError::InvalidFormat(index)
        })?;
        let Value::Array(entries) = parsed else {
            warn!("Snapshot {index} body is JSON but not an array");
            return Err(FetchError::InvalidFormat(index));
        };

        let records = filter_positions(&entries);
        info!(
            "Fetched {} valid balloons ({} dropped) from {url}",
            records.len(),
            entries.len() - records.len()
        );
        Ok(records)
    }
}

/// Every transport-level failure means no usable response reached us; status
/// codes and parse failures are classified by the caller.
fn classify_transport_error(index: TimeIndex, error: TransportError) -> FetchError {
    warn!("Snapshot {index} fetch failed: {error}");
    FetchError::NoResponse {
        index,
        reason: error.to_string(),
    }
}
