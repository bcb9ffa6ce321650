//! OpenAQ v3 client: nearby-location search and latest readings per location.
//!
//! Responses are decoded leniently. Envelopes without `results` decode as
//! empty, and individual records that do not fit the expected shape are
//! skipped rather than failing the whole response.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::constants::{
    OPENAQ_API_KEY_HEADER, PM25_NAME_TOKENS, PM25_PARAMETER_ID, PM25_PARAMETER_NAME,
    STATION_QUERY_LIMIT, STATION_QUERY_RADIUS_METERS,
};
use crate::http_client::{HttpRequest, HttpTransport, TransportError};

#[derive(Debug, Error)]
pub enum OpenAqError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("OpenAQ returned status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("OpenAQ response from {url} is not JSON: {reason}")]
    Decode { url: String, reason: String },
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    results: Vec<Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ParameterRef {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
}

impl ParameterRef {
    pub fn is_pm25(&self) -> bool {
        self.name.as_deref() == Some(PM25_PARAMETER_NAME) || self.id == Some(PM25_PARAMETER_ID)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct SensorInfo {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parameter: Option<ParameterRef>,
}

impl SensorInfo {
    pub fn measures_pm25(&self) -> bool {
        self.parameter.as_ref().is_some_and(ParameterRef::is_pm25)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize)]
pub struct Coordinates {
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

/// One entry of the locations search.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Location {
    #[serde(deserialize_with = "required_id")]
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
    #[serde(default)]
    pub sensors: Vec<SensorInfo>,
}

impl Location {
    pub fn position(&self) -> Option<(f64, f64)> {
        let coordinates = self.coordinates?;
        let latitude = coordinates.latitude.filter(|value| value.is_finite())?;
        let longitude = coordinates.longitude.filter(|value| value.is_finite())?;
        Some((latitude, longitude))
    }
}

/// A latest-measurement entry normalized across the shapes OpenAQ has
/// returned: the sensor id may sit at `sensorsId`, `sensorId` or
/// `sensor.id`, and values occasionally arrive as numeric strings.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LatestReading {
    pub value: Option<f64>,
    pub sensors_id: Option<i64>,
    pub parameter: Option<ParameterRef>,
    pub sensor: Option<SensorInfo>,
    pub name: Option<String>,
}

impl LatestReading {
    pub fn from_value(raw: &Value) -> Option<Self> {
        let object = raw.as_object()?;

        Some(Self {
            value: object.get("value").and_then(finite_number),
            sensors_id: object
                .get("sensorsId")
                .or_else(|| object.get("sensorId"))
                .and_then(integer_id),
            parameter: object.get("parameter").and_then(decode_nested),
            sensor: object.get("sensor").and_then(decode_nested),
            name: object.get("name").and_then(Value::as_str).map(str::to_string),
        })
    }

    /// Top-level sensor id, falling back to the nested sensor reference.
    pub fn sensor_id(&self) -> Option<i64> {
        self.sensors_id
            .or_else(|| self.sensor.as_ref().and_then(|sensor| sensor.id))
    }

    /// Free-text name, preferring the reading's own name over the sensor's.
    pub fn display_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .filter(|name| !name.is_empty())
            .or_else(|| self.sensor.as_ref().and_then(|sensor| sensor.name.as_deref()))
    }

    pub fn name_mentions_pm25(&self) -> bool {
        self.display_name().is_some_and(|name| {
            let lowered = name.to_lowercase();
            PM25_NAME_TOKENS.iter().any(|token| lowered.contains(token))
        })
    }
}

/// Accepts finite JSON numbers and strings that parse as one.
pub fn finite_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

fn decode_nested<D: serde::de::DeserializeOwned>(value: &Value) -> Option<D> {
    D::deserialize(value).ok()
}

fn integer_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(integer_id))
}

fn required_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    integer_id(&value).ok_or_else(|| serde::de::Error::custom("location id is not an integer"))
}

pub struct OpenAqClient<T> {
    transport: T,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl<T: HttpTransport> OpenAqClient<T> {
    pub fn new(
        transport: T,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout,
        }
    }

    pub fn locations_url(&self, latitude: f64, longitude: f64) -> String {
        format!(
            "{}/v3/locations?coordinates={latitude},{longitude}&radius={STATION_QUERY_RADIUS_METERS}&limit={STATION_QUERY_LIMIT}",
            self.base_url
        )
    }

    pub fn latest_url(&self, location_id: i64) -> String {
        format!("{}/v3/locations/{location_id}/latest", self.base_url)
    }

    /// Locations near a point, in the order the API returned them.
    pub async fn nearby_locations(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<Vec<Location>, OpenAqError> {
        let results = self.fetch_results(self.locations_url(latitude, longitude)).await?;
        Ok(results
            .into_iter()
            .filter_map(|raw| serde_json::from_value(raw).ok())
            .collect())
    }

    pub async fn latest(&self, location_id: i64) -> Result<Vec<LatestReading>, OpenAqError> {
        let results = self.fetch_results(self.latest_url(location_id)).await?;
        Ok(results.iter().filter_map(LatestReading::from_value).collect())
    }

    async fn fetch_results(&self, url: String) -> Result<Vec<Value>, OpenAqError> {
        let request = HttpRequest::new(url.as_str(), self.timeout)
            .header(OPENAQ_API_KEY_HEADER, &self.api_key);
        let response = self.transport.get(&request).await?;
        if !response.is_success() {
            return Err(OpenAqError::Status {
                url,
                status: response.status,
            });
        }

        let envelope: Envelope =
            serde_json::from_slice(&response.body).map_err(|error| OpenAqError::Decode {
                url,
                reason: error.to_string(),
            })?;
        Ok(envelope.results)
    }
}
