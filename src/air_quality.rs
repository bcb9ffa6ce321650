//! Per-marker PM2.5 lookup against nearby OpenAQ stations.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::aqi::{aqi_from_pm25, AqiCategory};
use crate::constants::{KNOWN_PM25_SENSOR_IDS, OPENAQ_SOURCE_LABEL, STATION_MAX_DISTANCE_KM};
use crate::geo::distance_km;
use crate::http_client::HttpTransport;
use crate::openaq::{LatestReading, Location, OpenAqClient, SensorInfo};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoDataReason {
    NoStationsInRange,
    NoPm25FieldFound,
    ApiKeyMissing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    Network,
    ApiError,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pm25Reading {
    pub pm25: f64,
    pub aqi: u16,
    pub status: AqiCategory,
    pub station_label: String,
    pub sensor_id: Option<i64>,
    pub sensor_label: String,
    pub source: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AirQualityReading {
    Resolved(Pm25Reading),
    NoData { reason: NoDataReason },
    Failed { reason: FailureReason },
}

impl AirQualityReading {
    /// Popup text for readings without a measurement.
    pub fn user_message(&self) -> Option<&'static str> {
        match self {
            Self::Resolved(_) => None,
            Self::NoData {
                reason: NoDataReason::ApiKeyMissing,
            } => Some("Air quality lookups are not configured on this server."),
            Self::NoData { .. } => {
                Some("No air quality data available from monitoring stations in this area.")
            }
            Self::Failed { .. } => Some("Error retrieving air quality data"),
        }
    }
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("air quality request was cancelled")]
pub struct Cancelled;

/// A located station that passed the distance filter.
#[derive(Clone, Debug, PartialEq)]
pub struct StationCandidate {
    pub id: i64,
    pub name: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub distance_km: f64,
    pub sensors: Vec<SensorInfo>,
}

impl StationCandidate {
    pub fn station_label(&self) -> String {
        let name = self
            .name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or("Unknown Location");
        format!("{name} ({} km away)", self.distance_km.round())
    }
}

/// Inclusive at the boundary: a station exactly 100 km out still counts.
pub fn within_range(distance_km: f64) -> bool {
    distance_km <= STATION_MAX_DISTANCE_KM
}

/// Keeps located stations within range, preserving the API's order.
pub fn station_candidates(latitude: f64, longitude: f64, locations: Vec<Location>) -> Vec<StationCandidate> {
    locations
        .into_iter()
        .filter_map(|location| {
            let (station_lat, station_lon) = location.position()?;
            let distance = distance_km(latitude, longitude, station_lat, station_lon);
            within_range(distance).then(|| StationCandidate {
                id: location.id,
                name: location.name,
                latitude: station_lat,
                longitude: station_lon,
                distance_km: distance,
                sensors: location.sensors,
            })
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq)]
pub struct Pm25Match {
    pub value: f64,
    pub sensor_id: Option<i64>,
    pub sensor_label: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pm25Strategy {
    KnownSensor,
    Parameter,
    SensorParameter,
    RosterOrName,
}

impl Pm25Strategy {
    pub const PRIORITY: [Pm25Strategy; 4] = [
        Self::KnownSensor,
        Self::Parameter,
        Self::SensorParameter,
        Self::RosterOrName,
    ];

    /// Matches a single reading. Readings without a finite value never match.
    pub fn matches(self, reading: &LatestReading, roster: &[SensorInfo]) -> Option<Pm25Match> {
        let value = reading.value?;
        let (sensor_id, sensor_label) = match self {
            Self::KnownSensor => known_sensor(reading)?,
            Self::Parameter => direct_parameter(reading)?,
            Self::SensorParameter => sensor_parameter(reading)?,
            Self::RosterOrName => roster_sensor(reading, roster).or_else(|| named_pm25(reading))?,
        };
        Some(Pm25Match {
            value,
            sensor_id,
            sensor_label,
        })
    }
}

type SensorMatch = (Option<i64>, String);

fn parameter_label(name: Option<&str>) -> String {
    name.filter(|name| !name.is_empty()).unwrap_or("PM2.5").to_string()
}

fn known_sensor(reading: &LatestReading) -> Option<SensorMatch> {
    let sensor_id = reading.sensor_id()?;
    KNOWN_PM25_SENSOR_IDS
        .contains(&sensor_id)
        .then(|| (Some(sensor_id), "Known PM2.5 sensor".to_string()))
}

fn direct_parameter(reading: &LatestReading) -> Option<SensorMatch> {
    let parameter = reading.parameter.as_ref().filter(|parameter| parameter.is_pm25())?;
    Some((reading.sensor_id(), parameter_label(parameter.name.as_deref())))
}

fn sensor_parameter(reading: &LatestReading) -> Option<SensorMatch> {
    let sensor = reading.sensor.as_ref().filter(|sensor| sensor.measures_pm25())?;
    let name = sensor.parameter.as_ref().and_then(|parameter| parameter.name.as_deref());
    Some((reading.sensor_id(), parameter_label(name)))
}

fn roster_sensor(reading: &LatestReading, roster: &[SensorInfo]) -> Option<SensorMatch> {
    let sensor_id = reading.sensors_id?;
    let sensor = roster
        .iter()
        .find(|sensor| sensor.id == Some(sensor_id) && sensor.measures_pm25())?;
    let name = sensor.parameter.as_ref().and_then(|parameter| parameter.name.as_deref());
    Some((Some(sensor_id), parameter_label(name)))
}

fn named_pm25(reading: &LatestReading) -> Option<SensorMatch> {
    if !reading.name_mentions_pm25() {
        return None;
    }
    let name = reading.display_name()?.to_string();
    Some((reading.sensor_id(), name))
}

/// Allow-listed sensors win anywhere in the response. Otherwise the first
/// reading that any remaining strategy accepts is used, trying the strategies
/// in priority order on each reading.
pub fn extract_pm25(readings: &[LatestReading], roster: &[SensorInfo]) -> Option<Pm25Match> {
    let (first, rest) = Pm25Strategy::PRIORITY.split_first()?;
    let matched = |strategy: &Pm25Strategy, found: Pm25Match| {
        debug!("PM2.5 matched by {strategy:?}: sensor {:?}", found.sensor_id);
        found
    };

    if let Some(found) = readings
        .iter()
        .find_map(|reading| first.matches(reading, roster))
    {
        return Some(matched(first, found));
    }

    readings.iter().find_map(|reading| {
        rest.iter().find_map(|strategy| {
            let found = strategy.matches(reading, roster)?;
            Some(matched(strategy, found))
        })
    })
}

/// Awaits `future` unless the token fires first. A token cancelled while the
/// future was completing still wins.
async fn until_cancelled<F: Future>(
    token: &CancellationToken,
    future: F,
) -> Result<F::Output, Cancelled> {
    let output = tokio::select! {
        biased;
        _ = token.cancelled() => return Err(Cancelled),
        output = future => output,
    };
    if token.is_cancelled() {
        Err(Cancelled)
    } else {
        Ok(output)
    }
}

pub struct AirQualityResolver<T> {
    client: Option<OpenAqClient<T>>,
}

impl<T: HttpTransport> AirQualityResolver<T> {
    /// Without an API key every resolution short-circuits to
    /// `NoData { api-key-missing }`.
    pub fn new(
        transport: T,
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Self {
        let client = api_key
            .filter(|key| !key.trim().is_empty())
            .map(|key| OpenAqClient::new(transport, base_url, key, timeout));
        Self { client }
    }

    pub fn has_api_key(&self) -> bool {
        self.client.is_some()
    }

    pub async fn resolve(
        &self,
        latitude: f64,
        longitude: f64,
        token: &CancellationToken,
    ) -> Result<AirQualityReading, Cancelled> {
        if token.is_cancelled() {
            return Err(Cancelled);
        }
        let Some(client) = &self.client else {
            return Ok(AirQualityReading::NoData {
                reason: NoDataReason::ApiKeyMissing,
            });
        };

        let locations = match until_cancelled(token, client.nearby_locations(latitude, longitude)).await? {
            Ok(locations) => locations,
            Err(error) => {
                warn!("Station search near ({latitude:.4}, {longitude:.4}) failed: {error}");
                return Ok(AirQualityReading::Failed {
                    reason: FailureReason::ApiError,
                });
            }
        };

        let candidates = station_candidates(latitude, longitude, locations);
        if candidates.is_empty() {
            return Ok(AirQualityReading::NoData {
                reason: NoDataReason::NoStationsInRange,
            });
        }

        for candidate in &candidates {
            debug!(
                "Checking station {} at ({:.4}, {:.4}), {:.1} km away",
                candidate.id, candidate.latitude, candidate.longitude, candidate.distance_km
            );
            let readings = match until_cancelled(token, client.latest(candidate.id)).await? {
                Ok(readings) => readings,
                Err(error) => {
                    warn!("Latest readings for station {} failed: {error}", candidate.id);
                    return Ok(AirQualityReading::Failed {
                        reason: FailureReason::ApiError,
                    });
                }
            };

            if let Some(found) = extract_pm25(&readings, &candidate.sensors) {
                let aqi = aqi_from_pm25(found.value);
                return Ok(AirQualityReading::Resolved(Pm25Reading {
                    pm25: found.value,
                    aqi,
                    status: AqiCategory::from_aqi(aqi),
                    station_label: candidate.station_label(),
                    sensor_id: found.sensor_id,
                    sensor_label: found.sensor_label,
                    source: OPENAQ_SOURCE_LABEL.to_string(),
                }));
            }
            debug!("Station {} reported no PM2.5 reading", candidate.id);
        }

        Ok(AirQualityReading::NoData {
            reason: NoDataReason::NoPm25FieldFound,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::geo::degrees_for_km;
    use crate::http_client::testing::{json_response, status_response, Method, ScriptedTransport};
    use crate::http_client::TransportError;

    const BASE: &str = "https://openaq.test";

    fn resolver(transport: &ScriptedTransport) -> AirQualityResolver<&ScriptedTransport> {
        AirQualityResolver::new(
            transport,
            BASE,
            Some("key".to_string()),
            Duration::from_secs(15),
        )
    }

    fn locations_url(latitude: f64, longitude: f64) -> String {
        OpenAqClient::new(ScriptedTransport::new(), BASE, "key", Duration::from_secs(1))
            .locations_url(latitude, longitude)
    }

    fn latest_url(id: i64) -> String {
        format!("{BASE}/v3/locations/{id}/latest")
    }

    fn readings(raw: serde_json::Value) -> Vec<LatestReading> {
        raw.as_array()
            .unwrap()
            .iter()
            .filter_map(LatestReading::from_value)
            .collect()
    }

    fn script_locations(transport: &ScriptedTransport, body: serde_json::Value) {
        transport.respond(
            Method::Get,
            &locations_url(0.0, 0.0),
            Ok(json_response(&body.to_string())),
        );
    }

    #[test]
    fn range_boundary_is_inclusive() {
        assert!(within_range(100.0));
        assert!(!within_range(100.01));
        assert!(within_range(0.0));
    }

    #[test]
    fn candidates_drop_unlocated_and_distant_stations() {
        let locations: Vec<Location> = serde_json::from_value(json!([
            {"id": 1, "name": "Near", "coordinates": {"latitude": degrees_for_km(40.0), "longitude": 0.0}},
            {"id": 2, "name": "Nowhere"},
            {"id": 3, "name": "Far", "coordinates": {"latitude": degrees_for_km(150.0), "longitude": 0.0}},
            {"id": 4, "coordinates": {"latitude": 0.0, "longitude": degrees_for_km(99.0)}}
        ]))
        .unwrap();

        let candidates = station_candidates(0.0, 0.0, locations);
        assert_eq!(
            candidates.iter().map(|candidate| candidate.id).collect::<Vec<_>>(),
            vec![1, 4]
        );
        assert_eq!(candidates[0].station_label(), "Near (40 km away)");
        assert_eq!(candidates[1].station_label(), "Unknown Location (99 km away)");
    }

    #[test]
    fn allow_listed_sensor_beats_named_parameter() {
        let readings = readings(json!([
            {"value": 40.0, "sensorsId": 99, "parameter": {"id": 2, "name": "pm25"}},
            {"value": 8.0, "sensorsId": 1437}
        ]));

        let found = extract_pm25(&readings, &[]).unwrap();
        assert_eq!(found.value, 8.0);
        assert_eq!(found.sensor_id, Some(1437));
        assert_eq!(found.sensor_label, "Known PM2.5 sensor");
    }

    #[test]
    fn earliest_reading_wins_after_the_allow_list() {
        let readings = readings(json!([
            {"value": 1.0, "sensorsId": 10, "name": "PM2.5 optical"},
            {"value": 2.0, "sensorsId": 11, "sensor": {"id": 11, "parameter": {"name": "pm25"}}},
            {"value": 3.0, "sensorsId": 12, "parameter": {"id": 2}}
        ]));

        let found = extract_pm25(&readings, &[]).unwrap();
        assert_eq!(found.value, 1.0);
        assert_eq!(found.sensor_id, Some(10));
        assert_eq!(found.sensor_label, "PM2.5 optical");

        let found = extract_pm25(&readings[1..], &[]).unwrap();
        assert_eq!(found.value, 2.0);
        assert_eq!(found.sensor_label, "pm25");

        let found = extract_pm25(&readings[2..], &[]).unwrap();
        assert_eq!(found.value, 3.0);
        assert_eq!(found.sensor_label, "PM2.5");
    }

    #[test]
    fn strategies_are_tried_in_priority_order_within_a_reading() {
        let roster: Vec<SensorInfo> = serde_json::from_value(json!([
            {"id": 30, "name": "pm25 ug", "parameter": {"id": 2, "name": "pm25"}}
        ]))
        .unwrap();
        let readings = readings(json!([
            {
                "value": 4.0,
                "sensorsId": 30,
                "name": "pm2.5 sidecar",
                "parameter": {"id": 2, "name": "pm25"},
                "sensor": {"id": 30, "parameter": {"id": 2, "name": "pm2.5 raw"}}
            }
        ]));

        assert_eq!(extract_pm25(&readings, &roster).unwrap().sensor_label, "pm25");
        assert_eq!(
            Pm25Strategy::SensorParameter
                .matches(&readings[0], &roster)
                .unwrap()
                .sensor_label,
            "pm2.5 raw"
        );
        assert_eq!(
            Pm25Strategy::RosterOrName
                .matches(&readings[0], &[])
                .unwrap()
                .sensor_label,
            "pm2.5 sidecar"
        );
    }

    #[test]
    fn roster_lookup_identifies_pm25_sensor() {
        let roster: Vec<SensorInfo> = serde_json::from_value(json!([
            {"id": 20, "name": "o3 ppm", "parameter": {"id": 10, "name": "o3"}},
            {"id": 21, "name": "pm25 ug", "parameter": {"id": 2, "name": "pm25"}}
        ]))
        .unwrap();
        let readings = readings(json!([
            {"value": 0.03, "sensorsId": 20},
            {"value": 17.5, "sensorsId": 21}
        ]));

        let found = extract_pm25(&readings, &roster).unwrap();
        assert_eq!(found.value, 17.5);
        assert_eq!(found.sensor_id, Some(21));
        assert!(extract_pm25(&readings, &[]).is_none());
    }

    #[test]
    fn non_numeric_values_never_match() {
        let readings = readings(json!([
            {"value": null, "sensorsId": 1437},
            {"value": "n/a", "parameter": {"name": "pm25"}},
            {"value": "9.5", "parameter": {"name": "pm25"}}
        ]));

        let found = extract_pm25(&readings, &[]).unwrap();
        assert_eq!(found.value, 9.5);
    }

    #[tokio::test]
    async fn missing_api_key_short_circuits() {
        let transport = ScriptedTransport::new();
        let resolver = AirQualityResolver::new(&transport, BASE, None, Duration::from_secs(15));

        let reading = resolver.resolve(1.0, 2.0, &CancellationToken::new()).await;
        assert_eq!(
            reading,
            Ok(AirQualityReading::NoData {
                reason: NoDataReason::ApiKeyMissing
            })
        );
        assert!(!resolver.has_api_key());
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn first_station_with_pm25_wins_in_network_order() {
        let transport = ScriptedTransport::new();
        script_locations(
            &transport,
            json!({"results": [
                {"id": 7, "name": "Far", "coordinates": {"latitude": degrees_for_km(300.0), "longitude": 0.0}},
                {"id": 8, "name": "Quiet", "coordinates": {"latitude": degrees_for_km(12.0), "longitude": 0.0}},
                {"id": 9, "name": "Harbor", "coordinates": {"latitude": degrees_for_km(30.2), "longitude": 0.0}}
            ]}),
        );
        transport.respond(
            Method::Get,
            &latest_url(8),
            Ok(json_response(r#"{"results": [{"value": 0.02, "parameter": {"name": "o3"}}]}"#)),
        );
        transport.respond(
            Method::Get,
            &latest_url(9),
            Ok(json_response(r#"{"results": [{"value": 35.5, "sensorsId": 5, "parameter": {"name": "pm25"}}]}"#)),
        );

        let reading = resolver(&transport)
            .resolve(0.0, 0.0, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            reading,
            AirQualityReading::Resolved(Pm25Reading {
                pm25: 35.5,
                aqi: 101,
                status: AqiCategory::UnhealthySensitive,
                station_label: "Harbor (30 km away)".to_string(),
                sensor_id: Some(5),
                sensor_label: "pm25".to_string(),
                source: "OpenAQ v3".to_string(),
            })
        );
        let urls: Vec<String> = transport.calls().into_iter().map(|(_, url)| url).collect();
        assert_eq!(urls, vec![locations_url(0.0, 0.0), latest_url(8), latest_url(9)]);
    }

    #[tokio::test]
    async fn no_candidates_and_no_pm25_are_distinct() {
        let transport = ScriptedTransport::new();
        script_locations(&transport, json!({"results": [{"id": 1, "name": "No coordinates"}]}));

        let reading = resolver(&transport).resolve(0.0, 0.0, &CancellationToken::new()).await;
        assert_eq!(
            reading,
            Ok(AirQualityReading::NoData {
                reason: NoDataReason::NoStationsInRange
            })
        );

        let transport = ScriptedTransport::new();
        script_locations(
            &transport,
            json!({"results": [{"id": 2, "coordinates": {"latitude": 0.1, "longitude": 0.1}}]}),
        );
        transport.respond(Method::Get, &latest_url(2), Ok(json_response(r#"{"results": []}"#)));

        let reading = resolver(&transport).resolve(0.0, 0.0, &CancellationToken::new()).await;
        assert_eq!(
            reading,
            Ok(AirQualityReading::NoData {
                reason: NoDataReason::NoPm25FieldFound
            })
        );
    }

    #[tokio::test]
    async fn transport_faults_are_api_errors() {
        let transport = ScriptedTransport::new();
        transport.respond(
            Method::Get,
            &locations_url(0.0, 0.0),
            Err(TransportError::Timeout {
                url: locations_url(0.0, 0.0),
            }),
        );
        let reading = resolver(&transport).resolve(0.0, 0.0, &CancellationToken::new()).await;
        assert_eq!(
            reading,
            Ok(AirQualityReading::Failed {
                reason: FailureReason::ApiError
            })
        );

        let transport = ScriptedTransport::new();
        script_locations(
            &transport,
            json!({"results": [{"id": 3, "coordinates": {"latitude": 0.1, "longitude": 0.1}}]}),
        );
        transport.respond(Method::Get, &latest_url(3), Ok(status_response(500)));
        let reading = resolver(&transport).resolve(0.0, 0.0, &CancellationToken::new()).await;
        assert_eq!(
            reading,
            Ok(AirQualityReading::Failed {
                reason: FailureReason::ApiError
            })
        );
    }

    #[tokio::test]
    async fn cancelling_during_second_call_yields_cancelled() {
        let transport = ScriptedTransport::new();
        script_locations(
            &transport,
            json!({"results": [{"id": 4, "coordinates": {"latitude": 0.1, "longitude": 0.1}}]}),
        );
        let gate = transport.respond_when_released(
            Method::Get,
            &latest_url(4),
            Ok(json_response(r#"{"results": [{"value": 5, "sensorsId": 1437}]}"#)),
        );
        let resolver = resolver(&transport);
        let token = CancellationToken::new();

        let cancel_mid_flight = async {
            while transport.call_count() < 2 {
                tokio::task::yield_now().await;
            }
            token.cancel();
            gate.notify_one();
        };
        let (reading, ()) = tokio::join!(resolver.resolve(0.0, 0.0, &token), cancel_mid_flight);
        assert_eq!(reading, Err(Cancelled));
    }

    #[tokio::test]
    async fn already_cancelled_token_makes_no_calls() {
        let transport = ScriptedTransport::new();
        let token = CancellationToken::new();
        token.cancel();

        assert_eq!(resolver(&transport).resolve(0.0, 0.0, &token).await, Err(Cancelled));
        assert_eq!(transport.call_count(), 0);
    }

    #[test]
    fn readings_serialize_with_kind_tags() {
        let value = serde_json::to_value(AirQualityReading::NoData {
            reason: NoDataReason::NoPm25FieldFound,
        })
        .unwrap();
        assert_eq!(value, json!({"kind": "noData", "reason": "no-pm25-field-found"}));

        let value = serde_json::to_value(AirQualityReading::Failed {
            reason: FailureReason::ApiError,
        })
        .unwrap();
        assert_eq!(value, json!({"kind": "failed", "reason": "api-error"}));
    }
}
