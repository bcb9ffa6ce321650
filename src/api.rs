use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::header::CACHE_CONTROL;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{info, warn};

use crate::air_quality::AirQualityReading;
use crate::constants::MAX_TIME_INDEX;
use crate::lifecycle::MarkerState;
use crate::snapshot::TimeIndex;
use crate::types::{AppState, SelectionRequest};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SelectionResponse {
    requested: TimeIndex,
    selected: TimeIndex,
    label: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MarkerResponse {
    index: TimeIndex,
    marker: usize,
    #[serde(flatten)]
    state: MarkerState,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    category_label: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    category_color: Option<&'static str>,
}

impl MarkerResponse {
    fn new(index: TimeIndex, marker: usize, state: MarkerState) -> Self {
        let (message, category_label, category_color) = match &state {
            MarkerState::Ready {
                reading: AirQualityReading::Resolved(resolved),
            } => (None, Some(resolved.status.label()), Some(resolved.status.color())),
            MarkerState::Ready { reading } => (reading.user_message(), None, None),
            _ => (None, None, None),
        };
        Self {
            index,
            marker,
            state,
            message,
            category_label,
            category_color,
        }
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": message.into()
        })),
    )
        .into_response()
}

/// Applied to every response, including extractor rejections and 404s.
pub async fn no_store(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn parse_index(value: i64) -> Result<TimeIndex, Response> {
    u8::try_from(value)
        .ok()
        .and_then(TimeIndex::new)
        .ok_or_else(|| {
            error_response(
                StatusCode::BAD_REQUEST,
                format!("Time index must be between 0 and {MAX_TIME_INDEX}."),
            )
        })
}

pub async fn healthz() -> &'static str {
    "ok"
}

pub async fn view(State(state): State<AppState>) -> Response {
    Json(state.session.view().await).into_response()
}

pub async fn select(
    State(state): State<AppState>,
    payload: Result<Json<SelectionRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return error_response(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };
    let requested = match parse_index(request.index) {
        Ok(index) => index,
        Err(response) => return response,
    };

    let selected = state.session.select(requested).await;
    Json(SelectionResponse {
        requested,
        selected,
        label: selected.label(),
    })
    .into_response()
}

pub async fn reload(State(state): State<AppState>) -> Response {
    let selected = state.session.reload().await;
    info!(
        "Reprobed {}; showing snapshot {selected}",
        state.cfg.snapshot_base_url
    );
    Json(state.session.view().await).into_response()
}

pub async fn open_marker(
    State(state): State<AppState>,
    Path((index, marker)): Path<(i64, usize)>,
) -> Response {
    let index = match parse_index(index) {
        Ok(index) => index,
        Err(response) => return response,
    };
    match state.session.open_marker(index, marker).await {
        Ok(marker_state) => Json(MarkerResponse::new(index, marker, marker_state)).into_response(),
        Err(error) => {
            warn!("Rejected air quality request: {error}");
            error_response(StatusCode::NOT_FOUND, error.to_string())
        }
    }
}

pub async fn close_marker(
    State(state): State<AppState>,
    Path((index, marker)): Path<(i64, usize)>,
) -> Response {
    let index = match parse_index(index) {
        Ok(index) => index,
        Err(response) => return response,
    };
    let marker_state = state.session.close_marker(index, marker).await;
    Json(MarkerResponse::new(index, marker, marker_state)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::air_quality::{NoDataReason, Pm25Reading};
    use crate::aqi::AqiCategory;

    #[test]
    fn index_must_be_in_range() {
        assert_eq!(parse_index(0).unwrap(), TimeIndex::CURRENT);
        assert_eq!(parse_index(24).unwrap().value(), 24);
        assert_eq!(parse_index(25).unwrap_err().status(), StatusCode::BAD_REQUEST);
        assert_eq!(parse_index(-1).unwrap_err().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn no_store_is_added_to_error_responses() {
        let response = no_store(error_response(StatusCode::NOT_FOUND, "gone")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers().get(CACHE_CONTROL).unwrap(), "no-store");
    }

    #[test]
    fn marker_response_flattens_state() {
        let index = TimeIndex::new(2).unwrap();
        let loading = serde_json::to_value(MarkerResponse::new(index, 5, MarkerState::Loading)).unwrap();
        assert_eq!(
            loading,
            serde_json::json!({"index": 2, "marker": 5, "state": "loading"})
        );

        let no_data = MarkerResponse::new(
            index,
            5,
            MarkerState::Ready {
                reading: AirQualityReading::NoData {
                    reason: NoDataReason::NoStationsInRange,
                },
            },
        );
        let value = serde_json::to_value(no_data).unwrap();
        assert_eq!(value["state"], "ready");
        assert_eq!(value["reading"]["reason"], "no-stations-in-range");
        assert_eq!(
            value["message"],
            "No air quality data available from monitoring stations in this area."
        );
    }

    #[test]
    fn resolved_marker_carries_category_legend() {
        let response = MarkerResponse::new(
            TimeIndex::CURRENT,
            0,
            MarkerState::Ready {
                reading: AirQualityReading::Resolved(Pm25Reading {
                    pm25: 40.0,
                    aqi: 112,
                    status: AqiCategory::UnhealthySensitive,
                    station_label: "Harbor (3 km away)".to_string(),
                    sensor_id: Some(1437),
                    sensor_label: "Known PM2.5 sensor".to_string(),
                    source: "OpenAQ v3".to_string(),
                }),
            },
        );
        let value = serde_json::to_value(response).unwrap();
        assert_eq!(value["categoryLabel"], "Unhealthy for Sensitive Groups");
        assert_eq!(value["categoryColor"], "#ff7e00");
        assert_eq!(value["reading"]["stationLabel"], "Harbor (3 km away)");
        assert_eq!(value["reading"]["status"], "unhealthySensitive");
        assert!(value.get("message").is_none());
    }
}
