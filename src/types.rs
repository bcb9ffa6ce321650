use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::dataset::{AltitudeBand, PositionRecord};
use crate::http_client::ReqwestTransport;
use crate::session::Session;
use crate::snapshot::{SnapshotStatus, TimeIndex};

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub session: Arc<Session<ReqwestTransport>>,
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct SelectionRequest {
    pub index: i64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSummary {
    pub index: TimeIndex,
    pub label: String,
    pub status: SnapshotStatus,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityView {
    pub probed: bool,
    pub probed_at: Option<String>,
    pub valid: Vec<TimeIndex>,
    pub invalid: Vec<TimeIndex>,
    pub missing: Vec<TimeIndex>,
    pub summary: String,
    pub indices: Vec<IndexSummary>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerSummary {
    pub marker: usize,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_km: f64,
    pub band: AltitudeBand,
    pub color: &'static str,
}

impl MarkerSummary {
    pub fn new(marker: usize, record: &PositionRecord) -> Self {
        let band = record.altitude_band();
        Self {
            marker,
            latitude: record.latitude,
            longitude: record.longitude,
            altitude_km: record.altitude_km,
            band,
            color: band.color(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetView {
    pub index: TimeIndex,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub records: Vec<MarkerSummary>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewSnapshot {
    pub selected: TimeIndex,
    pub selected_label: String,
    pub air_quality_enabled: bool,
    pub availability: AvailabilityView,
    pub dataset: DatasetView,
}
