//! Shared map state: the availability snapshot, the selected time index with
//! its dataset, and the marker popups.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::air_quality::AirQualityResolver;
use crate::availability::{format_ranges, nearest_available, Availability, AvailabilityProber};
use crate::config::Config;
use crate::dataset::{BalloonDatasetFetcher, PositionRecord};
use crate::http_client::HttpTransport;
use crate::lifecycle::{MarkerState, RequestLifecycle};
use crate::snapshot::{SnapshotValidator, TimeIndex};
use crate::types::{AvailabilityView, DatasetView, IndexSummary, MarkerSummary, ViewSnapshot};
use crate::utils::iso_from_ms;

#[derive(Clone, Debug, Default)]
enum DatasetState {
    #[default]
    Idle,
    Loading,
    Ready(Arc<Vec<PositionRecord>>),
    Failed(String),
}

#[derive(Debug)]
struct Selection {
    index: TimeIndex,
    dataset: DatasetState,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MarkerError {
    #[error("marker {marker} is not part of the dataset loaded for snapshot {index}")]
    NotLoaded { index: TimeIndex, marker: usize },
}

pub struct Session<T> {
    prober: AvailabilityProber<T>,
    fetcher: BalloonDatasetFetcher<T>,
    markers: RequestLifecycle<T>,
    air_quality_enabled: bool,
    availability: RwLock<Arc<Availability>>,
    probed_at_ms: RwLock<Option<i64>>,
    selection: Mutex<Selection>,
}

impl<T: HttpTransport + Clone + 'static> Session<T> {
    pub fn new(transport: T, cfg: &Config) -> Self {
        let validator = SnapshotValidator::new(
            transport.clone(),
            cfg.snapshot_base_url.as_str(),
            cfg.probe_timeout,
            cfg.probe_max_bytes,
        );
        let resolver = AirQualityResolver::new(
            transport.clone(),
            cfg.openaq_base_url.as_str(),
            cfg.openaq_api_key.clone(),
            cfg.request_timeout,
        );
        Self {
            prober: AvailabilityProber::new(validator, cfg.probe_concurrency),
            fetcher: BalloonDatasetFetcher::new(
                transport,
                cfg.snapshot_base_url.as_str(),
                cfg.request_timeout,
            ),
            air_quality_enabled: resolver.has_api_key(),
            markers: RequestLifecycle::new(resolver),
            availability: RwLock::new(Arc::new(Availability::unprobed())),
            probed_at_ms: RwLock::new(None),
            selection: Mutex::new(Selection {
                index: TimeIndex::CURRENT,
                dataset: DatasetState::Idle,
            }),
        }
    }

    pub async fn availability(&self) -> Arc<Availability> {
        self.availability.read().await.clone()
    }

    /// Selects `requested`, corrected to the nearest available index once
    /// availability is known, and starts loading its dataset. Returns the
    /// index actually selected.
    pub async fn select(self: &Arc<Self>, requested: TimeIndex) -> TimeIndex {
        let availability = self.availability().await;
        let index = if availability.is_probed() {
            nearest_available(requested, availability.valid()).unwrap_or(requested)
        } else {
            requested
        };
        if index != requested {
            info!("Snapshot {requested} unavailable, showing {index} instead");
        }

        {
            let mut selection = self.selection.lock().await;
            selection.index = index;
            selection.dataset = DatasetState::Loading;
        }

        let session = self.clone();
        tokio::spawn(async move { session.load_dataset(index).await });
        index
    }

    /// Probes every index again, drops cached datasets and readings, then
    /// reselects so the current choice snaps to an available index.
    pub async fn reload(self: &Arc<Self>) -> TimeIndex {
        self.markers.clear().await;
        let current = {
            let mut selection = self.selection.lock().await;
            selection.dataset = DatasetState::Idle;
            selection.index
        };

        let availability = Arc::new(self.prober.probe_all().await);
        *self.availability.write().await = availability;
        *self.probed_at_ms.write().await = Some(Utc::now().timestamp_millis());
        self.select(current).await
    }

    /// Fetches the dataset for `index` and applies it only if `index` is still
    /// the selection when the fetch completes.
    async fn load_dataset(&self, index: TimeIndex) {
        let availability = self.availability().await;
        let result = self.fetcher.fetch(index, &availability).await;

        if matches!(&result, Err(error) if error.reclassifies_as_invalid()) {
            let mut current = self.availability.write().await;
            if !current.is_invalid(index) || current.is_valid(index) {
                info!("Marking snapshot {index} invalid after a malformed fetch");
                *current = Arc::new(current.with_invalid(index));
            }
        }

        let mut selection = self.selection.lock().await;
        if selection.index != index {
            debug!(
                "Discarding dataset for snapshot {index}; selection moved to {}",
                selection.index
            );
            return;
        }
        selection.dataset = match result {
            Ok(records) => DatasetState::Ready(Arc::new(records)),
            Err(error) => DatasetState::Failed(error.user_message()),
        };
    }

    async fn marker_position(&self, index: TimeIndex, marker: usize) -> Result<PositionRecord, MarkerError> {
        let selection = self.selection.lock().await;
        match &selection.dataset {
            DatasetState::Ready(records) if selection.index == index => records
                .get(marker)
                .copied()
                .ok_or(MarkerError::NotLoaded { index, marker }),
            _ => Err(MarkerError::NotLoaded { index, marker }),
        }
    }

    pub async fn open_marker(&self, index: TimeIndex, marker: usize) -> Result<MarkerState, MarkerError> {
        let position = self.marker_position(index, marker).await?;
        Ok(self
            .markers
            .open((index, marker), position.latitude, position.longitude)
            .await)
    }

    pub async fn close_marker(&self, index: TimeIndex, marker: usize) -> MarkerState {
        self.markers.close((index, marker)).await
    }

    pub async fn view(&self) -> ViewSnapshot {
        let availability = self.availability().await;
        let probed_at = (*self.probed_at_ms.read().await).and_then(iso_from_ms);
        let selection = self.selection.lock().await;

        let (status, message, records) = match &selection.dataset {
            DatasetState::Idle => ("idle", None, Vec::new()),
            DatasetState::Loading => ("loading", None, Vec::new()),
            DatasetState::Failed(message) => ("error", Some(message.clone()), Vec::new()),
            DatasetState::Ready(records) => (
                "ready",
                None,
                records
                    .iter()
                    .enumerate()
                    .map(|(marker, record)| MarkerSummary::new(marker, record))
                    .collect(),
            ),
        };

        ViewSnapshot {
            selected: selection.index,
            selected_label: selection.index.label(),
            air_quality_enabled: self.air_quality_enabled,
            availability: AvailabilityView {
                probed: availability.is_probed(),
                probed_at,
                valid: availability.valid().to_vec(),
                invalid: availability.invalid().iter().copied().collect(),
                missing: availability.missing().iter().copied().collect(),
                summary: format_ranges(availability.valid()),
                indices: TimeIndex::all()
                    .map(|index| IndexSummary {
                        index,
                        label: index.label(),
                        status: availability.status(index),
                    })
                    .collect(),
            },
            dataset: DatasetView {
                index: selection.index,
                status,
                message,
                records,
            },
        }
    }
}
