//! Marker popup lifecycle: at most one air-quality resolution per marker, a
//! session-long cache of finished readings, and cancellation on close.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::air_quality::{AirQualityReading, AirQualityResolver, Cancelled, FailureReason};
use crate::http_client::HttpTransport;
use crate::snapshot::TimeIndex;

/// A marker is addressed by the snapshot it was loaded from and its position
/// in that snapshot.
pub type MarkerKey = (TimeIndex, usize);

#[derive(Debug)]
enum Slot {
    Loading {
        generation: u64,
        token: CancellationToken,
    },
    Ready(AirQualityReading),
}

/// What the popup should display.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum MarkerState {
    Empty,
    Loading,
    Ready { reading: AirQualityReading },
}

/// Handed to whoever runs a resolution; completion is only accepted while the
/// marker's slot still carries the same generation.
#[derive(Clone, Debug)]
pub struct ResolutionTicket {
    pub key: MarkerKey,
    pub generation: u64,
    pub token: CancellationToken,
}

#[derive(Debug)]
pub enum OpenOutcome {
    Cached(AirQualityReading),
    AlreadyLoading,
    Started(ResolutionTicket),
}

#[derive(Debug, Default)]
pub struct MarkerRegistry {
    slots: HashMap<MarkerKey, Slot>,
    next_generation: u64,
}

impl MarkerRegistry {
    pub fn open(&mut self, key: MarkerKey) -> OpenOutcome {
        match self.slots.get(&key) {
            Some(Slot::Ready(reading)) => return OpenOutcome::Cached(reading.clone()),
            Some(Slot::Loading { .. }) => return OpenOutcome::AlreadyLoading,
            None => {}
        }

        self.next_generation += 1;
        let ticket = ResolutionTicket {
            key,
            generation: self.next_generation,
            token: CancellationToken::new(),
        };
        self.slots.insert(
            key,
            Slot::Loading {
                generation: ticket.generation,
                token: ticket.token.clone(),
            },
        );
        OpenOutcome::Started(ticket)
    }

    /// Cancels an in-flight resolution and returns the marker to its empty
    /// state. Finished readings stay cached. Returns true if a request was
    /// cancelled.
    pub fn close(&mut self, key: MarkerKey) -> bool {
        if !matches!(self.slots.get(&key), Some(Slot::Loading { .. })) {
            return false;
        }
        if let Some(Slot::Loading { token, .. }) = self.slots.remove(&key) {
            token.cancel();
        }
        true
    }

    /// Stores a finished reading. Stale or cancelled completions are dropped
    /// and false is returned.
    pub fn complete(&mut self, ticket: &ResolutionTicket, reading: AirQualityReading) -> bool {
        let current = matches!(
            self.slots.get(&ticket.key),
            Some(Slot::Loading { generation, .. }) if *generation == ticket.generation
        );
        if !current || ticket.token.is_cancelled() {
            return false;
        }
        self.slots.insert(ticket.key, Slot::Ready(reading));
        true
    }

    pub fn state(&self, key: MarkerKey) -> MarkerState {
        match self.slots.get(&key) {
            None => MarkerState::Empty,
            Some(Slot::Loading { .. }) => MarkerState::Loading,
            Some(Slot::Ready(reading)) => MarkerState::Ready {
                reading: reading.clone(),
            },
        }
    }

    /// Cancels everything in flight and forgets every cached reading.
    pub fn clear(&mut self) {
        let cleared = self.slots.len();
        for (_, slot) in self.slots.drain() {
            if let Slot::Loading { token, .. } = slot {
                token.cancel();
            }
        }
        debug!("Cleared {cleared} marker slots");
    }
}

/// Maps a finished resolution task to the reading to store, if any.
fn settle(
    key: MarkerKey,
    outcome: Result<Result<AirQualityReading, Cancelled>, JoinError>,
) -> Option<AirQualityReading> {
    match outcome {
        Ok(Ok(reading)) => Some(reading),
        Ok(Err(Cancelled)) => {
            debug!("Air quality request for marker {:?} cancelled", key);
            None
        }
        Err(error) => {
            warn!("Air quality task for marker {:?} died: {error}", key);
            Some(AirQualityReading::Failed {
                reason: FailureReason::Network,
            })
        }
    }
}

pub struct RequestLifecycle<T> {
    resolver: Arc<AirQualityResolver<T>>,
    registry: Arc<Mutex<MarkerRegistry>>,
}

impl<T> Clone for RequestLifecycle<T> {
    fn clone(&self) -> Self {
        Self {
            resolver: self.resolver.clone(),
            registry: self.registry.clone(),
        }
    }
}

impl<T: HttpTransport + 'static> RequestLifecycle<T> {
    pub fn new(resolver: AirQualityResolver<T>) -> Self {
        Self {
            resolver: Arc::new(resolver),
            registry: Arc::new(Mutex::new(MarkerRegistry::default())),
        }
    }

    /// Popup opened: returns the cached reading, or starts a resolution if
    /// none is running.
    pub async fn open(&self, key: MarkerKey, latitude: f64, longitude: f64) -> MarkerState {
        let outcome = self.registry.lock().await.open(key);
        match outcome {
            OpenOutcome::Cached(reading) => MarkerState::Ready { reading },
            OpenOutcome::AlreadyLoading => MarkerState::Loading,
            OpenOutcome::Started(ticket) => {
                self.spawn_resolution(ticket, latitude, longitude);
                MarkerState::Loading
            }
        }
    }

    pub async fn close(&self, key: MarkerKey) -> MarkerState {
        let mut registry = self.registry.lock().await;
        if registry.close(key) {
            debug!("Cancelled air quality request for marker {:?}", key);
        }
        registry.state(key)
    }

    pub async fn state(&self, key: MarkerKey) -> MarkerState {
        self.registry.lock().await.state(key)
    }

    pub async fn clear(&self) {
        self.registry.lock().await.clear();
    }

    fn spawn_resolution(&self, ticket: ResolutionTicket, latitude: f64, longitude: f64) {
        let resolver = self.resolver.clone();
        let registry = self.registry.clone();
        tokio::spawn(async move {
            let token = ticket.token.clone();
            let outcome = tokio::spawn(async move { resolver.resolve(latitude, longitude, &token).await }).await;
            let Some(reading) = settle(ticket.key, outcome) else {
                return;
            };
            if !registry.lock().await.complete(&ticket, reading) {
                debug!("Discarded stale air quality reading for marker {:?}", ticket.key);
            }
        });
    }
}
