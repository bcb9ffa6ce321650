//! Snapshot availability: the probe pass over every time index and the
//! immutable result handed to the rest of the service.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tracing::info;

use crate::constants::MAX_PROBE_CONCURRENCY;
use crate::http_client::HttpTransport;
use crate::snapshot::{SnapshotStatus, SnapshotValidator, TimeIndex};

/// Result of one probe pass. Never mutated in place; reclassification builds
/// the next value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Availability {
    probed: bool,
    valid: Vec<TimeIndex>,
    invalid: BTreeSet<TimeIndex>,
    missing: BTreeSet<TimeIndex>,
}

impl Availability {
    /// Placeholder used until the first probe pass completes.
    pub fn unprobed() -> Self {
        Self::default()
    }

    /// Aggregates probe outcomes. Each index lands in exactly one of `valid`
    /// or `invalid` whatever order the outcomes arrive in; absent snapshots are
    /// additionally tracked in `missing`.
    pub fn from_statuses(statuses: impl IntoIterator<Item = (TimeIndex, SnapshotStatus)>) -> Self {
        let by_index: BTreeMap<TimeIndex, SnapshotStatus> = statuses.into_iter().collect();

        let mut valid = Vec::new();
        let mut invalid = BTreeSet::new();
        let mut missing = BTreeSet::new();
        for (index, status) in by_index {
            match status {
                SnapshotStatus::Valid => valid.push(index),
                SnapshotStatus::Missing => {
                    invalid.insert(index);
                    missing.insert(index);
                }
                SnapshotStatus::Invalid | SnapshotStatus::Unknown => {
                    invalid.insert(index);
                }
            }
        }

        Self {
            probed: true,
            valid,
            invalid,
            missing,
        }
    }

    pub fn is_probed(&self) -> bool {
        self.probed
    }

    /// Valid indices, ascending.
    pub fn valid(&self) -> &[TimeIndex] {
        &self.valid
    }

    pub fn invalid(&self) -> &BTreeSet<TimeIndex> {
        &self.invalid
    }

    pub fn missing(&self) -> &BTreeSet<TimeIndex> {
        &self.missing
    }

    pub fn is_valid(&self, index: TimeIndex) -> bool {
        self.valid.binary_search(&index).is_ok()
    }

    pub fn is_invalid(&self, index: TimeIndex) -> bool {
        self.invalid.contains(&index)
    }

    pub fn is_missing(&self, index: TimeIndex) -> bool {
        self.missing.contains(&index)
    }

    pub fn status(&self, index: TimeIndex) -> SnapshotStatus {
        if self.is_valid(index) {
            SnapshotStatus::Valid
        } else if self.is_missing(index) {
            SnapshotStatus::Missing
        } else if self.is_invalid(index) {
            SnapshotStatus::Invalid
        } else {
            SnapshotStatus::Unknown
        }
    }

    /// Next snapshot after a real fetch found `index` malformed.
    pub fn with_invalid(&self, index: TimeIndex) -> Self {
        let mut next = self.clone();
        next.valid.retain(|candidate| *candidate != index);
        next.missing.remove(&index);
        next.invalid.insert(index);
        next
    }
}

/// Closest valid index to `current`; ties go to the lower index.
pub fn nearest_available(current: TimeIndex, valid: &[TimeIndex]) -> Option<TimeIndex> {
    valid
        .iter()
        .copied()
        .min_by_key(|candidate| (candidate.distance(current), *candidate))
}

/// Summarises indices as contiguous hour ranges, e.g. `0-3h, 5h, 7-11h`.
pub fn format_ranges(indices: &[TimeIndex]) -> String {
    let mut sorted: Vec<u8> = indices.iter().map(|index| index.value()).collect();
    sorted.sort_unstable();
    sorted.dedup();

    let Some((&first, rest)) = sorted.split_first() else {
        return "None".to_string();
    };

    let mut ranges = Vec::new();
    let (mut start, mut end) = (first, first);
    for &value in rest {
        if value == end + 1 {
            end = value;
            continue;
        }
        ranges.push(format_range(start, end));
        start = value;
        end = value;
    }
    ranges.push(format_range(start, end));
    ranges.join(", ")
}

fn format_range(start: u8, end: u8) -> String {
    if start == end {
        format!("{start}h")
    } else {
        format!("{start}-{end}h")
    }
}

/// Tracks in-flight probes and the peak observed during a pass.
#[derive(Debug, Default)]
struct InFlightGauge {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlightGauge {
    fn enter(&self) -> InFlightGuard<'_> {
        let current = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak.fetch_max(current, Ordering::Relaxed);
        InFlightGuard { gauge: self }
    }
}

struct InFlightGuard<'a> {
    gauge: &'a InFlightGauge,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.gauge.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

pub struct AvailabilityProber<T> {
    validator: SnapshotValidator<T>,
    concurrency: usize,
    gauge: InFlightGauge,
}

impl<T: HttpTransport> AvailabilityProber<T> {
    /// `concurrency` is clamped to `1..=MAX_PROBE_CONCURRENCY`.
    pub fn new(validator: SnapshotValidator<T>, concurrency: usize) -> Self {
        Self {
            validator,
            concurrency: concurrency.clamp(1, MAX_PROBE_CONCURRENCY),
            gauge: InFlightGauge::default(),
        }
    }

    /// Probes all 25 indices with at most `concurrency` probes in flight and
    /// returns once every probe has resolved.
    pub async fn probe_all(&self) -> Availability {
        self.gauge.peak.store(0, Ordering::Relaxed);

        let mut pending = TimeIndex::all();
        let mut futures = FuturesUnordered::new();
        for index in pending.by_ref().take(self.concurrency) {
            futures.push(self.probe_one(index));
        }

        let mut statuses: Vec<(TimeIndex, SnapshotStatus)> = Vec::with_capacity(TimeIndex::COUNT);
        while let Some(status) = futures.next().await {
            statuses.push(status);
            if let Some(index) = pending.next() {
                futures.push(self.probe_one(index));
            }
        }

        let availability = Availability::from_statuses(statuses);
        info!(
            "Probed snapshots: valid [{}], invalid [{}], peak concurrency {}",
            format_ranges(availability.valid()),
            format_ranges(&availability.invalid().iter().copied().collect::<Vec<_>>()),
            self.peak_in_flight()
        );
        availability
    }

    async fn probe_one(&self, index: TimeIndex) -> (TimeIndex, SnapshotStatus) {
        let _guard = self.gauge.enter();
        (index, self.validator.probe(index).await)
    }

    /// Peak number of simultaneous probes during the last pass.
    pub fn peak_in_flight(&self) -> usize {
        self.gauge.peak.load(Ordering::Relaxed)
    }
}
