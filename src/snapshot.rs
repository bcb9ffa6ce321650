use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::{MAX_TIME_INDEX, SNAPSHOT_PATH_PREFIX};
use crate::http_client::{HttpRequest, HttpTransport};

/// Hours-ago index of a snapshot resource, 0 being the most recent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct TimeIndex(u8);

impl TimeIndex {
    pub const CURRENT: TimeIndex = TimeIndex(0);
    pub const COUNT: usize = MAX_TIME_INDEX as usize + 1;

    pub fn new(value: u8) -> Option<Self> {
        (value <= MAX_TIME_INDEX).then_some(Self(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Every addressable index, ascending.
    pub fn all() -> impl Iterator<Item = TimeIndex> {
        (0..=MAX_TIME_INDEX).map(TimeIndex)
    }

    pub fn file_name(self) -> String {
        format!("{:02}.json", self.0)
    }

    pub fn url(self, base_url: &str) -> String {
        format!("{base_url}{SNAPSHOT_PATH_PREFIX}/{}", self.file_name())
    }

    pub fn label(self) -> String {
        match self.0 {
            0 => "Current".to_string(),
            1 => "1 hour ago".to_string(),
            hours => format!("{hours} hours ago"),
        }
    }

    pub fn distance(self, other: TimeIndex) -> u8 {
        self.0.abs_diff(other.0)
    }
}

impl TryFrom<u8> for TimeIndex {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        TimeIndex::new(value)
            .ok_or_else(|| format!("time index {value} is outside 0..={MAX_TIME_INDEX}"))
    }
}

impl From<TimeIndex> for u8 {
    fn from(index: TimeIndex) -> Self {
        index.0
    }
}

impl fmt::Display for TimeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    Unknown,
    Missing,
    Invalid,
    Valid,
}

/// Classifies one snapshot resource without ever failing.
pub struct SnapshotValidator<T> {
    transport: T,
    base_url: String,
    timeout: Duration,
    max_bytes: u64,
}

impl<T: HttpTransport> SnapshotValidator<T> {
    pub fn new(transport: T, base_url: impl Into<String>, timeout: Duration, max_bytes: u64) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            timeout,
            max_bytes,
        }
    }

    pub async fn probe(&self, index: TimeIndex) -> SnapshotStatus {
        let url = index.url(&self.base_url);

        let head = match self
            .transport
            .head(&HttpRequest::new(url.as_str(), self.timeout))
            .await
        {
            Ok(head) => head,
            Err(error) => {
                debug!("Snapshot {index} unreachable: {error}");
                return SnapshotStatus::Missing;
            }
        };
        if head.status == 404 {
            return SnapshotStatus::Missing;
        }

        if !looks_like_json(head.content_type.as_deref(), &url) {
            debug!(
                "Snapshot {index} has non-JSON content type {:?}",
                head.content_type
            );
            return SnapshotStatus::Invalid;
        }

        let request = HttpRequest::new(url.as_str(), self.timeout).max_bytes(self.max_bytes);
        let response = match self.transport.get(&request).await {
            Ok(response) => response,
            Err(error) => {
                warn!("Snapshot {index} could not be validated: {error}");
                return SnapshotStatus::Invalid;
            }
        };
        if response.status != 200 {
            return SnapshotStatus::Invalid;
        }

        match serde_json::from_slice::<serde_json::Value>(&response.body) {
            Ok(value) if value.is_array() => SnapshotStatus::Valid,
            Ok(_) => {
                warn!("Snapshot {index} is JSON but not an array");
                SnapshotStatus::Invalid
            }
            Err(error) => {
                warn!("Snapshot {index} has invalid JSON: {error}");
                SnapshotStatus::Invalid
            }
        }
    }
}

/// A present content type must be JSON-typed; an absent one falls back to the
/// resource extension.
fn looks_like_json(content_type: Option<&str>, url: &str) -> bool {
    match content_type.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => {
            let media_type = value
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase();
            media_type == "application/json"
                || media_type == "text/json"
                || media_type.ends_with("+json")
        }
        None => url.ends_with(".json"),
    }
}
