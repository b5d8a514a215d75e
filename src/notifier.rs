use crate::mirror::{MirrorStore, StorageWriteError};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// "Data changed elsewhere" marker, one per resource or view name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Marker {
    pub at_ms: i64,
    #[serde(default)]
    pub origin: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollResult {
    pub changed: bool,
    pub last_seen: Option<i64>,
    pub origin: Option<String>,
}

/// Publishes and observes change markers in the shared local store.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    origin: String,
}

impl ChangeNotifier {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
        }
    }

    pub fn announce(&self, store: &MirrorStore, name: &str) -> Result<Marker, StorageWriteError> {
        self.announce_at(store, name, chrono::Utc::now().timestamp_millis())
    }

    /// Markers strictly increase per name, even for writes in the same millisecond.
    pub fn announce_at(
        &self,
        store: &MirrorStore,
        name: &str,
        now_ms: i64,
    ) -> Result<Marker, StorageWriteError> {
        let marker = store.update_marker(name, |prev| Marker {
            at_ms: match prev {
                Some(p) if p.at_ms >= now_ms => p.at_ms + 1,
                _ => now_ms,
            },
            origin: self.origin.clone(),
        })?;
        let at_ms = marker.at_ms;
        debug!(name, at_ms, "change announced");
        Ok(marker)
    }

    pub fn current(&self, store: &MirrorStore, name: &str) -> Option<i64> {
        store.read_marker(name).map(|m| m.at_ms)
    }

    /// Equal or older markers never report a change.
    pub fn poll(&self, store: &MirrorStore, name: &str, last_seen: Option<i64>) -> PollResult {
        match store.read_marker(name) {
            Some(m) if last_seen.map(|s| m.at_ms > s).unwrap_or(true) => PollResult {
                changed: true,
                last_seen: Some(m.at_ms),
                origin: Some(m.origin),
            },
            _ => PollResult {
                changed: false,
                last_seen,
                origin: None,
            },
        }
    }
}
