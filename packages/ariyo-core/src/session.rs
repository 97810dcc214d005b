//! Stream session state: what should currently be playing.
//!
//! Descriptors are immutable inputs supplied by collaborators. A [`Session`]
//! wraps the selected descriptor with the runtime data the engine needs
//! (resolved URL, metadata snapshot, progress bookkeeping) and is replaced
//! wholesale on every source switch.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tokio::time::Instant;

// ─────────────────────────────────────────────────────────────────────────────
// Descriptor
// ─────────────────────────────────────────────────────────────────────────────

/// Identifier of a station or track.
///
/// Collaborators send ids as strings or numbers; both normalize to a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct StationId(String);

impl StationId {
    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for StationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<u64> for StationId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for StationId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Int(i64),
            Float(f64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Self(s),
            Raw::Int(n) => Self(n.to_string()),
            Raw::Float(n) => Self(n.to_string()),
        })
    }
}

/// Whether a source is a never-ending live stream or a finite track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Live radio. Ending is unexpected and triggers recovery.
    #[default]
    Live,
    /// On-demand track with a finite duration.
    #[serde(alias = "onDemand", alias = "on-demand")]
    Ondemand,
}

/// Station or track descriptor.
///
/// Deserialization tolerates the shapes collaborators send:
/// `name` or `title`, `streamUrl` or `url`, string or numeric ids, and any
/// number of unknown fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<StationId>,

    #[serde(default, alias = "title", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(
        default,
        alias = "url",
        alias = "stream_url",
        skip_serializing_if = "Option::is_none"
    )]
    pub stream_url: Option<String>,

    #[serde(default)]
    pub kind: StreamKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl StationDescriptor {
    /// Creates a live station descriptor.
    pub fn live(
        id: impl Into<StationId>,
        name: impl Into<String>,
        stream_url: impl Into<String>,
    ) -> Self {
        Self {
            id: Some(id.into()),
            name: Some(name.into()),
            stream_url: Some(stream_url.into()),
            ..Self::default()
        }
    }

    /// Creates an on-demand track descriptor.
    pub fn track(
        id: impl Into<StationId>,
        title: impl Into<String>,
        stream_url: impl Into<String>,
    ) -> Self {
        Self {
            kind: StreamKind::Ondemand,
            ..Self::live(id, title, stream_url)
        }
    }

    /// The stream URL, if present and non-blank.
    #[must_use]
    pub fn playable_url(&self) -> Option<&str> {
        self.stream_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
    }

    /// Whether this descriptor is a live stream.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.kind == StreamKind::Live
    }

    /// Identity rule: equal ids, else equal names, else equal stream URLs.
    #[must_use]
    pub fn same_source(&self, other: &Self) -> bool {
        if let (Some(a), Some(b)) = (&self.id, &other.id) {
            return a == b;
        }
        if let (Some(a), Some(b)) = (&self.name, &other.name) {
            if a == b {
                return true;
            }
        }
        matches!(
            (self.playable_url(), other.playable_url()),
            (Some(a), Some(b)) if a == b
        )
    }

    /// Whether `key` selects this descriptor (by id, else by name).
    #[must_use]
    pub fn matches_key(&self, key: &str) -> bool {
        self.id.as_ref().is_some_and(|id| id.as_str() == key)
            || self.name.as_deref() == Some(key)
    }

    /// Runtime metadata snapshot: descriptor metadata merged with name, logo and region.
    #[must_use]
    pub fn metadata_snapshot(&self) -> Map<String, Value> {
        let mut snapshot = self.metadata.clone().unwrap_or_default();
        let merged = [
            ("name", &self.name),
            ("logo", &self.logo),
            ("region", &self.region),
        ];
        for (key, value) in merged {
            let v = value.clone().map(Value::String).unwrap_or(Value::Null);
            snapshot.insert(key.to_string(), v);
        }
        snapshot
    }

    /// Short label for logs.
    #[must_use]
    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .or(self.id.as_ref().map(StationId::as_str))
            .unwrap_or("<unnamed>")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Catalog
// ─────────────────────────────────────────────────────────────────────────────

/// Immutable list of stations the engine can select by key.
#[derive(Debug, Clone, Default)]
pub struct StationCatalog {
    stations: Vec<StationDescriptor>,
}

impl StationCatalog {
    /// Creates a catalog from a station list.
    #[must_use]
    pub fn new(stations: Vec<StationDescriptor>) -> Self {
        Self { stations }
    }

    /// Finds the first station whose id, else name, equals `key`.
    #[must_use]
    pub fn find(&self, key: &str) -> Option<&StationDescriptor> {
        self.stations
            .iter()
            .find(|s| s.id.as_ref().is_some_and(|id| id.as_str() == key))
            .or_else(|| self.stations.iter().find(|s| s.matches_key(key)))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StationDescriptor> {
        self.stations.iter()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// Generation marker minted every time a source is primed.
///
/// Asynchronous results carry the token they were started under and are
/// dropped if it no longer matches the session's current token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SelectionToken(u64);

impl SelectionToken {
    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

/// Mints strictly increasing [`SelectionToken`]s.
#[derive(Debug, Default)]
pub struct TokenMint {
    last: u64,
}

impl TokenMint {
    /// Returns the next token.
    pub fn next(&mut self) -> SelectionToken {
        self.last += 1;
        SelectionToken(self.last)
    }
}

/// Runtime record for the selected source.
#[derive(Debug, Clone)]
pub struct Session {
    /// The selected descriptor (never mutated).
    pub current: StationDescriptor,
    /// Metadata snapshot carried by status events.
    pub metadata: Map<String, Value>,
    /// Raw URL the session was created from.
    pub base_url: String,
    /// Last URL assigned to the media element.
    pub resolved_url: Option<String>,
    /// Live stream vs finite track.
    pub is_live: bool,
    /// Token of the most recent priming of this session.
    pub token: SelectionToken,
    /// Last time playback progress was observed.
    pub last_progress_at: Instant,
    /// Last position reported by the element (seconds).
    pub last_position: f64,
    /// Swallow the next pause signal (source handover or stop in progress).
    pub suppress_next_pause: bool,
    /// The single CORS-disabled retry has been used for this session.
    pub cors_fallback_used: bool,
    /// Load the next source with CORS disabled.
    pub cors_disabled: bool,
}

impl Session {
    /// Creates a session for a descriptor whose URL was already validated.
    #[must_use]
    pub fn new(descriptor: StationDescriptor, base_url: String, token: SelectionToken) -> Self {
        Self {
            metadata: descriptor.metadata_snapshot(),
            is_live: descriptor.is_live(),
            current: descriptor,
            base_url,
            resolved_url: None,
            token,
            last_progress_at: Instant::now(),
            last_position: 0.0,
            suppress_next_pause: false,
            cors_fallback_used: false,
            cors_disabled: false,
        }
    }

    /// Records playback progress.
    pub fn record_progress(&mut self, position: Option<f64>) {
        self.last_progress_at = Instant::now();
        if let Some(position) = position {
            self.last_position = position;
        }
    }

    /// Replaces the descriptor for a same-source reselect without touching playback state.
    pub fn refresh_descriptor(&mut self, descriptor: StationDescriptor) {
        self.metadata = descriptor.metadata_snapshot();
        self.current = descriptor;
    }
}
