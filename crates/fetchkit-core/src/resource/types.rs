//! Core domain types for resources and mirrors.
//!
//! Pure data types with no I/O dependencies.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

/// Well-known `MirrorInfo` key consulted by the weighted mirror policy.
pub const WEIGHT_INFO_KEY: &str = "weight";

/// A typed value in a mirror's info map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MirrorInfoValue {
    /// Integer value (e.g. the weight used for mirror ordering).
    Integer(i64),
    /// Floating-point value.
    Float(f64),
    /// Text value.
    Text(String),
    /// Boolean flag.
    Flag(bool),
}

impl MirrorInfoValue {
    /// Get the value as an integer if it is one.
    #[must_use]
    pub const fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the value as text if it is one.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i64> for MirrorInfoValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<&str> for MirrorInfoValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<bool> for MirrorInfoValue {
    fn from(v: bool) -> Self {
        Self::Flag(v)
    }
}

/// Typed key/value metadata attached to a mirror.
///
/// Keys are ordered so serialized forms are deterministic.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MirrorInfo(BTreeMap<String, MirrorInfoValue>);

impl MirrorInfo {
    /// Create an empty info map.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Insert a value, replacing any existing entry for the key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MirrorInfoValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Look up a value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&MirrorInfoValue> {
        self.0.get(key)
    }

    /// The mirror weight, if one is set.
    #[must_use]
    pub fn weight(&self) -> Option<i64> {
        self.get(WEIGHT_INFO_KEY).and_then(MirrorInfoValue::as_integer)
    }

    /// Whether the map has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One of several equivalent sources for a resource.
///
/// Mirror ids are not necessarily unique across the mirrors of a resource;
/// the `(id, location)` pair identifies an attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileMirror {
    id: String,
    location: String,
    info: MirrorInfo,
}

impl FileMirror {
    /// Create a new mirror from an id and a URL-shaped location.
    pub fn new(id: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            location: location.into(),
            info: MirrorInfo::new(),
        }
    }

    /// Attach an info entry (builder style).
    #[must_use]
    pub fn with_info(mut self, key: impl Into<String>, value: impl Into<MirrorInfoValue>) -> Self {
        self.info.insert(key, value);
        self
    }

    /// Attach a weight used by the weighted mirror policy.
    #[must_use]
    pub fn with_weight(self, weight: i64) -> Self {
        self.with_info(WEIGHT_INFO_KEY, weight)
    }

    /// The mirror id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The URL-shaped location this mirror serves the resource from.
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// The typed info map.
    #[must_use]
    pub const fn info(&self) -> &MirrorInfo {
        &self.info
    }

    /// The mirror weight, if one is set.
    #[must_use]
    pub fn weight(&self) -> Option<i64> {
        self.info.weight()
    }
}

impl fmt::Display for FileMirror {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.location)
    }
}

/// Caller-facing description of a unit of content.
///
/// Immutable: a resource names a primary mirror, an ordered list of
/// alternatives, and optionally a pre-existing local file. A resource with a
/// `file_url` is considered cached on arrival and never touches the network.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    id: String,
    main: FileMirror,
    alternatives: Vec<FileMirror>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_url: Option<PathBuf>,
}

impl Resource {
    /// Create a resource with its primary mirror.
    pub fn new(id: impl Into<String>, main: FileMirror) -> Self {
        Self {
            id: id.into(),
            main,
            alternatives: Vec::new(),
            file_url: None,
        }
    }

    /// Set the ranked alternative mirrors (builder style).
    #[must_use]
    pub fn with_alternatives(mut self, alternatives: Vec<FileMirror>) -> Self {
        self.alternatives = alternatives;
        self
    }

    /// Mark the resource as already materialized at a local path.
    #[must_use]
    pub fn with_file_url(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_url = Some(path.into());
        self
    }

    /// The unique resource id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The primary mirror.
    #[must_use]
    pub const fn main(&self) -> &FileMirror {
        &self.main
    }

    /// The ranked alternative mirrors.
    #[must_use]
    pub fn alternatives(&self) -> &[FileMirror] {
        &self.alternatives
    }

    /// The pre-existing local file, if any.
    #[must_use]
    pub fn file_url(&self) -> Option<&PathBuf> {
        self.file_url.as_ref()
    }

    /// Whether the resource arrived already materialized.
    #[must_use]
    pub const fn is_precached(&self) -> bool {
        self.file_url.is_some()
    }
}

/// Queue ordering key assigned at admission.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadPriority {
    /// Dispatched after all normal work.
    Low,
    /// Default ordering.
    #[default]
    Normal,
    /// Overtakes queued normal and low work.
    High,
}

impl DownloadPriority {
    /// String representation for logs and storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }

    /// Numeric rank used by atomics and ordering.
    #[must_use]
    pub const fn rank(&self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Normal => 1,
            Self::High => 2,
        }
    }

    /// Inverse of [`Self::rank`]; unknown values decode as `Normal`.
    #[must_use]
    pub const fn from_rank(rank: u8) -> Self {
        match rank {
            0 => Self::Low,
            2 => Self::High,
            _ => Self::Normal,
        }
    }
}

impl fmt::Display for DownloadPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Storage priority of a cache record.
///
/// Ordered so "required or higher" is a plain `>=` comparison. Within a
/// session the priority only ever moves upward; a `Permanent` request
/// upgrades an existing `Cached` record, never the reverse.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoragePriority {
    /// Evictable by the cache's own policy.
    #[default]
    Cached,
    /// Pinned; never evicted by the cache's own policy.
    Permanent,
}

impl StoragePriority {
    /// String representation for database storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cached => "cached",
            Self::Permanent => "permanent",
        }
    }

    /// Parse from the storage representation.
    ///
    /// Unknown values default to `Cached`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "permanent" => Self::Permanent,
            _ => Self::Cached,
        }
    }
}

impl fmt::Display for StoragePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-request options accepted by the resource manager.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestOptions {
    /// Queue ordering key.
    pub download_priority: DownloadPriority,
    /// Storage priority recorded in the cache on success.
    pub storage_priority: StoragePriority,
}

impl RequestOptions {
    /// Create options with the defaults (`Normal` / `Cached`).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the download priority.
    #[must_use]
    pub const fn with_download_priority(mut self, priority: DownloadPriority) -> Self {
        self.download_priority = priority;
        self
    }

    /// Set the storage priority.
    #[must_use]
    pub const fn with_storage_priority(mut self, priority: StoragePriority) -> Self {
        self.storage_priority = priority;
        self
    }
}

/// Handle returned to the caller for one admitted resource.
///
/// Equality and hashing consider only the resource id: two requests for the
/// same resource are the same request, whichever mirror was selected first.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadRequest {
    resource_id: String,
    downloadable_id: String,
}

impl DownloadRequest {
    /// Create a request handle.
    pub fn new(resource_id: impl Into<String>, downloadable_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            downloadable_id: downloadable_id.into(),
        }
    }

    /// The resource this request refers to.
    #[must_use]
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    /// Identifier of the initially-selected downloadable.
    #[must_use]
    pub fn downloadable_id(&self) -> &str {
        &self.downloadable_id
    }
}

impl PartialEq for DownloadRequest {
    fn eq(&self, other: &Self) -> bool {
        self.resource_id == other.resource_id
    }
}

impl Eq for DownloadRequest {}

impl Hash for DownloadRequest {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.resource_id.hash(state);
    }
}
