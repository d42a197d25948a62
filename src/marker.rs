//! Lifecycle marker files
//!
//! A marker is a file whose name records which execution it belongs to and
//! when it expires:
//!
//! ```text
//! meta/binarymeta_<executionId>_<epochMs>            deletion marker, empty
//! persistMeta/persistedmeta_<executionId>_<epochMs>  persistence marker, content = identifier
//! ```
//!
//! Parsing takes the kind prefix up to the first `_` and the timestamp after
//! the last `_`; whatever lies between is the execution id, so ids that
//! contain `_` round-trip unchanged.

use std::fmt;

/// Directory holding deletion markers
pub const DELETION_MARKER_DIR: &str = "meta";
/// Directory holding persistence markers
pub const PERSISTENCE_MARKER_DIR: &str = "persistMeta";

const DELETION_MARKER_PREFIX: &str = "binarymeta";
const PERSISTENCE_MARKER_PREFIX: &str = "persistedmeta";

pub const MINUTE_MS: i64 = 60_000;
pub const HOUR_MS: i64 = 3_600_000;

/// The two marker families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    Deletion,
    Persistence,
}

impl MarkerKind {
    /// Directory, relative to the storage root, holding this kind of marker
    pub fn dir(self) -> &'static str {
        match self {
            MarkerKind::Deletion => DELETION_MARKER_DIR,
            MarkerKind::Persistence => PERSISTENCE_MARKER_DIR,
        }
    }

    pub fn prefix(self) -> &'static str {
        match self {
            MarkerKind::Deletion => DELETION_MARKER_PREFIX,
            MarkerKind::Persistence => PERSISTENCE_MARKER_PREFIX,
        }
    }
}

impl fmt::Display for MarkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerKind::Deletion => write!(f, "deletion"),
            MarkerKind::Persistence => write!(f, "persistence"),
        }
    }
}

/// Structured form of a marker file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerName {
    pub kind: MarkerKind,
    pub execution_id: String,
    pub expires_at_ms: i64,
}

impl MarkerName {
    pub fn new(kind: MarkerKind, execution_id: impl Into<String>, expires_at_ms: i64) -> Self {
        Self {
            kind,
            execution_id: execution_id.into(),
            expires_at_ms,
        }
    }

    /// Parse a directory entry as a marker of `kind`.
    ///
    /// Returns `None` for foreign files, markers of the other kind and
    /// names whose timestamp is not a number.
    pub fn parse(kind: MarkerKind, file_name: &str) -> Option<Self> {
        let (prefix, rest) = file_name.split_once('_')?;
        if prefix != kind.prefix() {
            return None;
        }
        let (execution_id, ts) = rest.rsplit_once('_')?;
        if execution_id.is_empty() || ts.is_empty() || !ts.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let expires_at_ms = ts.parse::<i64>().ok()?;
        Some(Self::new(kind, execution_id, expires_at_ms))
    }

    pub fn file_name(&self) -> String {
        format!("{}_{}_{}", self.kind.prefix(), self.execution_id, self.expires_at_ms)
    }

    /// Expired markers have a timestamp strictly before `now_ms`
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms < now_ms
    }
}

/// Expiry of a deletion marker written at `now_ms`; saturates instead of wrapping
pub fn deletion_expiry(now_ms: i64, ttl_ms: i64) -> i64 {
    now_ms.saturating_add(ttl_ms)
}

/// Start of the hour following `now_ms`; an exact boundary rolls to the next one
pub fn next_hour_boundary(now_ms: i64) -> i64 {
    (now_ms - now_ms.rem_euclid(HOUR_MS)).saturating_add(HOUR_MS)
}

/// Expiry of a persistence marker written at `now_ms`.
///
/// All markers written within the same hour share one expiry.
pub fn persistence_expiry(now_ms: i64, ttl_ms: i64) -> i64 {
    next_hour_boundary(now_ms).saturating_add(ttl_ms)
}
