// Core revision and event types shared between the daemon and its collaborators.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One published-or-publishable upstream change.
///
/// Revision numbers are strictly increasing per source but not necessarily
/// contiguous; the upstream platform is free to skip numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionRecord {
    /// Strictly increasing integer revision number.
    pub number: u64,
    /// Author identifier as reported by the upstream system, trimmed of padding.
    pub author: String,
    /// Free-text comment; may be empty.
    pub comment: String,
    /// Creation timestamp assembled from the report's date and time fields.
    /// `None` when the report carried no parseable date.
    pub created_at: Option<NaiveDateTime>,
}

impl RevisionRecord {
    pub fn new(number: u64) -> Self {
        Self { number, author: String::new(), comment: String::new(), created_at: None }
    }

    /// Author with surrounding padding removed.
    pub fn author_trimmed(&self) -> &str {
        self.author.trim()
    }
}

/// Notification emitted by the engine, one per successfully published
/// revision and one per unrecoverable error. Collaborators (dashboard,
/// analytics store, issue tracker) subscribe to these; the engine is
/// agnostic to how they are displayed or stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncEvent {
    Published {
        /// Upstream repository URL.
        source: String,
        revision: u64,
        author: String,
        comment: String,
        timestamp: Option<NaiveDateTime>,
    },
    Failure {
        source: String,
        /// Revision that was being processed, when known.
        revision: Option<u64>,
        message: String,
    },
}

impl SyncEvent {
    pub fn source(&self) -> &str {
        match self {
            SyncEvent::Published { source, .. } => source,
            SyncEvent::Failure { source, .. } => source,
        }
    }
}
