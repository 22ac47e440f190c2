//! Processing history and analytics records.
//!
//! Both are append-only rows keyed by time so that age-based cleanup is a
//! range scan. Neither is a source of truth for entries or references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// One completed ingestion batch for an owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingRecord {
    /// Unique identifier (ULID string)
    pub record_id: String,

    pub owner_id: String,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    pub chunks_processed: u64,
    pub duplicates_detected: u64,
    pub chunks_failed: u64,

    /// Uncompressed bytes of newly stored payloads
    pub bytes_original: u64,

    /// Encoded bytes of newly stored payloads
    pub bytes_stored: u64,

    pub duration_ms: u64,
}

impl ProcessingRecord {
    pub fn new(owner_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            record_id: Ulid::new().to_string(),
            owner_id: owner_id.into(),
            timestamp,
            chunks_processed: 0,
            duplicates_detected: 0,
            chunks_failed: 0,
            bytes_original: 0,
            bytes_stored: 0,
            duration_ms: 0,
        }
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    /// Serialize to JSON bytes for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Kind of analytics event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsKind {
    Ingest,
    Query,
    Release,
    Cleanup,
    Reclassify,
}

/// A single analytics event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    /// Unique identifier (ULID string)
    pub event_id: String,

    pub kind: AnalyticsKind,

    #[serde(default)]
    pub owner_id: Option<String>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    /// Primary count for the event (chunks ingested, hits returned, ...)
    pub count: u64,

    pub duration_ms: u64,
}

impl AnalyticsEvent {
    pub fn new(kind: AnalyticsKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_id: Ulid::new().to_string(),
            kind,
            owner_id: None,
            timestamp,
            count: 0,
            duration_ms: 0,
        }
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.count = count;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    /// Serialize to JSON bytes for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
