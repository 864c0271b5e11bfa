//! Storage Types
//!
//! Records as they sit in the local buffer and as they leave it.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logic::config::StorageConfig;
use crate::logic::sensors::ProcessedSample;
use crate::logic::threat::{Alert, AnalysisResult};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("record encoding: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("storage io: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown record kind '{0}'")]
    UnknownKind(String),
}

impl StorageError {
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::Sqlite(_) => "sqlite",
            StorageError::Encode(_) => "encode",
            StorageError::Io(_) => "io",
            StorageError::UnknownKind(_) => "unknown_kind",
        }
    }
}

// ============================================================================
// RECORD KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    #[serde(rename = "sensor_data")]
    Sample,
    #[serde(rename = "analysis_result")]
    Analysis,
    #[serde(rename = "alert")]
    Alert,
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] = [RecordKind::Sample, RecordKind::Analysis, RecordKind::Alert];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Sample => "sensor_data",
            RecordKind::Analysis => "analysis_result",
            RecordKind::Alert => "alert",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StorageError> {
        RecordKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| StorageError::UnknownKind(s.to_string()))
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// PERSISTABLE ITEMS
// ============================================================================

/// Anything the queue accepts
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Persistable {
    Sample(ProcessedSample),
    Analysis(AnalysisResult),
    Alert(Alert),
}

impl Persistable {
    pub fn kind(&self) -> RecordKind {
        match self {
            Persistable::Sample(_) => RecordKind::Sample,
            Persistable::Analysis(_) => RecordKind::Analysis,
            Persistable::Alert(_) => RecordKind::Alert,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Persistable::Sample(s) => s.timestamp(),
            Persistable::Analysis(a) => a.timestamp,
            Persistable::Alert(a) => a.timestamp,
        }
    }

    /// Natural key; only alerts have one
    pub fn key(&self) -> Option<&str> {
        match self {
            Persistable::Alert(a) => Some(&a.id),
            _ => None,
        }
    }

    pub fn decode(kind: RecordKind, payload: &str) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            RecordKind::Sample => Persistable::Sample(serde_json::from_str(payload)?),
            RecordKind::Analysis => Persistable::Analysis(serde_json::from_str(payload)?),
            RecordKind::Alert => Persistable::Alert(serde_json::from_str(payload)?),
        })
    }
}

impl From<ProcessedSample> for Persistable {
    fn from(sample: ProcessedSample) -> Self {
        Persistable::Sample(sample)
    }
}

impl From<AnalysisResult> for Persistable {
    fn from(result: AnalysisResult) -> Self {
        Persistable::Analysis(result)
    }
}

impl From<Alert> for Persistable {
    fn from(alert: Alert) -> Self {
        Persistable::Alert(alert)
    }
}

/// A persisted item with its local bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRecord {
    pub local_id: i64,
    pub synced: bool,
    pub item: Persistable,
}

impl SyncRecord {
    pub fn kind(&self) -> RecordKind {
        self.item.kind()
    }

    /// Wire form: the item's own fields plus `local_id` and `record_type`
    pub fn to_wire(&self) -> Result<serde_json::Value, serde_json::Error> {
        let mut value = serde_json::to_value(&self.item)?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert("local_id".to_string(), self.local_id.into());
            obj.insert("record_type".to_string(), self.kind().as_str().into());
        }
        Ok(value)
    }
}

// ============================================================================
// POLICY + STATS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub max_records: usize,
    pub max_analysis_results: usize,
    pub max_alerts: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::from(&StorageConfig::default())
    }
}

impl From<&StorageConfig> for RetentionPolicy {
    fn from(config: &StorageConfig) -> Self {
        Self {
            max_records: config.max_local_records,
            max_analysis_results: config.max_analysis_results,
            max_alerts: config.max_alerts,
        }
    }
}

impl RetentionPolicy {
    pub fn cap(&self, kind: RecordKind) -> usize {
        match kind {
            RecordKind::Sample => self.max_records,
            RecordKind::Analysis => self.max_analysis_results,
            RecordKind::Alert => self.max_alerts,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total: usize,
    /// Samples and analysis results awaiting routine sync
    pub unsynced_count: usize,
    pub alert_count: usize,
    /// Bytes
    pub storage_size: u64,
    pub per_kind: BTreeMap<RecordKind, usize>,
}

/// A point-in-time copy of the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotHandle {
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub size: u64,
    /// SHA-256, hex
    pub checksum: String,
}
