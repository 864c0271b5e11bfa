//! Durable Queue
//!
//! Store-and-forward buffer on SQLite. One table holds samples, analysis
//! results and alerts; every row starts unsynced and is flipped only after
//! the central server acknowledges it.
//!
//! Public operations never return errors: failures are logged with their
//! `kind` and reported as `false` / empty values.

use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection, DatabaseName, OptionalExtension};
use sha2::{Digest, Sha256};

use super::types::{
    Persistable, RecordKind, RetentionPolicy, SnapshotHandle, StorageError, StoreStats, SyncRecord,
};
use crate::logic::config::StorageConfig;
use crate::logic::sensors::ProcessedSample;
use crate::logic::threat::Alert;

/// Snapshots kept in the backup directory
pub const SNAPSHOTS_KEPT: usize = 5;

const SNAPSHOT_PREFIX: &str = "backup_edge_data_";
const SNAPSHOT_EXT: &str = "db";

pub struct DurableQueue {
    conn: Mutex<Connection>,
    backup_dir: PathBuf,
    retention: RwLock<RetentionPolicy>,
}

impl DurableQueue {
    /// Open (or create) the store at `config.db_path`
    pub fn open(config: &StorageConfig) -> Result<Self, StorageError> {
        if let Some(parent) = config.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&config.db_path)?;
        let queue = Self {
            conn: Mutex::new(conn),
            backup_dir: config.backup_dir.clone(),
            retention: RwLock::new(RetentionPolicy::from(config)),
        };
        queue.init_schema()?;

        log::info!("Local store opened at {:?}", config.db_path);
        Ok(queue)
    }

    pub fn open_in_memory(retention: RetentionPolicy, backup_dir: PathBuf) -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let queue = Self {
            conn: Mutex::new(conn),
            backup_dir,
            retention: RwLock::new(retention),
        };
        queue.init_schema()?;
        Ok(queue)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                item_key TEXT UNIQUE,
                timestamp TEXT NOT NULL,
                payload TEXT NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_records_kind
                ON records(kind, id);

            CREATE INDEX IF NOT EXISTS idx_records_unsynced
                ON records(synced, id);
        "#,
        )?;
        Ok(())
    }

    pub fn retention(&self) -> RetentionPolicy {
        *self.retention.read()
    }

    pub fn set_retention(&self, policy: RetentionPolicy) {
        *self.retention.write() = policy;
    }

    // ========================================================================
    // WRITE PATH
    // ========================================================================

    /// Append an unsynced record. Alerts replace any row with the same id.
    pub fn persist(&self, item: impl Into<Persistable>) -> bool {
        let item = item.into();
        match self.insert(&item) {
            Ok(_) => true,
            Err(e) => {
                log::error!("Persist {} failed (kind={}): {}", item.kind(), e.kind(), e);
                false
            }
        }
    }

    fn insert(&self, item: &Persistable) -> Result<i64, StorageError> {
        let payload = serde_json::to_string(item)?;
        let conn = self.conn.lock();

        conn.execute(
            "INSERT INTO records (kind, item_key, timestamp, payload, synced, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)
             ON CONFLICT(item_key) DO UPDATE SET
                timestamp = excluded.timestamp,
                payload = excluded.payload,
                synced = 0",
            params![
                item.kind().as_str(),
                item.key(),
                item.timestamp().to_rfc3339(),
                payload,
                Utc::now().to_rfc3339(),
            ],
        )?;

        let id = match item.key() {
            Some(key) => conn.query_row(
                "SELECT id FROM records WHERE item_key = ?1",
                params![key],
                |row| row.get(0),
            )?,
            None => conn.last_insert_rowid(),
        };
        Ok(id)
    }

    /// Flip records to synced in one transaction. Unknown or already-synced
    /// ids are no-ops.
    pub fn mark_synced(&self, ids: &[i64]) -> bool {
        if ids.is_empty() {
            return true;
        }

        match self.update_synced(ids) {
            Ok(changed) => {
                log::info!("Marked {} records as synced", changed);
                true
            }
            Err(e) => {
                log::error!("Mark synced failed (kind={}): {}", e.kind(), e);
                false
            }
        }
    }

    fn update_synced(&self, ids: &[i64]) -> Result<usize, StorageError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut changed = 0;
        {
            let mut stmt = tx.prepare("UPDATE records SET synced = 1 WHERE id = ?1 AND synced = 0")?;
            for id in ids {
                changed += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    /// Record a successful emergency delivery
    pub fn mark_alert_delivered(&self, alert_id: &str) -> bool {
        match self.find_alert(alert_id) {
            Ok(Some(id)) => self.mark_synced(&[id]),
            Ok(None) => {
                log::warn!("Alert {} not in local store", alert_id);
                false
            }
            Err(e) => {
                log::error!("Alert lookup failed (kind={}): {}", e.kind(), e);
                false
            }
        }
    }

    fn find_alert(&self, alert_id: &str) -> Result<Option<i64>, StorageError> {
        let conn = self.conn.lock();
        let id = conn
            .query_row(
                "SELECT id FROM records WHERE item_key = ?1",
                params![alert_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Oldest-first eviction per kind. Sync state is not considered, so
    /// unsynced rows are dropped when the node stays offline past a cap.
    pub fn enforce_retention(&self) -> usize {
        let policy = self.retention();
        match self.evict(&policy) {
            Ok(removed) => {
                if removed > 0 {
                    log::info!("Retention removed {} records", removed);
                }
                removed
            }
            Err(e) => {
                log::error!("Retention pass failed (kind={}): {}", e.kind(), e);
                0
            }
        }
    }

    fn evict(&self, policy: &RetentionPolicy) -> Result<usize, StorageError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut removed = 0;

        for kind in RecordKind::ALL {
            let cap = i64::try_from(policy.cap(kind)).unwrap_or(i64::MAX);
            removed += tx.execute(
                "DELETE FROM records
                 WHERE kind = ?1 AND id NOT IN (
                     SELECT id FROM records WHERE kind = ?1 ORDER BY id DESC LIMIT ?2
                 )",
                params![kind.as_str(), cap],
            )?;
        }

        tx.commit()?;
        Ok(removed)
    }

    // ========================================================================
    // READ PATH
    // ========================================================================

    /// Unsynced samples and analysis results, oldest first
    pub fn list_unsynced(&self, limit: usize) -> Vec<SyncRecord> {
        self.query_records(
            "SELECT id, kind, payload, synced FROM records
             WHERE synced = 0 AND kind IN ('sensor_data', 'analysis_result')
             ORDER BY id ASC LIMIT ?1",
            limit,
        )
    }

    /// Alerts not yet acknowledged by the central server, oldest first
    pub fn unsynced_alerts(&self, limit: usize) -> Vec<Alert> {
        self.query_records(
            "SELECT id, kind, payload, synced FROM records
             WHERE synced = 0 AND kind = 'alert'
             ORDER BY id ASC LIMIT ?1",
            limit,
        )
        .into_iter()
        .filter_map(|r| match r.item {
            Persistable::Alert(alert) => Some(alert),
            _ => None,
        })
        .collect()
    }

    /// The newest `limit` samples, returned oldest to newest
    pub fn recent_samples(&self, limit: usize) -> Vec<ProcessedSample> {
        let mut samples: Vec<ProcessedSample> = self
            .query_records(
                "SELECT id, kind, payload, synced FROM records
                 WHERE kind = 'sensor_data'
                 ORDER BY id DESC LIMIT ?1",
                limit,
            )
            .into_iter()
            .filter_map(|r| match r.item {
                Persistable::Sample(sample) => Some(sample),
                _ => None,
            })
            .collect();

        samples.reverse();
        samples
    }

    fn query_records(&self, sql: &str, limit: usize) -> Vec<SyncRecord> {
        match self.load(sql, limit) {
            Ok(records) => records,
            Err(e) => {
                log::error!("Store query failed (kind={}): {}", e.kind(), e);
                Vec::new()
            }
        }
    }

    fn load(&self, sql: &str, limit: usize) -> Result<Vec<SyncRecord>, StorageError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;

        let rows = stmt.query_map(params![limit], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, bool>(3)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (local_id, kind, payload, synced) = row?;
            let kind = RecordKind::parse(&kind)?;
            match Persistable::decode(kind, &payload) {
                Ok(item) => records.push(SyncRecord {
                    local_id,
                    synced,
                    item,
                }),
                Err(e) => {
                    log::warn!("Skipping unreadable {} record {}: {}", kind, local_id, e);
                }
            }
        }
        Ok(records)
    }

    pub fn stats(&self) -> StoreStats {
        match self.collect_stats() {
            Ok(stats) => stats,
            Err(e) => {
                log::error!("Stats query failed (kind={}): {}", e.kind(), e);
                StoreStats::default()
            }
        }
    }

    fn collect_stats(&self) -> Result<StoreStats, StorageError> {
        let conn = self.conn.lock();
        let mut stats = StoreStats::default();

        {
            let mut stmt = conn.prepare("SELECT kind, COUNT(*) FROM records GROUP BY kind")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
            for row in rows {
                let (kind, count) = row?;
                let count = usize::try_from(count).unwrap_or(0);
                stats.per_kind.insert(RecordKind::parse(&kind)?, count);
                stats.total += count;
            }
        }

        stats.alert_count = stats.per_kind.get(&RecordKind::Alert).copied().unwrap_or(0);

        let unsynced: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records
             WHERE synced = 0 AND kind IN ('sensor_data', 'analysis_result')",
            [],
            |row| row.get(0),
        )?;
        stats.unsynced_count = usize::try_from(unsynced).unwrap_or(0);

        let page_count: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
        let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
        stats.storage_size = u64::try_from(page_count * page_size).unwrap_or(0);

        Ok(stats)
    }

    // ========================================================================
    // SNAPSHOTS
    // ========================================================================

    /// Online backup into the backup directory; keeps the newest few
    pub fn snapshot(&self) -> Option<SnapshotHandle> {
        match self.write_snapshot() {
            Ok(handle) => {
                log::info!("Data backup created: {:?} ({} bytes)", handle.path, handle.size);
                if let Err(e) = prune_snapshots(&self.backup_dir, SNAPSHOTS_KEPT) {
                    log::warn!("Old backup cleanup failed (kind={}): {}", e.kind(), e);
                }
                Some(handle)
            }
            Err(e) => {
                log::error!("Backup failed (kind={}): {}", e.kind(), e);
                None
            }
        }
    }

    fn write_snapshot(&self) -> Result<SnapshotHandle, StorageError> {
        std::fs::create_dir_all(&self.backup_dir)?;

        let created_at = Utc::now();
        let path = next_snapshot_path(&self.backup_dir, &created_at.format("%Y%m%d_%H%M%S_%3f").to_string());

        {
            let conn = self.conn.lock();
            conn.backup(DatabaseName::Main, &path, None)?;
        }

        let (size, checksum) = file_digest(&path)?;
        Ok(SnapshotHandle {
            size,
            checksum,
            path,
            created_at,
        })
    }
}

/// Streamed SHA-256 of a file: (bytes hashed, hex digest)
fn file_digest(path: &Path) -> Result<(u64, String), StorageError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let size = std::io::copy(&mut file, &mut hasher)?;
    Ok((size, hex::encode(hasher.finalize())))
}

fn next_snapshot_path(dir: &Path, stamp: &str) -> PathBuf {
    let mut path = dir.join(format!("{}{}.{}", SNAPSHOT_PREFIX, stamp, SNAPSHOT_EXT));
    let mut n = 1;
    // same-millisecond snapshots; "_N" still sorts after the bare name
    while path.exists() {
        path = dir.join(format!("{}{}_{}.{}", SNAPSHOT_PREFIX, stamp, n, SNAPSHOT_EXT));
        n += 1;
    }
    path
}

/// Snapshot files in `dir`, oldest first
pub fn list_snapshots(dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
    let mut files = Vec::new();

    if dir.is_dir() {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_snapshot = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.starts_with(SNAPSHOT_PREFIX))
                && path.extension().map_or(false, |e| e == SNAPSHOT_EXT);
            if is_snapshot {
                files.push(path);
            }
        }
    }

    // names embed the timestamp
    files.sort();
    Ok(files)
}

fn prune_snapshots(dir: &Path, keep: usize) -> Result<usize, StorageError> {
    let files = list_snapshots(dir)?;
    let excess = files.len().saturating_sub(keep);

    for old in &files[..excess] {
        if let Err(e) = std::fs::remove_file(old) {
            log::warn!("Could not remove old backup {:?}: {}", old, e);
        }
    }
    Ok(excess)
}
