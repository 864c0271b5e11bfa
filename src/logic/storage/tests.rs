use std::path::PathBuf;

use chrono::{Duration, TimeZone, Utc};
use tempfile::TempDir;

use super::*;
use crate::logic::config::StorageConfig;
use crate::logic::sensors::{reading, Channel, ProcessedSample, SensorSample};
use crate::logic::threat::{score, Alert, AnalysisResult, Severity, ThresholdConfig};

fn memory_queue(max_records: usize) -> DurableQueue {
    let policy = RetentionPolicy {
        max_records,
        max_analysis_results: 3,
        max_alerts: 2,
    };
    DurableQueue::open_in_memory(policy, PathBuf::from("unused-backups")).unwrap()
}

fn sample(x_tilt: f64) -> ProcessedSample {
    ProcessedSample::bare(
        SensorSample::new("edge-test")
            .with_reading(Channel::Tiltmeter, reading([("x_tilt", x_tilt), ("y_tilt", 0.0)])),
    )
}

fn analysis(x_tilt: f64) -> AnalysisResult {
    score(&sample(x_tilt), &ThresholdConfig::default())
}

fn alert_at(second: u32) -> Alert {
    let timestamp = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, second).unwrap();
    Alert {
        id: crate::logic::threat::types::alert_id(timestamp),
        timestamp,
        threat_level: 0.9,
        severity: Severity::Critical,
        site_location: "Site-A".to_string(),
        message: "test".to_string(),
        data_snapshot: sample(0.09),
        recommended_actions: vec![],
    }
}

fn x_tilt(s: &ProcessedSample) -> f64 {
    s.sample.value(Channel::Tiltmeter, "x_tilt").unwrap()
}

#[test]
fn test_persist_then_list_unsynced_fifo() {
    let queue = memory_queue(100);
    assert!(queue.persist(sample(0.01)));
    assert!(queue.persist(analysis(0.02)));
    assert!(queue.persist(sample(0.03)));

    let records = queue.list_unsynced(10);
    assert_eq!(records.len(), 3);
    assert!(records.windows(2).all(|w| w[0].local_id < w[1].local_id));
    assert_eq!(records[0].kind(), RecordKind::Sample);
    assert_eq!(records[1].kind(), RecordKind::Analysis);
    assert!(records.iter().all(|r| !r.synced));

    // limit applies to the oldest first
    let first = queue.list_unsynced(1);
    assert_eq!(first[0].local_id, records[0].local_id);
}

#[test]
fn test_alerts_not_in_routine_sync() {
    let queue = memory_queue(100);
    queue.persist(alert_at(1));
    queue.persist(sample(0.01));

    let records = queue.list_unsynced(10);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind(), RecordKind::Sample);
    assert_eq!(queue.unsynced_alerts(10).len(), 1);
}

#[test]
fn test_mark_synced_is_idempotent() {
    let queue = memory_queue(100);
    for i in 0..4 {
        queue.persist(sample(0.01 * i as f64));
    }
    let ids: Vec<i64> = queue.list_unsynced(2).iter().map(|r| r.local_id).collect();

    assert!(queue.mark_synced(&ids));
    let after_once = queue.list_unsynced(10);
    assert!(queue.mark_synced(&ids));
    let after_twice = queue.list_unsynced(10);

    assert_eq!(after_once.len(), 2);
    assert_eq!(after_once, after_twice);
    assert!(after_once.iter().all(|r| !ids.contains(&r.local_id)));
}

#[test]
fn test_mark_synced_empty_and_unknown_ids() {
    let queue = memory_queue(100);
    queue.persist(sample(0.01));
    assert!(queue.mark_synced(&[]));
    assert!(queue.mark_synced(&[9_999]));
    assert_eq!(queue.list_unsynced(10).len(), 1);
}

#[test]
fn test_retention_keeps_newest_regardless_of_sync_state() {
    let queue = memory_queue(3);
    for i in 0..6 {
        queue.persist(sample(0.01 * i as f64));
    }
    // the three oldest are synced, the newest are not
    let oldest: Vec<i64> = queue.list_unsynced(3).iter().map(|r| r.local_id).collect();
    queue.mark_synced(&oldest);
    queue.persist(sample(0.06));

    assert_eq!(queue.enforce_retention(), 4);

    let kept: Vec<f64> = queue.recent_samples(10).iter().map(x_tilt).collect();
    assert_eq!(kept.len(), 3);
    assert!((kept[0] - 0.04).abs() < 1e-12);
    assert!((kept[2] - 0.06).abs() < 1e-12);
}

#[test]
fn test_retention_drops_unsynced_under_pressure() {
    let queue = memory_queue(2);
    for i in 0..5 {
        queue.persist(sample(0.01 * i as f64));
    }
    queue.enforce_retention();
    assert_eq!(queue.list_unsynced(10).len(), 2);
}

#[test]
fn test_retention_caps_per_kind() {
    let queue = memory_queue(100);
    for i in 0..5 {
        queue.persist(analysis(0.01 * i as f64));
        queue.persist(alert_at(i));
    }
    queue.persist(sample(0.01));

    queue.enforce_retention();
    let stats = queue.stats();
    assert_eq!(stats.per_kind.get(&RecordKind::Analysis), Some(&3));
    assert_eq!(stats.alert_count, 2);
    assert_eq!(stats.per_kind.get(&RecordKind::Sample), Some(&1));

    let remaining: Vec<String> = queue.unsynced_alerts(10).into_iter().map(|a| a.id).collect();
    assert_eq!(remaining, vec![alert_at(3).id, alert_at(4).id]);
}

#[test]
fn test_alert_with_same_id_is_replaced() {
    let queue = memory_queue(100);
    let first = alert_at(5);
    let mut second = alert_at(5);
    second.threat_level = 0.95;

    assert!(queue.persist(first));
    assert!(queue.persist(second));

    let alerts = queue.unsynced_alerts(10);
    assert_eq!(alerts.len(), 1);
    assert!((alerts[0].threat_level - 0.95).abs() < 1e-12);
}

#[test]
fn test_mark_alert_delivered() {
    let queue = memory_queue(100);
    let alert = alert_at(7);
    queue.persist(alert.clone());

    assert!(queue.mark_alert_delivered(&alert.id));
    assert!(queue.unsynced_alerts(10).is_empty());
    assert!(!queue.mark_alert_delivered("alert_19700101_000000"));
}

#[test]
fn test_recent_samples_oldest_to_newest() {
    let queue = memory_queue(100);
    for i in 0..8 {
        let mut s = sample(0.01 * i as f64);
        s.sample.timestamp = Utc::now() + Duration::seconds(i);
        queue.persist(s);
    }
    queue.persist(analysis(0.5));

    let recent = queue.recent_samples(3);
    let tilts: Vec<f64> = recent.iter().map(x_tilt).collect();
    assert_eq!(tilts.len(), 3);
    assert!((tilts[0] - 0.05).abs() < 1e-12);
    assert!((tilts[2] - 0.07).abs() < 1e-12);
    assert!(recent[0].timestamp() < recent[2].timestamp());
}

#[test]
fn test_stats_counts() {
    let queue = memory_queue(100);
    queue.persist(sample(0.01));
    queue.persist(sample(0.02));
    queue.persist(analysis(0.03));
    queue.persist(alert_at(1));

    let ids: Vec<i64> = queue.list_unsynced(1).iter().map(|r| r.local_id).collect();
    queue.mark_synced(&ids);

    let stats = queue.stats();
    assert_eq!(stats.total, 4);
    assert_eq!(stats.unsynced_count, 2);
    assert_eq!(stats.alert_count, 1);
    assert!(stats.storage_size > 0);
}

#[test]
fn test_on_disk_store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let config = StorageConfig {
        db_path: dir.path().join("data").join("edge.db"),
        backup_dir: dir.path().join("backups"),
        ..Default::default()
    };

    {
        let queue = DurableQueue::open(&config).unwrap();
        queue.persist(sample(0.02));
    }

    let queue = DurableQueue::open(&config).unwrap();
    assert_eq!(queue.list_unsynced(10).len(), 1);
}

#[test]
fn test_snapshot_rotation_keeps_newest() {
    let dir = TempDir::new().unwrap();
    let config = StorageConfig {
        db_path: dir.path().join("edge.db"),
        backup_dir: dir.path().join("backups"),
        ..Default::default()
    };
    let queue = DurableQueue::open(&config).unwrap();
    queue.persist(sample(0.01));

    let mut handles = Vec::new();
    for _ in 0..(SNAPSHOTS_KEPT + 2) {
        handles.push(queue.snapshot().unwrap());
    }

    let files = list_snapshots(&config.backup_dir).unwrap();
    assert_eq!(files.len(), SNAPSHOTS_KEPT);
    let newest = handles.last().unwrap();
    assert!(files.contains(&newest.path));
    assert!(!files.contains(&handles[0].path));
}

#[test]
fn test_snapshot_handle_matches_file() {
    use sha2::{Digest, Sha256};

    let dir = TempDir::new().unwrap();
    let queue = DurableQueue::open_in_memory(RetentionPolicy::default(), dir.path().to_path_buf()).unwrap();
    queue.persist(sample(0.03));

    let handle = queue.snapshot().unwrap();
    let bytes = std::fs::read(&handle.path).unwrap();
    assert_eq!(handle.size, bytes.len() as u64);
    assert_eq!(handle.checksum, hex::encode(Sha256::digest(&bytes)));

    // the copy is a usable store
    let restored = DurableQueue::open(&StorageConfig {
        db_path: handle.path.clone(),
        backup_dir: dir.path().join("nested"),
        ..Default::default()
    })
    .unwrap();
    assert_eq!(restored.recent_samples(10).len(), 1);
}
