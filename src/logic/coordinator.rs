//! Edge Coordinator
//!
//! Owns the configuration and the four components, runs the four loops and
//! routes data between them. Scoring, storage and transport rules live in
//! their own modules.
//!
//! ```text
//! ingestion   : sample -> persist -> score -> persist result
//! analysis    : recent samples -> trend -> [> emergency] escalate + alert + deliver
//! sync        : unsynced batch -> upload -> mark synced; poll updates; heartbeat
//! maintenance : retention -> snapshot -> status report
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::watch;

use super::cloud_sync::{GatewayError, GatewaySettings, SyncGateway, UpdateDirective};
use super::config::{AnalysisConfig, EdgeConfig};
use super::sensors::{SensorDriver, SensorIngestion};
use super::storage::{DurableQueue, RetentionPolicy, StorageError};
use super::threat::{Alert, AnalysisResult, ThreatAnalyzer, ThresholdConfig, TrendParams};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("local store unavailable: {0}")]
    Storage(#[from] StorageError),
    #[error("gateway unavailable: {0}")]
    Gateway(#[from] GatewayError),
}

impl CoordinatorError {
    pub fn kind(&self) -> &'static str {
        match self {
            CoordinatorError::Storage(e) => e.kind(),
            CoordinatorError::Gateway(e) => e.kind(),
        }
    }
}

pub struct EdgeCoordinator {
    config: RwLock<Arc<EdgeConfig>>,
    ingestion: Mutex<SensorIngestion>,
    analyzer: ThreatAnalyzer,
    queue: DurableQueue,
    gateway: SyncGateway,
    stop_tx: watch::Sender<bool>,
}

impl EdgeCoordinator {
    /// Open the on-disk store named in the config and wire everything up
    pub fn new(config: EdgeConfig, driver: Box<dyn SensorDriver>) -> Result<Self, CoordinatorError> {
        let queue = DurableQueue::open(&config.storage)?;
        Self::with_queue(config, driver, queue)
    }

    pub fn with_queue(
        config: EdgeConfig,
        driver: Box<dyn SensorDriver>,
        queue: DurableQueue,
    ) -> Result<Self, CoordinatorError> {
        let gateway = SyncGateway::from_config(&config)?;
        let analyzer = ThreatAnalyzer::with_params(
            config.edge_device.location.clone(),
            ThresholdConfig::from_sensors(&config.sensors),
            trend_params(&config.analysis),
            config.analysis.alert_history,
        );
        let ingestion = SensorIngestion::new(
            config.edge_device.id.clone(),
            config.sensors.clone(),
            config.ingestion.clone(),
            driver,
        );
        let (stop_tx, _) = watch::channel(false);

        Ok(Self {
            config: RwLock::new(Arc::new(config)),
            ingestion: Mutex::new(ingestion),
            analyzer,
            queue,
            gateway,
            stop_tx,
        })
    }

    pub fn config(&self) -> Arc<EdgeConfig> {
        self.config.read().clone()
    }

    pub fn analyzer(&self) -> &ThreatAnalyzer {
        &self.analyzer
    }

    pub fn queue(&self) -> &DurableQueue {
        &self.queue
    }

    pub fn gateway(&self) -> &SyncGateway {
        &self.gateway
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Register, run the four loops until `stop`, then shut down
    pub async fn run(self: Arc<Self>) {
        let config = self.config();
        log::info!(
            "Edge node {} at {} starting ({} Hz, sync every {}s)",
            config.edge_device.id,
            config.edge_device.location,
            config.edge_device.sampling_rate,
            config.communication.sync_interval
        );

        if !self.gateway.register_device().await {
            log::warn!("Continuing unregistered; data stays queued until the server is reachable");
        }

        let handles = [
            tokio::spawn(self.clone().ingestion_loop(self.stop_tx.subscribe())),
            tokio::spawn(self.clone().analysis_loop(self.stop_tx.subscribe())),
            tokio::spawn(self.clone().sync_loop(self.stop_tx.subscribe())),
            tokio::spawn(self.clone().maintenance_loop(self.stop_tx.subscribe())),
        ];

        for handle in handles {
            if let Err(e) = handle.await {
                log::error!("Loop task ended abnormally: {}", e);
            }
        }

        self.shutdown().await;
    }

    /// Ask every loop to finish its current iteration and exit
    pub fn stop(&self) {
        log::info!("Stop requested");
        self.stop_tx.send_replace(true);
    }

    async fn shutdown(&self) {
        self.gateway.send_offline_heartbeat().await;
        if self.queue.snapshot().is_none() {
            log::warn!("Shutdown snapshot skipped");
        }
        log::info!("Edge node stopped");
    }

    // ========================================================================
    // LOOPS
    // ========================================================================

    async fn ingestion_loop(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        log::info!("Ingestion loop started");
        while !*stop.borrow() {
            self.ingest_once();
            if wait_or_stop(&mut stop, self.config().sampling_period()).await {
                break;
            }
        }
        log::info!("Ingestion loop stopped");
    }

    async fn analysis_loop(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        log::info!("Analysis loop started");
        while !*stop.borrow() {
            self.analyze_once().await;
            if wait_or_stop(&mut stop, self.config().analysis_period()).await {
                break;
            }
        }
        log::info!("Analysis loop stopped");
    }

    async fn sync_loop(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        log::info!("Sync loop started");
        while !*stop.borrow() {
            self.sync_once().await;
            if wait_or_stop(&mut stop, self.config().sync_period()).await {
                break;
            }
        }
        log::info!("Sync loop stopped");
    }

    async fn maintenance_loop(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        log::info!("Maintenance loop started");
        while !*stop.borrow() {
            self.maintain_once().await;
            if wait_or_stop(&mut stop, self.config().maintenance_period()).await {
                break;
            }
        }
        log::info!("Maintenance loop stopped");
    }

    // ========================================================================
    // ITERATIONS
    // ========================================================================

    /// One sample through persist and score
    pub fn ingest_once(&self) -> AnalysisResult {
        let processed = self.ingestion.lock().process();
        if !processed.is_trusted() {
            log::debug!("Sample at {} carries implausible readings", processed.timestamp());
        }

        self.queue.persist(processed.clone());

        let result = self.analyzer.analyze(&processed);
        self.queue.persist(result.clone());
        result
    }

    /// Trend check over recent samples; raises and delivers an alert above
    /// the emergency threshold.
    ///
    /// Alert ids have one-second resolution. A pass that re-raises an id
    /// already raised in the same second stores and sends nothing, so each
    /// stored alert keeps exactly one escalated result.
    pub async fn analyze_once(&self) -> Option<Alert> {
        let config = self.config();
        let history = self.queue.recent_samples(config.analysis.history_limit);
        let latest = history.last()?;

        let level = self.analyzer.assess_trend(&history);
        let emergency = self.analyzer.thresholds().emergency();
        if level <= emergency {
            return None;
        }

        let result = self.analyzer.escalate(level, latest);
        let alert = self.analyzer.generate_alert(result.threat_level, latest);
        if self.analyzer.is_duplicate(&alert.id) {
            log::debug!("Alert {} re-raised within the same second; skipped", alert.id);
            return None;
        }

        log::warn!(
            "{} threat ({:.2}) at {}: {}",
            alert.severity,
            alert.threat_level,
            alert.site_location,
            alert.message
        );

        self.queue.persist(result);
        self.queue.persist(alert.clone());

        if self.gateway.send_emergency_alert(&alert).await {
            self.queue.mark_alert_delivered(&alert.id);
        }

        Some(alert)
    }

    /// Upload one batch, apply remote updates, send a heartbeat.
    /// Returns how many records were acknowledged.
    pub async fn sync_once(&self) -> usize {
        let config = self.config();
        let records = self.queue.list_unsynced(config.communication.batch_size);

        let mut synced = 0;
        if !records.is_empty() && self.gateway.sync_batch(&records).await {
            let ids: Vec<i64> = records.iter().map(|r| r.local_id).collect();
            if self.queue.mark_synced(&ids) {
                synced = ids.len();
            }
        }

        for directive in self.gateway.poll_updates().await {
            self.apply_update(directive);
        }

        self.gateway.heartbeat().await;
        synced
    }

    pub async fn maintain_once(&self) {
        self.queue.enforce_retention();
        if self.queue.snapshot().is_none() {
            log::warn!("Maintenance snapshot skipped");
        }

        let stats = self.queue.stats();
        log::info!(
            "Store: {} records, {} unsynced, {} alerts, {} bytes",
            stats.total,
            stats.unsynced_count,
            stats.alert_count,
            stats.storage_size
        );
        self.gateway.report_status(&stats).await;
    }

    // ========================================================================
    // REMOTE UPDATES
    // ========================================================================

    pub fn apply_update(&self, directive: UpdateDirective) {
        match directive {
            UpdateDirective::ThresholdUpdate(patch) => {
                self.analyzer.update_thresholds(&patch);
            }
            UpdateDirective::ConfigUpdate(patch) => {
                let current = self.config();
                match current.merged(&patch) {
                    Ok(next) => self.replace_config(next),
                    Err(e) => {
                        log::warn!(
                            "Config update rejected (kind={}): {}; keeping current config",
                            e.kind(),
                            e
                        );
                    }
                }
            }
        }
    }

    fn replace_config(&self, next: EdgeConfig) {
        self.ingestion
            .lock()
            .reconfigure(&next.edge_device.id, &next.sensors, &next.ingestion);
        self.analyzer
            .reconfigure(&next.edge_device.location, trend_params(&next.analysis));
        self.gateway.reconfigure(GatewaySettings::from_config(&next));
        self.queue.set_retention(RetentionPolicy::from(&next.storage));

        *self.config.write() = Arc::new(next);
        log::info!("Configuration updated from central server");
    }
}

fn trend_params(analysis: &AnalysisConfig) -> TrendParams {
    TrendParams {
        window: analysis.trend_window,
        epsilon: analysis.trend_epsilon,
        horizon: analysis.trend_horizon,
    }
}

/// Sleep for `period` unless a stop arrives first; true means stop
async fn wait_or_stop(stop: &mut watch::Receiver<bool>, period: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(period) => *stop.borrow(),
        _ = stop.changed() => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::sensors::{reading, Channel, Reading, SensorError};
    use crate::logic::storage::{list_snapshots, Persistable, RecordKind};
    use axum::extract::State;
    use axum::http::{StatusCode, Uri};
    use axum::{Json, Router};
    use serde_json::json;
    use tempfile::TempDir;

    struct TiltDriver(f64);

    impl SensorDriver for TiltDriver {
        fn read(&mut self, channel: Channel) -> Result<Reading, SensorError> {
            match channel {
                Channel::Tiltmeter => Ok(reading([("x_tilt", self.0), ("y_tilt", 0.0)])),
                other => Err(SensorError::NotWired(other)),
            }
        }
    }

    fn dead_server() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}", addr)
    }

    #[derive(Default)]
    struct Central {
        paths: Mutex<Vec<String>>,
        updates: Mutex<serde_json::Value>,
    }

    async fn central(State(state): State<Arc<Central>>, uri: Uri) -> (StatusCode, Json<serde_json::Value>) {
        let path = uri.path().to_string();
        state.paths.lock().push(path.clone());
        if path.starts_with("/api/edge/updates/") {
            (StatusCode::OK, Json(state.updates.lock().clone()))
        } else if path == "/api/alerts/emergency" {
            (StatusCode::CREATED, Json(json!({})))
        } else {
            (StatusCode::OK, Json(json!({})))
        }
    }

    async fn spawn_central() -> (String, Arc<Central>) {
        let state = Arc::new(Central::default());
        *state.updates.lock() = json!({ "updates": [] });
        let app = Router::new().fallback(central).with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), state)
    }

    /// Tiltmeter only, fast cadence, small retries
    fn test_config(server: String, dir: &TempDir) -> EdgeConfig {
        let mut config = EdgeConfig::default();
        config.edge_device.id = "edge-test".to_string();
        config.edge_device.location = "Ridge-7".to_string();
        config.edge_device.sampling_rate = 100.0;
        config.sensors.accelerometer.enabled = false;
        config.sensors.weather.enabled = false;
        config.communication.central_server = server;
        config.communication.retry_attempts = 1;
        config.communication.retry_base_delay_ms = 1;
        config.communication.emergency_retry_delay_ms = 1;
        config.storage.db_path = dir.path().join("edge.db");
        config.storage.backup_dir = dir.path().join("backups");
        config
    }

    fn coordinator(config: EdgeConfig, tilt: f64) -> EdgeCoordinator {
        let queue =
            DurableQueue::open_in_memory(RetentionPolicy::from(&config.storage), config.storage.backup_dir.clone())
                .unwrap();
        EdgeCoordinator::with_queue(config, Box::new(TiltDriver(tilt)), queue).unwrap()
    }

    #[test]
    fn test_ingest_persists_sample_and_result() {
        let dir = TempDir::new().unwrap();
        let node = coordinator(test_config(dead_server(), &dir), 0.05);

        let result = node.ingest_once();
        assert!((result.threat_level - 0.5).abs() < 1e-9);

        let stats = node.queue().stats();
        assert_eq!(stats.per_kind.get(&RecordKind::Sample), Some(&1));
        assert_eq!(stats.per_kind.get(&RecordKind::Analysis), Some(&1));
        assert_eq!(stats.unsynced_count, 2);
    }

    #[tokio::test]
    async fn test_quiet_slope_raises_nothing() {
        let dir = TempDir::new().unwrap();
        let node = coordinator(test_config(dead_server(), &dir), 0.01);
        for _ in 0..3 {
            node.ingest_once();
        }

        assert!(node.analyze_once().await.is_none());
        assert_eq!(node.queue().stats().alert_count, 0);
    }

    #[tokio::test]
    async fn test_no_history_raises_nothing() {
        let dir = TempDir::new().unwrap();
        let node = coordinator(test_config(dead_server(), &dir), 0.09);
        assert!(node.analyze_once().await.is_none());
    }

    #[tokio::test]
    async fn test_undeliverable_alert_stays_unsynced() {
        let dir = TempDir::new().unwrap();
        let node = coordinator(test_config(dead_server(), &dir), 0.09);
        for _ in 0..3 {
            node.ingest_once();
        }

        let alert = node.analyze_once().await.unwrap();
        assert!((alert.threat_level - 0.9).abs() < 1e-9);
        assert_eq!(alert.site_location, "Ridge-7");

        assert_eq!(node.queue().unsynced_alerts(10)[0].id, alert.id);
        assert_eq!(node.gateway().status().manual_interventions, 1);

        // the escalated result backing the alert is stored with it
        let escalated: Vec<_> = node
            .queue()
            .list_unsynced(100)
            .into_iter()
            .filter(|r| r.kind() == RecordKind::Analysis)
            .filter_map(|r| match r.item {
                Persistable::Analysis(a) if a.alert_generated => Some(a),
                _ => None,
            })
            .collect();
        assert_eq!(escalated.len(), 1);
        assert!((escalated[0].threat_level - alert.threat_level).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_each_stored_alert_has_one_escalated_result() {
        let dir = TempDir::new().unwrap();
        let node = coordinator(test_config(dead_server(), &dir), 0.09);
        for _ in 0..3 {
            node.ingest_once();
        }

        // back-to-back passes usually share a second and therefore an alert id
        let raised: Vec<_> = [
            node.analyze_once().await,
            node.analyze_once().await,
            node.analyze_once().await,
        ]
        .into_iter()
        .flatten()
        .collect();
        assert!(!raised.is_empty());

        let escalated = node
            .queue()
            .list_unsynced(100)
            .into_iter()
            .filter(|r| matches!(&r.item, Persistable::Analysis(a) if a.alert_generated))
            .count();
        let stored_alerts = node.queue().unsynced_alerts(100);

        assert_eq!(stored_alerts.len(), raised.len());
        assert_eq!(escalated, stored_alerts.len());
    }

    #[tokio::test]
    async fn test_delivered_alert_is_marked_synced() {
        let dir = TempDir::new().unwrap();
        let (url, central) = spawn_central().await;
        let node = coordinator(test_config(url, &dir), 0.09);
        for _ in 0..3 {
            node.ingest_once();
        }

        assert!(node.analyze_once().await.is_some());
        assert!(node.queue().unsynced_alerts(10).is_empty());
        assert!(central.paths.lock().iter().any(|p| p == "/api/alerts/emergency"));
    }

    #[tokio::test]
    async fn test_sync_marks_acknowledged_records() {
        let dir = TempDir::new().unwrap();
        let (url, central) = spawn_central().await;
        let node = coordinator(test_config(url, &dir), 0.02);
        node.ingest_once();
        node.ingest_once();

        assert_eq!(node.sync_once().await, 4);
        assert!(node.queue().list_unsynced(10).is_empty());

        let paths = central.paths.lock().clone();
        assert!(paths.contains(&"/api/edge/sync-data".to_string()));
        assert!(paths.contains(&"/api/edge/updates/edge-test".to_string()));
        assert!(paths.contains(&"/api/edge/heartbeat".to_string()));
    }

    #[tokio::test]
    async fn test_sync_offline_keeps_records() {
        let dir = TempDir::new().unwrap();
        let node = coordinator(test_config(dead_server(), &dir), 0.02);
        node.ingest_once();

        assert_eq!(node.sync_once().await, 0);
        assert_eq!(node.queue().list_unsynced(10).len(), 2);
    }

    #[tokio::test]
    async fn test_sync_applies_threshold_update() {
        let dir = TempDir::new().unwrap();
        let (url, central) = spawn_central().await;
        *central.updates.lock() = json!({
            "updates": [{ "type": "threshold_update", "data": { "tilt_threshold": 0.2 } }]
        });
        let node = coordinator(test_config(url, &dir), 0.05);

        node.sync_once().await;
        assert_eq!(node.analyzer().thresholds().tilt(), 0.2);
        assert!((node.ingest_once().threat_level - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_config_update_propagates() {
        let dir = TempDir::new().unwrap();
        let node = coordinator(test_config(dead_server(), &dir), 0.09);

        let patch = json!({
            "edge_device": { "id": "edge-test", "location": "Ridge-9", "sampling_rate": 2.0 },
            "communication": { "central_server": "http://central.invalid", "retry_attempts": 4 }
        });
        node.apply_update(UpdateDirective::ConfigUpdate(patch.as_object().unwrap().clone()));

        let config = node.config();
        assert_eq!(config.edge_device.location, "Ridge-9");
        assert_eq!(config.sampling_period(), Duration::from_millis(500));
        // untouched sections survive the shallow merge
        assert_eq!(config.storage.backup_dir, dir.path().join("backups"));

        let settings = node.gateway().settings();
        assert_eq!(settings.server_url, "http://central.invalid");
        assert_eq!(settings.retry_attempts, 4);

        let alert = node
            .analyzer()
            .generate_alert(0.9, &node.ingestion.lock().process());
        assert_eq!(alert.site_location, "Ridge-9");
    }

    #[test]
    fn test_invalid_config_update_is_rejected() {
        let dir = TempDir::new().unwrap();
        let node = coordinator(test_config(dead_server(), &dir), 0.09);
        let before = node.config();

        let patch = json!({ "edge_device": { "id": "edge-test", "sampling_rate": 0.0 } });
        node.apply_update(UpdateDirective::ConfigUpdate(patch.as_object().unwrap().clone()));

        assert_eq!(*node.config(), *before);
    }

    #[tokio::test]
    async fn test_run_until_stopped() {
        let dir = TempDir::new().unwrap();
        let node = Arc::new(coordinator(test_config(dead_server(), &dir), 0.02));

        let runner = tokio::spawn(node.clone().run());
        tokio::time::sleep(Duration::from_millis(200)).await;
        node.stop();

        tokio::time::timeout(Duration::from_secs(10), runner)
            .await
            .expect("loops did not stop")
            .unwrap();

        assert!(node.queue().stats().per_kind.get(&RecordKind::Sample).copied().unwrap_or(0) >= 1);
        let snapshots = list_snapshots(&node.config().storage.backup_dir).unwrap();
        assert!(!snapshots.is_empty());
        assert!(!node.gateway().is_connected());
    }
}
