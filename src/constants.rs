//! Central Configuration Constants
//!
//! Single source of truth for all configuration defaults.
//! Environment variables override the values loaded from the config file.

/// Default central server URL
///
/// For development: http://localhost:8000
pub const DEFAULT_CENTRAL_SERVER: &str = "http://localhost:8000";

/// Default device identity
pub const DEFAULT_DEVICE_ID: &str = "edge-001";

/// Default site location
pub const DEFAULT_LOCATION: &str = "Site-A";

/// Default sampling rate (Hz)
pub const DEFAULT_SAMPLING_RATE: f64 = 1.0;

/// Default sync interval (seconds)
pub const DEFAULT_SYNC_INTERVAL: u64 = 60;

/// Default number of delivery attempts for routine sync
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default maintenance / backup interval (seconds)
pub const DEFAULT_BACKUP_INTERVAL: u64 = 3600;

/// Default cap on locally retained sensor samples
pub const DEFAULT_MAX_LOCAL_RECORDS: usize = 10_000;

/// Default config file name
pub const DEFAULT_CONFIG_FILE: &str = "edge_config.json";

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// App name
pub const APP_NAME: &str = "rockfall-edge";

// ============================================
// Helper functions to read from env
// ============================================

/// Config file path from environment or default
pub fn get_config_path() -> String {
    std::env::var("EDGE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string())
}

/// Device id override
pub fn env_device_id() -> Option<String> {
    non_empty_var("EDGE_DEVICE_ID")
}

/// Site location override
pub fn env_location() -> Option<String> {
    non_empty_var("EDGE_LOCATION")
}

/// Central server URL override
pub fn env_central_server() -> Option<String> {
    non_empty_var("EDGE_CENTRAL_SERVER")
}

/// Sync interval override (seconds)
pub fn env_sync_interval() -> Option<u64> {
    std::env::var("EDGE_SYNC_INTERVAL")
        .ok()
        .and_then(|s| s.parse().ok())
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}
