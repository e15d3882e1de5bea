use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectivityConfig {
    pub max_retries: u32,
    pub scan_retry_delay_ms: u64,
    pub join_timeout_ms: u64,
    pub verify_poll_interval_ms: u64,
    pub verify_timeout_ms: u64,
    pub ready_delay_ms: u64,
    /// Used when the tag carries no password. Empty means an open network.
    pub default_password: String,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            scan_retry_delay_ms: 2_000,
            join_timeout_ms: 20_000,
            verify_poll_interval_ms: 1_000,
            verify_timeout_ms: 15_000,
            ready_delay_ms: 800,
            default_password: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileMode {
    /// Adopt the whole polled record as the new baseline.
    Full,
    /// Adopt only the keys that were part of the save.
    ChangedKeys,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    pub poll_interval_ms: u64,
    pub watchdog_ms: u64,
    pub float_tolerance: f64,
    pub settle_delay_ms: u64,
    pub reconcile: ReconcileMode,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 3_000,
            watchdog_ms: 30_000,
            float_tolerance: 0.01,
            settle_delay_ms: 1_500,
            reconcile: ReconcileMode::Full,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LinkConfig {
    pub freshness_window_secs: u64,
    pub status_poll_interval_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            freshness_window_secs: 300,
            status_poll_interval_ms: 5_000,
            request_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HistoryConfig {
    pub capacity: usize,
    pub store_key: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            store_key: "sync_history".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub connectivity: ConnectivityConfig,
    pub sync: SyncConfig,
    pub link: LinkConfig,
    pub history: HistoryConfig,
}

impl ConnectivityConfig {
    pub fn sanitize(&mut self) {
        self.max_retries = self.max_retries.max(1);
        self.verify_poll_interval_ms = self.verify_poll_interval_ms.max(50);
        self.verify_timeout_ms = self.verify_timeout_ms.max(self.verify_poll_interval_ms);
        self.scan_retry_delay_ms = self.scan_retry_delay_ms.max(50);
        self.join_timeout_ms = self.join_timeout_ms.max(1_000);
    }
}

impl SyncConfig {
    pub fn sanitize(&mut self) {
        self.poll_interval_ms = self.poll_interval_ms.max(50);
        self.watchdog_ms = self.watchdog_ms.max(self.poll_interval_ms);
        if !self.float_tolerance.is_finite() || self.float_tolerance <= 0.0 {
            self.float_tolerance = 0.01;
        }
    }
}

impl LinkConfig {
    pub fn sanitize(&mut self) {
        self.freshness_window_secs = self.freshness_window_secs.max(1);
        self.status_poll_interval_ms = self.status_poll_interval_ms.max(100);
        self.request_timeout_ms = self.request_timeout_ms.max(100);
    }
}

impl ClientConfig {
    pub fn sanitize(&mut self) {
        self.connectivity.sanitize();
        self.sync.sanitize();
        self.link.sanitize();
        self.history.capacity = self.history.capacity.clamp(1, 10_000);
        if self.history.store_key.trim().is_empty() {
            self.history.store_key = HistoryConfig::default().store_key;
        }
    }
}
