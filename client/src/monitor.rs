use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info};
use zone_common::{DeviceReadout, LinkConfig};

use crate::device::DeviceApi;

/// Polls the controller's live data and tracks whether it is reachable
/// and reporting fresh readings.
pub struct LinkMonitor {
    online: watch::Receiver<bool>,
    latest: watch::Receiver<Option<DeviceReadout>>,
    task: JoinHandle<()>,
}

impl LinkMonitor {
    /// Probes once before returning so callers start with a real verdict.
    pub async fn start(device: Arc<dyn DeviceApi>, config: LinkConfig) -> Self {
        let (online_tx, online) = watch::channel(false);
        let (latest_tx, latest) = watch::channel(None);

        probe(device.as_ref(), &config, &online_tx, &latest_tx).await;

        let task = tokio::spawn(async move {
            let period = Duration::from_millis(config.status_poll_interval_ms);
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                interval.tick().await;
                probe(device.as_ref(), &config, &online_tx, &latest_tx).await;
            }
        });

        Self {
            online,
            latest,
            task,
        }
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    pub fn online(&self) -> watch::Receiver<bool> {
        self.online.clone()
    }

    pub fn latest(&self) -> Option<DeviceReadout> {
        self.latest.borrow().clone()
    }
}

impl Drop for LinkMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn probe(
    device: &dyn DeviceApi,
    config: &LinkConfig,
    online_tx: &watch::Sender<bool>,
    latest_tx: &watch::Sender<Option<DeviceReadout>>,
) {
    let online = match device.fetch_readout().await {
        Ok(readout) => {
            let fresh = readout.is_fresh(Utc::now(), config.freshness_window_secs);
            if !fresh {
                debug!("controller readout at {} is stale", readout.timestamp_secs());
            }
            latest_tx.send_replace(Some(readout));
            fresh
        }
        Err(err) => {
            debug!("controller status poll failed: {err:#}");
            false
        }
    };

    online_tx.send_if_modified(|current| {
        if *current == online {
            return false;
        }
        *current = online;
        info!("controller is {}", if online { "online" } else { "offline" });
        true
    });
}
