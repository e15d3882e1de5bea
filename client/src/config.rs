use std::{io::ErrorKind, path::Path};

use anyhow::Context;
use zone_common::ClientConfig;

const CONFIG_FILE: &str = "client.json";

/// Reads `client.json` from `dir`; a missing file yields defaults.
pub async fn load(dir: &Path) -> anyhow::Result<ClientConfig> {
    let path = dir.join(CONFIG_FILE);
    match tokio::fs::read(&path).await {
        Ok(raw) => serde_json::from_slice::<ClientConfig>(&raw)
            .with_context(|| format!("invalid config in {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(ClientConfig::default()),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}
