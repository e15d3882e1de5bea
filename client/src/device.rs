use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;
use zone_common::{CommandReply, CommandRequest, ConfigKind, DeviceReadout, LinkConfig, Packet, ZoneConfig};

/// The controller's HTTP surface.
#[async_trait]
pub trait DeviceApi: Send + Sync {
    async fn fetch_readout(&self) -> anyhow::Result<DeviceReadout>;
    async fn fetch_config(&self, kind: ConfigKind) -> anyhow::Result<Value>;
    async fn send_command(&self, packet: &Packet) -> anyhow::Result<CommandReply>;
}

pub struct HttpDevice {
    client: reqwest::Client,
    zone: ZoneConfig,
}

impl HttpDevice {
    pub fn new(zone: ZoneConfig, config: &LinkConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .context("failed to build http client")?;
        Ok(Self { client, zone })
    }

    async fn get_json(&self, path: &str) -> anyhow::Result<(StatusCode, Option<Value>)> {
        let url = self.zone.endpoint(path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?;
        let status = response.status();
        if !status.is_success() {
            return Ok((status, None));
        }
        let body = response
            .json::<Value>()
            .await
            .with_context(|| format!("GET {url} returned invalid json"))?;
        Ok((status, Some(body)))
    }
}

#[async_trait]
impl DeviceApi for HttpDevice {
    async fn fetch_readout(&self) -> anyhow::Result<DeviceReadout> {
        match self.get_json("/data").await? {
            (_, Some(body)) => {
                serde_json::from_value(body).context("GET /data returned an unexpected shape")
            }
            (status, None) => bail!("GET /data returned {status}"),
        }
    }

    async fn fetch_config(&self, kind: ConfigKind) -> anyhow::Result<Value> {
        let path = format!("/{}", kind.as_str());
        match self.get_json(&path).await? {
            (_, Some(body)) => Ok(body),
            (StatusCode::NOT_FOUND, None) if kind == ConfigKind::Setpoints => {
                let legacy = format!("/data/{}/setpoints", self.zone.zone_id);
                debug!("{path} not served, falling back to {legacy}");
                match self.get_json(&legacy).await? {
                    (_, Some(body)) => Ok(body),
                    (status, None) => bail!("GET {legacy} returned {status}"),
                }
            }
            (status, None) => bail!("GET {path} returned {status}"),
        }
    }

    async fn send_command(&self, packet: &Packet) -> anyhow::Result<CommandReply> {
        let url = self.zone.endpoint("/command");
        let response = self
            .client
            .post(&url)
            .json(&CommandRequest { packet })
            .send()
            .await
            .with_context(|| format!("POST {url} failed"))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .with_context(|| format!("POST {url} body could not be read"))?;

        if !status.is_success() {
            // Error statuses may still carry a `{status, reason}` body worth surfacing.
            if let Ok(reply) = serde_json::from_slice::<CommandReply>(&body) {
                if !reply.status.trim().is_empty() {
                    return Ok(reply);
                }
            }
            bail!("POST {url} returned {status}");
        }
        serde_json::from_slice(&body).context("POST /command returned an unexpected shape")
    }
}
