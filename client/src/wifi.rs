use anyhow::{bail, Context};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;
use zone_common::normalize_ssid;

#[async_trait]
pub trait WifiLink: Send + Sync {
    async fn connect(
        &self,
        ssid: &str,
        password: &str,
        is_wep: bool,
        is_hidden: bool,
    ) -> anyhow::Result<()>;
    /// `None` when no network is joined.
    async fn current_ssid(&self) -> anyhow::Result<Option<String>>;
    async fn open_settings(&self) -> anyhow::Result<()>;
}

/// NetworkManager through its `nmcli` command line.
pub struct NmcliWifi {
    program: String,
    settings_program: String,
}

impl Default for NmcliWifi {
    fn default() -> Self {
        Self {
            program: "nmcli".to_string(),
            settings_program: "nm-connection-editor".to_string(),
        }
    }
}

impl NmcliWifi {
    async fn run(&self, args: &[&str]) -> anyhow::Result<String> {
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.program))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{} exited with {}: {}", self.program, output.status, stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl WifiLink for NmcliWifi {
    async fn connect(
        &self,
        ssid: &str,
        password: &str,
        is_wep: bool,
        is_hidden: bool,
    ) -> anyhow::Result<()> {
        let mut args = vec!["device", "wifi", "connect", ssid];
        if !password.is_empty() {
            args.extend(["password", password]);
            if is_wep {
                args.extend(["wep-key-type", "key"]);
            }
        }
        if is_hidden {
            args.extend(["hidden", "yes"]);
        }
        debug!("joining {ssid} via {}", self.program);
        self.run(&args).await.map(|_| ())
    }

    async fn current_ssid(&self) -> anyhow::Result<Option<String>> {
        let output = self
            .run(&["--terse", "--fields", "ACTIVE,SSID", "device", "wifi"])
            .await?;
        Ok(parse_active_ssid(&output))
    }

    async fn open_settings(&self) -> anyhow::Result<()> {
        Command::new(&self.settings_program)
            .spawn()
            .with_context(|| format!("failed to launch {}", self.settings_program))?;
        Ok(())
    }
}

/// Picks the active network out of `nmcli -t -f ACTIVE,SSID` output.
fn parse_active_ssid(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let ssid = line.strip_prefix("yes:")?;
        normalize_ssid(&ssid.replace("\\:", ":"))
    })
}
