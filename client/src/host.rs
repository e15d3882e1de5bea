use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::{info, warn};
use zone_common::{
    domain::diff, ClientConfig, ConfigDomain, ConnectivityPhase, ScheduleDomain, SetpointsDomain,
    SyncOutcome, ZoneConfig,
};

use crate::{
    config,
    connectivity::ConnectivitySession,
    device::{DeviceApi, HttpDevice},
    history::HistoryLog,
    monitor::LinkMonitor,
    store::{FileStore, KeyValueStore},
    sync::{ConfigSyncEngine, SyncDeps},
    tag_reader::FileTagReader,
    wifi::NmcliWifi,
};

const ZONE_KEY: &str = "zone";

/// Onboards an irrigation zone and manages its controller's settings.
#[derive(Debug, Parser)]
#[command(name = "zone-client", version)]
struct Cli {
    /// Directory holding client.json, the onboarded zone and save history.
    #[arg(long, env = "ZONE_DATA_DIR", default_value = "./.zone-client", global = true)]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scan the zone tag and join its network.
    Onboard {
        /// Raw tag dump to read [default: <DATA_DIR>/tag.bin]
        #[arg(long, env = "ZONE_TAG_FILE")]
        tag_file: Option<PathBuf>,
    },
    /// Show setpoints, or change them with key=value assignments.
    Setpoints {
        #[arg(value_name = "KEY=VALUE", value_parser = parse_assignment)]
        set: Vec<Assignment>,
    },
    /// Show the irrigation schedule, or change it with slotN.field=value assignments.
    Schedule {
        #[arg(value_name = "SLOT.FIELD=VALUE", value_parser = parse_assignment)]
        set: Vec<Assignment>,
    },
    /// List recent save attempts.
    History,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Assignment {
    key: String,
    value: String,
}

fn parse_assignment(raw: &str) -> Result<Assignment, String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing key in `{raw}`"));
    }
    Ok(Assignment {
        key: key.to_string(),
        value: value.trim().to_string(),
    })
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut config = config::load(&cli.data_dir).await.unwrap_or_else(|err| {
        warn!("failed to load client config: {err:#}");
        ClientConfig::default()
    });
    config.sanitize();

    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(cli.data_dir.clone()));

    match cli.command {
        Command::Onboard { tag_file } => {
            let tag_path = tag_file.unwrap_or_else(|| cli.data_dir.join("tag.bin"));
            onboard(&config, store.as_ref(), tag_path).await
        }
        Command::Setpoints { set } => sync_domain::<SetpointsDomain>(&config, store, &set).await,
        Command::Schedule { set } => sync_domain::<ScheduleDomain>(&config, store, &set).await,
        Command::History => show_history(&config, store).await,
    }
}

async fn onboard(
    config: &ClientConfig,
    store: &dyn KeyValueStore,
    tag_path: PathBuf,
) -> anyhow::Result<()> {
    info!("reading zone tag from {}", tag_path.display());

    let session = ConnectivitySession::spawn(
        config.connectivity.clone(),
        Arc::new(FileTagReader::new(tag_path)),
        Arc::new(NmcliWifi::default()),
    );
    let mut state = session.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    let ready = session.zone_ready();
    tokio::pin!(ready);

    let zone = loop {
        tokio::select! {
            result = &mut ready => break result?,
            changed = state.changed() => {
                if changed.is_err() {
                    bail!("connectivity session ended");
                }
                let current = state.borrow_and_update().clone();
                println!("[{}] {}", current.phase.as_str(), current.message);
                if current.phase == ConnectivityPhase::Manual {
                    println!("  r = retry, s = open network settings, n = scan again, enter = check again");
                }
            }
            line = lines.next_line(), if stdin_open => {
                match line.context("failed to read stdin")? {
                    Some(line) => match line.trim() {
                        "r" => session.retry(),
                        "s" => session.open_settings(),
                        "n" => session.rescan(),
                        _ => session.resumed(),
                    },
                    None => stdin_open = false,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                session.dispose();
                bail!("onboarding cancelled");
            }
        }
    };

    store
        .set(ZONE_KEY, &serde_json::to_string_pretty(&zone)?)
        .await
        .context("failed to remember the zone")?;
    println!("zone {} ready at {}", zone.zone_id, zone.api_base);
    Ok(())
}

async fn load_zone(store: &dyn KeyValueStore) -> anyhow::Result<ZoneConfig> {
    let Some(raw) = store.get(ZONE_KEY).await? else {
        bail!("no zone onboarded yet; run `zone-client onboard` first");
    };
    serde_json::from_str(&raw).context("stored zone is unreadable; onboard again")
}

async fn sync_domain<D: ConfigDomain>(
    config: &ClientConfig,
    store: Arc<dyn KeyValueStore>,
    assignments: &[Assignment],
) -> anyhow::Result<()> {
    let zone = load_zone(store.as_ref()).await?;
    let device: Arc<dyn DeviceApi> = Arc::new(HttpDevice::new(zone.clone(), &config.link)?);

    let monitor = LinkMonitor::start(device.clone(), config.link.clone()).await;
    match monitor.latest() {
        Some(readout) if monitor.is_online() => {
            info!("controller {} reported at {}", zone.zone_id, readout.timestamp_secs())
        }
        Some(readout) => warn!(
            "controller {} data is stale (last report at {})",
            zone.zone_id,
            readout.timestamp_secs()
        ),
        None => warn!("controller at {} is unreachable", zone.api_base),
    }

    let engine = ConfigSyncEngine::<D>::spawn(
        config.sync.clone(),
        SyncDeps {
            device,
            history: Arc::new(HistoryLog::new(store, &config.history)),
            online: monitor.online(),
        },
    );
    engine
        .load()
        .await
        .with_context(|| format!("failed to load {}", D::KIND))?;

    if assignments.is_empty() {
        print_fields::<D>(&engine.snapshot().draft);
        engine.dispose().await;
        return Ok(());
    }

    for Assignment { key, value } in assignments {
        engine.edit(D::parse_edit(key, value)?).await?;
    }

    let snapshot = engine.snapshot();
    let changes = diff::<D>(
        &snapshot.baseline,
        &snapshot.draft,
        D::comparison(config.sync.float_tolerance),
    );
    for change in &changes {
        println!("{}: {} -> {}", change.key, change.old, change.new);
    }

    let mut outcomes = engine.outcomes();
    let started_at = engine.save().await?;
    println!("sent, waiting for the controller to confirm");

    let outcome = loop {
        tokio::select! {
            received = outcomes.recv() => match received {
                Ok(outcome) if outcome.started_at() == started_at => break outcome,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => bail!("{} engine stopped", D::KIND),
            },
            _ = tokio::signal::ctrl_c() => {
                engine.dispose().await;
                bail!("save abandoned; changes rolled back");
            }
        }
    };

    let result = match outcome {
        SyncOutcome::Confirmed { drifted, .. } => {
            println!("saved");
            if !drifted.is_empty() {
                println!("controller also changed: {}", drifted.join(", "));
            }
            Ok(())
        }
        SyncOutcome::Failed { error, .. } => Err(error.into()),
    };
    engine.dispose().await;
    result
}

fn print_fields<D: ConfigDomain>(value: &D::Value) {
    for (key, value) in D::fields(value) {
        println!("{key:<24} {value}");
    }
}

async fn show_history(config: &ClientConfig, store: Arc<dyn KeyValueStore>) -> anyhow::Result<()> {
    let history = HistoryLog::new(store, &config.history);
    let entries = history.entries().await?;
    if entries.is_empty() {
        println!("no saves recorded");
    }

    for entry in entries {
        let when = DateTime::from_timestamp_millis(entry.started_at)
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| entry.started_at.to_string());
        let changes: Vec<String> = entry
            .changed_keys
            .iter()
            .map(|key| {
                let old = entry.old_values.get(key).copied().unwrap_or(f64::NAN);
                let new = entry.new_values.get(key).copied().unwrap_or(f64::NAN);
                format!("{key} {old} -> {new}")
            })
            .collect();
        println!(
            "{when}  {:<9} {:<9} {}",
            entry.config_kind.as_str(),
            entry.status.as_str(),
            changes.join(", ")
        );
    }
    Ok(())
}
