use std::{sync::Arc, time::Duration};

use anyhow::anyhow;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use zone_common::{
    normalize_ssid, ConnectivityAction, ConnectivityConfig, ConnectivityEvent, ConnectivityMachine,
    ConnectivityPhase, ConnectivityState, ConnectivityTimer, ZoneConfig,
};

use crate::{tag_reader::TagReader, timers::TimerSet, wifi::WifiLink};

enum Message {
    Event(ConnectivityEvent),
    Dispose,
}

/// Outcome of a session as seen by whoever waits for the zone.
type Ready = Option<Result<ZoneConfig, String>>;

/// Runs one tag → join → verify session on its own task.
pub struct ConnectivitySession {
    tx: mpsc::UnboundedSender<Message>,
    state: watch::Receiver<ConnectivityState>,
    ready: watch::Receiver<Ready>,
    task: JoinHandle<()>,
}

impl ConnectivitySession {
    pub fn spawn(
        config: ConnectivityConfig,
        tag_reader: Arc<dyn TagReader>,
        wifi: Arc<dyn WifiLink>,
    ) -> Self {
        let machine = ConnectivityMachine::new(config.clone());
        let (state_tx, state) = watch::channel(machine.state().clone());
        let (ready_tx, ready) = watch::channel(None);
        let (tx, rx) = mpsc::unbounded_channel();

        let actor = Actor {
            machine,
            tag_reader,
            wifi,
            join_timeout: Duration::from_millis(config.join_timeout_ms),
            tx: tx.clone(),
            timers: TimerSet::new(),
            state_tx,
            ready_tx,
        };
        let task = tokio::spawn(actor.run(rx));

        Self {
            tx,
            state,
            ready,
            task,
        }
    }

    pub fn state(&self) -> ConnectivityState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state.clone()
    }

    /// Resolves once the link is verified, or fails when the session hits
    /// a terminal error or is torn down.
    pub async fn zone_ready(&self) -> anyhow::Result<ZoneConfig> {
        let mut ready = self.ready.clone();
        let outcome = ready
            .wait_for(Option::is_some)
            .await
            .map_err(|_| anyhow!("connectivity session ended"))?
            .clone();
        match outcome {
            Some(Ok(zone)) => Ok(zone),
            Some(Err(error)) => Err(anyhow!(error)),
            None => Err(anyhow!("connectivity session ended")),
        }
    }

    pub fn retry(&self) {
        self.send(ConnectivityEvent::Retry);
    }

    pub fn open_settings(&self) {
        self.send(ConnectivityEvent::OpenSettings);
    }

    pub fn rescan(&self) {
        self.send(ConnectivityEvent::Rescan);
    }

    /// The user came back from the system network settings.
    pub fn resumed(&self) {
        self.send(ConnectivityEvent::Resumed);
    }

    pub fn dispose(&self) {
        let _ = self.tx.send(Message::Dispose);
    }

    fn send(&self, event: ConnectivityEvent) {
        if self.tx.send(Message::Event(event)).is_err() {
            debug!("connectivity session already stopped");
        }
    }
}

impl Drop for ConnectivitySession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Actor {
    machine: ConnectivityMachine,
    tag_reader: Arc<dyn TagReader>,
    wifi: Arc<dyn WifiLink>,
    join_timeout: Duration,
    tx: mpsc::UnboundedSender<Message>,
    timers: TimerSet<ConnectivityTimer>,
    state_tx: watch::Sender<ConnectivityState>,
    ready_tx: watch::Sender<Ready>,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Message>) {
        let first = match self.tag_reader.check_hardware().await {
            Ok(()) => ConnectivityEvent::Start,
            Err(err) => {
                warn!("tag reader unavailable: {err:#}");
                ConnectivityEvent::HardwareUnsupported(format!("{err:#}"))
            }
        };
        self.dispatch(first);

        while let Some(message) = rx.recv().await {
            match message {
                Message::Event(event) => self.dispatch(event),
                Message::Dispose => break,
            }
        }

        self.timers.cancel_all();
        debug!("connectivity session stopped");
    }

    fn dispatch(&mut self, event: ConnectivityEvent) {
        for action in self.machine.handle(event) {
            self.execute(action);
        }
    }

    fn execute(&mut self, action: ConnectivityAction) {
        match action {
            ConnectivityAction::Publish(state) => {
                info!(
                    phase = state.phase.as_str(),
                    attempt = state.attempt,
                    "{}",
                    state.message
                );
                if state.phase == ConnectivityPhase::Error {
                    let error = state
                        .last_error
                        .clone()
                        .unwrap_or_else(|| state.message.clone());
                    self.ready_tx.send_replace(Some(Err(error)));
                }
                self.state_tx.send_replace(state);
            }
            ConnectivityAction::ReadTag { cycle } => {
                let reader = self.tag_reader.clone();
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let result = reader.read().await.map_err(|err| format!("{err:#}"));
                    if let Err(error) = &result {
                        debug!("tag read failed: {error}");
                    }
                    let _ = tx.send(Message::Event(ConnectivityEvent::TagRead { cycle, result }));
                });
            }
            ConnectivityAction::Join {
                cycle,
                ssid,
                password,
                is_wep,
                is_hidden,
            } => {
                let wifi = self.wifi.clone();
                let tx = self.tx.clone();
                let limit = self.join_timeout;
                tokio::spawn(async move {
                    let joined =
                        tokio::time::timeout(limit, wifi.connect(&ssid, &password, is_wep, is_hidden))
                            .await;
                    let error = match joined {
                        Ok(Ok(())) => None,
                        Ok(Err(err)) => Some(format!("{err:#}")),
                        Err(_) => Some(format!("join timed out after {} ms", limit.as_millis())),
                    };
                    if let Some(error) = &error {
                        warn!("join {ssid} reported: {error}");
                    }
                    let _ = tx.send(Message::Event(ConnectivityEvent::JoinFinished { cycle, error }));
                });
            }
            ConnectivityAction::QuerySsid { cycle, check } => {
                let wifi = self.wifi.clone();
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let ssid = wifi
                        .current_ssid()
                        .await
                        .map(|ssid| ssid.as_deref().and_then(normalize_ssid))
                        .map_err(|err| format!("{err:#}"));
                    debug!("current ssid: {ssid:?}");
                    let _ = tx.send(Message::Event(ConnectivityEvent::SsidReported {
                        cycle,
                        check,
                        ssid,
                    }));
                });
            }
            ConnectivityAction::StartTimer {
                timer,
                after_ms,
                cycle,
            } => {
                self.timers.start(
                    timer,
                    Duration::from_millis(after_ms),
                    self.tx.clone(),
                    Message::Event(ConnectivityEvent::TimerFired { timer, cycle }),
                );
            }
            ConnectivityAction::CancelTimer(timer) => self.timers.cancel(timer),
            ConnectivityAction::OpenSettings => {
                let wifi = self.wifi.clone();
                tokio::spawn(async move {
                    if let Err(err) = wifi.open_settings().await {
                        warn!("could not open network settings: {err:#}");
                    }
                });
            }
            ConnectivityAction::ZoneReady(zone) => {
                info!(zone = %zone.zone_id, api = %zone.api_base, "zone ready");
                self.ready_tx.send_replace(Some(Ok(zone)));
            }
        }
    }
}
