use std::{sync::Arc, time::Duration};

use chrono::Utc;
use serde_json::Value;
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info, warn};
use zone_common::{
    ConfigDomain, SyncAction, SyncConfig, SyncError, SyncEvent, SyncMachine, SyncOutcome,
    SyncSnapshot, SyncTimer,
};

use crate::{device::DeviceApi, history::HistoryLog, timers::TimerSet};

type Reply<T> = oneshot::Sender<Result<T, SyncError>>;

enum Command<D: ConfigDomain> {
    Load(Reply<()>),
    Loaded(Result<Value, String>, Reply<()>),
    Edit(D::Edit, Reply<()>),
    Reset(Reply<()>),
    Save(Reply<i64>),
    Event(SyncEvent),
    Dispose(oneshot::Sender<()>),
}

/// What an engine needs from the rest of the client.
#[derive(Clone)]
pub struct SyncDeps {
    pub device: Arc<dyn DeviceApi>,
    pub history: Arc<HistoryLog>,
    pub online: watch::Receiver<bool>,
}

/// Handle to one configuration domain's sync actor.
pub struct ConfigSyncEngine<D: ConfigDomain> {
    tx: mpsc::UnboundedSender<Command<D>>,
    snapshots: watch::Receiver<SyncSnapshot<D::Value>>,
    outcomes: broadcast::Sender<SyncOutcome>,
    task: JoinHandle<()>,
}

impl<D: ConfigDomain> ConfigSyncEngine<D> {
    pub fn spawn(config: SyncConfig, deps: SyncDeps) -> Self {
        let machine = SyncMachine::<D>::new(config);
        let (snapshot_tx, snapshots) = watch::channel(machine.snapshot());
        let (outcomes, _) = broadcast::channel(16);
        let (tx, rx) = mpsc::unbounded_channel();

        let actor = Actor {
            machine,
            deps,
            tx: tx.clone(),
            timers: TimerSet::new(),
            snapshot_tx,
            outcomes: outcomes.clone(),
        };
        let task = tokio::spawn(actor.run(rx));

        Self {
            tx,
            snapshots,
            outcomes,
            task,
        }
    }

    /// Replaces baseline and draft with the device's current record.
    pub async fn load(&self) -> Result<(), SyncError> {
        self.request(Command::Load).await
    }

    pub async fn edit(&self, edit: D::Edit) -> Result<(), SyncError> {
        self.request(|reply| Command::Edit(edit, reply)).await
    }

    pub async fn reset(&self) -> Result<(), SyncError> {
        self.request(Command::Reset).await
    }

    /// Sends the draft. Returns the session's `started_at`; the result
    /// arrives later on [`outcomes`](Self::outcomes).
    pub async fn save(&self) -> Result<i64, SyncError> {
        self.request(Command::Save).await
    }

    pub fn has_changes(&self) -> bool {
        self.snapshots.borrow().has_changes
    }

    pub fn snapshot(&self) -> SyncSnapshot<D::Value> {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot<D::Value>> {
        self.snapshots.clone()
    }

    pub fn outcomes(&self) -> broadcast::Receiver<SyncOutcome> {
        self.outcomes.subscribe()
    }

    /// Stops the actor. A pending save is rolled back and recorded as failed.
    pub async fn dispose(&self) {
        let (reply, done) = oneshot::channel();
        if self.tx.send(Command::Dispose(reply)).is_ok() {
            let _ = done.await;
        }
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command<D>) -> Result<T, SyncError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(command(reply))
            .map_err(|_| SyncError::Disposed)?;
        response.await.map_err(|_| SyncError::Disposed)?
    }
}

impl<D: ConfigDomain> Drop for ConfigSyncEngine<D> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Actor<D: ConfigDomain> {
    machine: SyncMachine<D>,
    deps: SyncDeps,
    tx: mpsc::UnboundedSender<Command<D>>,
    timers: TimerSet<SyncTimer>,
    snapshot_tx: watch::Sender<SyncSnapshot<D::Value>>,
    outcomes: broadcast::Sender<SyncOutcome>,
}

impl<D: ConfigDomain> Actor<D> {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command<D>>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Load(reply) => self.begin_load(reply),
                Command::Loaded(result, reply) => {
                    let result = result
                        .map_err(SyncError::Network)
                        .and_then(|raw| self.machine.apply_loaded(&raw));
                    self.finish(result, reply, "load").await;
                }
                Command::Edit(edit, reply) => {
                    let result = self.machine.edit(&edit);
                    self.finish(result, reply, "edit").await;
                }
                Command::Reset(reply) => {
                    let result = self.machine.reset();
                    self.finish(result, reply, "reset").await;
                }
                Command::Save(reply) => {
                    let online = *self.deps.online.borrow();
                    match self.machine.save(Utc::now().timestamp_millis(), online) {
                        Ok(actions) => {
                            let started_at = actions.iter().find_map(|action| match action {
                                SyncAction::RecordSession(session) => Some(session.started_at),
                                _ => None,
                            });
                            self.execute_all(actions).await;
                            let _ = reply.send(started_at.ok_or(SyncError::NoChanges));
                        }
                        Err(err) => {
                            info!("{} save rejected: {err}", D::KIND);
                            let _ = reply.send(Err(err));
                        }
                    }
                }
                Command::Event(event) => {
                    let actions = self.machine.handle(event);
                    self.execute_all(actions).await;
                }
                Command::Dispose(done) => {
                    let actions = self.machine.dispose();
                    self.execute_all(actions).await;
                    debug!("{} engine disposed with {} timers armed", D::KIND, self.timers.armed());
                    self.timers.cancel_all();
                    let _ = done.send(());
                    break;
                }
            }
        }
        debug!("{} sync engine stopped", D::KIND);
    }

    fn begin_load(&self, reply: Reply<()>) {
        if self.machine.phase().is_pending() {
            let _ = reply.send(Err(SyncError::SavePending));
            return;
        }
        let device = self.deps.device.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = device
                .fetch_config(D::KIND)
                .await
                .map_err(|err| format!("{err:#}"));
            let _ = tx.send(Command::Loaded(result, reply));
        });
    }

    async fn finish(
        &mut self,
        result: Result<Vec<SyncAction<D::Value>>, SyncError>,
        reply: Reply<()>,
        operation: &str,
    ) {
        match result {
            Ok(actions) => {
                self.execute_all(actions).await;
                let _ = reply.send(Ok(()));
            }
            Err(err) => {
                info!("{} {operation} rejected: {err}", D::KIND);
                let _ = reply.send(Err(err));
            }
        }
    }

    async fn execute_all(&mut self, actions: Vec<SyncAction<D::Value>>) {
        for action in actions {
            self.execute(action).await;
        }
    }

    async fn execute(&mut self, action: SyncAction<D::Value>) {
        match action {
            SyncAction::Publish(snapshot) => {
                debug!(phase = ?snapshot.phase, changes = snapshot.has_changes, "{}", snapshot.message);
                self.snapshot_tx.send_replace(snapshot);
            }
            SyncAction::RecordSession(session) => {
                let started_at = session.started_at;
                if let Err(err) = self.deps.history.append(session).await {
                    warn!("failed to record {} session {started_at}: {err:#}", D::KIND);
                }
            }
            SyncAction::UpdateSession { started_at, status } => {
                match self.deps.history.update_status(started_at, status).await {
                    Ok(true) => {}
                    Ok(false) => warn!("{} session {started_at} missing from history", D::KIND),
                    Err(err) => warn!("failed to mark session {started_at} {}: {err:#}", status.as_str()),
                }
            }
            SyncAction::SendCommand { packet, cycle } => {
                info!("sending {} packet ({} values)", D::KIND, packet.len());
                let device = self.deps.device.clone();
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let sent = Instant::now();
                    let result = device
                        .send_command(&packet)
                        .await
                        .map_err(|err| format!("{err:#}"));
                    let elapsed_ms = u64::try_from(sent.elapsed().as_millis()).unwrap_or(u64::MAX);
                    let _ = tx.send(Command::Event(SyncEvent::CommandFinished {
                        cycle,
                        elapsed_ms,
                        result,
                    }));
                });
            }
            SyncAction::Fetch { cycle } => {
                let device = self.deps.device.clone();
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let result = device
                        .fetch_config(D::KIND)
                        .await
                        .map_err(|err| format!("{err:#}"));
                    if let Err(error) = &result {
                        debug!("{} confirmation poll failed: {error}", D::KIND);
                    }
                    let _ = tx.send(Command::Event(SyncEvent::Polled { cycle, result }));
                });
            }
            SyncAction::StartTimer {
                timer,
                after_ms,
                cycle,
            } => {
                self.timers.start(
                    timer,
                    Duration::from_millis(after_ms),
                    self.tx.clone(),
                    Command::Event(SyncEvent::TimerFired { timer, cycle }),
                );
            }
            SyncAction::CancelTimer(timer) => self.timers.cancel(timer),
            SyncAction::Outcome(outcome) => {
                match &outcome {
                    SyncOutcome::Confirmed { started_at, drifted } if drifted.is_empty() => {
                        info!("{} session {started_at} confirmed", D::KIND);
                    }
                    SyncOutcome::Confirmed { started_at, drifted } => {
                        warn!(
                            "{} session {started_at} confirmed; controller also changed {}",
                            D::KIND,
                            drifted.join(", ")
                        );
                    }
                    SyncOutcome::Failed { started_at, error } => {
                        warn!("{} session {started_at} failed: {error}", D::KIND);
                    }
                }
                let _ = self.outcomes.send(outcome);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use anyhow::bail;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use zone_common::{
        CommandReply, ConfigKind, DeviceReadout, HistoryConfig, Packet, SetpointEdit, SetpointKey,
        SetpointsDomain, SyncPhase, SyncStatus,
    };

    use crate::store::MemoryStore;

    /// Controller double: applies a packet's values after `apply_after`
    /// further fetches, or never when `None`.
    struct FakeDevice {
        record: Mutex<Value>,
        reply: Result<CommandReply, String>,
        apply_after: Option<usize>,
        pending: Mutex<Option<(Vec<f64>, usize)>>,
        fetches: Mutex<usize>,
        commands: Mutex<Vec<Vec<f64>>>,
    }

    impl FakeDevice {
        fn new(reply: Result<CommandReply, String>, apply_after: Option<usize>) -> Arc<Self> {
            Arc::new(Self {
                record: Mutex::new(json!({"ecSetpoint": 0.80, "phMin": 5.8})),
                reply,
                apply_after,
                pending: Mutex::new(None),
                fetches: Mutex::new(0),
                commands: Mutex::new(Vec::new()),
            })
        }

        fn fetches(&self) -> usize {
            *self.fetches.lock().unwrap()
        }
    }

    fn ok() -> Result<CommandReply, String> {
        Ok(CommandReply {
            status: "ok".to_string(),
            reason: None,
        })
    }

    #[async_trait]
    impl DeviceApi for FakeDevice {
        async fn fetch_readout(&self) -> anyhow::Result<DeviceReadout> {
            bail!("not used")
        }

        async fn fetch_config(&self, kind: ConfigKind) -> anyhow::Result<Value> {
            assert_eq!(kind, ConfigKind::Setpoints);
            *self.fetches.lock().unwrap() += 1;

            let mut pending = self.pending.lock().unwrap();
            if let Some((values, remaining)) = pending.as_mut() {
                if *remaining == 0 {
                    let mut record = self.record.lock().unwrap();
                    for (key, value) in SetpointKey::ALL.iter().zip(values.iter().skip(1)) {
                        record[key.as_str()] = json!(value);
                    }
                    *pending = None;
                } else {
                    *remaining -= 1;
                }
            }
            Ok(self.record.lock().unwrap().clone())
        }

        async fn send_command(&self, packet: &Packet) -> anyhow::Result<CommandReply> {
            self.commands.lock().unwrap().push(packet.values().to_vec());
            if let (Ok(reply), Some(after)) = (&self.reply, self.apply_after) {
                if reply.is_ok() {
                    *self.pending.lock().unwrap() = Some((packet.values().to_vec(), after));
                }
            }
            match &self.reply {
                Ok(reply) => Ok(reply.clone()),
                Err(error) => bail!("{error}"),
            }
        }
    }

    struct Harness {
        device: Arc<FakeDevice>,
        history: Arc<HistoryLog>,
        online: watch::Sender<bool>,
        engine: ConfigSyncEngine<SetpointsDomain>,
    }

    async fn harness(device: Arc<FakeDevice>) -> Harness {
        let history = Arc::new(HistoryLog::new(
            Arc::new(MemoryStore::default()),
            &HistoryConfig::default(),
        ));
        let (online, online_rx) = watch::channel(true);
        let engine = ConfigSyncEngine::<SetpointsDomain>::spawn(
            SyncConfig::default(),
            SyncDeps {
                device: device.clone(),
                history: history.clone(),
                online: online_rx,
            },
        );
        engine.load().await.unwrap();
        engine
            .edit(SetpointEdit::new(SetpointKey::EcSetpoint, 0.95))
            .await
            .unwrap();
        Harness {
            device,
            history,
            online,
            engine,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn confirms_when_device_reports_new_value() {
        let h = harness(FakeDevice::new(ok(), Some(1))).await;
        let mut outcomes = h.engine.outcomes();

        let started_at = h.engine.save().await.unwrap();
        let outcome = outcomes.recv().await.unwrap();

        assert_eq!(
            outcome,
            SyncOutcome::Confirmed {
                started_at,
                drifted: vec![],
            }
        );
        let snapshot = h.engine.snapshot();
        assert_eq!(snapshot.baseline.get(SetpointKey::EcSetpoint), 0.95);
        assert!(!h.engine.has_changes());

        let entries = h.history.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, SyncStatus::Confirmed);
        assert_eq!(entries[0].changed_keys, vec!["ecSetpoint".to_string()]);
        // One fetch for load, then two confirmation polls.
        assert_eq!(h.device.fetches(), 3);

        let mut snapshots = h.engine.subscribe();
        snapshots
            .wait_for(|snapshot| snapshot.phase == SyncPhase::Idle)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_rolls_back_silent_device() {
        let h = harness(FakeDevice::new(ok(), None)).await;
        let mut outcomes = h.engine.outcomes();
        let before = tokio::time::Instant::now();

        let started_at = h.engine.save().await.unwrap();
        let outcome = outcomes.recv().await.unwrap();

        assert_eq!(
            outcome,
            SyncOutcome::Failed {
                started_at,
                error: SyncError::Timeout { waited_ms: 30_000 },
            }
        );
        assert!(before.elapsed() >= Duration::from_secs(30));
        assert_eq!(h.engine.snapshot().draft.get(SetpointKey::EcSetpoint), 0.80);
        assert_eq!(
            h.history.entries().await.unwrap()[0].status,
            SyncStatus::Failed
        );

        let polls = h.device.fetches();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.device.fetches(), polls);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_device_fails_without_polling() {
        let reply = Ok(CommandReply {
            status: "error".to_string(),
            reason: Some("busy".to_string()),
        });
        let h = harness(FakeDevice::new(reply, Some(0))).await;
        let mut outcomes = h.engine.outcomes();

        let started_at = h.engine.save().await.unwrap();
        let outcome = outcomes.recv().await.unwrap();

        assert_eq!(
            outcome,
            SyncOutcome::Failed {
                started_at,
                error: SyncError::CommandRejected {
                    reason: "busy".to_string(),
                },
            }
        );
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.device.fetches(), 1);
        assert_eq!(h.engine.snapshot().draft.get(SetpointKey::EcSetpoint), 0.80);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_fails_session() {
        let h = harness(FakeDevice::new(Err("connection reset".to_string()), None)).await;
        let mut outcomes = h.engine.outcomes();

        h.engine.save().await.unwrap();

        assert!(matches!(
            outcomes.recv().await.unwrap(),
            SyncOutcome::Failed {
                error: SyncError::Network(_),
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn offline_save_is_rejected_without_history() {
        let h = harness(FakeDevice::new(ok(), Some(0))).await;
        h.online.send_replace(false);

        assert_eq!(h.engine.save().await, Err(SyncError::Offline));
        assert!(h.history.entries().await.unwrap().is_empty());
        assert!(h.device.commands.lock().unwrap().is_empty());
        assert!(h.engine.has_changes());
    }

    #[tokio::test(start_paused = true)]
    async fn sub_tolerance_draft_is_not_sent() {
        let h = harness(FakeDevice::new(ok(), Some(0))).await;
        h.engine
            .edit(SetpointEdit::new(SetpointKey::EcSetpoint, 0.805))
            .await
            .unwrap();

        assert_eq!(h.engine.save().await, Err(SyncError::NoChanges));
        assert!(h.history.entries().await.unwrap().is_empty());
        assert!(h.device.commands.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn edits_and_loads_wait_for_pending_save() {
        let h = harness(FakeDevice::new(ok(), None)).await;
        h.engine.save().await.unwrap();

        assert_eq!(
            h.engine
                .edit(SetpointEdit::new(SetpointKey::PhMin, 6.0))
                .await,
            Err(SyncError::SavePending)
        );
        assert_eq!(h.engine.load().await, Err(SyncError::SavePending));
        assert_eq!(h.engine.save().await, Err(SyncError::SavePending));
        assert_eq!(h.device.commands.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_fails_pending_save() {
        let h = harness(FakeDevice::new(ok(), None)).await;
        let mut outcomes = h.engine.outcomes();
        let started_at = h.engine.save().await.unwrap();

        h.engine.dispose().await;

        assert_eq!(
            outcomes.recv().await.unwrap(),
            SyncOutcome::Failed {
                started_at,
                error: SyncError::Disposed,
            }
        );
        assert_eq!(
            h.history.entries().await.unwrap()[0].status,
            SyncStatus::Failed
        );
        assert_eq!(h.engine.reset().await, Err(SyncError::Disposed));
    }
}
