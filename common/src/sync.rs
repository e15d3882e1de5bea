//! Draft → command → confirmation cycle for one configuration domain.
//!
//! `SyncMachine` owns the baseline (last state known to be on the device)
//! and the draft (local edits). A save sends the draft once, then polls
//! until every changed field is reported back or the watchdog expires.
//! Failures roll the draft back to the baseline.

use serde_json::Value;

use crate::{
    codec::{CommandReply, Packet},
    config::{ReconcileMode, SyncConfig},
    domain::{confirms, diff, drifted, Comparison, ConfigDomain},
    error::SyncError,
    session::{FieldChange, SyncSession, SyncStatus},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    /// Command is in flight.
    Sending,
    /// Command accepted; polling for the new values.
    Confirming,
    /// Just confirmed; drops back to idle after a short delay.
    Settled,
}

impl SyncPhase {
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Sending | Self::Confirming)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncTimer {
    ConfirmPoll,
    Watchdog,
    Settle,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncSnapshot<V> {
    pub phase: SyncPhase,
    pub loaded: bool,
    pub baseline: V,
    pub draft: V,
    pub has_changes: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Confirmed {
        started_at: i64,
        /// Unchanged fields the device reported differently from the baseline.
        drifted: Vec<String>,
    },
    Failed {
        started_at: i64,
        error: SyncError,
    },
}

impl SyncOutcome {
    pub fn started_at(&self) -> i64 {
        match self {
            Self::Confirmed { started_at, .. } | Self::Failed { started_at, .. } => *started_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    CommandFinished {
        cycle: u64,
        /// Time the request spent in flight; counts against the watchdog.
        elapsed_ms: u64,
        result: Result<CommandReply, String>,
    },
    Polled {
        cycle: u64,
        result: Result<Value, String>,
    },
    TimerFired {
        timer: SyncTimer,
        cycle: u64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncAction<V> {
    Publish(SyncSnapshot<V>),
    RecordSession(SyncSession),
    UpdateSession { started_at: i64, status: SyncStatus },
    SendCommand { packet: Packet, cycle: u64 },
    Fetch { cycle: u64 },
    StartTimer { timer: SyncTimer, after_ms: u64, cycle: u64 },
    CancelTimer(SyncTimer),
    Outcome(SyncOutcome),
}

#[derive(Debug, Clone)]
struct PendingSave {
    started_at: i64,
    changes: Vec<FieldChange>,
}

pub struct SyncMachine<D: ConfigDomain> {
    config: SyncConfig,
    comparison: Comparison,
    baseline: D::Value,
    draft: D::Value,
    loaded: bool,
    disposed: bool,
    phase: SyncPhase,
    pending: Option<PendingSave>,
    last_started_at: i64,
    cycle: u64,
    message: String,
}

impl<D: ConfigDomain> SyncMachine<D> {
    pub fn new(config: SyncConfig) -> Self {
        let comparison = D::comparison(config.float_tolerance);
        Self {
            config,
            comparison,
            baseline: D::defaults(),
            draft: D::defaults(),
            loaded: false,
            disposed: false,
            phase: SyncPhase::Idle,
            pending: None,
            last_started_at: 0,
            cycle: 0,
            message: format!("{} not loaded", D::KIND),
        }
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn baseline(&self) -> &D::Value {
        &self.baseline
    }

    pub fn draft(&self) -> &D::Value {
        &self.draft
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn has_changes(&self) -> bool {
        self.draft != self.baseline
    }

    pub fn changes(&self) -> Vec<FieldChange> {
        diff::<D>(&self.baseline, &self.draft, self.comparison)
    }

    pub fn snapshot(&self) -> SyncSnapshot<D::Value> {
        SyncSnapshot {
            phase: self.phase,
            loaded: self.loaded,
            baseline: self.baseline.clone(),
            draft: self.draft.clone(),
            has_changes: self.has_changes(),
            message: self.message.clone(),
        }
    }

    fn guard_idle(&self) -> Result<(), SyncError> {
        if self.disposed {
            return Err(SyncError::Disposed);
        }
        if self.phase.is_pending() {
            return Err(SyncError::SavePending);
        }
        Ok(())
    }

    /// Adopts a freshly fetched device record as baseline and draft.
    pub fn apply_loaded(&mut self, raw: &Value) -> Result<Vec<SyncAction<D::Value>>, SyncError> {
        self.guard_idle()?;
        let value = D::decode(raw);
        self.baseline = value.clone();
        self.draft = value;
        self.loaded = true;
        self.message = format!("{} loaded", D::KIND);
        Ok(vec![self.publish()])
    }

    pub fn edit(&mut self, edit: &D::Edit) -> Result<Vec<SyncAction<D::Value>>, SyncError> {
        self.guard_idle()?;
        D::apply_edit(&mut self.draft, edit)?;
        self.message = if self.has_changes() {
            "Unsaved changes".to_string()
        } else {
            "No changes".to_string()
        };
        Ok(vec![self.publish()])
    }

    pub fn reset(&mut self) -> Result<Vec<SyncAction<D::Value>>, SyncError> {
        self.guard_idle()?;
        self.draft = self.baseline.clone();
        self.message = "Changes discarded".to_string();
        Ok(vec![self.publish()])
    }

    /// Starts a save. `now_ms` is wall-clock epoch milliseconds; `online`
    /// is the link monitor's current verdict.
    pub fn save(
        &mut self,
        now_ms: i64,
        online: bool,
    ) -> Result<Vec<SyncAction<D::Value>>, SyncError> {
        self.guard_idle()?;
        if !self.loaded {
            return Err(SyncError::NotLoaded);
        }
        if !online {
            return Err(SyncError::Offline);
        }
        let changes = self.changes();
        if changes.is_empty() {
            return Err(SyncError::NoChanges);
        }

        let packet = D::encode(&self.draft)?;

        let started_at = now_ms.max(self.last_started_at + 1);
        self.last_started_at = started_at;
        let session = SyncSession::pending(D::KIND, started_at, &changes);

        self.next_cycle();
        self.phase = SyncPhase::Sending;
        self.pending = Some(PendingSave {
            started_at,
            changes,
        });
        self.message = "Sending to controller".to_string();

        Ok(vec![
            SyncAction::CancelTimer(SyncTimer::Settle),
            SyncAction::RecordSession(session),
            self.publish(),
            SyncAction::SendCommand {
                packet,
                cycle: self.cycle,
            },
        ])
    }

    pub fn handle(&mut self, event: SyncEvent) -> Vec<SyncAction<D::Value>> {
        let mut actions = Vec::new();

        match event {
            SyncEvent::CommandFinished {
                cycle,
                elapsed_ms,
                result,
            } => {
                if cycle != self.cycle || self.phase != SyncPhase::Sending {
                    return actions;
                }
                match result {
                    Ok(reply) if reply.is_ok() => {
                        self.phase = SyncPhase::Confirming;
                        self.message = "Waiting for the controller to confirm".to_string();
                        actions.push(self.publish());
                        actions.push(self.start(SyncTimer::ConfirmPoll, self.config.poll_interval_ms));
                        actions.push(self.start(
                            SyncTimer::Watchdog,
                            self.config.watchdog_ms.saturating_sub(elapsed_ms),
                        ));
                    }
                    Ok(reply) => self.fail(
                        SyncError::CommandRejected {
                            reason: reply.rejection_reason(),
                        },
                        &mut actions,
                    ),
                    Err(error) => self.fail(SyncError::Network(error), &mut actions),
                }
            }
            SyncEvent::Polled { cycle, result } => {
                if cycle != self.cycle || self.phase != SyncPhase::Confirming {
                    return actions;
                }
                let reported = result.ok().map(|raw| D::decode(&raw));
                let changes = self
                    .pending
                    .as_ref()
                    .map(|pending| pending.changes.as_slice())
                    .unwrap_or_default();
                match reported {
                    Some(reported) if confirms::<D>(changes, &reported, self.comparison) => {
                        self.confirm(reported, &mut actions)
                    }
                    _ => actions.push(self.start(SyncTimer::ConfirmPoll, self.config.poll_interval_ms)),
                }
            }
            SyncEvent::TimerFired { timer, cycle } => {
                if cycle != self.cycle {
                    return actions;
                }
                match (timer, self.phase) {
                    (SyncTimer::ConfirmPoll, SyncPhase::Confirming) => {
                        actions.push(SyncAction::Fetch { cycle: self.cycle });
                    }
                    (SyncTimer::Watchdog, SyncPhase::Confirming) => self.fail(
                        SyncError::Timeout {
                            waited_ms: self.config.watchdog_ms,
                        },
                        &mut actions,
                    ),
                    (SyncTimer::Settle, SyncPhase::Settled) => {
                        self.phase = SyncPhase::Idle;
                        actions.push(self.publish());
                    }
                    _ => {}
                }
            }
        }

        actions
    }

    /// Cancels every timer. A pending save is rolled back and failed.
    pub fn dispose(&mut self) -> Vec<SyncAction<D::Value>> {
        let mut actions = Vec::new();
        if self.disposed {
            return actions;
        }
        if self.phase.is_pending() {
            self.fail(SyncError::Disposed, &mut actions);
        }
        actions.push(SyncAction::CancelTimer(SyncTimer::Settle));
        self.disposed = true;
        self.phase = SyncPhase::Idle;
        self.next_cycle();
        actions
    }

    fn confirm(&mut self, reported: D::Value, actions: &mut Vec<SyncAction<D::Value>>) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        self.cancel_save_timers(actions);

        let drift = drifted::<D>(&pending.changes, &self.baseline, &reported, self.comparison);
        match self.config.reconcile {
            ReconcileMode::Full => self.baseline = reported,
            ReconcileMode::ChangedKeys => {
                for change in &pending.changes {
                    D::copy_field(&mut self.baseline, &reported, &change.key);
                }
            }
        }
        self.draft = self.baseline.clone();
        self.phase = SyncPhase::Settled;
        self.message = "Saved".to_string();

        actions.push(SyncAction::UpdateSession {
            started_at: pending.started_at,
            status: SyncStatus::Confirmed,
        });
        actions.push(self.publish());
        actions.push(self.start(SyncTimer::Settle, self.config.settle_delay_ms));
        actions.push(SyncAction::Outcome(SyncOutcome::Confirmed {
            started_at: pending.started_at,
            drifted: drift,
        }));
    }

    fn fail(&mut self, error: SyncError, actions: &mut Vec<SyncAction<D::Value>>) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        self.cancel_save_timers(actions);

        self.draft = self.baseline.clone();
        self.phase = SyncPhase::Idle;
        self.message = format!("Save failed: {error}");
        self.next_cycle();

        actions.push(SyncAction::UpdateSession {
            started_at: pending.started_at,
            status: SyncStatus::Failed,
        });
        actions.push(self.publish());
        actions.push(SyncAction::Outcome(SyncOutcome::Failed {
            started_at: pending.started_at,
            error,
        }));
    }

    fn cancel_save_timers(&self, actions: &mut Vec<SyncAction<D::Value>>) {
        actions.push(SyncAction::CancelTimer(SyncTimer::ConfirmPoll));
        actions.push(SyncAction::CancelTimer(SyncTimer::Watchdog));
    }

    fn start(&self, timer: SyncTimer, after_ms: u64) -> SyncAction<D::Value> {
        SyncAction::StartTimer {
            timer,
            after_ms,
            cycle: self.cycle,
        }
    }

    fn next_cycle(&mut self) {
        self.cycle = self.cycle.wrapping_add(1);
    }

    fn publish(&self) -> SyncAction<D::Value> {
        SyncAction::Publish(self.snapshot())
    }
}
