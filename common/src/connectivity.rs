//! Tag scan → network join → verified link, as a pure transition object.
//!
//! The machine never performs I/O. Each call to [`ConnectivityMachine::handle`]
//! returns the actions the host must carry out; their results come back as
//! events tagged with the `cycle` they were issued for, so answers that
//! belong to an abandoned cycle are dropped.

use serde::Serialize;

use crate::{
    config::ConnectivityConfig,
    error::ConnectivityError,
    tag::{parse_tag, ZoneConfig},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectivityPhase {
    Scanning,
    ReadOk,
    Connecting,
    Verifying,
    Success,
    Manual,
    Error,
}

impl ConnectivityPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scanning => "SCANNING",
            Self::ReadOk => "READ_OK",
            Self::Connecting => "CONNECTING",
            Self::Verifying => "VERIFYING",
            Self::Success => "SUCCESS",
            Self::Manual => "MANUAL",
            Self::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityState {
    pub phase: ConnectivityPhase,
    pub attempt: u32,
    pub last_error: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectivityTimer {
    ScanRetry,
    VerifyPoll,
    VerifyTimeout,
    ReadyDelay,
}

impl ConnectivityTimer {
    pub const ALL: [ConnectivityTimer; 4] = [
        ConnectivityTimer::ScanRetry,
        ConnectivityTimer::VerifyPoll,
        ConnectivityTimer::VerifyTimeout,
        ConnectivityTimer::ReadyDelay,
    ];
}

/// Why the current network name was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SsidCheck {
    Verify,
    Resume,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectivityEvent {
    Start,
    HardwareUnsupported(String),
    TagRead {
        cycle: u64,
        result: Result<String, String>,
    },
    JoinFinished {
        cycle: u64,
        error: Option<String>,
    },
    SsidReported {
        cycle: u64,
        check: SsidCheck,
        ssid: Result<Option<String>, String>,
    },
    TimerFired {
        timer: ConnectivityTimer,
        cycle: u64,
    },
    Retry,
    OpenSettings,
    Rescan,
    Resumed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectivityAction {
    Publish(ConnectivityState),
    ReadTag {
        cycle: u64,
    },
    Join {
        cycle: u64,
        ssid: String,
        password: String,
        is_wep: bool,
        is_hidden: bool,
    },
    QuerySsid {
        cycle: u64,
        check: SsidCheck,
    },
    StartTimer {
        timer: ConnectivityTimer,
        after_ms: u64,
        cycle: u64,
    },
    CancelTimer(ConnectivityTimer),
    OpenSettings,
    ZoneReady(ZoneConfig),
}

#[derive(Debug, Clone)]
pub struct ConnectivityMachine {
    config: ConnectivityConfig,
    state: ConnectivityState,
    zone: Option<ZoneConfig>,
    cycle: u64,
}

impl ConnectivityMachine {
    pub fn new(config: ConnectivityConfig) -> Self {
        Self {
            config,
            state: ConnectivityState {
                phase: ConnectivityPhase::Scanning,
                attempt: 0,
                last_error: None,
                message: "Hold the phone near the zone tag".to_string(),
            },
            zone: None,
            cycle: 0,
        }
    }

    pub fn state(&self) -> &ConnectivityState {
        &self.state
    }

    pub fn phase(&self) -> ConnectivityPhase {
        self.state.phase
    }

    pub fn zone(&self) -> Option<&ZoneConfig> {
        self.zone.as_ref()
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn handle(&mut self, event: ConnectivityEvent) -> Vec<ConnectivityAction> {
        let mut actions = Vec::new();

        if self.state.phase == ConnectivityPhase::Error {
            return actions;
        }

        match event {
            ConnectivityEvent::Start => self.start_scan(&mut actions),
            ConnectivityEvent::HardwareUnsupported(reason) => {
                self.cancel_all(&mut actions);
                self.state.phase = ConnectivityPhase::Error;
                self.state.last_error = Some(ConnectivityError::Unsupported(reason).to_string());
                self.state.message = "This device cannot read zone tags".to_string();
                self.publish(&mut actions);
            }
            ConnectivityEvent::TagRead { cycle, result } => {
                if cycle == self.cycle && self.state.phase == ConnectivityPhase::Scanning {
                    self.on_tag_read(result, &mut actions);
                }
            }
            ConnectivityEvent::JoinFinished { cycle, error } => {
                if cycle == self.cycle && self.state.phase == ConnectivityPhase::Connecting {
                    // The join API is not authoritative; only the SSID check decides.
                    if let Some(error) = error {
                        self.state.last_error = Some(error);
                    }
                    self.enter_verifying(&mut actions);
                }
            }
            ConnectivityEvent::SsidReported { cycle, check, ssid } => {
                if cycle == self.cycle {
                    self.on_ssid(check, ssid, &mut actions);
                }
            }
            ConnectivityEvent::TimerFired { timer, cycle } => {
                if cycle == self.cycle {
                    self.on_timer(timer, &mut actions);
                }
            }
            ConnectivityEvent::Retry => {
                if self.state.phase == ConnectivityPhase::Manual {
                    self.state.attempt = 0;
                    self.state.last_error = None;
                    self.enter_connecting(&mut actions);
                }
            }
            ConnectivityEvent::OpenSettings => {
                if self.state.phase == ConnectivityPhase::Manual {
                    actions.push(ConnectivityAction::OpenSettings);
                }
            }
            ConnectivityEvent::Rescan => self.start_scan(&mut actions),
            ConnectivityEvent::Resumed => {
                if self.state.phase == ConnectivityPhase::Manual {
                    self.next_cycle();
                    actions.push(ConnectivityAction::QuerySsid {
                        cycle: self.cycle,
                        check: SsidCheck::Resume,
                    });
                }
            }
        }

        actions
    }

    fn start_scan(&mut self, actions: &mut Vec<ConnectivityAction>) {
        self.cancel_all(actions);
        self.next_cycle();
        self.zone = None;
        self.state = ConnectivityState {
            phase: ConnectivityPhase::Scanning,
            attempt: 0,
            last_error: None,
            message: "Hold the phone near the zone tag".to_string(),
        };
        self.publish(actions);
        actions.push(ConnectivityAction::ReadTag { cycle: self.cycle });
    }

    fn on_tag_read(&mut self, result: Result<String, String>, actions: &mut Vec<ConnectivityAction>) {
        let parsed = result.and_then(|raw| {
            parse_tag(&raw, &self.config.default_password).map_err(|err| err.to_string())
        });

        match parsed {
            Ok(zone) => {
                self.state.phase = ConnectivityPhase::ReadOk;
                self.state.attempt = 0;
                self.state.last_error = None;
                self.state.message = format!("Found zone {} ({})", zone.zone_id, zone.ssid);
                self.zone = Some(zone);
                self.publish(actions);
                self.enter_connecting(actions);
            }
            Err(error) => {
                self.state.last_error = Some(error);
                self.state.message = "Could not read the tag, trying again".to_string();
                self.publish(actions);
                actions.push(ConnectivityAction::StartTimer {
                    timer: ConnectivityTimer::ScanRetry,
                    after_ms: self.config.scan_retry_delay_ms,
                    cycle: self.cycle,
                });
            }
        }
    }

    fn enter_connecting(&mut self, actions: &mut Vec<ConnectivityAction>) {
        let Some(zone) = self.zone.clone() else {
            self.start_scan(actions);
            return;
        };

        self.cancel_all(actions);
        self.next_cycle();
        self.state.phase = ConnectivityPhase::Connecting;
        self.state.message = format!(
            "Joining {} (attempt {} of {})",
            zone.ssid,
            self.state.attempt + 1,
            self.config.max_retries
        );
        self.publish(actions);
        actions.push(ConnectivityAction::Join {
            cycle: self.cycle,
            password: zone.password().to_string(),
            ssid: zone.ssid,
            is_wep: false,
            is_hidden: false,
        });
    }

    fn enter_verifying(&mut self, actions: &mut Vec<ConnectivityAction>) {
        self.state.phase = ConnectivityPhase::Verifying;
        self.state.message = format!("Checking connection to {}", self.target_ssid());
        self.publish(actions);
        actions.push(ConnectivityAction::StartTimer {
            timer: ConnectivityTimer::VerifyTimeout,
            after_ms: self.config.verify_timeout_ms,
            cycle: self.cycle,
        });
        actions.push(ConnectivityAction::QuerySsid {
            cycle: self.cycle,
            check: SsidCheck::Verify,
        });
    }

    fn on_ssid(
        &mut self,
        check: SsidCheck,
        ssid: Result<Option<String>, String>,
        actions: &mut Vec<ConnectivityAction>,
    ) {
        let matched = matches!(&ssid, Ok(Some(current)) if *current == self.target_ssid());

        match (check, self.state.phase) {
            (SsidCheck::Verify, ConnectivityPhase::Verifying) => {
                if matched {
                    self.enter_success(actions);
                } else {
                    actions.push(ConnectivityAction::StartTimer {
                        timer: ConnectivityTimer::VerifyPoll,
                        after_ms: self.config.verify_poll_interval_ms,
                        cycle: self.cycle,
                    });
                }
            }
            (SsidCheck::Resume, ConnectivityPhase::Manual) => {
                if matched {
                    self.enter_success(actions);
                } else {
                    self.state.message = match ssid {
                        Ok(Some(current)) => format!(
                            "Still connected to {current}; join {} in network settings",
                            self.target_ssid()
                        ),
                        Ok(None) => format!(
                            "Not connected to any network; join {} in network settings",
                            self.target_ssid()
                        ),
                        Err(error) => format!("Could not read the current network: {error}"),
                    };
                    self.publish(actions);
                }
            }
            _ => {}
        }
    }

    fn on_timer(&mut self, timer: ConnectivityTimer, actions: &mut Vec<ConnectivityAction>) {
        match (timer, self.state.phase) {
            (ConnectivityTimer::ScanRetry, ConnectivityPhase::Scanning) => {
                actions.push(ConnectivityAction::ReadTag { cycle: self.cycle });
            }
            (ConnectivityTimer::VerifyPoll, ConnectivityPhase::Verifying) => {
                actions.push(ConnectivityAction::QuerySsid {
                    cycle: self.cycle,
                    check: SsidCheck::Verify,
                });
            }
            (ConnectivityTimer::VerifyTimeout, ConnectivityPhase::Verifying) => {
                if self.state.attempt + 1 < self.config.max_retries {
                    self.state.attempt += 1;
                    self.enter_connecting(actions);
                } else {
                    self.enter_manual(actions);
                }
            }
            (ConnectivityTimer::ReadyDelay, ConnectivityPhase::Success) => {
                if let Some(zone) = self.zone.clone() {
                    actions.push(ConnectivityAction::ZoneReady(zone));
                }
            }
            _ => {}
        }
    }

    fn enter_success(&mut self, actions: &mut Vec<ConnectivityAction>) {
        self.cancel_all(actions);
        self.state.phase = ConnectivityPhase::Success;
        self.state.last_error = None;
        self.state.message = format!("Connected to {}", self.target_ssid());
        self.publish(actions);
        actions.push(ConnectivityAction::StartTimer {
            timer: ConnectivityTimer::ReadyDelay,
            after_ms: self.config.ready_delay_ms,
            cycle: self.cycle,
        });
    }

    fn enter_manual(&mut self, actions: &mut Vec<ConnectivityAction>) {
        self.cancel_all(actions);
        let error = ConnectivityError::Timeout {
            ssid: self.target_ssid(),
            attempts: self.state.attempt + 1,
        };
        self.state.phase = ConnectivityPhase::Manual;
        self.state.last_error = Some(error.to_string());
        self.state.message = format!(
            "Join {} from the network settings, then come back",
            self.target_ssid()
        );
        self.publish(actions);
    }

    fn target_ssid(&self) -> String {
        self.zone
            .as_ref()
            .map(|zone| normalize_ssid(&zone.ssid).unwrap_or_default())
            .unwrap_or_default()
    }

    fn next_cycle(&mut self) {
        self.cycle = self.cycle.wrapping_add(1);
    }

    fn cancel_all(&self, actions: &mut Vec<ConnectivityAction>) {
        actions.extend(ConnectivityTimer::ALL.map(ConnectivityAction::CancelTimer));
    }

    fn publish(&self, actions: &mut Vec<ConnectivityAction>) {
        actions.push(ConnectivityAction::Publish(self.state.clone()));
    }
}

/// Strips the quotes some platforms wrap around SSIDs; `None` when the
/// platform reports no network.
pub fn normalize_ssid(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(trimmed)
        .trim();

    if unquoted.is_empty() || unquoted.eq_ignore_ascii_case("<unknown ssid>") {
        None
    } else {
        Some(unquoted.to_string())
    }
}
