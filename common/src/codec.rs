use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{ser::SerializeSeq, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::{
    error::PacketEncodingError,
    schedule::{encode_slots, Schedule, ScheduleSlot},
    setpoints::{number, Setpoints},
    ConfigKind,
};

const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// A validated mode packet, ready for `POST /command`.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    kind: ConfigKind,
    values: Vec<f64>,
}

impl Packet {
    pub fn new(kind: ConfigKind, values: Vec<f64>) -> Result<Self, PacketEncodingError> {
        let packet = Self { kind, values };
        packet.validate()?;
        Ok(packet)
    }

    pub fn kind(&self) -> ConfigKind {
        self.kind
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn validate(&self) -> Result<(), PacketEncodingError> {
        let expected = self.kind.packet_len();
        if self.values.len() != expected {
            return Err(PacketEncodingError::WrongLength {
                kind: self.kind,
                expected,
                actual: self.values.len(),
            });
        }
        let mode = self.values[0];
        if mode != f64::from(self.kind.mode()) {
            return Err(PacketEncodingError::WrongMode {
                kind: self.kind,
                expected: self.kind.mode(),
                actual: mode,
            });
        }
        Ok(())
    }
}

impl Serialize for Packet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.values.len()))?;
        for value in &self.values {
            // Firmware parses integers; keep `6` rather than `6.0` on the wire.
            if value.fract() == 0.0 && value.abs() < MAX_EXACT_INTEGER {
                seq.serialize_element(&(*value as i64))?;
            } else {
                seq.serialize_element(value)?;
            }
        }
        seq.end()
    }
}

#[derive(Debug, Serialize)]
pub struct CommandRequest<'a> {
    pub packet: &'a Packet,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct CommandReply {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
}

impl CommandReply {
    pub fn is_ok(&self) -> bool {
        self.status.trim().eq_ignore_ascii_case("ok")
    }

    pub fn rejection_reason(&self) -> String {
        match (&self.reason, self.status.trim()) {
            (Some(reason), _) if !reason.trim().is_empty() => reason.clone(),
            (_, "") => "empty status".to_string(),
            (_, status) => format!("status `{status}`"),
        }
    }
}

/// Live readout served by `GET /data`.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct DeviceReadout {
    #[serde(default, deserialize_with = "epoch")]
    pub timestamp: i64,
    #[serde(default)]
    pub payload: BTreeMap<String, Value>,
}

impl DeviceReadout {
    /// Timestamp in seconds; values that look like milliseconds are scaled down.
    pub fn timestamp_secs(&self) -> i64 {
        if self.timestamp.abs() >= 1_000_000_000_000 {
            self.timestamp / 1_000
        } else {
            self.timestamp
        }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, window_secs: u64) -> bool {
        is_fresh(self.timestamp_secs(), now, window_secs)
    }
}

/// Any JSON number (or numeric string) truncated to whole units; anything else is 0.
fn epoch<'de, De: Deserializer<'de>>(deserializer: De) -> Result<i64, De::Error> {
    let raw = Value::deserialize(deserializer)?;
    Ok(match &raw {
        Value::Number(whole) if whole.is_i64() => whole.as_i64().unwrap_or_default(),
        other => number(other).map(|value| value as i64).unwrap_or_default(),
    })
}

/// True when `timestamp_secs` lies within `window_secs` of `now`.
pub fn is_fresh(timestamp_secs: i64, now: DateTime<Utc>, window_secs: u64) -> bool {
    if timestamp_secs <= 0 {
        return false;
    }
    let age = now.timestamp().saturating_sub(timestamp_secs);
    age.unsigned_abs() < window_secs
}

pub fn encode_setpoints(draft: &Setpoints) -> Result<Packet, PacketEncodingError> {
    Packet::new(ConfigKind::Setpoints, draft.encode()?)
}

pub fn encode_schedule(slots: &[ScheduleSlot]) -> Result<Packet, PacketEncodingError> {
    Packet::new(ConfigKind::Schedule, encode_slots(slots)?)
}

pub fn decode_setpoints(raw: &Value) -> Setpoints {
    Setpoints::decode(raw)
}

pub fn decode_schedule(raw: &Value) -> Schedule {
    Schedule::decode(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use crate::setpoints::SetpointKey;

    #[test]
    fn packets_have_fixed_lengths() {
        assert_eq!(encode_setpoints(&Setpoints::default()).unwrap().len(), 24);
        assert_eq!(
            encode_schedule(Schedule::default().slots()).unwrap().len(),
            26
        );
    }

    #[test]
    fn validate_catches_wrong_length_and_mode() {
        assert_eq!(
            Packet::new(ConfigKind::Setpoints, vec![6.0; 23]),
            Err(PacketEncodingError::WrongLength {
                kind: ConfigKind::Setpoints,
                expected: 24,
                actual: 23,
            })
        );
        assert_eq!(
            Packet::new(ConfigKind::Schedule, vec![6.0; 26]),
            Err(PacketEncodingError::WrongMode {
                kind: ConfigKind::Schedule,
                expected: 7,
                actual: 6.0,
            })
        );
    }

    #[test]
    fn non_finite_setpoint_fails_encoding() {
        let mut raw = Setpoints::default().to_json();
        raw["ecSetpoint"] = json!(0.95);
        let mut setpoints = decode_setpoints(&raw);
        assert_eq!(setpoints.get(SetpointKey::EcSetpoint), 0.95);

        setpoints.set_unchecked(SetpointKey::PhMin, f64::INFINITY);
        assert_eq!(
            encode_setpoints(&setpoints),
            Err(PacketEncodingError::NonFinite("phMin".to_string()))
        );
    }

    #[test]
    fn command_body_uses_integers_where_possible() {
        let mut setpoints = Setpoints::default();
        setpoints.set(SetpointKey::EcSetpoint, 0.95).unwrap();
        let packet = encode_setpoints(&setpoints).unwrap();

        let body = serde_json::to_value(CommandRequest { packet: &packet }).unwrap();

        assert_eq!(body["packet"][0], json!(6));
        assert_eq!(body["packet"][1], json!(18));
        assert_eq!(body["packet"][7], json!(0.95));
    }

    #[test]
    fn command_reply_status() {
        let ok: CommandReply = serde_json::from_value(json!({"status": "OK"})).unwrap();
        assert!(ok.is_ok());

        let busy: CommandReply =
            serde_json::from_value(json!({"status": "error", "reason": "busy"})).unwrap();
        assert!(!busy.is_ok());
        assert_eq!(busy.rejection_reason(), "busy");

        let empty: CommandReply = serde_json::from_value(json!({})).unwrap();
        assert!(!empty.is_ok());
        assert_eq!(empty.rejection_reason(), "empty status");
    }

    #[test]
    fn freshness_window() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let secs = now.timestamp();

        assert!(is_fresh(secs - 299, now, 300));
        assert!(!is_fresh(secs - 300, now, 300));
        assert!(!is_fresh(0, now, 300));

        let millis = DeviceReadout {
            timestamp: (secs - 10) * 1_000,
            payload: BTreeMap::new(),
        };
        assert!(millis.is_fresh(now, 300));
    }

    #[test]
    fn readout_accepts_fractional_and_odd_timestamps() {
        let fractional: DeviceReadout =
            serde_json::from_value(json!({"timestamp": 1772366400.5, "payload": {}})).unwrap();
        assert_eq!(fractional.timestamp, 1_772_366_400);

        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert!(fractional.is_fresh(now, 300));

        let text: DeviceReadout =
            serde_json::from_value(json!({"timestamp": "1772366400", "payload": {"temp": 21}}))
                .unwrap();
        assert_eq!(text.timestamp, 1_772_366_400);

        let missing: DeviceReadout = serde_json::from_value(json!({"payload": {}})).unwrap();
        assert_eq!(missing.timestamp, 0);

        let null: DeviceReadout = serde_json::from_value(json!({"timestamp": null})).unwrap();
        assert!(!null.is_fresh(now, 300));
    }
}
