use std::fmt;

use serde_json::Value;

use crate::{
    codec::{encode_schedule, encode_setpoints, Packet},
    error::{EditError, PacketEncodingError},
    schedule::{Schedule, ScheduleEdit},
    session::FieldChange,
    setpoints::{SetpointKey, Setpoints},
    ConfigKind,
};

/// How two values of the same field are compared.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Comparison {
    /// Differences below the tolerance are treated as equal.
    Tolerance(f64),
    Exact,
}

/// Absorbs binary rounding so a step of exactly the tolerance counts as a change.
const ROUNDING_SLACK: f64 = 1e-9;

impl Comparison {
    pub fn same(self, a: f64, b: f64) -> bool {
        match self {
            Self::Tolerance(tolerance) => (a - b).abs() < tolerance - ROUNDING_SLACK,
            Self::Exact => a == b,
        }
    }
}

/// One configuration area that can be loaded, edited and saved.
pub trait ConfigDomain: Send + 'static {
    type Value: Clone + PartialEq + fmt::Debug + Send + Sync + 'static;
    type Edit: Clone + fmt::Debug + Send + 'static;

    const KIND: ConfigKind;

    fn defaults() -> Self::Value;
    fn decode(raw: &Value) -> Self::Value;
    fn encode(value: &Self::Value) -> Result<Packet, PacketEncodingError>;
    fn apply_edit(value: &mut Self::Value, edit: &Self::Edit) -> Result<(), EditError>;
    /// Parses a `key=value` assignment from user input.
    fn parse_edit(key: &str, value: &str) -> Result<Self::Edit, EditError>;
    /// Every field flattened to `(key, number)` in a stable order.
    fn fields(value: &Self::Value) -> Vec<(String, f64)>;
    /// Copies a single field from `source` into `target`.
    fn copy_field(target: &mut Self::Value, source: &Self::Value, key: &str);
    fn comparison(float_tolerance: f64) -> Comparison;
}

pub struct SetpointsDomain;

impl ConfigDomain for SetpointsDomain {
    type Value = Setpoints;
    type Edit = SetpointEdit;

    const KIND: ConfigKind = ConfigKind::Setpoints;

    fn defaults() -> Setpoints {
        Setpoints::default()
    }

    fn decode(raw: &Value) -> Setpoints {
        Setpoints::decode(raw)
    }

    fn encode(value: &Setpoints) -> Result<Packet, PacketEncodingError> {
        encode_setpoints(value)
    }

    fn apply_edit(value: &mut Setpoints, edit: &SetpointEdit) -> Result<(), EditError> {
        value.set(edit.key, edit.value)
    }

    fn parse_edit(key: &str, value: &str) -> Result<SetpointEdit, EditError> {
        SetpointEdit::parse(key, value)
    }

    fn fields(value: &Setpoints) -> Vec<(String, f64)> {
        value
            .iter()
            .map(|(key, value)| (key.as_str().to_string(), value))
            .collect()
    }

    fn copy_field(target: &mut Setpoints, source: &Setpoints, key: &str) {
        if let Ok(key) = key.parse::<SetpointKey>() {
            target.set_unchecked(key, source.get(key));
        }
    }

    fn comparison(float_tolerance: f64) -> Comparison {
        Comparison::Tolerance(float_tolerance)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetpointEdit {
    pub key: SetpointKey,
    pub value: f64,
}

impl SetpointEdit {
    pub fn new(key: SetpointKey, value: f64) -> Self {
        Self { key, value }
    }

    /// Parses `ecSetpoint=0.95` style assignments.
    pub fn parse(key: &str, value: &str) -> Result<Self, EditError> {
        let key = key.parse::<SetpointKey>()?;
        let value = value
            .trim()
            .parse::<f64>()
            .map_err(|_| EditError::InvalidNumber {
                key: key.as_str().to_string(),
                text: value.trim().to_string(),
            })?;
        Ok(Self { key, value })
    }
}

pub struct ScheduleDomain;

impl ConfigDomain for ScheduleDomain {
    type Value = Schedule;
    type Edit = ScheduleEdit;

    const KIND: ConfigKind = ConfigKind::Schedule;

    fn defaults() -> Schedule {
        Schedule::default()
    }

    fn decode(raw: &Value) -> Schedule {
        Schedule::decode(raw)
    }

    fn encode(value: &Schedule) -> Result<Packet, PacketEncodingError> {
        encode_schedule(value.slots())
    }

    fn apply_edit(value: &mut Schedule, edit: &ScheduleEdit) -> Result<(), EditError> {
        value.apply(edit)
    }

    fn parse_edit(key: &str, value: &str) -> Result<ScheduleEdit, EditError> {
        ScheduleEdit::parse(key, value)
    }

    fn fields(value: &Schedule) -> Vec<(String, f64)> {
        value.fields()
    }

    fn copy_field(target: &mut Schedule, source: &Schedule, key: &str) {
        if let Some((_, value)) = source.fields().into_iter().find(|(name, _)| name == key) {
            target.put_field(key, value as u8);
        }
    }

    fn comparison(_float_tolerance: f64) -> Comparison {
        Comparison::Exact
    }
}

/// Fields of `draft` that differ from `baseline`.
pub fn diff<D: ConfigDomain>(
    baseline: &D::Value,
    draft: &D::Value,
    comparison: Comparison,
) -> Vec<FieldChange> {
    D::fields(baseline)
        .into_iter()
        .zip(D::fields(draft))
        .filter(|((_, old), (_, new))| !comparison.same(*old, *new))
        .map(|((key, old), (_, new))| FieldChange { key, old, new })
        .collect()
}

/// True when every change is reflected in `reported`.
pub fn confirms<D: ConfigDomain>(
    changes: &[FieldChange],
    reported: &D::Value,
    comparison: Comparison,
) -> bool {
    let fields = D::fields(reported);
    changes.iter().all(|change| {
        fields
            .iter()
            .find(|(key, _)| *key == change.key)
            .is_some_and(|(_, value)| comparison.same(*value, change.new))
    })
}

/// Keys outside `changes` where `reported` disagrees with `baseline`.
pub fn drifted<D: ConfigDomain>(
    changes: &[FieldChange],
    baseline: &D::Value,
    reported: &D::Value,
    comparison: Comparison,
) -> Vec<String> {
    D::fields(baseline)
        .into_iter()
        .zip(D::fields(reported))
        .filter(|((key, _), _)| !changes.iter().any(|change| change.key == *key))
        .filter(|((_, old), (_, new))| !comparison.same(*old, *new))
        .map(|((key, _), _)| key)
        .collect()
}
