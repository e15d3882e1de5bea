use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{EditError, PacketEncodingError},
    setpoints::number,
    ConfigKind,
};

pub const SLOT_COUNT: usize = 5;
const SLOT_FIELDS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSlot {
    pub id: u8,
    pub active: bool,
    pub start_hour: u8,
    pub start_minute: u8,
    pub end_hour: u8,
    pub end_minute: u8,
}

impl ScheduleSlot {
    pub fn inactive(id: u8) -> Self {
        Self {
            id,
            active: false,
            start_hour: 0,
            start_minute: 0,
            end_hour: 0,
            end_minute: 0,
        }
    }

    pub fn get(&self, field: SlotField) -> u8 {
        match field {
            SlotField::Active => u8::from(self.active),
            SlotField::StartHour => self.start_hour,
            SlotField::StartMinute => self.start_minute,
            SlotField::EndHour => self.end_hour,
            SlotField::EndMinute => self.end_minute,
        }
    }

    fn put(&mut self, field: SlotField, value: u8) {
        match field {
            SlotField::Active => self.active = value != 0,
            SlotField::StartHour => self.start_hour = value,
            SlotField::StartMinute => self.start_minute = value,
            SlotField::EndHour => self.end_hour = value,
            SlotField::EndMinute => self.end_minute = value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotField {
    Active,
    StartHour,
    StartMinute,
    EndHour,
    EndMinute,
}

impl SlotField {
    pub const ALL: [SlotField; SLOT_FIELDS] = [
        SlotField::Active,
        SlotField::StartHour,
        SlotField::StartMinute,
        SlotField::EndHour,
        SlotField::EndMinute,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::StartHour => "startHour",
            Self::StartMinute => "startMinute",
            Self::EndHour => "endHour",
            Self::EndMinute => "endMinute",
        }
    }

    pub fn max(self) -> u8 {
        match self {
            Self::Active => 1,
            Self::StartHour | Self::EndHour => 23,
            Self::StartMinute | Self::EndMinute => 59,
        }
    }

    fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::Active => &["active", "enabled", "on"],
            Self::StartHour => &["startHour", "start_hour", "sh"],
            Self::StartMinute => &["startMinute", "start_minute", "sm"],
            Self::EndHour => &["endHour", "end_hour", "eh"],
            Self::EndMinute => &["endMinute", "end_minute", "em"],
        }
    }
}

/// One field change addressed as `slot<id>.<field>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleEdit {
    pub slot: u8,
    pub field: SlotField,
    pub value: u8,
}

impl ScheduleEdit {
    pub fn key(slot: u8, field: SlotField) -> String {
        format!("slot{slot}.{}", field.as_str())
    }

    /// Parses a `slot2.startHour` style key plus its textual value.
    pub fn parse(key: &str, value: &str) -> Result<Self, EditError> {
        let unknown = || EditError::UnknownField(key.to_string());
        let (slot, field) = key.trim().split_once('.').ok_or_else(unknown)?;
        let slot = slot
            .strip_prefix("slot")
            .and_then(|id| id.parse::<u8>().ok())
            .ok_or_else(unknown)?;
        let field = SlotField::from_str(field)?;
        let value = match value.trim().to_ascii_lowercase().as_str() {
            "true" | "on" => 1,
            "false" | "off" => 0,
            other => other.parse::<u8>().map_err(|_| match other.parse::<f64>() {
                Ok(number) => EditError::OutOfRange {
                    key: Self::key(slot, field),
                    value: number,
                    min: 0.0,
                    max: f64::from(field.max()),
                },
                Err(_) => EditError::InvalidNumber {
                    key: Self::key(slot, field),
                    text: other.to_string(),
                },
            })?,
        };
        Ok(Self { slot, field, value })
    }
}

impl FromStr for SlotField {
    type Err = EditError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|field| field.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| EditError::UnknownField(value.to_string()))
    }
}

impl fmt::Display for SlotField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The five irrigation windows of one zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Schedule {
    slots: [ScheduleSlot; SLOT_COUNT],
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            slots: std::array::from_fn(|index| ScheduleSlot::inactive(index as u8 + 1)),
        }
    }
}

impl Schedule {
    pub fn slots(&self) -> &[ScheduleSlot] {
        &self.slots
    }

    pub fn slot(&self, id: u8) -> Option<&ScheduleSlot> {
        self.slots.iter().find(|slot| slot.id == id)
    }

    pub fn apply(&mut self, edit: &ScheduleEdit) -> Result<(), EditError> {
        if edit.value > edit.field.max() {
            return Err(EditError::OutOfRange {
                key: ScheduleEdit::key(edit.slot, edit.field),
                value: f64::from(edit.value),
                min: 0.0,
                max: f64::from(edit.field.max()),
            });
        }
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| slot.id == edit.slot)
            .ok_or(EditError::UnknownSlot(edit.slot))?;
        slot.put(edit.field, edit.value);
        Ok(())
    }

    /// Writes a device-reported field; silently ignores unknown keys.
    pub(crate) fn put_field(&mut self, key: &str, value: u8) {
        for slot in self.slots.iter_mut() {
            for field in SlotField::ALL {
                if ScheduleEdit::key(slot.id, field) == key {
                    slot.put(field, value);
                    return;
                }
            }
        }
    }

    pub fn fields(&self) -> Vec<(String, f64)> {
        self.slots
            .iter()
            .flat_map(|slot| {
                SlotField::ALL
                    .into_iter()
                    .map(move |field| (ScheduleEdit::key(slot.id, field), f64::from(slot.get(field))))
            })
            .collect()
    }

    /// `[7, (active, startHour, startMinute, endHour, endMinute) x 5]`.
    pub fn encode(&self) -> Result<Vec<f64>, PacketEncodingError> {
        encode_slots(&self.slots)
    }

    /// Never fails: missing slots stay inactive, malformed fields keep their default.
    pub fn decode(raw: &Value) -> Self {
        let list = raw
            .get("schedule")
            .or_else(|| raw.get("slots"))
            .unwrap_or(raw);

        let mut schedule = Self::default();
        let Some(items) = list.as_array() else {
            return schedule;
        };

        for (position, item) in items.iter().take(SLOT_COUNT).enumerate() {
            let id = ["id", "slot"]
                .iter()
                .find_map(|name| item.get(name).and_then(number))
                .map(|id| id as u8)
                .filter(|id| (1..=SLOT_COUNT as u8).contains(id))
                .unwrap_or(position as u8 + 1);

            let Some(slot) = schedule.slots.iter_mut().find(|slot| slot.id == id) else {
                continue;
            };
            decode_slot(item, slot);
        }
        schedule
    }
}

fn decode_slot(item: &Value, slot: &mut ScheduleSlot) {
    if let Some((hour, minute)) = item.get("start").and_then(clock) {
        slot.start_hour = hour;
        slot.start_minute = minute;
    }
    if let Some((hour, minute)) = item.get("end").and_then(clock) {
        slot.end_hour = hour;
        slot.end_minute = minute;
    }

    for field in SlotField::ALL {
        let value = field
            .aliases()
            .iter()
            .find_map(|name| item.get(name).and_then(number));
        let Some(value) = value else {
            continue;
        };
        if value.fract() == 0.0 && (0.0..=f64::from(field.max())).contains(&value) {
            slot.put(field, value as u8);
        }
    }
}

/// Parses `"HH:MM"`.
fn clock(value: &Value) -> Option<(u8, u8)> {
    let (hour, minute) = value.as_str()?.trim().split_once(':')?;
    let hour = hour.parse::<u8>().ok().filter(|hour| *hour <= 23)?;
    let minute = minute.parse::<u8>().ok().filter(|minute| *minute <= 59)?;
    Some((hour, minute))
}

/// Encodes an arbitrary slot list, failing unless it is exactly slots 1..=5.
pub fn encode_slots(slots: &[ScheduleSlot]) -> Result<Vec<f64>, PacketEncodingError> {
    if slots.len() != SLOT_COUNT {
        return Err(PacketEncodingError::WrongArity {
            kind: ConfigKind::Schedule,
            expected: SLOT_COUNT,
            actual: slots.len(),
        });
    }

    let mut ordered = slots.to_vec();
    ordered.sort_by_key(|slot| slot.id);
    for (index, slot) in ordered.iter().enumerate() {
        if usize::from(slot.id) != index + 1 {
            return Err(PacketEncodingError::InvalidSlotId(slot.id));
        }
    }

    let mut packet = Vec::with_capacity(1 + SLOT_COUNT * SLOT_FIELDS);
    packet.push(f64::from(ConfigKind::Schedule.mode()));
    for slot in &ordered {
        packet.extend(SlotField::ALL.into_iter().map(|field| f64::from(slot.get(field))));
    }
    Ok(packet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn slot(id: u8, active: bool, start: (u8, u8), end: (u8, u8)) -> ScheduleSlot {
        ScheduleSlot {
            id,
            active,
            start_hour: start.0,
            start_minute: start.1,
            end_hour: end.0,
            end_minute: end.1,
        }
    }

    #[test]
    fn encode_orders_slots_by_id() {
        let mut slots = Schedule::default().slots().to_vec();
        slots[0] = slot(1, true, (6, 30), (7, 0));
        slots.reverse();

        let packet = encode_slots(&slots).unwrap();

        assert_eq!(packet.len(), 26);
        assert_eq!(packet[0], 7.0);
        assert_eq!(&packet[1..6], &[1.0, 6.0, 30.0, 7.0, 0.0]);
        assert_eq!(&packet[6..11], &[0.0; 5]);
    }

    #[test]
    fn encode_rejects_wrong_arity_and_ids() {
        let slots = Schedule::default().slots().to_vec();

        assert_eq!(
            encode_slots(&slots[..4]),
            Err(PacketEncodingError::WrongArity {
                kind: ConfigKind::Schedule,
                expected: 5,
                actual: 4,
            })
        );

        let mut duplicated = slots.clone();
        duplicated[4].id = 4;
        assert_eq!(
            encode_slots(&duplicated),
            Err(PacketEncodingError::InvalidSlotId(4))
        );
    }

    #[test]
    fn decode_is_total() {
        assert_eq!(Schedule::decode(&json!({})), Schedule::default());
        assert_eq!(Schedule::decode(&json!(null)), Schedule::default());
        assert_eq!(Schedule::decode(&json!([{}, "x", 3])), Schedule::default());
    }

    #[test]
    fn decode_reads_partial_and_renamed_fields() {
        let decoded = Schedule::decode(&json!([
            {"id": 2, "active": true, "startHour": 6, "startMinute": 15, "endHour": 6, "endMinute": 45},
            {"slot": "4", "enabled": 1, "start": "18:00", "end": "18:30"},
            {"id": 9, "active": true, "start_hour": 25, "end_minute": 10},
        ]));

        assert_eq!(decoded.slot(1), Some(&ScheduleSlot::inactive(1)));
        assert_eq!(decoded.slot(2), Some(&slot(2, true, (6, 15), (6, 45))));
        assert_eq!(decoded.slot(4), Some(&slot(4, true, (18, 0), (18, 30))));
        // Out-of-range id falls back to its position; out-of-range hour is dropped.
        assert_eq!(decoded.slot(3), Some(&slot(3, true, (0, 0), (0, 10))));
    }

    #[test]
    fn decode_unwraps_envelope() {
        let decoded = Schedule::decode(&json!({"schedule": [{"id": 1, "active": true}]}));
        assert!(decoded.slot(1).unwrap().active);
    }

    #[test]
    fn parse_distinguishes_bad_text_from_bad_range() {
        assert_eq!(
            ScheduleEdit::parse("slot2.startHour", "soon"),
            Err(EditError::InvalidNumber {
                key: "slot2.startHour".to_string(),
                text: "soon".to_string(),
            })
        );
        assert!(matches!(
            ScheduleEdit::parse("slot2.startHour", "-3"),
            Err(EditError::OutOfRange { value, .. }) if value == -3.0
        ));
    }

    #[test]
    fn apply_validates_ranges_and_slots() {
        let mut schedule = Schedule::default();
        schedule
            .apply(&ScheduleEdit {
                slot: 3,
                field: SlotField::StartHour,
                value: 5,
            })
            .unwrap();
        assert_eq!(schedule.slot(3).unwrap().start_hour, 5);

        assert!(matches!(
            schedule.apply(&ScheduleEdit {
                slot: 3,
                field: SlotField::EndMinute,
                value: 60,
            }),
            Err(EditError::OutOfRange { .. })
        ));
        assert_eq!(
            schedule.apply(&ScheduleEdit {
                slot: 6,
                field: SlotField::Active,
                value: 1,
            }),
            Err(EditError::UnknownSlot(6))
        );
    }

    #[test]
    fn parses_edit_keys() {
        assert_eq!(
            ScheduleEdit::parse("slot2.startHour", "6").unwrap(),
            ScheduleEdit {
                slot: 2,
                field: SlotField::StartHour,
                value: 6,
            }
        );
        assert_eq!(
            ScheduleEdit::parse("slot5.active", "on").unwrap().value,
            1
        );
        assert!(ScheduleEdit::parse("slot2", "6").is_err());
        assert!(ScheduleEdit::parse("slot2.startHour", "-1").is_err());
    }

    #[test]
    fn fields_flatten_every_slot() {
        let fields = Schedule::default().fields();
        assert_eq!(fields.len(), 25);
        assert_eq!(fields[0], ("slot1.active".to_string(), 0.0));
        assert_eq!(fields[24], ("slot5.endMinute".to_string(), 0.0));
    }
}
