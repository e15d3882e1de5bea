//! Properties that must hold for every draft and every device record.

use proptest::prelude::*;
use serde_json::{Map, Value};
use zone_common::{
    decode_schedule, decode_setpoints, domain::diff, domain::Comparison, encode_schedule,
    encode_setpoints, ConfigDomain, Schedule, ScheduleDomain, ScheduleEdit, SetpointKey,
    Setpoints, SetpointsDomain, SlotField, SyncConfig, SyncError, SyncMachine,
};

const TOLERANCE: Comparison = Comparison::Tolerance(0.01);

fn setpoints() -> impl Strategy<Value = Setpoints> {
    let ranges: Vec<_> = SetpointKey::ALL
        .iter()
        .map(|key| {
            let spec = key.spec();
            spec.min..=spec.max
        })
        .collect();
    ranges.prop_map(|values| {
        let mut setpoints = Setpoints::default();
        for (key, value) in SetpointKey::ALL.into_iter().zip(values) {
            setpoints.set(key, value).unwrap();
        }
        setpoints
    })
}

fn schedule() -> impl Strategy<Value = Schedule> {
    let slot = (0u8..=1, 0u8..=23, 0u8..=59, 0u8..=23, 0u8..=59);
    proptest::collection::vec(slot, 5).prop_map(|slots| {
        let mut schedule = Schedule::default();
        for (id, (active, start_hour, start_minute, end_hour, end_minute)) in (1u8..).zip(slots) {
            let fields = [
                (SlotField::Active, active),
                (SlotField::StartHour, start_hour),
                (SlotField::StartMinute, start_minute),
                (SlotField::EndHour, end_hour),
                (SlotField::EndMinute, end_minute),
            ];
            for (field, value) in fields {
                schedule
                    .apply(&ScheduleEdit {
                        slot: id,
                        field,
                        value,
                    })
                    .unwrap();
            }
        }
        schedule
    })
}

/// Arbitrary JSON, biased toward the keys the decoders look for.
fn json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        any::<f64>().prop_map(Value::from),
        "[0-9]{1,2}:[0-9]{1,2}".prop_map(Value::from),
        "[ -~]{0,12}".prop_map(Value::from),
    ];
    let key = prop_oneof![
        prop::sample::select(vec![
            "setpoints",
            "payload",
            "schedule",
            "slots",
            "ecSetpoint",
            "EC-setpoint",
            "phMin",
            "id",
            "active",
            "start",
            "end",
            "startHour",
            "endMinute",
        ])
        .prop_map(str::to_string),
        "[a-zA-Z_-]{1,10}",
    ];
    leaf.prop_recursive(4, 64, 8, move |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..8).prop_map(Value::Array),
            proptest::collection::btree_map(key.clone(), inner, 0..8)
                .prop_map(|entries| Value::Object(entries.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

proptest! {
    #[test]
    fn setpoint_packets_are_always_24_long(draft in setpoints()) {
        let packet = encode_setpoints(&draft).unwrap();
        prop_assert_eq!(packet.len(), 24);
        prop_assert_eq!(packet.values()[0], 6.0);
    }

    #[test]
    fn schedule_packets_are_always_26_long(draft in schedule()) {
        let packet = encode_schedule(draft.slots()).unwrap();
        prop_assert_eq!(packet.len(), 26);
        prop_assert_eq!(packet.values()[0], 7.0);
    }

    #[test]
    fn decoders_accept_any_json(raw in json()) {
        let setpoints = decode_setpoints(&raw);
        prop_assert_eq!(encode_setpoints(&setpoints).unwrap().len(), 24);

        let schedule = decode_schedule(&raw);
        prop_assert_eq!(encode_schedule(schedule.slots()).unwrap().len(), 26);
    }

    #[test]
    fn a_value_never_differs_from_itself(raw in json(), draft in setpoints(), slots in schedule()) {
        let decoded = SetpointsDomain::decode(&raw);
        prop_assert!(diff::<SetpointsDomain>(&decoded, &decoded, TOLERANCE).is_empty());
        prop_assert!(diff::<SetpointsDomain>(&draft, &draft, TOLERANCE).is_empty());
        prop_assert!(diff::<ScheduleDomain>(&slots, &slots, Comparison::Exact).is_empty());
    }

    #[test]
    fn freshly_loaded_record_has_nothing_to_save(raw in json()) {
        let mut machine = SyncMachine::<SetpointsDomain>::new(SyncConfig::default());
        machine.apply_loaded(&raw).unwrap();

        prop_assert!(!machine.has_changes());
        prop_assert_eq!(machine.save(1, true), Err(SyncError::NoChanges));
    }

    #[test]
    fn hundredth_steps_always_count_as_changes(start in 0u32..=150, steps in 1u32..=50) {
        let old = f64::from(start) / 100.0;
        let new = f64::from(start + steps) / 100.0;

        let mut baseline = Setpoints::default();
        baseline.set(SetpointKey::EcTolerance, old).unwrap();
        let mut draft = baseline;
        draft.set(SetpointKey::EcTolerance, new).unwrap();

        let changes = diff::<SetpointsDomain>(&baseline, &draft, TOLERANCE);
        prop_assert_eq!(changes.len(), 1);
        prop_assert_eq!(changes[0].key.as_str(), "ecTolerance");
    }

    #[test]
    fn sub_hundredth_nudges_are_not_changes(start in 0u32..=150, nudge in 0.0f64..0.0099) {
        let old = f64::from(start) / 100.0;

        let mut baseline = Setpoints::default();
        baseline.set(SetpointKey::EcTolerance, old).unwrap();
        let mut draft = baseline;
        draft.set(SetpointKey::EcTolerance, old + nudge).unwrap();

        prop_assert!(diff::<SetpointsDomain>(&baseline, &draft, TOLERANCE).is_empty());
    }
}
