use std::{fmt, str::FromStr};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{EditError, PacketEncodingError};

pub const SETPOINT_COUNT: usize = 23;

/// Static description of one setpoint field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetpointSpec {
    pub key: &'static str,
    /// Other names the controller has used for this field.
    pub aliases: &'static [&'static str],
    pub min: f64,
    pub max: f64,
    pub default: f64,
}

macro_rules! setpoint_keys {
    ($($variant:ident => $key:literal, [$($alias:literal),*], $min:expr, $max:expr, $default:expr;)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum SetpointKey {
            $($variant,)*
        }

        impl SetpointKey {
            /// Controller firmware order.
            pub const ALL: [SetpointKey; SETPOINT_COUNT] = [$(SetpointKey::$variant,)*];

            pub fn spec(self) -> SetpointSpec {
                match self {
                    $(Self::$variant => SetpointSpec {
                        key: $key,
                        aliases: &[$($alias),*],
                        min: $min,
                        max: $max,
                        default: $default,
                    },)*
                }
            }
        }
    };
}

setpoint_keys! {
    TemperatureMin => "temperatureMin", ["temperature_min", "TEMP-MINsetpoint"], 0.0, 50.0, 18.0;
    TemperatureMax => "temperatureMax", ["temperature_max", "TEMP-MAXsetpoint"], 0.0, 50.0, 28.0;
    HumidityMin => "humidityMin", ["humidity_min", "HUM-MINsetpoint"], 0.0, 100.0, 50.0;
    HumidityMax => "humidityMax", ["humidity_max", "HUM-MAXsetpoint"], 0.0, 100.0, 80.0;
    LuxMin => "luxMin", ["lux_min", "LUX-MINsetpoint"], 0.0, 100_000.0, 3_000.0;
    LuxMax => "luxMax", ["lux_max", "LUX-MAXsetpoint"], 0.0, 100_000.0, 7_000.0;
    EcSetpoint => "ecSetpoint", ["ec_setpoint", "EC-setpoint"], 0.0, 5.0, 1.5;
    EcTolerance => "ecTolerance", ["ec_tolerance", "EC-tolerance"], 0.0, 2.0, 0.2;
    PhMin => "phMin", ["ph_min", "PH-MINsetpoint"], 0.0, 14.0, 5.5;
    PhMax => "phMax", ["ph_max", "PH-MAXsetpoint"], 0.0, 14.0, 6.5;
    EcARatio => "ecARatio", ["ec_a_ratio", "EC-A"], 0.0, 10.0, 1.0;
    EcBRatio => "ecBRatio", ["ec_b_ratio", "EC-B"], 0.0, 10.0, 1.0;
    SoilMoistureMin => "soilMoistureMin", ["soil_moisture_min", "SM-MINsetpoint"], 0.0, 100.0, 35.0;
    SoilMoistureMax => "soilMoistureMax", ["soil_moisture_max", "SM-MAXsetpoint"], 0.0, 100.0, 60.0;
    WaterLevelMin => "waterLevelMin", ["water_level_min"], 0.0, 100.0, 20.0;
    FanOnTemperature => "fanOnTemperature", ["fan_on_temperature"], 0.0, 50.0, 30.0;
    FoggerOnHumidity => "foggerOnHumidity", ["fogger_on_humidity"], 0.0, 100.0, 40.0;
    CurtainCloseLux => "curtainCloseLux", ["curtain_close_lux"], 0.0, 100_000.0, 60_000.0;
    PumpOnSeconds => "pumpOnSeconds", ["pump_on_seconds"], 0.0, 3_600.0, 300.0;
    PumpOffSeconds => "pumpOffSeconds", ["pump_off_seconds"], 0.0, 86_400.0, 1_800.0;
    ValveOnSeconds => "valveOnSeconds", ["valve_on_seconds"], 0.0, 3_600.0, 120.0;
    TankTemperatureMax => "tankTemperatureMax", ["tank_temperature_max", "TP4-MAXsetpoint"], 0.0, 50.0, 30.0;
    DosingIntervalMinutes => "dosingIntervalMinutes", ["dosing_interval_minutes"], 1.0, 1_440.0, 60.0;
}

impl SetpointKey {
    pub fn as_str(self) -> &'static str {
        self.spec().key
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn validate(self, value: f64) -> Result<(), EditError> {
        let spec = self.spec();
        if !value.is_finite() {
            return Err(EditError::NonFinite(spec.key.to_string()));
        }
        if !(spec.min..=spec.max).contains(&value) {
            return Err(EditError::OutOfRange {
                key: spec.key.to_string(),
                value,
                min: spec.min,
                max: spec.max,
            });
        }
        Ok(())
    }
}

impl fmt::Display for SetpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SetpointKey {
    type Err = EditError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|key| {
                let spec = key.spec();
                spec.key.eq_ignore_ascii_case(value)
                    || spec.aliases.iter().any(|alias| alias.eq_ignore_ascii_case(value))
            })
            .ok_or_else(|| EditError::UnknownField(value.to_string()))
    }
}

/// All setpoints of one zone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Setpoints {
    values: [f64; SETPOINT_COUNT],
}

impl Default for Setpoints {
    fn default() -> Self {
        let mut values = [0.0; SETPOINT_COUNT];
        for key in SetpointKey::ALL {
            values[key.index()] = key.spec().default;
        }
        Self { values }
    }
}

impl Setpoints {
    pub fn get(&self, key: SetpointKey) -> f64 {
        self.values[key.index()]
    }

    /// Range-checked update.
    pub fn set(&mut self, key: SetpointKey, value: f64) -> Result<(), EditError> {
        key.validate(value)?;
        self.values[key.index()] = value;
        Ok(())
    }

    /// Stores a device-reported value as-is; the controller is authoritative.
    pub(crate) fn set_unchecked(&mut self, key: SetpointKey, value: f64) {
        self.values[key.index()] = value;
    }

    pub fn iter(&self) -> impl Iterator<Item = (SetpointKey, f64)> + '_ {
        SetpointKey::ALL.into_iter().map(|key| (key, self.get(key)))
    }

    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .iter()
            .map(|(key, value)| (key.as_str().to_string(), Value::from(value)))
            .collect();
        Value::Object(map)
    }

    /// `[6, field1, .., field23]`.
    pub fn encode(&self) -> Result<Vec<f64>, PacketEncodingError> {
        let mut packet = Vec::with_capacity(SETPOINT_COUNT + 1);
        packet.push(f64::from(crate::ConfigKind::Setpoints.mode()));
        for (key, value) in self.iter() {
            if !value.is_finite() {
                return Err(PacketEncodingError::NonFinite(key.as_str().to_string()));
            }
            packet.push(value);
        }
        Ok(packet)
    }

    /// Never fails: absent, renamed or malformed fields fall back to defaults.
    pub fn decode(raw: &Value) -> Self {
        let object = raw
            .get("setpoints")
            .or_else(|| raw.get("payload"))
            .filter(|inner| inner.is_object())
            .unwrap_or(raw);

        let mut setpoints = Self::default();
        let Some(object) = object.as_object() else {
            return setpoints;
        };

        for key in SetpointKey::ALL {
            let spec = key.spec();
            let found = std::iter::once(spec.key)
                .chain(spec.aliases.iter().copied())
                .find_map(|name| object.get(name).and_then(number));
            if let Some(value) = found {
                setpoints.set_unchecked(key, value);
            }
        }
        setpoints
    }
}

impl Serialize for Setpoints {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Lenient numeric read used by both decoders.
pub(crate) fn number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
        _ => None,
    };
    parsed.filter(|value| value.is_finite())
}
