//! Thermostat controller — hysteresis control of virtual heaters and coolers.
//!
//! A device with a [`ChannelCategory::Thermostat`] channel is evaluated after
//! every scheduler tick. Evaluation is pure: it reads a [`DeviceSnapshot`] and
//! returns the outputs that must change, plus a fault when the device is
//! misconfigured. The caller writes the outputs as generator-origin commands.
//!
//! Layout conventions:
//! - thermostat channel: `hvac_mode`, `preset_mode`, `target_temperature`,
//!   tolerances, thresholds, `max_floor_temperature`, and the outputs
//!   `actual_temperature`, `actual_floor_temperature`, `hvac_state`
//! - `preset_<mode>` channels: per-preset `target_temperature` and thresholds
//! - `sensors`: `target_sensor*` (room) and `floor_sensor*` readings
//! - `openings`: `sensor*` booleans, `true` meaning open
//! - `actors`: `heater*` and `cooler*` booleans

use vconnector_domain::device::ChannelCategory;
use vconnector_domain::error::InvalidStateError;
use vconnector_domain::key::PropertyKey;
use vconnector_domain::value::PropertyValue;

use crate::store::{ChannelSnapshot, DeviceSnapshot, PropertySnapshot};

const SENSORS: &str = "sensors";
const OPENINGS: &str = "openings";
const ACTORS: &str = "actors";

const HVAC_MODE: &str = "hvac_mode";
const PRESET_MODE: &str = "preset_mode";
const TARGET_TEMPERATURE: &str = "target_temperature";
const LOW_TOLERANCE: &str = "low_target_temperature_tolerance";
const HIGH_TOLERANCE: &str = "high_target_temperature_tolerance";
const HEATING_THRESHOLD: &str = "heating_threshold_temperature";
const COOLING_THRESHOLD: &str = "cooling_threshold_temperature";
const MAX_FLOOR_TEMPERATURE: &str = "max_floor_temperature";
const ACTUAL_TEMPERATURE: &str = "actual_temperature";
const ACTUAL_FLOOR_TEMPERATURE: &str = "actual_floor_temperature";
const HVAC_STATE: &str = "hvac_state";

/// Operating mode selected on the thermostat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HvacMode {
    Off,
    Heat,
    Cool,
    Auto,
}

impl HvacMode {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "off" => Some(Self::Off),
            "heat" => Some(Self::Heat),
            "cool" => Some(Self::Cool),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }
}

/// What the actors are doing, as reported through `hvac_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HvacState {
    Off,
    Inactive,
    Heating,
    Cooling,
}

impl HvacState {
    fn from_actors(heaters: bool, coolers: bool) -> Self {
        match (heaters, coolers) {
            (true, false) => Self::Heating,
            (false, true) => Self::Cooling,
            (false, false) => Self::Off,
            (true, true) => Self::Inactive,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Inactive => "inactive",
            Self::Heating => "heating",
            Self::Cooling => "cooling",
        }
    }
}

/// Result of one evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThermostatOutcome {
    /// Outputs whose stored value differs from the computed one.
    pub writes: Vec<(PropertyKey, PropertyValue)>,
    /// Set when the device cannot be controlled as configured.
    pub fault: Option<InvalidStateError>,
}

/// Whether a device is driven by the thermostat controller.
#[must_use]
pub fn is_thermostat(device: &DeviceSnapshot) -> bool {
    device
        .channels
        .iter()
        .any(|c| c.category == ChannelCategory::Thermostat)
}

/// Evaluate a thermostat device. Returns `None` for non-thermostat devices.
#[must_use]
pub fn evaluate(device: &DeviceSnapshot) -> Option<ThermostatOutcome> {
    let thermostat = device
        .channels
        .iter()
        .find(|c| c.category == ChannelCategory::Thermostat)?;

    let mut control = Control::new(device, thermostat);
    control.run();
    Some(control.outcome)
}

struct Control<'a> {
    device: &'a DeviceSnapshot,
    thermostat: &'a ChannelSnapshot,
    heaters: Vec<&'a PropertySnapshot>,
    coolers: Vec<&'a PropertySnapshot>,
    room: Vec<f64>,
    floor: Vec<f64>,
    outcome: ThermostatOutcome,
}

impl<'a> Control<'a> {
    fn new(device: &'a DeviceSnapshot, thermostat: &'a ChannelSnapshot) -> Self {
        Self {
            device,
            thermostat,
            heaters: prefixed(device, ACTORS, "heater").collect(),
            coolers: prefixed(device, ACTORS, "cooler").collect(),
            room: readings(device, "target_sensor"),
            floor: readings(device, "floor_sensor"),
            outcome: ThermostatOutcome::default(),
        }
    }

    fn run(&mut self) {
        let mode = text(self.thermostat, HVAC_MODE).and_then(HvacMode::parse);
        let preset = text(self.thermostat, PRESET_MODE);
        let (Some(mode), Some(preset)) = (mode, preset) else {
            return self.fail("thermostat mode is not configured");
        };

        let preset_channel = self.device.channel(&format!("preset_{preset}"));
        let target = if preset == "manual" {
            number(self.thermostat, TARGET_TEMPERATURE)
        } else {
            preset_channel.and_then(|c| number(c, TARGET_TEMPERATURE))
        };
        let Some(target) = target else {
            return self.fail("target temperature is not configured");
        };

        let low = target - number(self.thermostat, LOW_TOLERANCE).unwrap_or(0.0);
        let high = target + number(self.thermostat, HIGH_TOLERANCE).unwrap_or(0.0);
        if low > high {
            return self.fail("target temperature boundaries are wrongly configured");
        }

        if let Some(mean) = mean(&self.room) {
            self.write_number(ACTUAL_TEMPERATURE, mean);
        }
        if let Some(mean) = mean(&self.floor) {
            self.write_number(ACTUAL_FLOOR_TEMPERATURE, mean);
        }

        let (Some(min), Some(max)) = (lowest(&self.room), highest(&self.room)) else {
            return self.set_actors(false, false);
        };

        if self.openings_open() || mode == HvacMode::Off {
            return self.set_actors(false, false);
        }
        if self.floor_overheating() {
            return self.set_actors(false, self.is_cooling());
        }

        match mode {
            HvacMode::Off => {}
            HvacMode::Heat => {
                if self.heaters.is_empty() {
                    return self.fail("thermostat has no heater actor");
                }
                if max >= high {
                    self.set_actors(false, false);
                } else if min <= low {
                    self.set_actors(true, false);
                }
            }
            HvacMode::Cool => {
                if self.coolers.is_empty() {
                    return self.fail("thermostat has no cooler actor");
                }
                if max >= high {
                    self.set_actors(false, true);
                } else if min <= low {
                    self.set_actors(false, false);
                }
            }
            HvacMode::Auto => {
                let threshold = |name: &str| {
                    preset_channel
                        .and_then(|c| number(c, name))
                        .or_else(|| number(self.thermostat, name))
                };
                let heating = threshold(HEATING_THRESHOLD);
                let cooling = threshold(COOLING_THRESHOLD);
                let (Some(heating), Some(cooling)) = (heating, cooling) else {
                    return self.fail("heating and cooling thresholds are wrongly configured");
                };
                if heating >= cooling || heating > target || cooling < target {
                    return self.fail("heating and cooling thresholds are wrongly configured");
                }

                let (heating_now, cooling_now) = (self.is_heating(), self.is_cooling());
                if min <= heating {
                    self.set_actors(true, false);
                } else if max >= cooling {
                    self.set_actors(false, true);
                } else if heating_now && !cooling_now && max >= high {
                    self.set_actors(false, false);
                } else if !heating_now && cooling_now && min <= low {
                    self.set_actors(false, false);
                } else if heating_now && cooling_now {
                    self.set_actors(false, false);
                }
            }
        }
    }

    fn fail(&mut self, reason: &'static str) {
        self.set_actors(false, false);
        self.outcome.fault = Some(InvalidStateError {
            device: self.device.key.clone(),
            reason,
        });
    }

    fn set_actors(&mut self, heaters: bool, coolers: bool) {
        let heaters = heaters && !self.heaters.is_empty() && !self.floor_overheating();
        let coolers = coolers && !self.coolers.is_empty();

        for actor in self.heaters.clone() {
            self.write(actor, PropertyValue::Bool(heaters));
        }
        for actor in self.coolers.clone() {
            self.write(actor, PropertyValue::Bool(coolers));
        }
        if let Some(state) = property(self.thermostat, HVAC_STATE) {
            let value = HvacState::from_actors(heaters, coolers).as_str().to_string();
            self.write(state, PropertyValue::String(value));
        }
    }

    fn write_number(&mut self, name: &str, value: f64) {
        if let Some(target) = property(self.thermostat, name) {
            self.write(target, PropertyValue::Float(value));
        }
    }

    fn write(&mut self, property: &PropertySnapshot, value: PropertyValue) {
        if property.value.as_ref() != Some(&value) {
            self.outcome.writes.push((property.key.clone(), value));
        }
    }

    fn is_heating(&self) -> bool {
        self.heaters.iter().any(|p| is_on(p))
    }

    fn is_cooling(&self) -> bool {
        self.coolers.iter().any(|p| is_on(p))
    }

    fn openings_open(&self) -> bool {
        prefixed(self.device, OPENINGS, "sensor").any(is_on)
    }

    fn floor_overheating(&self) -> bool {
        match (highest(&self.floor), number(self.thermostat, MAX_FLOOR_TEMPERATURE)) {
            (Some(floor), Some(limit)) => floor >= limit,
            _ => false,
        }
    }
}

fn is_on(property: &PropertySnapshot) -> bool {
    property.value.as_ref().and_then(PropertyValue::as_bool) == Some(true)
}

/// Properties of `channel` whose name starts with `prefix`.
fn prefixed<'a>(
    device: &'a DeviceSnapshot,
    channel: &str,
    prefix: &'static str,
) -> impl Iterator<Item = &'a PropertySnapshot> + use<'a> {
    device
        .channel(channel)
        .into_iter()
        .flat_map(|c| c.properties.iter())
        .filter(move |p| p.key.property.as_str().starts_with(prefix))
}

fn readings(device: &DeviceSnapshot, prefix: &'static str) -> Vec<f64> {
    prefixed(device, SENSORS, prefix)
        .filter_map(|p| p.value.as_ref().and_then(PropertyValue::as_f64))
        .collect()
}

fn property<'a>(channel: &'a ChannelSnapshot, name: &str) -> Option<&'a PropertySnapshot> {
    channel
        .properties
        .iter()
        .find(|p| p.key.property.as_str() == name)
}

fn number(channel: &ChannelSnapshot, name: &str) -> Option<f64> {
    property(channel, name)?.value.as_ref()?.as_f64()
}

fn text<'a>(channel: &'a ChannelSnapshot, name: &str) -> Option<&'a str> {
    property(channel, name)?.value.as_ref()?.as_str()
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

fn lowest(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::min)
}

fn highest(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}
