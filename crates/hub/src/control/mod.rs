//! The closed-loop control core.
//!
//! One call to [`Controller::tick`] turns a sensor snapshot plus the current
//! [`Settings`](crate::settings::Settings) into actuator commands. Decisions
//! are built as a [`Plan`] by the mode controllers and then passed through
//! an ordered list of layers (manual override, exhaust interlock, heater
//! lockout) before the dispatcher issues anything:
//!
//! ```text
//! mode controller ──▶ manual override ──▶ exhaust interlock ──▶ heater lockout ──▶ dispatch
//! ```
//!
//! Everything in here is synchronous and owns no I/O; devices are reached
//! through the [`DeviceResolver`] trait.

pub mod debounce;
pub mod device;
pub mod dispatch;
pub mod drying;
pub mod engine;
pub mod limits;
pub mod night;
pub mod overrides;
pub mod safety;
pub mod stage;
pub mod state;
pub mod vpd;

#[cfg(test)]
pub(crate) mod testutil;

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

pub use device::{DeviceResolver, DeviceValue};
pub use dispatch::{Gate, Plan};
pub use engine::{Controller, SensorAlert, TickReport, Wiring};
pub use limits::HardLimit;
pub use stage::{NightExhaust, Stage};
pub use state::ControlState;

// ---------------------------------------------------------------------------
// Actuators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actuator {
    Heater,
    Exhaust,
    Humidifier,
    Dehumidifier,
    Light,
    Circulation,
}

impl Actuator {
    pub const ALL: [Actuator; 6] = [
        Actuator::Heater,
        Actuator::Exhaust,
        Actuator::Humidifier,
        Actuator::Dehumidifier,
        Actuator::Light,
        Actuator::Circulation,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Actuator::Heater => "heater",
            Actuator::Exhaust => "exhaust",
            Actuator::Humidifier => "humidifier",
            Actuator::Dehumidifier => "dehumidifier",
            Actuator::Light => "light",
            Actuator::Circulation => "circulation",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Actuator::Heater => "Heater",
            Actuator::Exhaust => "Exhaust",
            Actuator::Humidifier => "Humidifier",
            Actuator::Dehumidifier => "Dehumidifier",
            Actuator::Light => "Light",
            Actuator::Circulation => "Circulation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|a| a.key().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for Actuator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

// ---------------------------------------------------------------------------
// Manual override mode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ManualMode {
    #[default]
    Auto,
    On,
    Off,
}

impl ManualMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "on" => Some(Self::On),
            "off" => Some(Self::Off),
            _ => None,
        }
    }

    /// The fixed state demanded by a non-Auto mode.
    pub fn forced(self) -> Option<bool> {
        match self {
            Self::Auto => None,
            Self::On => Some(true),
            Self::Off => Some(false),
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::On => "on",
            Self::Off => "off",
        }
    }
}

impl fmt::Display for ManualMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "Auto",
            Self::On => "On",
            Self::Off => "Off",
        })
    }
}

// ---------------------------------------------------------------------------
// Control mode (diagnostic)
// ---------------------------------------------------------------------------

/// Which branch of the tick produced the final decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlMode {
    /// Tick has not reached mode selection yet.
    #[default]
    Init,
    Disabled,
    WaitingForSensors,
    SafetyTripHeaterMaxRun,
    DryingHardLimitsOnly,
    DryingHardLimit(HardLimit),
    Night(NightExhaust),
    HardLimit(HardLimit),
    VpdChase,
    LimitsOnly,
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlMode::Init => f.write_str("init"),
            ControlMode::Disabled => f.write_str("disabled"),
            ControlMode::WaitingForSensors => f.write_str("waiting_for_sensors"),
            ControlMode::SafetyTripHeaterMaxRun => f.write_str("safety_trip:heater_max_run"),
            ControlMode::DryingHardLimitsOnly => f.write_str("drying_hard_limits_only"),
            ControlMode::DryingHardLimit(l) => write!(f, "drying_hard_limit:{l}"),
            ControlMode::Night(exhaust) => write!(f, "night_{}_dewpoint_protect", exhaust.tag()),
            ControlMode::HardLimit(l) => write!(f, "hard_limit:{l}"),
            ControlMode::VpdChase => f.write_str("vpd_chase"),
            ControlMode::LimitsOnly => f.write_str("limits_only"),
        }
    }
}

impl Serialize for ControlMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
