//! Runtime tunables read by the control core every tick.
//!
//! Every value is addressable by a string key so the same entry point
//! serves the config file `[defaults]` table, the sqlite store, the web API
//! and MQTT `setting/<key>/set` writes.

use anyhow::{anyhow, bail, Result};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use time::macros::time;
use time::Time;

use crate::control::{Actuator, ManualMode, Stage};

/// Fixed hold time for the light, independent of the tunables.
pub const LIGHT_HOLD_S: f64 = 10.0;

// ---------------------------------------------------------------------------
// Numeric table
// ---------------------------------------------------------------------------

struct NumberSpec {
    key: &'static str,
    min: f64,
    max: f64,
}

const NUMBERS: &[NumberSpec] = &[
    NumberSpec { key: "min_temp_c", min: 10.0, max: 35.0 },
    NumberSpec { key: "max_temp_c", min: 10.0, max: 35.0 },
    NumberSpec { key: "min_rh", min: 10.0, max: 95.0 },
    NumberSpec { key: "max_rh", min: 10.0, max: 95.0 },
    NumberSpec { key: "vpd_target_kpa", min: 0.40, max: 2.50 },
    NumberSpec { key: "vpd_deadband_kpa", min: 0.02, max: 0.30 },
    NumberSpec { key: "dewpoint_margin_c", min: 0.2, max: 5.0 },
    NumberSpec { key: "leaf_temp_offset_c", min: -5.0, max: 5.0 },
    NumberSpec { key: "heater_hold_s", min: 10.0, max: 600.0 },
    NumberSpec { key: "heater_max_run_s", min: 0.0, max: 600.0 },
    NumberSpec { key: "heater_lockout_s", min: 0.0, max: 3600.0 },
    NumberSpec { key: "exhaust_hold_s", min: 10.0, max: 600.0 },
    NumberSpec { key: "humidifier_hold_s", min: 10.0, max: 600.0 },
    NumberSpec { key: "dehumidifier_hold_s", min: 10.0, max: 600.0 },
    NumberSpec { key: "exhaust_safety_max_temp_c", min: 10.0, max: 45.0 },
    NumberSpec { key: "exhaust_safety_max_rh", min: 10.0, max: 99.0 },
];

const BOOLS: &[&str] = &[
    "controller_enabled",
    "vpd_chase_enabled",
    "exhaust_safety_override",
];

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settings {
    pub controller_enabled: bool,
    pub vpd_chase_enabled: bool,
    pub exhaust_safety_override: bool,
    pub stage: Stage,

    pub min_temp_c: f64,
    pub max_temp_c: f64,
    pub min_rh: f64,
    pub max_rh: f64,

    pub vpd_target_kpa: f64,
    pub vpd_deadband_kpa: f64,
    pub dewpoint_margin_c: f64,
    pub leaf_temp_offset_c: f64,

    pub heater_hold_s: f64,
    pub heater_max_run_s: f64,
    /// Post-trip lockout; 0 reuses `heater_hold_s`.
    pub heater_lockout_s: f64,
    pub exhaust_hold_s: f64,
    pub humidifier_hold_s: f64,
    pub dehumidifier_hold_s: f64,

    pub exhaust_safety_max_temp_c: f64,
    pub exhaust_safety_max_rh: f64,

    #[serde(serialize_with = "serialize_time")]
    pub light_on: Time,
    #[serde(serialize_with = "serialize_time")]
    pub light_off: Time,

    pub modes: BTreeMap<Actuator, ManualMode>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            controller_enabled: true,
            vpd_chase_enabled: true,
            exhaust_safety_override: false,
            stage: Stage::default(),
            min_temp_c: 20.0,
            max_temp_c: 30.0,
            min_rh: 40.0,
            max_rh: 70.0,
            vpd_target_kpa: Stage::default().profile().target_vpd_kpa,
            vpd_deadband_kpa: 0.07,
            dewpoint_margin_c: 1.0,
            leaf_temp_offset_c: -1.5,
            heater_hold_s: 60.0,
            heater_max_run_s: 0.0,
            heater_lockout_s: 0.0,
            exhaust_hold_s: 45.0,
            humidifier_hold_s: 45.0,
            dehumidifier_hold_s: 45.0,
            exhaust_safety_max_temp_c: 30.0,
            exhaust_safety_max_rh: 75.0,
            light_on: time!(9:00),
            light_off: time!(21:00),
            modes: Actuator::ALL
                .into_iter()
                .map(|a| (a, ManualMode::Auto))
                .collect(),
        }
    }
}

impl Settings {
    pub fn mode(&self, actuator: Actuator) -> ManualMode {
        self.modes.get(&actuator).copied().unwrap_or_default()
    }

    pub fn set_mode(&mut self, actuator: Actuator, mode: ManualMode) {
        self.modes.insert(actuator, mode);
    }

    /// Anti-chatter hold time for `actuator`.
    pub fn hold_s(&self, actuator: Actuator) -> f64 {
        match actuator {
            Actuator::Heater => self.heater_hold_s,
            Actuator::Exhaust => self.exhaust_hold_s,
            Actuator::Humidifier => self.humidifier_hold_s,
            Actuator::Dehumidifier => self.dehumidifier_hold_s,
            Actuator::Light => LIGHT_HOLD_S,
            Actuator::Circulation => 0.0,
        }
    }

    pub fn heater_lockout_duration_s(&self) -> f64 {
        if self.heater_lockout_s > 0.0 {
            self.heater_lockout_s
        } else {
            self.heater_hold_s
        }
    }

    /// True if `t` falls inside the light window. Handles windows that wrap
    /// past midnight.
    pub fn is_light_window(&self, t: Time) -> bool {
        let (start, end) = (self.light_on, self.light_off);
        if start <= end {
            start <= t && t < end
        } else {
            t >= start || t < end
        }
    }

    pub fn light_window_label(&self) -> String {
        format!("{}–{}", format_time(self.light_on), format_time(self.light_off))
    }

    /// `(min, max)` of a numeric tunable.
    pub fn range(key: &str) -> Option<(f64, f64)> {
        NUMBERS.iter().find(|n| n.key == key).map(|n| (n.min, n.max))
    }

    /// Apply one `key = value` write. Numbers are clamped into range;
    /// anything unparsable is rejected and leaves the settings untouched.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let key = key.trim();
        let value = value.trim();

        if let Some(spec) = NUMBERS.iter().find(|n| n.key == key) {
            let v: f64 = value
                .parse()
                .map_err(|_| anyhow!("{key}: '{value}' is not a number"))?;
            if !v.is_finite() {
                bail!("{key}: '{value}' is not a finite number");
            }
            let slot = self
                .number_mut(key)
                .ok_or_else(|| anyhow!("{key}: no such number"))?;
            *slot = v.clamp(spec.min, spec.max);
            return Ok(());
        }

        if BOOLS.contains(&key) {
            let b = parse_bool(value).ok_or_else(|| anyhow!("{key}: '{value}' is not on/off"))?;
            match key {
                "controller_enabled" => self.controller_enabled = b,
                "vpd_chase_enabled" => self.vpd_chase_enabled = b,
                _ => self.exhaust_safety_override = b,
            }
            return Ok(());
        }

        match key {
            "stage" => {
                self.stage =
                    Stage::parse(value).ok_or_else(|| anyhow!("stage: unknown stage '{value}'"))?;
            }
            "light_on" | "light_off" => {
                let t = parse_time_of_day(value)
                    .ok_or_else(|| anyhow!("{key}: '{value}' is not HH:MM[:SS]"))?;
                if key == "light_on" {
                    self.light_on = t;
                } else {
                    self.light_off = t;
                }
            }
            _ => {
                let actuator = key
                    .strip_suffix("_mode")
                    .and_then(Actuator::parse)
                    .ok_or_else(|| anyhow!("unknown setting '{key}'"))?;
                let mode = ManualMode::parse(value)
                    .ok_or_else(|| anyhow!("{key}: '{value}' is not Auto/On/Off"))?;
                self.set_mode(actuator, mode);
            }
        }
        Ok(())
    }

    /// Apply a user write only if the result still passes [`validate`].
    ///
    /// [`validate`]: Settings::validate
    pub fn apply_checked(&mut self, key: &str, value: &str) -> Result<()> {
        let mut next = self.clone();
        next.apply(key, value)?;
        let problems = next.validate();
        if !problems.is_empty() {
            bail!(problems.join("; "));
        }
        *self = next;
        Ok(())
    }

    /// Current value of one key, formatted the way `apply` accepts it.
    pub fn get(&self, key: &str) -> Option<String> {
        let key = key.trim();
        self.entries().into_iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Every setting as `(key, value)` strings, in a stable order.
    pub fn entries(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = NUMBERS
            .iter()
            .filter_map(|n| self.number(n.key).map(|v| (n.key.to_string(), v.to_string())))
            .collect();
        out.push(("controller_enabled".into(), on_off(self.controller_enabled)));
        out.push(("vpd_chase_enabled".into(), on_off(self.vpd_chase_enabled)));
        out.push((
            "exhaust_safety_override".into(),
            on_off(self.exhaust_safety_override),
        ));
        out.push(("stage".into(), self.stage.name().to_string()));
        out.push(("light_on".into(), format_time(self.light_on)));
        out.push(("light_off".into(), format_time(self.light_off)));
        for a in Actuator::ALL {
            out.push((format!("{}_mode", a.key()), self.mode(a).to_string()));
        }
        out
    }

    /// Cross-field checks (ordering of the min/max pairs).
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.min_temp_c >= self.max_temp_c {
            errors.push(format!(
                "min_temp_c ({}) must be less than max_temp_c ({})",
                self.min_temp_c, self.max_temp_c
            ));
        }
        if self.min_rh >= self.max_rh {
            errors.push(format!(
                "min_rh ({}) must be less than max_rh ({})",
                self.min_rh, self.max_rh
            ));
        }
        errors
    }

    fn number(&self, key: &str) -> Option<f64> {
        Some(match key {
            "min_temp_c" => self.min_temp_c,
            "max_temp_c" => self.max_temp_c,
            "min_rh" => self.min_rh,
            "max_rh" => self.max_rh,
            "vpd_target_kpa" => self.vpd_target_kpa,
            "vpd_deadband_kpa" => self.vpd_deadband_kpa,
            "dewpoint_margin_c" => self.dewpoint_margin_c,
            "leaf_temp_offset_c" => self.leaf_temp_offset_c,
            "heater_hold_s" => self.heater_hold_s,
            "heater_max_run_s" => self.heater_max_run_s,
            "heater_lockout_s" => self.heater_lockout_s,
            "exhaust_hold_s" => self.exhaust_hold_s,
            "humidifier_hold_s" => self.humidifier_hold_s,
            "dehumidifier_hold_s" => self.dehumidifier_hold_s,
            "exhaust_safety_max_temp_c" => self.exhaust_safety_max_temp_c,
            "exhaust_safety_max_rh" => self.exhaust_safety_max_rh,
            _ => return None,
        })
    }

    fn number_mut(&mut self, key: &str) -> Option<&mut f64> {
        Some(match key {
            "min_temp_c" => &mut self.min_temp_c,
            "max_temp_c" => &mut self.max_temp_c,
            "min_rh" => &mut self.min_rh,
            "max_rh" => &mut self.max_rh,
            "vpd_target_kpa" => &mut self.vpd_target_kpa,
            "vpd_deadband_kpa" => &mut self.vpd_deadband_kpa,
            "dewpoint_margin_c" => &mut self.dewpoint_margin_c,
            "leaf_temp_offset_c" => &mut self.leaf_temp_offset_c,
            "heater_hold_s" => &mut self.heater_hold_s,
            "heater_max_run_s" => &mut self.heater_max_run_s,
            "heater_lockout_s" => &mut self.heater_lockout_s,
            "exhaust_hold_s" => &mut self.exhaust_hold_s,
            "humidifier_hold_s" => &mut self.humidifier_hold_s,
            "dehumidifier_hold_s" => &mut self.dehumidifier_hold_s,
            "exhaust_safety_max_temp_c" => &mut self.exhaust_safety_max_temp_c,
            "exhaust_safety_max_rh" => &mut self.exhaust_safety_max_rh,
            _ => return None,
        })
    }
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// Parse "HH", "HH:MM" or "HH:MM:SS".
pub fn parse_time_of_day(s: &str) -> Option<Time> {
    let parts: Vec<&str> = s.trim().split(':').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    let mut hms = [0u8; 3];
    for (slot, part) in hms.iter_mut().zip(&parts) {
        *slot = part.trim().parse().ok()?;
    }
    Time::from_hms(hms[0], hms[1], hms[2]).ok()
}

pub fn format_time(t: Time) -> String {
    format!("{:02}:{:02}:{:02}", t.hour(), t.minute(), t.second())
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" | "yes" => Some(true),
        "off" | "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn on_off(b: bool) -> String {
    if b { "on" } else { "off" }.to_string()
}

fn serialize_time<S: Serializer>(t: &Time, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_time(*t))
}

// ===========================================================================
// Tests
// ===========================================================================
