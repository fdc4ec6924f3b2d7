//! TOML config file loading and validation: controller timing, sensor and
//! relay wiring, and the initial value of every runtime tunable.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use time::UtcOffset;

use crate::control::{Actuator, Wiring};
use crate::settings::Settings;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub controller: ControllerSection,
    #[serde(default)]
    pub sensors: SensorSection,
    #[serde(default)]
    pub actuators: Vec<ActuatorEntry>,
    /// Initial tunables, keyed like the settings store. Values may be
    /// strings, numbers or booleans.
    #[serde(default)]
    pub defaults: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Deserialize)]
pub struct ControllerSection {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_tick_sec")]
    pub tick_sec: i64,
    #[serde(default = "default_stale_timeout_sec")]
    pub stale_timeout_sec: i64,
    /// "+HH:MM" offset used for the light schedule. Falls back to the
    /// host's local offset, then UTC.
    pub utc_offset: Option<String>,
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            name: default_name(),
            tick_sec: default_tick_sec(),
            stale_timeout_sec: default_stale_timeout_sec(),
            utc_offset: None,
        }
    }
}

fn default_name() -> String {
    "grow tent".to_string()
}

fn default_tick_sec() -> i64 {
    10
}

fn default_stale_timeout_sec() -> i64 {
    120
}

/// Device ids of the four climate points, e.g. "tent-a/canopy/temp_c".
#[derive(Debug, Default, Deserialize)]
pub struct SensorSection {
    pub canopy_temp: Option<String>,
    pub top_temp: Option<String>,
    pub canopy_rh: Option<String>,
    pub top_rh: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ActuatorEntry {
    pub actuator: String,
    pub gpio_pin: i64,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn enabled_default() -> bool {
    true
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
/// GPIO 28+ are not exposed on the standard header.
const VALID_GPIO_PINS: &[i64] = &[
    2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27,
];

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate the whole file. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_controller(&mut errors);
        self.validate_actuators(&mut errors);
        errors.extend(self.overlay_defaults().1);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_controller(&self, errors: &mut Vec<String>) {
        let c = &self.controller;
        if c.name.trim().is_empty() {
            errors.push("controller: name is empty".to_string());
        }
        if c.tick_sec <= 0 {
            errors.push(format!(
                "controller: tick_sec must be positive, got {}",
                c.tick_sec
            ));
        }
        if c.stale_timeout_sec <= 0 {
            errors.push(format!(
                "controller: stale_timeout_sec must be positive, got {}",
                c.stale_timeout_sec
            ));
        }
        if let Some(raw) = &c.utc_offset {
            if parse_utc_offset(raw).is_none() {
                errors.push(format!(
                    "controller: utc_offset '{raw}' is not of the form +HH:MM"
                ));
            }
        }
    }

    fn validate_actuators(&self, errors: &mut Vec<String>) {
        let mut seen: HashSet<Actuator> = HashSet::new();
        let mut seen_pins: HashSet<i64> = HashSet::new();

        for (i, a) in self.actuators.iter().enumerate() {
            let ctx = || {
                if a.actuator.is_empty() {
                    format!("actuators[{i}]")
                } else {
                    format!("actuator '{}'", a.actuator)
                }
            };

            // ── Identity ────────────────────────────────────────
            match Actuator::parse(&a.actuator) {
                None => errors.push(format!(
                    "{}: unknown actuator (expected heater, exhaust, humidifier, dehumidifier, light or circulation)",
                    ctx()
                )),
                Some(kind) => {
                    if !seen.insert(kind) {
                        errors.push(format!("{}: duplicate actuator", ctx()));
                    }
                }
            }

            // ── GPIO pin whitelist ──────────────────────────────
            if !VALID_GPIO_PINS.contains(&a.gpio_pin) {
                errors.push(format!(
                    "{}: gpio_pin {} is not a valid BCM GPIO pin (allowed: 2-27)",
                    ctx(),
                    a.gpio_pin
                ));
            } else if !seen_pins.insert(a.gpio_pin) {
                errors.push(format!(
                    "{}: gpio_pin {} is already used by another actuator",
                    ctx(),
                    a.gpio_pin
                ));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Derived values
    // -----------------------------------------------------------------------

    /// Built-in defaults overlaid with the `[defaults]` table.
    pub fn settings(&self) -> Result<Settings> {
        let (settings, errors) = self.overlay_defaults();
        if !errors.is_empty() {
            bail!(errors.join("; "));
        }
        Ok(settings)
    }

    /// Apply every `[defaults]` entry, collecting the ones that failed.
    fn overlay_defaults(&self) -> (Settings, Vec<String>) {
        let mut settings = Settings::default();
        let mut errors = Vec::new();

        for (key, value) in &self.defaults {
            let text = match value {
                toml::Value::String(s) => s.clone(),
                toml::Value::Integer(n) => n.to_string(),
                toml::Value::Float(f) => f.to_string(),
                toml::Value::Boolean(b) => b.to_string(),
                other => {
                    errors.push(format!("defaults: {key}: unsupported value {other}"));
                    continue;
                }
            };
            if let Err(e) = check_in_range(key, &text) {
                errors.push(format!("defaults: {e}"));
                continue;
            }
            if let Err(e) = settings.apply(key, &text) {
                errors.push(format!("defaults: {e}"));
            }
        }
        errors.extend(settings.validate().into_iter().map(|e| format!("defaults: {e}")));
        (settings, errors)
    }

    /// Enabled actuators and their GPIO pins. Disabled or invalid entries
    /// are left out, so those actuators are never commanded.
    pub fn relays(&self) -> Vec<(Actuator, u8)> {
        self.actuators
            .iter()
            .filter(|a| a.enabled)
            .filter_map(|a| {
                let kind = Actuator::parse(&a.actuator)?;
                let pin = u8::try_from(a.gpio_pin).ok()?;
                Some((kind, pin))
            })
            .collect()
    }

    /// Device ids the controller reads and commands.
    pub fn wiring(&self) -> Wiring {
        Wiring {
            canopy_temp: self.sensors.canopy_temp.clone(),
            top_temp: self.sensors.top_temp.clone(),
            canopy_rh: self.sensors.canopy_rh.clone(),
            top_rh: self.sensors.top_rh.clone(),
            actuators: self
                .relays()
                .into_iter()
                .map(|(a, _)| (a, crate::plant::relay_device_id(a)))
                .collect(),
        }
    }

    pub fn utc_offset(&self) -> Option<UtcOffset> {
        self.controller.utc_offset.as_deref().and_then(parse_utc_offset)
    }
}

/// Config defaults must already lie inside the tunable's range; clamping is
/// reserved for runtime writes.
fn check_in_range(key: &str, value: &str) -> Result<()> {
    let Some((min, max)) = Settings::range(key) else {
        return Ok(());
    };
    let Ok(v) = value.trim().parse::<f64>() else {
        return Ok(()); // apply() reports the parse error
    };
    if !(min..=max).contains(&v) {
        bail!("{key}: {v} out of range [{min}, {max}]");
    }
    Ok(())
}

/// Parse "+HH:MM", "-HH:MM" or "Z".
pub fn parse_utc_offset(s: &str) -> Option<UtcOffset> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("z") || s == "UTC" {
        return Some(UtcOffset::UTC);
    }
    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1i8, &s[1..]),
        b'-' => (-1i8, &s[1..]),
        _ => return None,
    };
    let (h, m) = rest.split_once(':').unwrap_or((rest, "0"));
    let h: i8 = h.parse().ok()?;
    let m: i8 = m.parse().ok()?;
    if !(0..=59).contains(&m) {
        return None;
    }
    UtcOffset::from_hms(sign * h, sign * m, 0).ok()
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    tracing::info!(
        name = %config.controller.name,
        actuators = config.relays().len(),
        defaults = config.defaults.len(),
        "config loaded"
    );
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
