//! Closed-loop tent climate simulator for local development.
//!
//! Models the air in a small grow tent:
//! - Mean-reverting random walk toward a scenario baseline
//! - Diurnal temperature swing, with humidity moving against it
//! - Per-point offsets (the top of the tent runs warmer and drier)
//! - Per-reading sensor noise and occasional dropped readings
//! - Response to the hub's actuator states published on `stat/<actuator>`

use std::fmt;

use crate::Reading;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Irwin-Hall: sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Simulation profiles selectable via the `SIM_SCENARIO` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Warm room air near 70 %RH. Exercises exhaust and dehumidifier.
    Humid,
    /// Dry winter room. Exercises heater and humidifier.
    Dry,
    /// Sits comfortably inside every band. Good for UI work.
    Stable,
    /// Stable climate but noisy sensors that drop ~10 % of readings.
    /// Exercises staleness and the partial-data paths.
    Flaky,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "humid" => Self::Humid,
            "dry" => Self::Dry,
            "flaky" => Self::Flaky,
            _ => Self::Stable,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Humid => write!(f, "humid"),
            Self::Dry => write!(f, "dry"),
            Self::Stable => write!(f, "stable"),
            Self::Flaky => write!(f, "flaky"),
        }
    }
}

// ---------------------------------------------------------------------------
// Actuator loads
// ---------------------------------------------------------------------------

/// What the hub currently has switched on, as last seen on `stat/+`.
#[derive(Debug, Default, Clone, Copy)]
struct Loads {
    heater: bool,
    exhaust: bool,
    humidifier: bool,
    dehumidifier: bool,
    light: bool,
}

/// Per-step effect of each load on (°C, %RH).
const HEATER_STEP: (f64, f64) = (0.45, -0.6);
const EXHAUST_STEP: (f64, f64) = (-0.3, -1.5);
const HUMIDIFIER_STEP: (f64, f64) = (0.0, 2.0);
const DEHUMIDIFIER_STEP: (f64, f64) = (0.05, -1.8);
const LIGHT_STEP: (f64, f64) = (0.15, -0.2);

// ---------------------------------------------------------------------------
// Per-point state
// ---------------------------------------------------------------------------

struct PointState {
    sensor_id: String,
    temp_offset: f64,
    rh_offset: f64,
    noise_scale: f64,
}

// ---------------------------------------------------------------------------
// Main simulator
// ---------------------------------------------------------------------------

pub struct TentClimateSim {
    points: Vec<PointState>,

    // Bulk air
    temp_c: f64,
    rh: f64,

    // Baseline the walk reverts toward
    base_temp_c: f64,
    base_rh: f64,
    mean_reversion: f64,
    walk_sigma_t: f64,
    walk_sigma_rh: f64,

    // Sensor behaviour
    noise_sigma_t: f64,
    noise_sigma_rh: f64,
    dropout_prob: f32,

    diurnal_amplitude_c: f64,
    diurnal_period_s: f64,

    loads: Loads,
}

impl TentClimateSim {
    /// Create a simulator publishing one point per entry of `sensor_ids`.
    /// The first point is the canopy; later points sit progressively higher.
    ///
    /// `diurnal_period_s` sets the day length. 600 is handy for quick runs,
    /// 86400 for real time.
    pub fn new(scenario: Scenario, sensor_ids: &[&str], diurnal_period_s: f64) -> Self {
        let (base_t, base_rh, walk_t, walk_rh, noise_t, noise_rh, dropout) = match scenario {
            Scenario::Humid => (25.5, 72.0, 0.08, 0.6, 0.08, 0.8, 0.0_f32),
            Scenario::Dry => (19.0, 32.0, 0.08, 0.5, 0.08, 0.8, 0.0),
            Scenario::Stable => (24.0, 55.0, 0.04, 0.3, 0.05, 0.5, 0.0),
            Scenario::Flaky => (24.0, 55.0, 0.06, 0.5, 0.4, 3.0, 0.10),
        };

        let points = sensor_ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let height = i as f64;
                PointState {
                    sensor_id: (*id).to_string(),
                    temp_offset: 0.8 * height + gaussian(0.0, 0.15),
                    rh_offset: -2.5 * height + gaussian(0.0, 1.0),
                    noise_scale: (1.0 + 0.2 * approx_std_normal()).max(0.3),
                }
            })
            .collect();

        Self {
            points,
            temp_c: base_t + gaussian(0.0, 0.3),
            rh: base_rh + gaussian(0.0, 2.0),
            base_temp_c: base_t,
            base_rh,
            mean_reversion: 0.05,
            walk_sigma_t: walk_t,
            walk_sigma_rh: walk_rh,
            noise_sigma_t: noise_t,
            noise_sigma_rh: noise_rh,
            dropout_prob: dropout,
            diurnal_amplitude_c: 1.5,
            diurnal_period_s,
            loads: Loads::default(),
        }
    }

    /// Feed back an actuator state published by the hub. Returns false for
    /// keys the simulator has no model for.
    pub fn set_actuator(&mut self, key: &str, on: bool) -> bool {
        let slot = match key {
            "heater" => &mut self.loads.heater,
            "exhaust" => &mut self.loads.exhaust,
            "humidifier" => &mut self.loads.humidifier,
            "dehumidifier" => &mut self.loads.dehumidifier,
            "light" => &mut self.loads.light,
            _ => return false,
        };
        *slot = on;
        true
    }

    /// Advance the bulk air by one sampling step and read every point.
    /// `now_s` drives the diurnal phase.
    pub fn sample(&mut self, now_s: f64) -> Vec<Reading> {
        self.step(now_s);

        let (temp_c, rh) = (self.temp_c, self.rh);
        let (sigma_t, sigma_rh, dropout) =
            (self.noise_sigma_t, self.noise_sigma_rh, self.dropout_prob);

        self.points
            .iter()
            .map(|p| {
                let t = temp_c + p.temp_offset + gaussian(0.0, sigma_t * p.noise_scale);
                let h = rh + p.rh_offset + gaussian(0.0, sigma_rh * p.noise_scale);
                Reading {
                    sensor_id: p.sensor_id.clone(),
                    temp_c: (fastrand::f32() >= dropout).then(|| round2(t.clamp(-40.0, 125.0))),
                    rh: (fastrand::f32() >= dropout).then(|| round2(h.clamp(0.0, 100.0))),
                }
            })
            .collect()
    }

    fn step(&mut self, now_s: f64) {
        let phase = 2.0 * std::f64::consts::PI * now_s / self.diurnal_period_s;
        let target_t = self.base_temp_c + self.diurnal_amplitude_c * phase.sin();
        // Warmer air holds more water, so RH sags in the afternoon.
        let target_rh = self.base_rh - 2.0 * self.diurnal_amplitude_c * phase.sin();

        let (mut dt, mut drh) = (0.0, 0.0);
        for (on, (t, h)) in [
            (self.loads.heater, HEATER_STEP),
            (self.loads.exhaust, EXHAUST_STEP),
            (self.loads.humidifier, HUMIDIFIER_STEP),
            (self.loads.dehumidifier, DEHUMIDIFIER_STEP),
            (self.loads.light, LIGHT_STEP),
        ] {
            if on {
                dt += t;
                drh += h;
            }
        }

        self.temp_c = (self.temp_c
            + self.mean_reversion * (target_t - self.temp_c)
            + gaussian(0.0, self.walk_sigma_t)
            + dt)
            .clamp(-10.0, 50.0);
        self.rh = (self.rh
            + self.mean_reversion * (target_rh - self.rh)
            + gaussian(0.0, self.walk_sigma_rh)
            + drh)
            .clamp(5.0, 99.0);
    }

    /// Number of published points.
    pub fn point_count(&self) -> usize {
        self.points.len()
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

// ===========================================================================
// Tests
// ===========================================================================
