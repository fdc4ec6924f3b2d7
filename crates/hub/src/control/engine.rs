//! The control tick.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::dispatch::{dispatch, IssuedCommand};
use super::overrides::{apply_layers, LayerInput};
use super::{
    drying, limits, night, safety, vpd, Actuator, ControlMode, ControlState, DeviceResolver,
    DeviceValue, Plan, Stage,
};
use crate::sensors::{ClimateMetrics, ClimateReading, Env};
use crate::settings::Settings;

/// Which device ids feed the controller. Unset sensors read as absent,
/// unset actuators are never commanded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Wiring {
    pub canopy_temp: Option<String>,
    pub top_temp: Option<String>,
    pub canopy_rh: Option<String>,
    pub top_rh: Option<String>,
    pub actuators: BTreeMap<Actuator, String>,
}

/// Edge of the standing sensors-unavailable alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorAlert {
    Raised,
    Cleared,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HeaterDebug {
    pub target_c: Option<f64>,
    pub error_c: Option<f64>,
    pub pulse: Option<String>,
    pub on_for_s: f64,
    pub max_run_s: f64,
    pub lockout_active: bool,
}

/// Everything one tick decided, for logs, MQTT and the web API.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub control_mode: ControlMode,
    pub reading: ClimateReading,
    pub metrics: ClimateMetrics,
    pub stage: Stage,
    pub is_day: bool,
    pub light_window: String,
    pub reasons: BTreeMap<Actuator, String>,
    pub heater: HeaterDebug,
    pub commands: Vec<IssuedCommand>,
    /// Actuator states after this tick's commands.
    pub actuators: BTreeMap<Actuator, bool>,
    pub last_action: Option<String>,
    pub sensor_alert: Option<SensorAlert>,
    /// Set when the stage changed since the previous tick; the VPD target
    /// should go back to this stage's default.
    pub reset_vpd_target: Option<Stage>,
}

pub struct Controller {
    wiring: Wiring,
    state: ControlState,
}

impl Controller {
    pub fn new(wiring: Wiring) -> Self {
        Self {
            wiring,
            state: ControlState::default(),
        }
    }

    pub fn wiring(&self) -> &Wiring {
        &self.wiring
    }

    pub fn state(&self) -> &ControlState {
        &self.state
    }

    /// Run one control cycle. `now` must already carry the local offset;
    /// the light window is evaluated against its wall-clock time.
    pub fn tick<D: DeviceResolver>(
        &mut self,
        now: OffsetDateTime,
        settings: &Settings,
        devices: &mut D,
    ) -> TickReport {
        let reading = self.read_climate(devices);
        let metrics = ClimateMetrics::derive(&reading, settings.leaf_temp_offset_c);
        let mut actual = self.read_actuators(devices);

        safety::track_on_since(
            &mut self.state.heater,
            actual.get(&Actuator::Heater).copied(),
            now,
        );
        let on_for_s = self.state.heater.on_for_s(now);
        let reset_vpd_target = self.detect_stage_change(settings.stage);

        let drying = settings.stage.is_drying();
        let is_day = !drying && settings.is_light_window(now.time());
        let light_window = if drying {
            format!("{} (ignored: drying)", settings.light_window_label())
        } else {
            settings.light_window_label()
        };

        let mut plan = Plan::default();
        let mut heater = HeaterDebug {
            on_for_s,
            max_run_s: settings.heater_max_run_s,
            ..Default::default()
        };
        let mut sensor_alert = None;

        // The light schedule runs even while the controller is disabled.
        plan_light(settings, is_day, &mut plan);

        let control_mode = if !settings.controller_enabled {
            ControlMode::Disabled
        } else {
            plan.want(Actuator::Circulation, true, "controller enabled");
            match metrics.env() {
                None => {
                    sensor_alert = self.sensor_edge(false);
                    ControlMode::WaitingForSensors
                }
                Some(env) => {
                    sensor_alert = self.sensor_edge(true);
                    self.decide(&env, settings, &actual, is_day, now, &mut plan, &mut heater)
                }
            }
        };

        let input = LayerInput {
            settings,
            env: metrics.env(),
            heater_lockout: self.state.heater.lockout_active(now),
        };
        apply_layers(&input, &mut plan);

        let commands = dispatch(
            &plan,
            now,
            settings,
            &self.wiring.actuators,
            &mut actual,
            &mut self.state,
            devices,
        );
        heater.lockout_active = self.state.heater.lockout_active(now);

        debug!(
            mode = %control_mode,
            issued = commands.len(),
            temp_c = ?metrics.avg_temp_c,
            rh = ?metrics.avg_rh,
            vpd_kpa = ?metrics.vpd_kpa,
            "tick"
        );

        TickReport {
            at: now,
            control_mode,
            reading,
            metrics,
            stage: settings.stage,
            is_day,
            light_window,
            reasons: plan.reasons(),
            heater,
            commands,
            actuators: actual,
            last_action: self.state.last_action.as_ref().map(|a| a.to_string()),
            sensor_alert,
            reset_vpd_target,
        }
    }

    /// Safety trip, then drying, night or day logic.
    #[allow(clippy::too_many_arguments)]
    fn decide(
        &mut self,
        env: &Env,
        settings: &Settings,
        actual: &BTreeMap<Actuator, bool>,
        is_day: bool,
        now: OffsetDateTime,
        plan: &mut Plan,
        heater: &mut HeaterDebug,
    ) -> ControlMode {
        if safety::check_max_run(&mut self.state.heater, settings, now) {
            plan.force(Actuator::Heater, false, "max_run_time_exceeded -> forced_off");
            return ControlMode::SafetyTripHeaterMaxRun;
        }

        if settings.stage.is_drying() {
            return drying::plan_drying(env, settings, plan);
        }

        if !is_day {
            let heater_on = actual.get(&Actuator::Heater).copied().unwrap_or(false);
            let out = night::plan_night(env, settings, &mut self.state, heater_on, now, plan);
            heater.target_c = Some(out.target_c);
            heater.error_c = Some(out.error_c);
            heater.pulse = Some(out.pulse.to_string());
            return out.mode;
        }

        if let Some(limit) = limits::evaluate(env, settings) {
            limits::respond(limit, env, settings, "hard_limit", plan);
            return ControlMode::HardLimit(limit);
        }

        if settings.vpd_chase_enabled {
            vpd::chase(env, settings, plan);
            ControlMode::VpdChase
        } else {
            ControlMode::LimitsOnly
        }
    }

    fn read_climate<D: DeviceResolver>(&self, devices: &D) -> ClimateReading {
        let read = |id: &Option<String>| {
            id.as_deref()
                .and_then(|id| devices.read(id))
                .and_then(DeviceValue::as_f64)
        };
        ClimateReading {
            canopy_temp_c: read(&self.wiring.canopy_temp),
            top_temp_c: read(&self.wiring.top_temp),
            canopy_rh: read(&self.wiring.canopy_rh),
            top_rh: read(&self.wiring.top_rh),
        }
    }

    fn read_actuators<D: DeviceResolver>(&self, devices: &D) -> BTreeMap<Actuator, bool> {
        self.wiring
            .actuators
            .iter()
            .filter_map(|(actuator, id)| {
                let on = devices.read(id).and_then(DeviceValue::as_bool)?;
                Some((*actuator, on))
            })
            .collect()
    }

    /// The first observed stage only seeds the tracker instead of counting
    /// as a change from "no stage", so a restart does not clobber a tuned
    /// VPD target. Only changes seen while running request a reset.
    fn detect_stage_change(&mut self, stage: Stage) -> Option<Stage> {
        match self.state.last_stage.replace(stage) {
            Some(prev) if prev != stage => {
                info!(from = %prev, to = %stage, "stage changed");
                Some(stage)
            }
            _ => None,
        }
    }

    fn sensor_edge(&mut self, sensors_ok: bool) -> Option<SensorAlert> {
        let was_unavailable = self.state.sensors_were_unavailable;
        self.state.sensors_were_unavailable = !sensors_ok;
        match (was_unavailable, sensors_ok) {
            (false, false) => {
                warn!("climate sensors unavailable, automatic control paused");
                Some(SensorAlert::Raised)
            }
            (true, true) => {
                info!("climate sensors restored, automatic control resuming");
                Some(SensorAlert::Cleared)
            }
            _ => None,
        }
    }
}

fn plan_light(settings: &Settings, is_day: bool, plan: &mut Plan) {
    if settings.stage.is_drying() {
        plan.want(Actuator::Light, false, "drying -> force_off");
    } else if is_day {
        plan.want(Actuator::Light, true, "schedule_day_window -> on");
    } else {
        plan.want(Actuator::Light, false, "schedule_night_window -> off");
    }
}

// ===========================================================================
// Tests
// ===========================================================================
