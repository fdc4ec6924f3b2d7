//! Lights-off behaviour: dew-point protection and the stage's exhaust policy.
//!
//! The heater runs a three-state pulse machine (idle, pulsing, cooldown)
//! driven by how far the air sits below `dew point + margin`.

use std::fmt;
use time::{Duration, OffsetDateTime};

use super::{Actuator, ControlMode, ControlState, NightExhaust, Plan};
use crate::sensors::Env;
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulsePlan {
    Off,
    Continuous,
    Pulse { on_s: u32, off_s: u32 },
}

impl PulsePlan {
    pub fn from_error(error_c: f64) -> Self {
        if error_c >= 1.5 {
            PulsePlan::Continuous
        } else if error_c >= 0.8 {
            PulsePlan::Pulse { on_s: 30, off_s: 30 }
        } else if error_c >= 0.3 {
            PulsePlan::Pulse { on_s: 10, off_s: 50 }
        } else {
            PulsePlan::Off
        }
    }

    /// Length of one on-phase; `None` means no end.
    fn on_duration(self) -> Option<Duration> {
        match self {
            PulsePlan::Pulse { on_s, .. } => Some(Duration::seconds(on_s.into())),
            _ => None,
        }
    }

    fn off_s(self) -> u32 {
        match self {
            PulsePlan::Pulse { off_s, .. } => off_s,
            PulsePlan::Continuous => 0,
            PulsePlan::Off => 60,
        }
    }
}

impl fmt::Display for PulsePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PulsePlan::Off => f.write_str("off"),
            PulsePlan::Continuous => f.write_str("on=continuous off=0s"),
            PulsePlan::Pulse { on_s, off_s } => write!(f, "on={on_s}s off={off_s}s"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NightOutcome {
    pub mode: ControlMode,
    pub target_c: f64,
    pub error_c: f64,
    pub pulse: PulsePlan,
}

/// Dew-point protection target, capped at `max_temp_c`.
pub fn heater_target_c(env: &Env, settings: &Settings) -> f64 {
    let add = settings.stage.profile().dew_margin_add_c;
    (env.dew_point_c + settings.dewpoint_margin_c + add).min(settings.max_temp_c)
}

/// Plan the night actuators. `heater_on` is the actual heater state.
///
/// The pulse machine only runs while the heater is in Auto; a forced
/// heater is left to the override layer and its timers are not touched.
pub fn plan_night(
    env: &Env,
    settings: &Settings,
    state: &mut ControlState,
    heater_on: bool,
    now: OffsetDateTime,
    plan: &mut Plan,
) -> NightOutcome {
    let profile = settings.stage.profile();

    plan.want(Actuator::Humidifier, false, "night: force_off");
    if env.avg_rh > settings.max_rh {
        plan.want(Actuator::Dehumidifier, true, "night: rh_above_max -> on");
    } else {
        plan.want(Actuator::Dehumidifier, false, "night: rh_ok -> off");
    }

    let target_c = heater_target_c(env, settings);
    let error_c = target_c - env.avg_temp_c;
    let pulse = PulsePlan::from_error(error_c);

    if settings.mode(Actuator::Heater).forced().is_none() {
        run_pulse(pulse, settings, state, heater_on, now, plan);
    }

    match profile.night_exhaust {
        NightExhaust::AlwaysOn => plan.want(Actuator::Exhaust, true, "night: profile=on"),
        NightExhaust::AutoThreshold => {
            let want = env.avg_rh > settings.max_rh || env.avg_temp_c > settings.max_temp_c;
            let reason = if want { "night: auto on" } else { "night: auto off" };
            plan.want(Actuator::Exhaust, want, reason);
        }
    }

    NightOutcome {
        mode: ControlMode::Night(profile.night_exhaust),
        target_c,
        error_c,
        pulse,
    }
}

fn run_pulse(
    pulse: PulsePlan,
    settings: &Settings,
    state: &mut ControlState,
    heater_on: bool,
    now: OffsetDateTime,
    plan: &mut Plan,
) {
    let timers = &mut state.heater;

    if pulse == PulsePlan::Off {
        timers.pulse_until = None;
        timers.cooldown_until = None;
        plan.want(Actuator::Heater, false, "night: at/above dew target -> off");
        return;
    }

    if timers.in_cooldown(now) {
        plan.want(Actuator::Heater, false, "night: cooldown");
        return;
    }

    let reason = format!("night: pulse plan {pulse}");

    if !heater_on {
        timers.pulse_until = pulse.on_duration().map(|d| now + d);
        plan.want(Actuator::Heater, true, reason);
        return;
    }

    if timers.pulse_until.is_none() {
        timers.pulse_until = pulse.on_duration().map(|d| now + d);
    }

    let elapsed = timers.pulse_until.is_some_and(|until| now >= until);
    let hold_s = settings.hold_s(Actuator::Heater);
    if elapsed && state.debounce.can_toggle(Actuator::Heater, now, hold_s) {
        let off_s = pulse.off_s();
        let timers = &mut state.heater;
        timers.pulse_until = None;
        timers.cooldown_until = Some(now + Duration::seconds(off_s.into()));
        plan.want(
            Actuator::Heater,
            false,
            format!("night: pulse end -> cooldown {off_s}s"),
        );
    } else {
        plan.want(Actuator::Heater, true, reason);
    }
}

// ===========================================================================
// Tests
// ===========================================================================
