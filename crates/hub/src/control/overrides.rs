//! Layers applied on top of whatever the mode controller planned.
//!
//! Each layer may overwrite any entry of the plan; they run in the order
//! of [`LAYERS`], so the heater lockout has the last word.

use super::{Actuator, Gate, ManualMode, Plan};
use crate::sensors::Env;
use crate::settings::Settings;

pub struct LayerInput<'a> {
    pub settings: &'a Settings,
    /// Absent while sensors are unavailable; the interlock then stays idle.
    pub env: Option<Env>,
    pub heater_lockout: bool,
}

type Layer = fn(&LayerInput<'_>, &mut Plan);

pub const LAYERS: [(&str, Layer); 3] = [
    ("manual_override", manual_override),
    ("exhaust_interlock", exhaust_interlock),
    ("heater_lockout", heater_lockout),
];

pub fn apply_layers(input: &LayerInput<'_>, plan: &mut Plan) {
    for (_, layer) in LAYERS {
        layer(input, plan);
    }
}

/// True when the exhaust must not be off.
pub fn exhaust_blocks_off(env: &Env, settings: &Settings) -> bool {
    settings.exhaust_safety_override
        && (env.avg_temp_c >= settings.exhaust_safety_max_temp_c
            || env.avg_rh >= settings.exhaust_safety_max_rh)
}

fn manual_override(input: &LayerInput<'_>, plan: &mut Plan) {
    for actuator in Actuator::ALL {
        let mode = input.settings.mode(actuator);
        if let Some(on) = mode.forced() {
            plan.want(actuator, on, format!("override:{}", mode.tag()));
        }
    }
}

fn exhaust_interlock(input: &LayerInput<'_>, plan: &mut Plan) {
    let Some(env) = input.env else {
        return;
    };
    if !exhaust_blocks_off(&env, input.settings) {
        return;
    }
    let reason = match input.settings.mode(Actuator::Exhaust) {
        ManualMode::Off => "override:off_blocked_by_safety",
        _ => "exhaust_safety: interlock -> on",
    };
    plan.force(Actuator::Exhaust, true, reason);
}

fn heater_lockout(input: &LayerInput<'_>, plan: &mut Plan) {
    if !input.heater_lockout {
        return;
    }
    // A trip on this tick already forced it off with its own reason.
    if plan
        .get(Actuator::Heater)
        .is_some_and(|c| !c.on && c.gate == Gate::Bypass)
    {
        return;
    }
    let reason = match input.settings.mode(Actuator::Heater) {
        ManualMode::On => "override:on_blocked_by_lockout",
        _ => "safety: lockout active -> off",
    };
    plan.force(Actuator::Heater, false, reason);
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn env(t: f64, rh: f64) -> Env {
        Env {
            avg_temp_c: t,
            avg_rh: rh,
            dew_point_c: 12.0,
            vpd_kpa: 1.0,
        }
    }

    fn input(settings: &Settings, env: Option<Env>, lockout: bool) -> LayerInput<'_> {
        LayerInput {
            settings,
            env,
            heater_lockout: lockout,
        }
    }

    #[test]
    fn layer_order_is_fixed() {
        let names: Vec<&str> = LAYERS.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, ["manual_override", "exhaust_interlock", "heater_lockout"]);
    }

    // -- manual override ------------------------------------------------------

    #[test]
    fn auto_leaves_plan_alone() {
        let s = Settings::default();
        let mut plan = Plan::default();
        plan.want(Actuator::Humidifier, true, "vpd_high -> on");
        apply_layers(&input(&s, Some(env(25.0, 50.0)), false), &mut plan);
        assert_eq!(plan.get(Actuator::Humidifier).unwrap().reason, "vpd_high -> on");
    }

    #[test]
    fn forced_modes_overwrite_automatic_decisions() {
        let mut s = Settings::default();
        s.set_mode(Actuator::Humidifier, ManualMode::Off);
        s.set_mode(Actuator::Light, ManualMode::On);
        let mut plan = Plan::default();
        plan.want(Actuator::Humidifier, true, "vpd_high -> on");
        apply_layers(&input(&s, Some(env(25.0, 50.0)), false), &mut plan);

        let hum = plan.get(Actuator::Humidifier).unwrap();
        assert!(!hum.on);
        assert_eq!(hum.reason, "override:off");
        assert_eq!(hum.gate, Gate::Hold);
        assert_eq!(plan.desired(Actuator::Light), Some(true));
    }

    // -- exhaust interlock ------------------------------------------------------

    #[test]
    fn interlock_beats_off_override() {
        let mut s = Settings::default();
        s.exhaust_safety_override = true;
        s.set_mode(Actuator::Exhaust, ManualMode::Off);
        let mut plan = Plan::default();
        apply_layers(&input(&s, Some(env(31.0, 50.0)), false), &mut plan);

        let ex = plan.get(Actuator::Exhaust).unwrap();
        assert!(ex.on);
        assert_eq!(ex.gate, Gate::Bypass);
        assert_eq!(ex.reason, "override:off_blocked_by_safety");
    }

    #[test]
    fn interlock_trips_on_humidity_threshold() {
        let mut s = Settings::default();
        s.exhaust_safety_override = true;
        assert!(exhaust_blocks_off(&env(25.0, 75.0), &s));
        assert!(!exhaust_blocks_off(&env(25.0, 74.9), &s));
    }

    #[test]
    fn interlock_disabled_by_flag() {
        let mut s = Settings::default();
        s.set_mode(Actuator::Exhaust, ManualMode::Off);
        let mut plan = Plan::default();
        apply_layers(&input(&s, Some(env(35.0, 90.0)), false), &mut plan);
        assert_eq!(plan.desired(Actuator::Exhaust), Some(false));
    }

    #[test]
    fn interlock_idle_without_metrics() {
        let mut s = Settings::default();
        s.exhaust_safety_override = true;
        let mut plan = Plan::default();
        apply_layers(&input(&s, None, false), &mut plan);
        assert_eq!(plan.desired(Actuator::Exhaust), None);
    }

    // -- heater lockout ---------------------------------------------------------

    #[test]
    fn lockout_beats_manual_on() {
        let mut s = Settings::default();
        s.set_mode(Actuator::Heater, ManualMode::On);
        let mut plan = Plan::default();
        apply_layers(&input(&s, Some(env(15.0, 50.0)), true), &mut plan);

        let heater = plan.get(Actuator::Heater).unwrap();
        assert!(!heater.on);
        assert_eq!(heater.gate, Gate::Bypass);
        assert_eq!(heater.reason, "override:on_blocked_by_lockout");
    }

    #[test]
    fn lockout_overrides_automatic_heat() {
        let s = Settings::default();
        let mut plan = Plan::default();
        plan.want(Actuator::Heater, true, "hard_limit: temp_below_min -> heater_on");
        apply_layers(&input(&s, Some(env(15.0, 50.0)), true), &mut plan);
        assert_eq!(plan.desired(Actuator::Heater), Some(false));
    }
}
