//! Post-harvest drying: hard limits only, neutral otherwise.

use super::{limits, Actuator, ControlMode, Plan};
use crate::sensors::Env;
use crate::settings::Settings;

pub fn plan_drying(env: &Env, settings: &Settings, plan: &mut Plan) -> ControlMode {
    match limits::evaluate(env, settings) {
        Some(limit) => {
            limits::respond(limit, env, settings, "drying", plan);
            ControlMode::DryingHardLimit(limit)
        }
        None => {
            plan.want(Actuator::Heater, false, "drying: in-band -> neutral");
            plan.want(Actuator::Exhaust, false, "drying: in-band -> neutral");
            ControlMode::DryingHardLimitsOnly
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::HardLimit;

    fn env(t: f64, rh: f64) -> Env {
        Env {
            avg_temp_c: t,
            avg_rh: rh,
            dew_point_c: 10.0,
            vpd_kpa: 2.0,
        }
    }

    #[test]
    fn in_limits_is_neutral_and_ignores_vpd() {
        let s = Settings::default();
        let mut plan = Plan::default();
        let mode = plan_drying(&env(22.0, 55.0), &s, &mut plan);
        assert_eq!(mode, ControlMode::DryingHardLimitsOnly);
        assert_eq!(plan.desired(Actuator::Heater), Some(false));
        assert_eq!(plan.desired(Actuator::Exhaust), Some(false));
        assert_eq!(plan.desired(Actuator::Humidifier), None);
        assert_eq!(plan.desired(Actuator::Dehumidifier), None);
    }

    #[test]
    fn limit_uses_shared_response() {
        let s = Settings::default();
        let mut plan = Plan::default();
        let mode = plan_drying(&env(24.0, 80.0), &s, &mut plan);
        assert_eq!(mode, ControlMode::DryingHardLimit(HardLimit::RhAboveMax));
        assert_eq!(mode.to_string(), "drying_hard_limit:rh_above_max");
        assert_eq!(plan.desired(Actuator::Dehumidifier), Some(true));
        assert_eq!(plan.desired(Actuator::Exhaust), Some(true));
        assert_eq!(
            plan.get(Actuator::Dehumidifier).unwrap().reason,
            "drying: rh_above_max -> dehumidifier_on"
        );
    }
}
