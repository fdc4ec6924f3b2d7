//! Three-band hysteresis controller around the VPD target.

use serde::Serialize;

use super::{Actuator, Plan};
use crate::sensors::Env;
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Band {
    /// Air too humid for the target.
    Below,
    Within,
    /// Air too dry for the target.
    Above,
}

/// Classify `vpd` against `[target - deadband, target + deadband]`. Both
/// edges belong to the band.
pub fn classify(vpd_kpa: f64, target_kpa: f64, deadband_kpa: f64) -> Band {
    if vpd_kpa < target_kpa - deadband_kpa {
        Band::Below
    } else if vpd_kpa > target_kpa + deadband_kpa {
        Band::Above
    } else {
        Band::Within
    }
}

pub fn chase(env: &Env, settings: &Settings, plan: &mut Plan) -> Band {
    let band = classify(env.vpd_kpa, settings.vpd_target_kpa, settings.vpd_deadband_kpa);

    match band {
        Band::Below => {
            plan.want(Actuator::Dehumidifier, true, "vpd_low -> on");
            plan.want(Actuator::Humidifier, false, "vpd_low -> off");
            if env.avg_temp_c < settings.max_temp_c - 0.2 {
                plan.want(Actuator::Heater, true, "vpd_low: temp has room -> heater_on");
                plan.want(Actuator::Exhaust, false, "vpd_low: temp has room -> exhaust_off");
            } else if env.avg_rh > settings.min_rh + 1.0 {
                plan.want(Actuator::Exhaust, true, "vpd_low: temp near max -> exhaust_on");
            }
        }
        Band::Above => {
            plan.want(Actuator::Dehumidifier, false, "vpd_high -> off");
            plan.want(Actuator::Humidifier, true, "vpd_high -> on");
            plan.want(Actuator::Heater, false, "vpd_high -> heater_off");
            plan.want(Actuator::Exhaust, false, "vpd_high -> exhaust_off");
        }
        Band::Within => {
            for actuator in [
                Actuator::Humidifier,
                Actuator::Dehumidifier,
                Actuator::Heater,
                Actuator::Exhaust,
            ] {
                plan.want(actuator, false, format!("vpd_inband -> {}_off", actuator.key()));
            }
        }
    }

    band
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn env(t: f64, rh: f64, vpd: f64) -> Env {
        Env {
            avg_temp_c: t,
            avg_rh: rh,
            dew_point_c: 12.0,
            vpd_kpa: vpd,
        }
    }

    fn settings() -> Settings {
        let mut s = Settings::default();
        s.vpd_target_kpa = 1.0;
        s.vpd_deadband_kpa = 0.25;
        s
    }

    // -- classify -------------------------------------------------------------

    #[test]
    fn edges_are_inside_the_band() {
        assert_eq!(classify(0.75, 1.0, 0.25), Band::Within);
        assert_eq!(classify(1.25, 1.0, 0.25), Band::Within);
        assert_eq!(classify(1.0, 1.0, 0.25), Band::Within);
    }

    #[test]
    fn outside_the_edges() {
        assert_eq!(classify(0.7499, 1.0, 0.25), Band::Below);
        assert_eq!(classify(1.2501, 1.0, 0.25), Band::Above);
    }

    // -- chase ------------------------------------------------------------------

    #[test]
    fn humid_with_headroom_heats() {
        let mut plan = Plan::default();
        let band = chase(&env(24.0, 75.0, 0.5), &settings(), &mut plan);
        assert_eq!(band, Band::Below);
        assert_eq!(plan.desired(Actuator::Dehumidifier), Some(true));
        assert_eq!(plan.desired(Actuator::Humidifier), Some(false));
        assert_eq!(plan.desired(Actuator::Heater), Some(true));
        assert_eq!(plan.desired(Actuator::Exhaust), Some(false));
    }

    #[test]
    fn humid_near_max_temp_vents_instead() {
        let mut plan = Plan::default();
        chase(&env(29.9, 75.0, 0.5), &settings(), &mut plan);
        assert_eq!(plan.desired(Actuator::Heater), None);
        assert_eq!(plan.desired(Actuator::Exhaust), Some(true));
    }

    #[test]
    fn humid_near_max_temp_and_min_rh_leaves_exhaust() {
        let mut s = settings();
        s.min_rh = 74.5;
        let mut plan = Plan::default();
        chase(&env(29.9, 75.0, 0.5), &s, &mut plan);
        assert_eq!(plan.desired(Actuator::Exhaust), None);
        assert_eq!(plan.desired(Actuator::Heater), None);
    }

    #[test]
    fn dry_humidifies_and_stops_everything_else() {
        let mut plan = Plan::default();
        let band = chase(&env(27.0, 35.0, 1.8), &settings(), &mut plan);
        assert_eq!(band, Band::Above);
        assert_eq!(plan.desired(Actuator::Humidifier), Some(true));
        assert_eq!(plan.desired(Actuator::Dehumidifier), Some(false));
        assert_eq!(plan.desired(Actuator::Heater), Some(false));
        assert_eq!(plan.desired(Actuator::Exhaust), Some(false));
    }

    #[test]
    fn in_band_is_neutral() {
        let mut plan = Plan::default();
        chase(&env(25.0, 55.0, 1.0), &settings(), &mut plan);
        for a in [
            Actuator::Humidifier,
            Actuator::Dehumidifier,
            Actuator::Heater,
            Actuator::Exhaust,
        ] {
            assert_eq!(plan.desired(a), Some(false), "{a}");
        }
        assert_eq!(plan.desired(Actuator::Light), None);
    }
}
