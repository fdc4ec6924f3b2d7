//! Absolute temperature and humidity bounds.
//!
//! The bounds are checked as an ordered rule list; the first rule that
//! fires wins. Day mode and drying mode share the response table.

use serde::{Serialize, Serializer};
use std::fmt;

use super::{Actuator, Plan};
use crate::sensors::Env;
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardLimit {
    TempBelowMin,
    TempAboveMax,
    RhBelowMin,
    RhAboveMax,
}

impl HardLimit {
    pub fn as_str(self) -> &'static str {
        match self {
            HardLimit::TempBelowMin => "temp_below_min",
            HardLimit::TempAboveMax => "temp_above_max",
            HardLimit::RhBelowMin => "rh_below_min",
            HardLimit::RhAboveMax => "rh_above_max",
        }
    }
}

impl fmt::Display for HardLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for HardLimit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

type Rule = fn(&Env, &Settings) -> Option<HardLimit>;

fn temp_below_min(env: &Env, s: &Settings) -> Option<HardLimit> {
    (env.avg_temp_c < s.min_temp_c).then_some(HardLimit::TempBelowMin)
}

fn temp_above_max(env: &Env, s: &Settings) -> Option<HardLimit> {
    (env.avg_temp_c > s.max_temp_c).then_some(HardLimit::TempAboveMax)
}

fn rh_below_min(env: &Env, s: &Settings) -> Option<HardLimit> {
    (env.avg_rh < s.min_rh).then_some(HardLimit::RhBelowMin)
}

fn rh_above_max(env: &Env, s: &Settings) -> Option<HardLimit> {
    (env.avg_rh > s.max_rh).then_some(HardLimit::RhAboveMax)
}

/// Evaluation order. Temperature outranks humidity.
const RULES: [Rule; 4] = [temp_below_min, temp_above_max, rh_below_min, rh_above_max];

pub fn evaluate(env: &Env, settings: &Settings) -> Option<HardLimit> {
    RULES.iter().find_map(|rule| rule(env, settings))
}

/// Write the response to `limit` into `plan`. `context` prefixes every
/// reason ("hard_limit", "drying").
pub fn respond(limit: HardLimit, env: &Env, settings: &Settings, context: &str, plan: &mut Plan) {
    let reason = |what: &str| format!("{context}: {limit} -> {what}");

    match limit {
        HardLimit::TempBelowMin => {
            plan.want(Actuator::Heater, true, reason("heater_on"));
            plan.want(Actuator::Exhaust, false, reason("exhaust_off"));
        }
        HardLimit::TempAboveMax => {
            plan.want(Actuator::Heater, false, reason("heater_off"));
            plan.want(Actuator::Exhaust, true, reason("exhaust_on"));
        }
        HardLimit::RhAboveMax => {
            if env.avg_temp_c > settings.min_temp_c {
                plan.want(Actuator::Exhaust, true, reason("exhaust_on"));
            }
            if env.avg_temp_c >= settings.min_temp_c {
                plan.want(Actuator::Heater, false, reason("heater_off"));
            }
            plan.want(Actuator::Humidifier, false, reason("humidifier_off"));
            plan.want(Actuator::Dehumidifier, true, reason("dehumidifier_on"));
        }
        HardLimit::RhBelowMin => {
            plan.want(Actuator::Exhaust, false, reason("exhaust_off"));
            if env.avg_temp_c > settings.min_temp_c {
                plan.want(Actuator::Heater, false, reason("heater_off"));
            }
            plan.want(Actuator::Dehumidifier, false, reason("dehumidifier_off"));
            plan.want(Actuator::Humidifier, true, reason("humidifier_on"));
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
