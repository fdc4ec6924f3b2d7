//! Growth stages and their control profiles.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Stage {
    Seedling,
    #[default]
    Vegetative,
    #[serde(rename = "Early Flower")]
    EarlyFlower,
    #[serde(rename = "Mid Flower")]
    MidFlower,
    #[serde(rename = "Late Flower")]
    LateFlower,
    /// Post-harvest: lights forced off, hard limits only.
    Drying,
}

/// Night-time exhaust behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NightExhaust {
    AlwaysOn,
    /// On only while RH or temperature exceeds its maximum.
    AutoThreshold,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StageProfile {
    pub target_vpd_kpa: f64,
    pub night_exhaust: NightExhaust,
    /// Added to the configured dew-point margin at night.
    pub dew_margin_add_c: f64,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Seedling,
        Stage::Vegetative,
        Stage::EarlyFlower,
        Stage::MidFlower,
        Stage::LateFlower,
        Stage::Drying,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Seedling => "Seedling",
            Stage::Vegetative => "Vegetative",
            Stage::EarlyFlower => "Early Flower",
            Stage::MidFlower => "Mid Flower",
            Stage::LateFlower => "Late Flower",
            Stage::Drying => "Drying",
        }
    }

    /// Case- and separator-insensitive lookup ("early_flower", "Early Flower").
    pub fn parse(s: &str) -> Option<Self> {
        let wanted: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        Self::ALL.into_iter().find(|stage| {
            let name: String = stage
                .name()
                .chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .map(|c| c.to_ascii_lowercase())
                .collect();
            name == wanted
        })
    }

    pub fn is_drying(self) -> bool {
        self == Stage::Drying
    }

    pub fn profile(self) -> StageProfile {
        let (target_vpd_kpa, night_exhaust, dew_margin_add_c) = match self {
            Stage::Seedling => (0.70, NightExhaust::AutoThreshold, 0.0),
            Stage::Vegetative => (1.00, NightExhaust::AlwaysOn, 0.0),
            Stage::EarlyFlower => (1.10, NightExhaust::AlwaysOn, 0.0),
            Stage::MidFlower => (1.30, NightExhaust::AlwaysOn, 0.0),
            Stage::LateFlower => (1.50, NightExhaust::AlwaysOn, 0.0),
            Stage::Drying => (0.90, NightExhaust::AlwaysOn, 1.0),
        };
        StageProfile {
            target_vpd_kpa,
            night_exhaust,
            dew_margin_add_c,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl NightExhaust {
    /// Short tag used in the `night_<tag>_dewpoint_protect` mode string.
    pub fn tag(self) -> &'static str {
        match self {
            NightExhaust::AlwaysOn => "on",
            NightExhaust::AutoThreshold => "auto",
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_display_names() {
        for stage in Stage::ALL {
            assert_eq!(Stage::parse(stage.name()), Some(stage));
        }
    }

    #[test]
    fn parse_is_lenient_about_case_and_separators() {
        assert_eq!(Stage::parse("early_flower"), Some(Stage::EarlyFlower));
        assert_eq!(Stage::parse("  LATE-flower "), Some(Stage::LateFlower));
        assert_eq!(Stage::parse("drying"), Some(Stage::Drying));
    }

    #[test]
    fn parse_unknown_is_none() {
        assert_eq!(Stage::parse("Flowering"), None);
        assert_eq!(Stage::parse(""), None);
    }

    #[test]
    fn default_is_vegetative() {
        assert_eq!(Stage::default(), Stage::Vegetative);
    }

    #[test]
    fn seedling_night_exhaust_is_threshold() {
        assert_eq!(
            Stage::Seedling.profile().night_exhaust,
            NightExhaust::AutoThreshold
        );
        assert_eq!(Stage::MidFlower.profile().night_exhaust, NightExhaust::AlwaysOn);
    }

    #[test]
    fn drying_adds_dew_margin() {
        assert_eq!(Stage::Drying.profile().dew_margin_add_c, 1.0);
        assert_eq!(Stage::Vegetative.profile().dew_margin_add_c, 0.0);
    }

    #[test]
    fn serde_uses_display_names() {
        let json = serde_json::to_string(&Stage::EarlyFlower).unwrap();
        assert_eq!(json, "\"Early Flower\"");
        let back: Stage = serde_json::from_str("\"Late Flower\"").unwrap();
        assert_eq!(back, Stage::LateFlower);
    }
}
