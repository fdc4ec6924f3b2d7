//! Two-point sensor aggregation and derived climate metrics.

use serde::Serialize;

use crate::climate;

/// Raw readings from the two measurement points. `None` = unavailable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ClimateReading {
    pub canopy_temp_c: Option<f64>,
    pub top_temp_c: Option<f64>,
    pub canopy_rh: Option<f64>,
    pub top_rh: Option<f64>,
}

/// Values derived once per tick. Never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ClimateMetrics {
    pub avg_temp_c: Option<f64>,
    pub avg_rh: Option<f64>,
    pub dew_point_c: Option<f64>,
    /// Leaf-referenced VPD.
    pub vpd_kpa: Option<f64>,
    /// Air-referenced VPD, reported for comparison only.
    pub ambient_vpd_kpa: Option<f64>,
    pub leaf_temp_c: Option<f64>,
}

/// The four control inputs, only constructible when every one is present.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Env {
    pub avg_temp_c: f64,
    pub avg_rh: f64,
    pub dew_point_c: f64,
    pub vpd_kpa: f64,
}

/// Mean of the present values; `None` if all are absent.
pub fn average(values: &[Option<f64>]) -> Option<f64> {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    if present.is_empty() {
        return None;
    }
    Some(present.iter().sum::<f64>() / present.len() as f64)
}

impl ClimateMetrics {
    pub fn derive(reading: &ClimateReading, leaf_offset_c: f64) -> Self {
        let avg_temp_c = average(&[reading.canopy_temp_c, reading.top_temp_c]);
        let avg_rh = average(&[reading.canopy_rh, reading.top_rh]);

        let (Some(t), Some(rh)) = (avg_temp_c, avg_rh) else {
            return Self {
                avg_temp_c,
                avg_rh,
                ..Self::default()
            };
        };

        let leaf = t + leaf_offset_c;
        Self {
            avg_temp_c,
            avg_rh,
            dew_point_c: Some(climate::dew_point_c(t, rh)),
            vpd_kpa: Some(climate::vpd_leaf_kpa(t, rh, leaf)),
            ambient_vpd_kpa: Some(climate::vpd_kpa(t, rh)),
            leaf_temp_c: Some(leaf),
        }
    }

    /// True iff all four control inputs are present.
    pub fn sensors_ok(&self) -> bool {
        self.env().is_some()
    }

    pub fn env(&self) -> Option<Env> {
        Some(Env {
            avg_temp_c: self.avg_temp_c?,
            avg_rh: self.avg_rh?,
            dew_point_c: self.dew_point_c?,
            vpd_kpa: self.vpd_kpa?,
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================
