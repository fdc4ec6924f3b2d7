//! Psychrometric helpers: saturation vapour pressure, VPD and dew point.
//!
//! All functions are pure. Relative humidity is clamped to `[0, 100]`
//! before use; the dew point additionally floors it at 0.1 % so the
//! logarithm stays finite.

/// Saturation vapour pressure (kPa) at `temp_c`, Tetens formula.
pub fn sat_vapor_pressure_kpa(temp_c: f64) -> f64 {
    0.6108 * ((17.27 * temp_c) / (temp_c + 237.3)).exp()
}

/// Ambient VPD (kPa): `svp(air) * (1 - rh/100)`.
pub fn vpd_kpa(temp_c: f64, rh_percent: f64) -> f64 {
    let rh = clamp_rh(rh_percent);
    (sat_vapor_pressure_kpa(temp_c) * (1.0 - rh / 100.0)).max(0.0)
}

/// Leaf VPD (kPa): saturation pressure at the leaf surface minus the actual
/// vapour pressure of the surrounding air.
pub fn vpd_leaf_kpa(air_temp_c: f64, rh_percent: f64, leaf_temp_c: f64) -> f64 {
    let rh = clamp_rh(rh_percent);
    let avp = (rh / 100.0) * sat_vapor_pressure_kpa(air_temp_c);
    (sat_vapor_pressure_kpa(leaf_temp_c) - avp).max(0.0)
}

/// Dew point (°C), Magnus formula.
pub fn dew_point_c(temp_c: f64, rh_percent: f64) -> f64 {
    const A: f64 = 17.625;
    const B: f64 = 243.04;
    let rh = clamp_rh(rh_percent).max(0.1);
    let alpha = (rh / 100.0).ln() + (A * temp_c) / (B + temp_c);
    (B * alpha) / (A - alpha)
}

fn clamp_rh(rh_percent: f64) -> f64 {
    rh_percent.clamp(0.0, 100.0)
}

// ===========================================================================
// Tests
// ===========================================================================
