//! Actuator relays on GPIO. The `gpio` feature gates the real rppal driver;
//! without it, a mock board keeps the latched state in memory and logs
//! every change.
//!
//! The latched output is what the controller treats as an actuator's
//! actual state.

use anyhow::Result;
use std::collections::BTreeMap;

use crate::control::Actuator;

#[cfg(feature = "gpio")]
use anyhow::Context;
#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

// ---------------------------------------------------------------------------
// Real GPIO relay board (Raspberry Pi)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub(crate) struct RelayBoard {
    pins: BTreeMap<Actuator, OutputPin>,
    active_low: bool, // most opto-isolated relay boards are active-low
}

#[cfg(feature = "gpio")]
impl RelayBoard {
    pub(crate) fn new(wiring: &[(Actuator, u8)], active_low: bool) -> Result<Self> {
        let gpio = Gpio::new().context("failed to open GPIO")?;
        let mut pins = BTreeMap::new();

        for (actuator, pin_num) in wiring {
            let mut pin = gpio
                .get(*pin_num)
                .with_context(|| format!("failed to claim gpio {pin_num} for {actuator}"))?
                .into_output();

            // Fail-safe: every relay starts released.
            if active_low {
                pin.set_high();
            } else {
                pin.set_low();
            }
            tracing::info!(actuator = %actuator, gpio = pin_num, "relay registered");
            pins.insert(*actuator, pin);
        }

        Ok(Self { pins, active_low })
    }

    pub(crate) fn set(&mut self, actuator: Actuator, on: bool) -> Result<()> {
        let Some(pin) = self.pins.get_mut(&actuator) else {
            anyhow::bail!("no relay wired for {actuator}");
        };
        // active-low: LOW = energised
        if on != self.active_low {
            pin.set_high();
        } else {
            pin.set_low();
        }
        tracing::debug!(actuator = %actuator, on, "relay set");
        Ok(())
    }

    pub(crate) fn is_on(&self, actuator: Actuator) -> Option<bool> {
        let pin = self.pins.get(&actuator)?;
        Some(pin.is_set_high() != self.active_low)
    }

    pub(crate) fn all_off(&mut self) {
        let wired: Vec<Actuator> = self.pins.keys().copied().collect();
        for a in wired {
            if let Err(e) = self.set(a, false) {
                tracing::error!(actuator = %a, error = %e, "failed to release relay");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Mock relay board (development, no hardware)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub(crate) struct RelayBoard {
    pub(super) relays: BTreeMap<Actuator, bool>,
}

#[cfg(not(feature = "gpio"))]
impl RelayBoard {
    pub(crate) fn new(wiring: &[(Actuator, u8)], _active_low: bool) -> Result<Self> {
        let mut relays = BTreeMap::new();
        for (actuator, pin_num) in wiring {
            tracing::info!(actuator = %actuator, gpio = pin_num, "[mock-gpio] relay registered (not wired)");
            relays.insert(*actuator, false);
        }
        Ok(Self { relays })
    }

    pub(crate) fn set(&mut self, actuator: Actuator, on: bool) -> Result<()> {
        let Some(state) = self.relays.get_mut(&actuator) else {
            anyhow::bail!("no relay wired for {actuator}");
        };
        *state = on;
        tracing::info!(actuator = %actuator, on, "[mock-gpio] relay set");
        Ok(())
    }

    pub(crate) fn is_on(&self, actuator: Actuator) -> Option<bool> {
        self.relays.get(&actuator).copied()
    }

    pub(crate) fn all_off(&mut self) {
        for state in self.relays.values_mut() {
            *state = false;
        }
        tracing::info!("[mock-gpio] all relays released");
    }
}

// ===========================================================================
// Tests
// ===========================================================================
