//! The live tent as the control core sees it: cached node telemetry for the
//! sensor points and the relay board for the actuators.

use anyhow::{anyhow, bail, Result};
use std::collections::HashMap;
use time::OffsetDateTime;

use crate::control::{Actuator, DeviceResolver, DeviceValue, Wiring};
use crate::relay::RelayBoard;
use crate::state::SystemState;

const RELAY_PREFIX: &str = "relay/";

pub fn relay_device_id(actuator: Actuator) -> String {
    format!("{RELAY_PREFIX}{}", actuator.key())
}

fn parse_relay_id(id: &str) -> Option<Actuator> {
    id.strip_prefix(RELAY_PREFIX).and_then(Actuator::parse)
}

pub(crate) struct Plant<'a> {
    sensors: HashMap<String, f64>,
    relays: &'a mut RelayBoard,
}

impl<'a> Plant<'a> {
    pub(crate) fn new(sensors: HashMap<String, f64>, relays: &'a mut RelayBoard) -> Self {
        Self { sensors, relays }
    }

    /// Fresh values for every wired sensor point. Stale or missing points
    /// are simply left out.
    pub(crate) fn snapshot(
        state: &SystemState,
        wiring: &Wiring,
        now: OffsetDateTime,
        stale_s: u64,
    ) -> HashMap<String, f64> {
        [
            &wiring.canopy_temp,
            &wiring.top_temp,
            &wiring.canopy_rh,
            &wiring.top_rh,
        ]
        .into_iter()
        .flatten()
        .filter_map(|id| Some((id.clone(), state.sensor_value(id, now, stale_s)?)))
        .collect()
    }
}

impl DeviceResolver for Plant<'_> {
    fn read(&self, id: &str) -> Option<DeviceValue> {
        if let Some(actuator) = parse_relay_id(id) {
            return self.relays.is_on(actuator).map(DeviceValue::Switch);
        }
        self.sensors.get(id).copied().map(DeviceValue::Number)
    }

    fn command(&mut self, id: &str, on: bool) -> Result<()> {
        let actuator = parse_relay_id(id).ok_or_else(|| anyhow!("unknown device '{id}'"))?;
        self.relays.set(actuator, on)
    }

    fn command_confirmed(&mut self, id: &str, on: bool) -> Result<()> {
        self.command(id, on)?;
        let actuator = parse_relay_id(id).ok_or_else(|| anyhow!("unknown device '{id}'"))?;
        if self.relays.is_on(actuator) != Some(on) {
            bail!("relay for {actuator} did not latch");
        }
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
