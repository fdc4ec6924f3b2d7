//! In-memory device resolver for control-core tests.

use anyhow::{bail, Result};
use std::collections::{BTreeMap, HashMap, HashSet};

use super::{Actuator, DeviceResolver, DeviceValue, Wiring};

pub const CANOPY_TEMP: &str = "tent/canopy/temp_c";
pub const TOP_TEMP: &str = "tent/top/temp_c";
pub const CANOPY_RH: &str = "tent/canopy/rh";
pub const TOP_RH: &str = "tent/top/rh";

pub fn relay_id(a: Actuator) -> String {
    format!("relay/{}", a.key())
}

/// All four sensors and all six actuators wired.
pub fn full_wiring() -> Wiring {
    Wiring {
        canopy_temp: Some(CANOPY_TEMP.into()),
        top_temp: Some(TOP_TEMP.into()),
        canopy_rh: Some(CANOPY_RH.into()),
        top_rh: Some(TOP_RH.into()),
        actuators: Actuator::ALL
            .into_iter()
            .map(|a| (a, relay_id(a)))
            .collect::<BTreeMap<_, _>>(),
    }
}

#[derive(Debug, Default)]
pub struct FakeDevices {
    pub values: HashMap<String, DeviceValue>,
    /// `(id, on, confirmed)` in issue order.
    pub commands: Vec<(String, bool, bool)>,
    pub fail: HashSet<String>,
}

impl FakeDevices {
    /// Every actuator off, both sensor points reporting `temp_c` / `rh`.
    pub fn tent(temp_c: f64, rh: f64) -> Self {
        let mut dev = Self::default();
        dev.set_climate(temp_c, rh);
        for a in Actuator::ALL {
            dev.set_switch(a, false);
        }
        dev
    }

    pub fn set_climate(&mut self, temp_c: f64, rh: f64) {
        for id in [CANOPY_TEMP, TOP_TEMP] {
            self.values.insert(id.into(), DeviceValue::Number(temp_c));
        }
        for id in [CANOPY_RH, TOP_RH] {
            self.values.insert(id.into(), DeviceValue::Number(rh));
        }
    }

    pub fn set_switch(&mut self, a: Actuator, on: bool) {
        self.values.insert(relay_id(a), DeviceValue::Switch(on));
    }

    pub fn is_on(&self, a: Actuator) -> bool {
        matches!(self.values.get(&relay_id(a)), Some(DeviceValue::Switch(true)))
    }

    /// Commands issued for one actuator, in order.
    pub fn commands_for(&self, a: Actuator) -> Vec<bool> {
        let id = relay_id(a);
        self.commands
            .iter()
            .filter(|(cid, _, _)| *cid == id)
            .map(|(_, on, _)| *on)
            .collect()
    }
}

impl DeviceResolver for FakeDevices {
    fn read(&self, id: &str) -> Option<DeviceValue> {
        self.values.get(id).copied()
    }

    fn command(&mut self, id: &str, on: bool) -> Result<()> {
        self.issue(id, on, false)
    }

    fn command_confirmed(&mut self, id: &str, on: bool) -> Result<()> {
        self.issue(id, on, true)
    }
}

impl FakeDevices {
    fn issue(&mut self, id: &str, on: bool, confirmed: bool) -> Result<()> {
        if self.fail.contains(id) {
            bail!("relay {id} did not respond");
        }
        self.commands.push((id.to_string(), on, confirmed));
        self.values.insert(id.to_string(), DeviceValue::Switch(on));
        Ok(())
    }
}
