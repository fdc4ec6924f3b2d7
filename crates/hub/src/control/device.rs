//! The only seam between the control core and the outside world.

use anyhow::Result;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeviceValue {
    Number(f64),
    Switch(bool),
}

impl DeviceValue {
    pub fn as_f64(self) -> Option<f64> {
        match self {
            DeviceValue::Number(v) if v.is_finite() => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(self) -> Option<bool> {
        match self {
            DeviceValue::Switch(b) => Some(b),
            _ => None,
        }
    }
}

/// Resolves sensor and actuator identifiers to live values and commands.
///
/// `read` returning `None` means the device is unknown or currently
/// unavailable; the core treats both the same way.
pub trait DeviceResolver {
    fn read(&self, id: &str) -> Option<DeviceValue>;

    /// Fire-and-forget switch command.
    fn command(&mut self, id: &str, on: bool) -> Result<()>;

    /// Switch command that must have taken effect before returning.
    /// Used for safety trips and the exhaust interlock.
    fn command_confirmed(&mut self, id: &str, on: bool) -> Result<()> {
        self.command(id, on)
    }
}
