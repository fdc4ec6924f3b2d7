//! Hold-time gate shared by every actuator transition.

use std::collections::BTreeMap;
use time::OffsetDateTime;

use super::Actuator;

/// True if `last_change` is absent or at least `hold_s` seconds old.
pub fn can_toggle(last_change: Option<OffsetDateTime>, now: OffsetDateTime, hold_s: f64) -> bool {
    match last_change {
        None => true,
        Some(last) => (now - last).as_seconds_f64() >= hold_s,
    }
}

/// Last commanded transition per actuator. Not persisted.
#[derive(Debug, Clone, Default)]
pub struct Debouncer {
    last_change: BTreeMap<Actuator, OffsetDateTime>,
}

impl Debouncer {
    pub fn last_change(&self, actuator: Actuator) -> Option<OffsetDateTime> {
        self.last_change.get(&actuator).copied()
    }

    pub fn can_toggle(&self, actuator: Actuator, now: OffsetDateTime, hold_s: f64) -> bool {
        can_toggle(self.last_change(actuator), now, hold_s)
    }

    pub fn record(&mut self, actuator: Actuator, now: OffsetDateTime) {
        self.last_change.insert(actuator, now);
    }
}
