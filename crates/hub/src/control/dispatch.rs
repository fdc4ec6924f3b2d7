//! Desired-state plan and the idempotent command dispatcher.

use serde::Serialize;
use std::collections::BTreeMap;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::{Actuator, ControlState, DeviceResolver};
use crate::settings::Settings;

/// Whether a command honours the actuator's hold time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    Hold,
    /// Safety trips and the exhaust interlock. Issued with confirmation.
    Bypass,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub on: bool,
    pub reason: String,
    pub gate: Gate,
}

/// Desired state per actuator for one tick. Later writers overwrite
/// earlier ones; actuators without an entry are left as they are.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    commands: BTreeMap<Actuator, Command>,
}

impl Plan {
    pub fn want(&mut self, actuator: Actuator, on: bool, reason: impl Into<String>) {
        self.insert(actuator, on, reason, Gate::Hold);
    }

    pub fn force(&mut self, actuator: Actuator, on: bool, reason: impl Into<String>) {
        self.insert(actuator, on, reason, Gate::Bypass);
    }

    pub fn get(&self, actuator: Actuator) -> Option<&Command> {
        self.commands.get(&actuator)
    }

    pub fn desired(&self, actuator: Actuator) -> Option<bool> {
        self.get(actuator).map(|c| c.on)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Actuator, &Command)> {
        self.commands.iter().map(|(a, c)| (*a, c))
    }

    pub fn reasons(&self) -> BTreeMap<Actuator, String> {
        self.iter().map(|(a, c)| (a, c.reason.clone())).collect()
    }

    fn insert(&mut self, actuator: Actuator, on: bool, reason: impl Into<String>, gate: Gate) {
        self.commands.insert(
            actuator,
            Command {
                on,
                reason: reason.into(),
                gate,
            },
        );
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IssuedCommand {
    pub actuator: Actuator,
    pub on: bool,
    pub reason: String,
    pub ok: bool,
}

/// Issue every planned command whose desired state differs from the actual
/// one and whose gate allows it.
///
/// Actuators that are not wired, or whose state is unknown, are skipped.
/// A heater ON is never issued while the post-trip lockout is active. On
/// success `actual`, the debouncer and the last action are updated; a
/// failed command leaves all of them untouched so the next tick retries.
pub fn dispatch<D: DeviceResolver>(
    plan: &Plan,
    now: OffsetDateTime,
    settings: &Settings,
    ids: &BTreeMap<Actuator, String>,
    actual: &mut BTreeMap<Actuator, bool>,
    state: &mut ControlState,
    devices: &mut D,
) -> Vec<IssuedCommand> {
    let mut issued = Vec::new();

    for (actuator, cmd) in plan.iter() {
        let Some(id) = ids.get(&actuator) else {
            continue;
        };
        let Some(current) = actual.get(&actuator).copied() else {
            continue;
        };
        if current == cmd.on {
            continue;
        }
        if actuator == Actuator::Heater && cmd.on && state.heater.lockout_active(now) {
            continue;
        }
        if cmd.gate == Gate::Hold
            && !state
                .debounce
                .can_toggle(actuator, now, settings.hold_s(actuator))
        {
            debug!(actuator = %actuator, on = cmd.on, reason = %cmd.reason, "held, transition suppressed");
            continue;
        }

        let result = match cmd.gate {
            Gate::Bypass => devices.command_confirmed(id, cmd.on),
            Gate::Hold => devices.command(id, cmd.on),
        };

        let ok = match result {
            Ok(()) => {
                state.debounce.record(actuator, now);
                actual.insert(actuator, cmd.on);
                if actuator == Actuator::Heater && !cmd.on {
                    state.heater.on_since = None;
                }
                let description = format!(
                    "{} {} · {}",
                    actuator.label(),
                    if cmd.on { "ON" } else { "OFF" },
                    cmd.reason
                );
                info!(actuator = %actuator, on = cmd.on, reason = %cmd.reason, "actuator command");
                state.record_action(description, now);
                true
            }
            Err(e) => {
                warn!(actuator = %actuator, on = cmd.on, error = %e, "actuator command failed");
                false
            }
        };

        issued.push(IssuedCommand {
            actuator,
            on: cmd.on,
            reason: cmd.reason.clone(),
            ok,
        });
    }

    issued
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::testutil::FakeDevices;
    use time::macros::datetime;
    use time::Duration;

    fn ids() -> BTreeMap<Actuator, String> {
        Actuator::ALL
            .into_iter()
            .map(|a| (a, format!("relay/{}", a.key())))
            .collect()
    }

    fn all_off() -> BTreeMap<Actuator, bool> {
        Actuator::ALL.into_iter().map(|a| (a, false)).collect()
    }

    // -- Plan ---------------------------------------------------------------

    #[test]
    fn later_writes_overwrite() {
        let mut plan = Plan::default();
        plan.want(Actuator::Exhaust, false, "vpd_inband");
        plan.force(Actuator::Exhaust, true, "interlock");
        let cmd = plan.get(Actuator::Exhaust).unwrap();
        assert!(cmd.on);
        assert_eq!(cmd.gate, Gate::Bypass);
        assert_eq!(plan.reasons()[&Actuator::Exhaust], "interlock");
    }

    // -- dispatch -------------------------------------------------------------

    #[test]
    fn issues_only_divergent_commands() {
        let now = datetime!(2026-05-01 12:00 UTC);
        let settings = Settings::default();
        let mut state = ControlState::default();
        let mut actual = all_off();
        actual.insert(Actuator::Light, true);
        let mut dev = FakeDevices::default();

        let mut plan = Plan::default();
        plan.want(Actuator::Light, true, "schedule");
        plan.want(Actuator::Heater, true, "cold");

        let issued = dispatch(&plan, now, &settings, &ids(), &mut actual, &mut state, &mut dev);
        assert_eq!(issued.len(), 1);
        assert_eq!(issued[0].actuator, Actuator::Heater);
        assert!(issued[0].ok);
        assert_eq!(dev.commands, vec![("relay/heater".to_string(), true, false)]);
        assert_eq!(actual[&Actuator::Heater], true);
        assert_eq!(state.debounce.last_change(Actuator::Heater), Some(now));
        assert_eq!(
            state.last_action.as_ref().unwrap().description,
            "Heater ON · cold"
        );
    }

    #[test]
    fn hold_suppresses_second_flip() {
        let t0 = datetime!(2026-05-01 12:00 UTC);
        let settings = Settings::default();
        let mut state = ControlState::default();
        let mut actual = all_off();
        let mut dev = FakeDevices::default();

        let mut on = Plan::default();
        on.want(Actuator::Exhaust, true, "a");
        dispatch(&on, t0, &settings, &ids(), &mut actual, &mut state, &mut dev);

        let mut off = Plan::default();
        off.want(Actuator::Exhaust, false, "b");
        let t1 = t0 + Duration::seconds(10);
        let issued = dispatch(&off, t1, &settings, &ids(), &mut actual, &mut state, &mut dev);
        assert!(issued.is_empty());
        assert_eq!(dev.commands.len(), 1);

        let t2 = t0 + Duration::seconds(45);
        let issued = dispatch(&off, t2, &settings, &ids(), &mut actual, &mut state, &mut dev);
        assert_eq!(issued.len(), 1);
    }

    #[test]
    fn bypass_ignores_hold_and_confirms() {
        let t0 = datetime!(2026-05-01 12:00 UTC);
        let settings = Settings::default();
        let mut state = ControlState::default();
        state.debounce.record(Actuator::Exhaust, t0);
        let mut actual = all_off();
        let mut dev = FakeDevices::default();

        let mut plan = Plan::default();
        plan.force(Actuator::Exhaust, true, "interlock");
        let issued = dispatch(&plan, t0, &settings, &ids(), &mut actual, &mut state, &mut dev);
        assert_eq!(issued.len(), 1);
        assert_eq!(dev.commands, vec![("relay/exhaust".to_string(), true, true)]);
    }

    #[test]
    fn heater_on_blocked_during_lockout() {
        let t0 = datetime!(2026-05-01 12:00 UTC);
        let settings = Settings::default();
        let mut state = ControlState::default();
        state.heater.lockout_until = Some(t0 + Duration::seconds(30));
        let mut actual = all_off();
        let mut dev = FakeDevices::default();

        let mut plan = Plan::default();
        plan.force(Actuator::Heater, true, "whatever");
        let issued = dispatch(&plan, t0, &settings, &ids(), &mut actual, &mut state, &mut dev);
        assert!(issued.is_empty());
        assert!(dev.commands.is_empty());
    }

    #[test]
    fn skips_unwired_and_unknown() {
        let now = datetime!(2026-05-01 12:00 UTC);
        let settings = Settings::default();
        let mut state = ControlState::default();
        let mut ids = ids();
        ids.remove(&Actuator::Humidifier);
        let mut actual = all_off();
        actual.remove(&Actuator::Dehumidifier);
        let mut dev = FakeDevices::default();

        let mut plan = Plan::default();
        plan.want(Actuator::Humidifier, true, "dry");
        plan.want(Actuator::Dehumidifier, true, "wet");
        let issued = dispatch(&plan, now, &settings, &ids, &mut actual, &mut state, &mut dev);
        assert!(issued.is_empty());
    }

    #[test]
    fn failed_command_leaves_state_untouched() {
        let now = datetime!(2026-05-01 12:00 UTC);
        let settings = Settings::default();
        let mut state = ControlState::default();
        let mut actual = all_off();
        let mut dev = FakeDevices::default();
        dev.fail.insert("relay/humidifier".to_string());

        let mut plan = Plan::default();
        plan.want(Actuator::Humidifier, true, "dry");
        let issued = dispatch(&plan, now, &settings, &ids(), &mut actual, &mut state, &mut dev);
        assert_eq!(issued.len(), 1);
        assert!(!issued[0].ok);
        assert_eq!(actual[&Actuator::Humidifier], false);
        assert_eq!(state.debounce.last_change(Actuator::Humidifier), None);
        assert!(state.last_action.is_none());
    }

    #[test]
    fn heater_off_clears_on_since() {
        let now = datetime!(2026-05-01 12:00 UTC);
        let settings = Settings::default();
        let mut state = ControlState::default();
        state.heater.on_since = Some(now - Duration::seconds(300));
        let mut actual = all_off();
        actual.insert(Actuator::Heater, true);
        let mut dev = FakeDevices::default();

        let mut plan = Plan::default();
        plan.want(Actuator::Heater, false, "warm enough");
        dispatch(&plan, now, &settings, &ids(), &mut actual, &mut state, &mut dev);
        assert_eq!(state.heater.on_since, None);
    }
}
