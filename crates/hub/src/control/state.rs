//! Mutable controller state. Owned by [`Controller`](super::Controller) and
//! reset to empty on restart.

use serde::Serialize;
use std::fmt;
use time::OffsetDateTime;

use super::debounce::Debouncer;
use super::Stage;

/// Heater pulse, cooldown and safety-trip windows.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaterTimers {
    pub pulse_until: Option<OffsetDateTime>,
    pub cooldown_until: Option<OffsetDateTime>,
    /// Tracks the actual hardware state, not the desired one.
    pub on_since: Option<OffsetDateTime>,
    pub lockout_until: Option<OffsetDateTime>,
}

impl HeaterTimers {
    pub fn lockout_active(&self, now: OffsetDateTime) -> bool {
        self.lockout_until.is_some_and(|until| now < until)
    }

    pub fn in_cooldown(&self, now: OffsetDateTime) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }

    pub fn on_for_s(&self, now: OffsetDateTime) -> f64 {
        self.on_since
            .map(|since| (now - since).as_seconds_f64().max(0.0))
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastAction {
    pub description: String,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

impl fmt::Display for LastAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {:02}:{:02}:{:02}",
            self.description,
            self.at.hour(),
            self.at.minute(),
            self.at.second()
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct ControlState {
    pub debounce: Debouncer,
    pub heater: HeaterTimers,
    pub sensors_were_unavailable: bool,
    pub last_stage: Option<Stage>,
    pub last_action: Option<LastAction>,
}

impl ControlState {
    pub fn record_action(&mut self, description: String, at: OffsetDateTime) {
        self.last_action = Some(LastAction { description, at });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use time::Duration;

    #[test]
    fn lockout_window_is_exclusive_at_end() {
        let t0 = datetime!(2026-03-01 22:00 UTC);
        let timers = HeaterTimers {
            lockout_until: Some(t0 + Duration::seconds(60)),
            ..Default::default()
        };
        assert!(timers.lockout_active(t0));
        assert!(timers.lockout_active(t0 + Duration::seconds(59)));
        assert!(!timers.lockout_active(t0 + Duration::seconds(60)));
        assert!(!HeaterTimers::default().lockout_active(t0));
    }

    #[test]
    fn on_for_counts_from_on_since() {
        let t0 = datetime!(2026-03-01 22:00 UTC);
        let timers = HeaterTimers {
            on_since: Some(t0),
            ..Default::default()
        };
        assert_eq!(timers.on_for_s(t0 + Duration::seconds(42)), 42.0);
        assert_eq!(HeaterTimers::default().on_for_s(t0), 0.0);
    }

    #[test]
    fn last_action_display() {
        let mut state = ControlState::default();
        state.record_action("Heater ON · vpd_low".into(), datetime!(2026-03-01 07:05:09 UTC));
        let shown = state.last_action.unwrap().to_string();
        assert_eq!(shown, "Heater ON · vpd_low @ 07:05:09");
    }
}
