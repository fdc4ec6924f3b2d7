//! Heater max-run monitor.

use time::{Duration, OffsetDateTime};
use tracing::error;

use super::state::HeaterTimers;
use crate::settings::Settings;

/// Follow the actual heater state. `None` (unknown or unwired) counts as off.
pub fn track_on_since(timers: &mut HeaterTimers, heater_actual: Option<bool>, now: OffsetDateTime) {
    if heater_actual == Some(true) {
        timers.on_since.get_or_insert(now);
    } else {
        timers.on_since = None;
    }
}

/// Check the continuous run time against `heater_max_run_s`. On a trip the
/// on-since marker is cleared and the lockout window starts; the caller is
/// responsible for forcing the heater off.
pub fn check_max_run(timers: &mut HeaterTimers, settings: &Settings, now: OffsetDateTime) -> bool {
    if settings.heater_max_run_s <= 0.0 {
        return false;
    }
    let Some(since) = timers.on_since else {
        return false;
    };
    let on_for = (now - since).as_seconds_f64();
    if on_for < settings.heater_max_run_s {
        return false;
    }

    let lockout_s = settings.heater_lockout_duration_s();
    timers.on_since = None;
    timers.lockout_until = Some(now + Duration::seconds_f64(lockout_s));
    error!(
        on_for_s = on_for,
        max_run_s = settings.heater_max_run_s,
        lockout_s,
        "heater max run exceeded, tripping"
    );
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn on_since_follows_actual_state() {
        let t0 = datetime!(2026-04-04 23:00 UTC);
        let mut timers = HeaterTimers::default();
        track_on_since(&mut timers, Some(true), t0);
        track_on_since(&mut timers, Some(true), t0 + Duration::seconds(30));
        assert_eq!(timers.on_since, Some(t0));
        track_on_since(&mut timers, Some(false), t0 + Duration::seconds(40));
        assert_eq!(timers.on_since, None);
        track_on_since(&mut timers, Some(true), t0 + Duration::seconds(50));
        track_on_since(&mut timers, None, t0 + Duration::seconds(60));
        assert_eq!(timers.on_since, None);
    }

    #[test]
    fn disabled_when_max_run_zero() {
        let t0 = datetime!(2026-04-04 23:00 UTC);
        let mut timers = HeaterTimers {
            on_since: Some(t0),
            ..Default::default()
        };
        let s = Settings::default();
        assert!(!check_max_run(&mut timers, &s, t0 + Duration::hours(5)));
        assert_eq!(timers.on_since, Some(t0));
    }

    #[test]
    fn trips_at_ceiling_and_starts_lockout() {
        let t0 = datetime!(2026-04-04 23:00 UTC);
        let mut s = Settings::default();
        s.heater_max_run_s = 60.0;
        let mut timers = HeaterTimers {
            on_since: Some(t0),
            ..Default::default()
        };

        assert!(!check_max_run(&mut timers, &s, t0 + Duration::seconds(59)));
        let trip_at = t0 + Duration::seconds(60);
        assert!(check_max_run(&mut timers, &s, trip_at));
        assert_eq!(timers.on_since, None);
        assert_eq!(timers.lockout_until, Some(trip_at + Duration::seconds(60)));
    }

    #[test]
    fn separate_lockout_duration() {
        let t0 = datetime!(2026-04-04 23:00 UTC);
        let mut s = Settings::default();
        s.heater_max_run_s = 120.0;
        s.heater_lockout_s = 600.0;
        let mut timers = HeaterTimers {
            on_since: Some(t0),
            ..Default::default()
        };
        let trip_at = t0 + Duration::seconds(120);
        assert!(check_max_run(&mut timers, &s, trip_at));
        assert_eq!(timers.lockout_until, Some(trip_at + Duration::seconds(600)));
    }
}
