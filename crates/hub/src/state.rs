use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use sysinfo::System;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::control::{Actuator, SensorAlert, TickReport};
use crate::settings::Settings;

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct SystemState {
    pub started_at: Instant,
    pub mqtt_connected: bool,
    pub nodes: HashMap<String, NodeState>,
    pub actuators: BTreeMap<Actuator, ActuatorState>,
    pub settings: Settings,
    pub last_report: Option<TickReport>,
    pub sensor_alert: bool,
    pub events: VecDeque<SystemEvent>,
}

#[derive(Clone, Serialize)]
pub struct NodeState {
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
    pub readings: Vec<PointReading>,
}

/// One temperature/humidity point as reported by a node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointReading {
    pub sensor_id: String,
    pub temp_c: Option<f64>,
    pub rh: Option<f64>,
}

#[derive(Clone, Serialize)]
pub struct ActuatorState {
    pub on: bool,
    pub gpio_pin: u8,
    pub mode: String,
    pub reason: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_changed: Option<OffsetDateTime>,
}

#[derive(Clone, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Reading,
    Actuator,
    Control,
    Alert,
    Error,
    System,
}

#[derive(Serialize)]
pub struct HostStats {
    pub host_uptime_secs: u64,
    pub load_avg_1m: f64,
    pub mem_used_bytes: u64,
    pub mem_total_bytes: u64,
}

impl HostStats {
    pub fn sample() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        Self {
            host_uptime_secs: System::uptime(),
            load_avg_1m: System::load_average().one,
            mem_used_bytes: sys.used_memory(),
            mem_total_bytes: sys.total_memory(),
        }
    }
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub mqtt_connected: bool,
    pub host: HostStats,
    pub sensor_alert: bool,
    pub nodes: HashMap<String, NodeState>,
    pub actuators: BTreeMap<Actuator, ActuatorState>,
    pub controller: Option<TickReport>,
    pub settings: Settings,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    pub fn new(relays: &[(Actuator, u8)], settings: Settings) -> Self {
        let actuators = relays
            .iter()
            .map(|(actuator, pin)| {
                (
                    *actuator,
                    ActuatorState {
                        on: false,
                        gpio_pin: *pin,
                        mode: settings.mode(*actuator).to_string(),
                        reason: None,
                        last_changed: None,
                    },
                )
            })
            .collect();

        Self {
            started_at: Instant::now(),
            mqtt_connected: false,
            nodes: HashMap::new(),
            actuators,
            settings,
            last_report: None,
            sensor_alert: false,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    /// Record a telemetry message from a node.
    pub fn record_reading(&mut self, node_id: &str, readings: Vec<PointReading>, now: OffsetDateTime) {
        let detail = format!(
            "{node_id}: {}",
            readings
                .iter()
                .map(|r| format!("{}={}/{}", r.sensor_id, fmt_opt(r.temp_c), fmt_opt(r.rh)))
                .collect::<Vec<_>>()
                .join(", ")
        );

        self.nodes.insert(
            node_id.to_string(),
            NodeState {
                last_seen: now,
                readings,
            },
        );

        self.push_event(EventKind::Reading, detail);
    }

    /// Resolve a sensor device id (`<node>/<sensor>/temp_c` or
    /// `<node>/<sensor>/rh`) against the cache. Values from a node not heard
    /// from within `stale_s` seconds read as absent.
    pub fn sensor_value(&self, device_id: &str, now: OffsetDateTime, stale_s: u64) -> Option<f64> {
        let (node_id, sensor_id, field) = split_sensor_id(device_id)?;
        let node = self.nodes.get(node_id)?;
        if (now - node.last_seen).whole_seconds() > stale_s as i64 {
            return None;
        }
        let point = node.readings.iter().find(|r| r.sensor_id == sensor_id)?;
        let value = match field {
            "temp_c" => point.temp_c,
            "rh" => point.rh,
            _ => None,
        }?;
        value.is_finite().then_some(value)
    }

    /// Store a finished tick: its report, the resulting actuator states, and
    /// one event per issued command.
    pub fn record_tick(&mut self, report: TickReport) {
        for (actuator, on) in &report.actuators {
            if let Some(a) = self.actuators.get_mut(actuator) {
                a.on = *on;
                a.reason = report.reasons.get(actuator).cloned();
            }
        }
        for (actuator, a) in self.actuators.iter_mut() {
            a.mode = self.settings.mode(*actuator).to_string();
        }
        let commands = report.commands.clone();
        for cmd in commands {
            let state_str = if cmd.on { "ON" } else { "OFF" };
            if cmd.ok {
                if let Some(a) = self.actuators.get_mut(&cmd.actuator) {
                    a.last_changed = Some(report.at);
                }
                self.push_event(
                    EventKind::Actuator,
                    format!("{} {state_str} · {}", cmd.actuator, cmd.reason),
                );
            } else {
                self.push_event(
                    EventKind::Error,
                    format!("{} {state_str} failed · {}", cmd.actuator, cmd.reason),
                );
            }
        }
        if let Some(alert) = report.sensor_alert {
            self.sensor_alert = alert == SensorAlert::Raised;
            let detail = match alert {
                SensorAlert::Raised => "climate sensors unavailable, automatic control paused",
                SensorAlert::Cleared => "climate sensors restored",
            };
            self.push_event(EventKind::Alert, detail.to_string());
        }
        self.last_report = Some(report);
    }

    /// Record a control-level event (settings writes, stage resets).
    pub fn record_control(&mut self, detail: String) {
        self.push_event(EventKind::Control, detail);
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            mqtt_connected: self.mqtt_connected,
            host: HostStats::sample(),
            sensor_alert: self.sensor_alert,
            nodes: self.nodes.clone(),
            actuators: self.actuators.clone(),
            controller: self.last_report.clone(),
            settings: self.settings.clone(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

/// Split `<node>/<sensor>/<field>`. Node ids may not contain '/'.
fn split_sensor_id(id: &str) -> Option<(&str, &str, &str)> {
    let mut parts = id.splitn(3, '/');
    let node = parts.next().filter(|s| !s.is_empty())?;
    let sensor = parts.next().filter(|s| !s.is_empty())?;
    let field = parts.next().filter(|s| !s.is_empty())?;
    Some((node, sensor, field))
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|v| format!("{v:.1}")).unwrap_or_else(|| "-".to_string())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use time::Duration;

    const T0: OffsetDateTime = datetime!(2026-06-01 10:00 UTC);

    fn state() -> SystemState {
        SystemState::new(
            &[(Actuator::Heater, 17), (Actuator::Exhaust, 27)],
            Settings::default(),
        )
    }

    fn point(id: &str, t: Option<f64>, rh: Option<f64>) -> PointReading {
        PointReading {
            sensor_id: id.into(),
            temp_c: t,
            rh,
        }
    }

    // -- sensor cache -------------------------------------------------------

    #[test]
    fn resolves_cached_values() {
        let mut st = state();
        st.record_reading(
            "tent-a",
            vec![point("canopy", Some(24.5), Some(55.0)), point("top", None, Some(50.0))],
            T0,
        );
        assert_eq!(st.sensor_value("tent-a/canopy/temp_c", T0, 120), Some(24.5));
        assert_eq!(st.sensor_value("tent-a/canopy/rh", T0, 120), Some(55.0));
        assert_eq!(st.sensor_value("tent-a/top/temp_c", T0, 120), None);
        assert_eq!(st.sensor_value("tent-a/top/rh", T0, 120), Some(50.0));
        assert_eq!(st.sensor_value("tent-a/top/pressure", T0, 120), None);
        assert_eq!(st.sensor_value("tent-b/canopy/rh", T0, 120), None);
        assert_eq!(st.sensor_value("garbage", T0, 120), None);
    }

    #[test]
    fn stale_values_read_as_absent() {
        let mut st = state();
        st.record_reading("tent-a", vec![point("canopy", Some(24.5), Some(55.0))], T0);
        let fresh = T0 + Duration::seconds(120);
        let stale = T0 + Duration::seconds(121);
        assert_eq!(st.sensor_value("tent-a/canopy/temp_c", fresh, 120), Some(24.5));
        assert_eq!(st.sensor_value("tent-a/canopy/temp_c", stale, 120), None);
    }

    #[test]
    fn newer_message_replaces_points() {
        let mut st = state();
        st.record_reading("tent-a", vec![point("canopy", Some(24.5), Some(55.0))], T0);
        st.record_reading("tent-a", vec![point("canopy", None, Some(60.0))], T0);
        assert_eq!(st.sensor_value("tent-a/canopy/temp_c", T0, 120), None);
        assert_eq!(st.sensor_value("tent-a/canopy/rh", T0, 120), Some(60.0));
    }

    // -- events -------------------------------------------------------------

    #[test]
    fn ring_buffer_is_bounded() {
        let mut st = state();
        for i in 0..(MAX_EVENTS + 25) {
            st.record_system(format!("event {i}"));
        }
        assert_eq!(st.events.len(), MAX_EVENTS);
        assert_eq!(st.events.front().unwrap().detail, "event 25");
    }

    #[test]
    fn status_lists_newest_event_first() {
        let mut st = state();
        st.record_system("first".into());
        st.record_error("second".into());
        let status = st.to_status();
        assert_eq!(status.events[0].detail, "second");
        assert_eq!(status.events[0].kind, EventKind::Error);
        assert_eq!(status.actuators.len(), 2);
        assert!(status.controller.is_none());
    }

    #[test]
    fn status_serializes() {
        let mut st = state();
        st.record_reading("tent-a", vec![point("canopy", Some(24.5), None)], T0);
        let json = serde_json::to_value(st.to_status()).unwrap();
        assert_eq!(json["actuators"]["heater"]["gpio_pin"], 17);
        assert_eq!(json["actuators"]["heater"]["mode"], "Auto");
        assert_eq!(json["nodes"]["tent-a"]["readings"][0]["rh"], serde_json::Value::Null);
        assert_eq!(json["events"][0]["kind"], "reading");
        assert_eq!(json["settings"]["stage"], "Vegetative");
    }
}
