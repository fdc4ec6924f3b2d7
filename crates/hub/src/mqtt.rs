use rumqttc::{AsyncClient, QoS};
use serde::Deserialize;

use crate::control::{Actuator, SensorAlert, TickReport};
use crate::scheduler::UserWrite;
use crate::state::PointReading;

pub(crate) const SUB_READINGS: &str = "tele/+/reading";
pub(crate) const SUB_MODES: &str = "mode/+/set";
pub(crate) const SUB_SETTINGS: &str = "setting/+/set";

const TOPIC_ALERT: &str = "alert/sensors";
const TOPIC_CONTROLLER: &str = "stat/controller";

// ---------------------------------------------------------------------------
// MQTT message types
// ---------------------------------------------------------------------------

/// One sampled point. Either value may be missing or null when the node
/// failed to read it.
#[derive(Debug, Deserialize)]
pub(crate) struct Reading {
    pub(crate) sensor_id: String,
    #[serde(default)]
    pub(crate) temp_c: Option<f64>,
    #[serde(default)]
    pub(crate) rh: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReadingMsg {
    pub(crate) ts: i64,
    pub(crate) readings: Vec<Reading>,
}

impl ReadingMsg {
    pub(crate) fn into_points(self) -> Vec<PointReading> {
        self.readings
            .into_iter()
            .map(|r| PointReading {
                sensor_id: r.sensor_id,
                temp_c: r.temp_c.filter(|v| v.is_finite()),
                rh: r.rh.filter(|v| v.is_finite()),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Topic / payload helpers
// ---------------------------------------------------------------------------

/// Extract the middle segment of "<prefix>/<id>/<suffix>".
fn middle_segment<'a>(topic: &'a str, prefix: &str, suffix: &str) -> Option<&'a str> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() == 3 && parts[0] == prefix && parts[2] == suffix && !parts[1].is_empty() {
        Some(parts[1])
    } else {
        None
    }
}

/// Extract node_id from "tele/<node_id>/reading".
pub(crate) fn extract_node_id(topic: &str) -> Option<&str> {
    middle_segment(topic, "tele", "reading")
}

/// Turn a "mode/<actuator>/set" or "setting/<key>/set" publish into a
/// queued settings write. Validation happens when the write is applied.
pub(crate) fn parse_user_write(topic: &str, payload: &[u8]) -> Option<UserWrite> {
    let value = String::from_utf8_lossy(payload).trim().to_string();
    if let Some(actuator) = middle_segment(topic, "mode", "set") {
        return Some(UserWrite::Set {
            key: format!("{actuator}_mode"),
            value,
        });
    }
    middle_segment(topic, "setting", "set").map(|key| UserWrite::Set {
        key: key.to_string(),
        value,
    })
}

pub(crate) fn stat_topic(actuator: Actuator) -> String {
    format!("stat/{}", actuator.key())
}

pub(crate) fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

// ---------------------------------------------------------------------------
// Publishing
// ---------------------------------------------------------------------------

/// Publish the outcome of a tick: retained actuator states, the sensor
/// alert edge (if any) and the full report. Never blocks: while the broker
/// is unreachable and the request queue is full, messages are dropped with
/// a warning so the controller keeps ticking.
pub(crate) fn publish_tick(client: &AsyncClient, report: &TickReport) {
    for (actuator, on) in &report.actuators {
        publish(client, &stat_topic(*actuator), true, on_off(*on).as_bytes().to_vec());
    }

    if let Some(alert) = report.sensor_alert {
        let payload = match alert {
            SensorAlert::Raised => "unavailable",
            SensorAlert::Cleared => "ok",
        };
        publish(client, TOPIC_ALERT, true, payload.as_bytes().to_vec());
    }

    match serde_json::to_vec(report) {
        Ok(json) => publish(client, TOPIC_CONTROLLER, false, json),
        Err(e) => tracing::warn!(error = %e, "failed to encode tick report"),
    }
}

fn publish(client: &AsyncClient, topic: &str, retain: bool, payload: Vec<u8>) {
    if let Err(e) = client.try_publish(topic, QoS::AtLeastOnce, retain, payload) {
        tracing::warn!(topic, error = %e, "mqtt publish failed");
    }
}

// ===========================================================================
// Tests
// ===========================================================================
