#[cfg(feature = "i2c")]
mod sht3x;
#[cfg(feature = "sim")]
mod sim;

#[cfg(not(any(feature = "sim", feature = "i2c")))]
compile_error!("enable the `sim` or `i2c` feature to give the node a sensor source");

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::{env, time::Duration};
use time::OffsetDateTime;
use tokio::{sync::mpsc, time::sleep};
use tracing::{debug, info, warn};

const SUB_STAT: &str = "stat/+";

#[derive(Debug, Clone, Serialize)]
pub struct Reading {
    sensor_id: String,
    temp_c: Option<f64>,
    rh: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ReadingMsg {
    ts: i64,
    readings: Vec<Reading>,
}

fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// `stat/<actuator>` carrying `ON`/`OFF`. Other `stat/` topics (the
/// controller report) are not switch states.
fn parse_stat(topic: &str, payload: &[u8]) -> Option<(String, bool)> {
    let key = topic.strip_prefix("stat/")?;
    if key.is_empty() || key.contains('/') {
        return None;
    }
    let on = match std::str::from_utf8(payload).ok()?.trim() {
        "ON" => true,
        "OFF" => false,
        _ => return None,
    };
    Some((key.to_string(), on))
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

// ---------------------------------------------------------------------------
// Sensor source
// ---------------------------------------------------------------------------

enum Source {
    #[cfg(feature = "i2c")]
    Sht3x(sht3x::Sht3x),
    #[cfg(feature = "sim")]
    Sim(sim::TentClimateSim),
}

impl Source {
    /// Real sensors win when both features are on.
    fn from_env() -> anyhow::Result<Self> {
        #[cfg(feature = "i2c")]
        {
            let points = sht3x::parse_points(&env::var("SENSOR_POINTS").unwrap_or_default())?;
            return Ok(Source::Sht3x(sht3x::Sht3x::new(points)?));
        }
        #[cfg(not(feature = "i2c"))]
        {
            let scenario =
                sim::Scenario::from_str_lossy(&env::var("SIM_SCENARIO").unwrap_or_default());
            let day_s: f64 = env_or("SIM_DAY_S", 86_400.0);
            let sim = sim::TentClimateSim::new(scenario, &["canopy", "top"], day_s);
            info!(%scenario, points = sim.point_count(), day_s, "simulating tent climate");
            Ok(Source::Sim(sim))
        }
    }

    fn read(&mut self) -> Vec<Reading> {
        match self {
            #[cfg(feature = "i2c")]
            Source::Sht3x(dev) => dev.read_all(),
            #[cfg(feature = "sim")]
            Source::Sim(sim) => sim.sample(now_unix() as f64),
        }
    }

    /// Actuator feedback only matters to the simulator.
    #[cfg_attr(not(feature = "sim"), allow(unused_variables))]
    fn observe(&mut self, key: &str, on: bool) {
        match self {
            #[cfg(feature = "i2c")]
            Source::Sht3x(_) => {}
            #[cfg(feature = "sim")]
            Source::Sim(sim) => {
                if sim.set_actuator(key, on) {
                    debug!(actuator = key, on, "sim load updated");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env_or("MQTT_PORT", 1883);
    let node_id = env::var("NODE_ID").unwrap_or_else(|_| "tent-a".to_string());
    let sample_every_s: u64 = env_or("SAMPLE_EVERY_S", 10);

    let mut source = Source::from_env()?;

    let mut mqttoptions = MqttOptions::new(format!("growtent-node-{node_id}"), broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);
    let (stat_tx, mut stat_rx) = mpsc::channel::<(String, bool)>(32);

    // The event loop keeps the connection alive and forwards actuator
    // states for the simulator's closed loop.
    let sub_client = client.clone();
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("node connected to mqtt");
                    if let Err(e) = sub_client.try_subscribe(SUB_STAT, QoS::AtLeastOnce) {
                        warn!("subscribe {SUB_STAT} failed: {e}");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(p))) => {
                    if let Some(state) = parse_stat(&p.topic, &p.payload) {
                        if stat_tx.send(state).await.is_err() {
                            break;
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("mqtt error: {e}. retrying...");
                    sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });

    let topic = format!("tele/{node_id}/reading");
    info!(%topic, sample_every_s, "publishing readings");

    loop {
        while let Ok((key, on)) = stat_rx.try_recv() {
            source.observe(&key, on);
        }

        let msg = ReadingMsg {
            ts: now_unix(),
            readings: source.read(),
        };

        match serde_json::to_vec(&msg) {
            Ok(payload) => {
                if let Err(e) = client
                    .publish(&topic, QoS::AtLeastOnce, false, payload)
                    .await
                {
                    warn!("publish error: {e}");
                } else {
                    debug!(ts = msg.ts, points = msg.readings.len(), "published readings");
                }
            }
            Err(e) => warn!("encode error: {e}"),
        }

        sleep(Duration::from_secs(sample_every_s)).await;
    }
}

// ===========================================================================
// Tests
// ===========================================================================
