mod climate;
mod config;
mod control;
mod db;
mod mqtt;
mod plant;
mod relay;
mod scheduler;
mod sensors;
mod settings;
mod state;
mod web;

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::{env, sync::Arc, time::Duration};
use time::{OffsetDateTime, UtcOffset};
use tokio::sync::{mpsc, RwLock};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use control::Controller;
use db::Db;
use mqtt::{extract_node_id, parse_user_write, ReadingMsg};
use relay::RelayBoard;
use scheduler::{Scheduler, WRITE_QUEUE};
use state::SystemState;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // The local offset can only be read while the process is single-threaded.
    let local_offset = UtcOffset::current_local_offset().ok();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?
        .block_on(run(local_offset))
}

async fn run(local_offset: Option<UtcOffset>) -> Result<()> {
    // ── Env config ──────────────────────────────────────────────────
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env::var("MQTT_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);
    let db_url = env::var("DB_URL").unwrap_or_else(|_| "sqlite:growtent.db?mode=rwc".to_string());
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());

    // ── Config file ─────────────────────────────────────────────────
    let cfg = config::load(&config_path)?;
    let relays = cfg.relays();
    if relays.is_empty() {
        warn!("no actuators configured; the controller will only observe");
    }
    let offset = cfg
        .utc_offset()
        .or(local_offset)
        .unwrap_or(UtcOffset::UTC);

    // ── Database: stored settings layered over [defaults] ───────────
    let db = Db::connect(&db_url).await?;
    db.migrate().await?;
    let settings = db.load_settings(&cfg.settings()?).await?;

    // ── Relay board ─────────────────────────────────────────────────
    // Many common relay boards are active-low. If yours is active-high, set false.
    let active_low = env::var("RELAY_ACTIVE_LOW")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(true);
    let mut board = RelayBoard::new(&relays, active_low)?;
    board.all_off();

    // ── Shared state (ephemeral, for the web UI) ────────────────────
    let shared = Arc::new(RwLock::new(SystemState::new(&relays, settings.clone())));
    shared
        .write()
        .await
        .record_system(format!("hub started ({})", cfg.controller.name));

    let (writes_tx, writes_rx) = mpsc::channel(WRITE_QUEUE);

    // ── Web server ──────────────────────────────────────────────────
    let app = web::AppState {
        shared: Arc::clone(&shared),
        writes: writes_tx.clone(),
    };
    tokio::spawn(async move {
        if let Err(e) = web::serve(app).await {
            error!(error = %format!("{e:#}"), "web server stopped");
        }
    });

    // ── MQTT ────────────────────────────────────────────────────────
    let mut mqttoptions = MqttOptions::new("growtent-hub", broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 64);

    // ── Controller ──────────────────────────────────────────────────
    let scheduler = Scheduler::new(
        Controller::new(cfg.wiring()),
        settings,
        board,
        db,
        Arc::clone(&shared),
        Some(client.clone()),
        writes_rx,
        cfg.controller.stale_timeout_sec as u64,
        offset,
    );
    let mut controller = tokio::spawn(scheduler.run(Duration::from_secs(cfg.controller.tick_sec as u64)));

    loop {
        tokio::select! {
            res = &mut controller => {
                res.context("controller task failed")?;
                info!("hub stopped");
                return Ok(());
            }
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::Publish(p))) => {
                    let topic = p.topic.clone();
                    let payload = p.payload.to_vec();

                    if let Some(node_id) = extract_node_id(&topic) {
                        match serde_json::from_slice::<ReadingMsg>(&payload) {
                            Ok(msg) => {
                                debug!(node = node_id, ts = msg.ts, points = msg.readings.len(), "telemetry");
                                let points = msg.into_points();
                                let mut st = shared.write().await;
                                st.record_reading(node_id, points, OffsetDateTime::now_utc());
                            }
                            Err(e) => {
                                warn!(topic = %topic, error = %e, "bad telemetry json");
                                let mut st = shared.write().await;
                                st.record_error(format!("bad telemetry json: {e}"));
                            }
                        }
                    } else if let Some(write) = parse_user_write(&topic, &payload) {
                        info!(topic = %topic, "queued write from mqtt");
                        if writes_tx.send(write).await.is_err() {
                            warn!("controller is not running, dropping write");
                        }
                    } else {
                        debug!(topic = %topic, "unhandled topic");
                    }
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("mqtt connected");
                    // Clean sessions drop subscriptions, so renew them on every connect.
                    // Never await here; this loop is what drains the request queue.
                    for topic in [mqtt::SUB_READINGS, mqtt::SUB_MODES, mqtt::SUB_SETTINGS] {
                        if let Err(e) = client.try_subscribe(topic, QoS::AtLeastOnce) {
                            warn!(topic, error = %e, "subscribe failed");
                        }
                    }
                    let mut st = shared.write().await;
                    st.mqtt_connected = true;
                    st.record_system("mqtt connected".to_string());
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("mqtt disconnected");
                    let mut st = shared.write().await;
                    st.mqtt_connected = false;
                    st.record_system("mqtt disconnected".to_string());
                }
                Ok(_) => {}
                Err(e) => {
                    // The controller keeps ticking; only stale telemetry
                    // stops automatic actuation.
                    warn!(error = %e, "mqtt error, reconnecting");
                    {
                        let mut st = shared.write().await;
                        st.mqtt_connected = false;
                        st.record_error(format!("mqtt error: {e}"));
                    }
                    sleep(Duration::from_secs(2)).await;
                }
            }
        }
    }
}
