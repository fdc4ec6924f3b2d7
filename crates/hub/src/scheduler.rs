//! Tick scheduler: the one task that owns the controller, the live settings
//! and the relay board.
//!
//! ```text
//!   web / mqtt ──UserWrite──▶ mpsc ──┐
//!                                    ▼
//!   interval ──▶ drain writes ──▶ snapshot sensors ──▶ Controller::tick ──▶ relays
//!                                                           │
//!                                      shared state ◀───────┴───────▶ mqtt stat/*
//! ```
//!
//! User writes are only applied between ticks, so a tick always runs
//! against one consistent set of settings. The interval skips missed ticks;
//! a slow tick never queues up a burst behind it.

use std::time::Duration;

use rumqttc::AsyncClient;
use time::{OffsetDateTime, UtcOffset};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::control::{Actuator, Controller, ManualMode, Stage, TickReport};
use crate::db::Db;
use crate::mqtt;
use crate::plant::Plant;
use crate::relay::RelayBoard;
use crate::settings::Settings;
use crate::state::SharedState;

/// Capacity of the user-write queue.
pub const WRITE_QUEUE: usize = 64;

/// A settings change requested by a user, applied at the start of the next
/// tick.
#[derive(Debug, Clone, PartialEq)]
pub enum UserWrite {
    Set { key: String, value: String },
    /// Return every actuator to Auto.
    AllAuto,
}

pub struct Scheduler {
    controller: Controller,
    settings: Settings,
    relays: RelayBoard,
    db: Db,
    shared: SharedState,
    mqtt: Option<AsyncClient>,
    writes: mpsc::Receiver<UserWrite>,
    stale_s: u64,
    offset: UtcOffset,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        controller: Controller,
        settings: Settings,
        relays: RelayBoard,
        db: Db,
        shared: SharedState,
        mqtt: Option<AsyncClient>,
        writes: mpsc::Receiver<UserWrite>,
        stale_s: u64,
        offset: UtcOffset,
    ) -> Self {
        Self {
            controller,
            settings,
            relays,
            db,
            shared,
            mqtt,
            writes,
            stale_s,
            offset,
        }
    }

    /// Run the tick loop until Ctrl-C, then release every relay. Intended to
    /// be `tokio::spawn`-ed from main.
    pub async fn run(mut self, tick: Duration) {
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            tick_sec = tick.as_secs(),
            stale_timeout_sec = self.stale_s,
            utc_offset = %self.offset,
            "scheduler started"
        );
        {
            let mut st = self.shared.write().await;
            st.record_system(format!("controller started (tick {}s)", tick.as_secs()));
        }

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = OffsetDateTime::now_utc().to_offset(self.offset);
                    self.tick_once(now).await;
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        info!("shutting down, releasing relays");
        self.relays.all_off();
        let mut st = self.shared.write().await;
        st.record_system("controller stopped".to_string());
    }

    /// One full cycle at `now`.
    pub async fn tick_once(&mut self, now: OffsetDateTime) -> TickReport {
        self.drain_writes().await;

        let sensors = {
            let st = self.shared.read().await;
            Plant::snapshot(&st, self.controller.wiring(), now, self.stale_s)
        };
        let report = {
            let mut plant = Plant::new(sensors, &mut self.relays);
            self.controller.tick(now, &self.settings, &mut plant)
        };

        if let Some(stage) = report.reset_vpd_target {
            self.reset_vpd_target(stage).await;
        }

        {
            let mut st = self.shared.write().await;
            st.settings = self.settings.clone();
            st.record_tick(report.clone());
        }

        if let Some(client) = &self.mqtt {
            mqtt::publish_tick(client, &report);
        }
        report
    }

    // -----------------------------------------------------------------------
    // User writes
    // -----------------------------------------------------------------------

    async fn drain_writes(&mut self) {
        while let Ok(write) = self.writes.try_recv() {
            self.apply_write(write).await;
        }
    }

    async fn apply_write(&mut self, write: UserWrite) {
        match write {
            UserWrite::Set { key, value } => {
                let key = key.trim().to_string();
                if let Err(e) = self.settings.apply_checked(&key, &value) {
                    warn!(key = %key, value = %value, error = %e, "rejected settings write");
                    let mut st = self.shared.write().await;
                    st.record_error(format!("rejected {key}={value}: {e:#}"));
                    return;
                }
                self.persist(&key).await;
                let stored = self.settings.get(&key).unwrap_or(value);
                info!(key = %key, value = %stored, "setting changed");
                let mut st = self.shared.write().await;
                st.record_control(format!("{key} = {stored}"));
            }
            UserWrite::AllAuto => {
                for a in Actuator::ALL {
                    self.settings.set_mode(a, ManualMode::Auto);
                    self.persist(&format!("{}_mode", a.key())).await;
                }
                info!("all actuators returned to auto");
                let mut st = self.shared.write().await;
                st.record_control("all actuators returned to Auto".to_string());
            }
        }
    }

    /// A stage change puts the VPD target back to the new stage's default.
    async fn reset_vpd_target(&mut self, stage: Stage) {
        let target = stage.profile().target_vpd_kpa;
        self.settings.vpd_target_kpa = target;
        self.persist("vpd_target_kpa").await;
        info!(stage = %stage, vpd_target_kpa = target, "vpd target reset for new stage");
        let mut st = self.shared.write().await;
        st.record_control(format!("stage {stage}: vpd target reset to {target:.2} kPa"));
    }

    async fn persist(&self, key: &str) {
        let Some(value) = self.settings.get(key) else {
            return;
        };
        if let Err(e) = self.db.save_setting(key, &value).await {
            warn!(key, error = %e, "failed to persist setting");
            let mut st = self.shared.write().await;
            st.record_error(format!("failed to persist {key}: {e:#}"));
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
