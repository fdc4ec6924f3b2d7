//! Settings persistence. Only user-written tunables are stored; control
//! timers and debounce state always start fresh.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::settings::Settings;

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

impl Db {
    /// db_url examples:
    /// - "sqlite:/home/pi/growtent/growtent.db"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        // Every connection to ":memory:" is its own database.
        let max = if db_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    // ----------------------------
    // Settings
    // ----------------------------

    pub async fn save_setting(&self, key: &str, value: &str) -> Result<()> {
        let now = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .context("failed to format timestamp")?;
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
              value=excluded.value,
              updated_at=excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("save_setting failed for '{key}'"))?;
        Ok(())
    }

    pub async fn stored_settings(&self) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query("SELECT key, value FROM settings ORDER BY key")
            .fetch_all(&self.pool)
            .await
            .context("stored_settings failed")?;

        rows.iter()
            .map(|r| {
                let key: String = r.try_get("key")?;
                let value: String = r.try_get("value")?;
                Ok((key, value))
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .context("stored_settings: bad row")
    }

    /// Layer stored values over `defaults`. A stored value that no longer
    /// parses is logged and the default kept; so are min/max pairs that end
    /// up inverted.
    pub async fn load_settings(&self, defaults: &Settings) -> Result<Settings> {
        let mut settings = defaults.clone();
        let stored = self.stored_settings().await?;

        for (key, value) in &stored {
            if let Err(e) = settings.apply(key, value) {
                tracing::warn!(key = %key, value = %value, error = %e, "ignoring stored setting");
            }
        }

        let problems = settings.validate();
        if !problems.is_empty() {
            tracing::warn!(problems = ?problems, "stored limits inconsistent, using configured limits");
            settings.min_temp_c = defaults.min_temp_c;
            settings.max_temp_c = defaults.max_temp_c;
            settings.min_rh = defaults.min_rh;
            settings.max_rh = defaults.max_rh;
        }

        tracing::info!(stored = stored.len(), "settings loaded");
        Ok(settings)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{Actuator, ManualMode, Stage};

    async fn memory_db() -> Db {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    // -- save / read back ---------------------------------------------------

    #[tokio::test]
    async fn save_setting_upserts() {
        let db = memory_db().await;
        db.save_setting("vpd_target_kpa", "1.1").await.unwrap();
        db.save_setting("vpd_target_kpa", "1.3").await.unwrap();
        db.save_setting("heater_mode", "Off").await.unwrap();

        let stored = db.stored_settings().await.unwrap();
        assert_eq!(
            stored,
            vec![
                ("heater_mode".to_string(), "Off".to_string()),
                ("vpd_target_kpa".to_string(), "1.3".to_string()),
            ]
        );
    }

    // -- load_settings --------------------------------------------------------

    #[tokio::test]
    async fn empty_store_returns_defaults() {
        let db = memory_db().await;
        let defaults = Settings::default();
        assert_eq!(db.load_settings(&defaults).await.unwrap(), defaults);
    }

    #[tokio::test]
    async fn stored_values_override_defaults() {
        let db = memory_db().await;
        db.save_setting("stage", "Late Flower").await.unwrap();
        db.save_setting("exhaust_mode", "On").await.unwrap();
        db.save_setting("light_off", "20:30").await.unwrap();

        let s = db.load_settings(&Settings::default()).await.unwrap();
        assert_eq!(s.stage, Stage::LateFlower);
        assert_eq!(s.mode(Actuator::Exhaust), ManualMode::On);
        assert_eq!(s.light_off, time::macros::time!(20:30));
    }

    #[tokio::test]
    async fn malformed_values_fall_back_to_defaults() {
        let db = memory_db().await;
        let mut defaults = Settings::default();
        defaults.max_rh = 65.0;
        db.save_setting("max_rh", "lots").await.unwrap();
        db.save_setting("light_on", "noon").await.unwrap();
        db.save_setting("retired_key", "1").await.unwrap();
        db.save_setting("min_temp_c", "22").await.unwrap();

        let s = db.load_settings(&defaults).await.unwrap();
        assert_eq!(s.max_rh, 65.0);
        assert_eq!(s.light_on, defaults.light_on);
        assert_eq!(s.min_temp_c, 22.0);
    }

    #[tokio::test]
    async fn inverted_limits_revert_to_configured() {
        let db = memory_db().await;
        db.save_setting("min_temp_c", "32").await.unwrap();
        db.save_setting("max_temp_c", "25").await.unwrap();

        let s = db.load_settings(&Settings::default()).await.unwrap();
        assert_eq!(s.min_temp_c, 20.0);
        assert_eq!(s.max_temp_c, 30.0);
    }

    #[tokio::test]
    async fn every_entry_survives_a_roundtrip() {
        let db = memory_db().await;
        let mut s = Settings::default();
        s.stage = Stage::Drying;
        s.heater_max_run_s = 300.0;
        s.set_mode(Actuator::Light, ManualMode::Off);
        for (k, v) in s.entries() {
            db.save_setting(&k, &v).await.unwrap();
        }
        assert_eq!(db.load_settings(&Settings::default()).await.unwrap(), s);
    }
}
