use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use time::OffsetDateTime;

use crate::store::{
    Greenhouse, NewActionEvent, NewNotification, NewSensorReading, Preset, PushDevice,
    StoreGateway,
};

/// SQLite-backed store. Cloning is cheap; every query checks a connection out
/// of the pool for the duration of that single statement.
#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StoredReading {
    pub id: i64,
    pub greenhouse_id: i64,
    pub reading_type: String,
    pub value: f64,
    pub unit: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StoredAction {
    pub id: i64,
    pub greenhouse_id: i64,
    pub command: String,
    pub status: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StoredNotification {
    pub id: i64,
    pub greenhouse_id: i64,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

const DEFAULT_HISTORY_LIMIT: u32 = 100;
const MAX_HISTORY_LIMIT: u32 = 1000;

/// Time window and row cap for history queries. Bounds are inclusive.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryWindow {
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub start: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub end: Option<OffsetDateTime>,
    #[serde(default = "default_history_limit")]
    pub limit: u32,
}

fn default_history_limit() -> u32 {
    DEFAULT_HISTORY_LIMIT
}

impl Default for HistoryWindow {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl HistoryWindow {
    fn capped_limit(&self) -> i64 {
        i64::from(self.limit.clamp(1, MAX_HISTORY_LIMIT))
    }
}

fn is_in_memory(db_url: &str) -> bool {
    db_url.contains(":memory:") || db_url.contains("mode=memory")
}

impl Db {
    /// db_url examples:
    /// - "sqlite:/var/lib/greenhouse/greenhouse.db?mode=rwc"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        // Each in-memory connection is its own database, so the pool must
        // hold exactly one and never recycle it.
        let pool_options = if is_in_memory(db_url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections)
        };

        let pool = pool_options
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
    // Seeding (stands in for the record-management API)
    // ----------------------------

    pub async fn upsert_preset(&self, p: &Preset) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO presets (
              id, name,
              min_temperature, max_temperature,
              min_air_humidity, max_air_humidity,
              min_soil_humidity, max_soil_humidity,
              hours_of_light
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
              name=excluded.name,
              min_temperature=excluded.min_temperature,
              max_temperature=excluded.max_temperature,
              min_air_humidity=excluded.min_air_humidity,
              max_air_humidity=excluded.max_air_humidity,
              min_soil_humidity=excluded.min_soil_humidity,
              max_soil_humidity=excluded.max_soil_humidity,
              hours_of_light=excluded.hours_of_light
            "#,
        )
        .bind(p.id)
        .bind(&p.name)
        .bind(p.min_temperature)
        .bind(p.max_temperature)
        .bind(p.min_air_humidity)
        .bind(p.max_air_humidity)
        .bind(p.min_soil_humidity)
        .bind(p.max_soil_humidity)
        .bind(p.hours_of_light)
        .execute(&self.pool)
        .await
        .context("upsert_preset failed")?;
        Ok(())
    }

    async fn ensure_user(&self, email: &str) -> Result<()> {
        sqlx::query("INSERT INTO users (email) VALUES (?) ON CONFLICT(email) DO NOTHING")
            .bind(email)
            .execute(&self.pool)
            .await
            .context("ensure_user failed")?;
        Ok(())
    }

    pub async fn upsert_greenhouse(&self, g: &Greenhouse) -> Result<()> {
        self.ensure_user(&g.user_email).await?;
        sqlx::query(
            r#"
            INSERT INTO greenhouses (id, name, mac_address, user_email, active_preset_id)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
              name=excluded.name,
              mac_address=excluded.mac_address,
              user_email=excluded.user_email,
              active_preset_id=excluded.active_preset_id
            "#,
        )
        .bind(g.id)
        .bind(&g.name)
        .bind(&g.mac_address)
        .bind(&g.user_email)
        .bind(g.active_preset_id)
        .execute(&self.pool)
        .await
        .context("upsert_greenhouse failed")?;
        Ok(())
    }

    /// Registers a push endpoint; re-registering the same endpoint refreshes
    /// its keys and owner.
    pub async fn upsert_push_device(
        &self,
        user_email: &str,
        endpoint: &str,
        p256dh: &str,
        auth: &str,
    ) -> Result<()> {
        self.ensure_user(user_email).await?;
        sqlx::query(
            r#"
            INSERT INTO devices (user_email, endpoint, p256dh, auth)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(endpoint) DO UPDATE SET
              user_email=excluded.user_email,
              p256dh=excluded.p256dh,
              auth=excluded.auth
            "#,
        )
        .bind(user_email)
        .bind(endpoint)
        .bind(p256dh)
        .bind(auth)
        .execute(&self.pool)
        .await
        .context("upsert_push_device failed")?;
        Ok(())
    }

    // ----------------------------
    // History (newest first, bounded by a HistoryWindow)
    // ----------------------------

    pub async fn readings_for_greenhouse(
        &self,
        greenhouse_id: i64,
        window: &HistoryWindow,
    ) -> Result<Vec<StoredReading>> {
        sqlx::query_as::<_, StoredReading>(
            r#"
            SELECT id, greenhouse_id, reading_type, value, unit, timestamp
            FROM sensor_readings
            WHERE greenhouse_id = ?1
              AND (?2 IS NULL OR julianday(timestamp) >= julianday(?2))
              AND (?3 IS NULL OR julianday(timestamp) <= julianday(?3))
            ORDER BY id DESC
            LIMIT ?4
            "#,
        )
        .bind(greenhouse_id)
        .bind(window.start)
        .bind(window.end)
        .bind(window.capped_limit())
        .fetch_all(&self.pool)
        .await
        .context("readings_for_greenhouse failed")
    }

    pub async fn actions_for_greenhouse(
        &self,
        greenhouse_id: i64,
        window: &HistoryWindow,
    ) -> Result<Vec<StoredAction>> {
        sqlx::query_as::<_, StoredAction>(
            r#"
            SELECT id, greenhouse_id, command, status, timestamp
            FROM actions
            WHERE greenhouse_id = ?1
              AND (?2 IS NULL OR julianday(timestamp) >= julianday(?2))
              AND (?3 IS NULL OR julianday(timestamp) <= julianday(?3))
            ORDER BY id DESC
            LIMIT ?4
            "#,
        )
        .bind(greenhouse_id)
        .bind(window.start)
        .bind(window.end)
        .bind(window.capped_limit())
        .fetch_all(&self.pool)
        .await
        .context("actions_for_greenhouse failed")
    }

    pub async fn notifications_for_greenhouse(
        &self,
        greenhouse_id: i64,
        window: &HistoryWindow,
    ) -> Result<Vec<StoredNotification>> {
        sqlx::query_as::<_, StoredNotification>(
            r#"
            SELECT id, greenhouse_id, content, timestamp
            FROM notifications
            WHERE greenhouse_id = ?1
              AND (?2 IS NULL OR julianday(timestamp) >= julianday(?2))
              AND (?3 IS NULL OR julianday(timestamp) <= julianday(?3))
            ORDER BY id DESC
            LIMIT ?4
            "#,
        )
        .bind(greenhouse_id)
        .bind(window.start)
        .bind(window.end)
        .bind(window.capped_limit())
        .fetch_all(&self.pool)
        .await
        .context("notifications_for_greenhouse failed")
    }

    /// Total row counts, used by the startup banner.
    pub async fn counts(&self) -> Result<(i64, i64)> {
        let greenhouses: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM greenhouses")
            .fetch_one(&self.pool)
            .await
            .context("count greenhouses failed")?;
        let presets: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM presets")
            .fetch_one(&self.pool)
            .await
            .context("count presets failed")?;
        Ok((greenhouses, presets))
    }
}

#[async_trait]
impl StoreGateway for Db {
    async fn find_greenhouse_by_address(&self, mac_address: &str) -> Result<Option<Greenhouse>> {
        sqlx::query_as::<_, Greenhouse>(
            r#"
            SELECT id, name, mac_address, user_email, active_preset_id
            FROM greenhouses
            WHERE mac_address = ?
            "#,
        )
        .bind(mac_address)
        .fetch_optional(&self.pool)
        .await
        .context("find_greenhouse_by_address failed")
    }

    async fn active_preset(&self, greenhouse_id: i64) -> Result<Option<Preset>> {
        sqlx::query_as::<_, Preset>(
            r#"
            SELECT p.id, p.name,
                   p.min_temperature, p.max_temperature,
                   p.min_air_humidity, p.max_air_humidity,
                   p.min_soil_humidity, p.max_soil_humidity,
                   p.hours_of_light
            FROM greenhouses g
            JOIN presets p ON p.id = g.active_preset_id
            WHERE g.id = ?
            "#,
        )
        .bind(greenhouse_id)
        .fetch_optional(&self.pool)
        .await
        .context("active_preset failed")
    }

    async fn save_reading(&self, r: &NewSensorReading) -> Result<i64> {
        let done = sqlx::query(
            r#"
            INSERT INTO sensor_readings (greenhouse_id, reading_type, value, unit, timestamp)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(r.greenhouse_id)
        .bind(&r.reading_type)
        .bind(r.value)
        .bind(&r.unit)
        .bind(r.timestamp)
        .execute(&self.pool)
        .await
        .context("save_reading failed")?;
        Ok(done.last_insert_rowid())
    }

    async fn save_action(&self, e: &NewActionEvent) -> Result<i64> {
        let done = sqlx::query(
            r#"
            INSERT INTO actions (greenhouse_id, command, status, timestamp)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(e.greenhouse_id)
        .bind(&e.command)
        .bind(e.status)
        .bind(e.timestamp)
        .execute(&self.pool)
        .await
        .context("save_action failed")?;
        Ok(done.last_insert_rowid())
    }

    async fn save_notification(&self, n: &NewNotification) -> Result<i64> {
        let done = sqlx::query(
            r#"
            INSERT INTO notifications (greenhouse_id, content, timestamp)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(n.greenhouse_id)
        .bind(&n.content)
        .bind(n.timestamp)
        .execute(&self.pool)
        .await
        .context("save_notification failed")?;
        Ok(done.last_insert_rowid())
    }

    async fn push_devices_for_user(&self, user_email: &str) -> Result<Vec<PushDevice>> {
        sqlx::query_as::<_, PushDevice>(
            r#"
            SELECT id, user_email, endpoint, p256dh, auth
            FROM devices
            WHERE user_email = ?
            ORDER BY id
            "#,
        )
        .bind(user_email)
        .fetch_all(&self.pool)
        .await
        .context("push_devices_for_user failed")
    }
}

// ===========================================================================
// Tests
// ===========================================================================
