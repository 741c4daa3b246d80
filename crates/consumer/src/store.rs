//! The narrow persistence interface the ingestion pipeline talks to, plus the
//! records that flow through it.
//!
//! The pipeline never holds a connection across calls: every operation is its
//! own unit of work, so concurrently running handlers never share a handle.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use time::OffsetDateTime;

// ---------------------------------------------------------------------------
// Records read by the pipeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Greenhouse {
    pub id: i64,
    pub name: String,
    /// Physical device address; the routing key from inbound messages.
    pub mac_address: String,
    pub user_email: String,
    pub active_preset_id: Option<i64>,
}

/// Inclusive min/max bounds for the three modelled reading types.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Preset {
    pub id: i64,
    pub name: String,
    pub min_temperature: f64,
    pub max_temperature: f64,
    pub min_air_humidity: f64,
    pub max_air_humidity: f64,
    pub min_soil_humidity: f64,
    pub max_soil_humidity: f64,
    pub hours_of_light: i64,
}

/// A user's registered push endpoint (not the greenhouse hardware).
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct PushDevice {
    pub id: i64,
    pub user_email: String,
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
}

// ---------------------------------------------------------------------------
// Records written by the pipeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct NewSensorReading {
    pub greenhouse_id: i64,
    pub reading_type: String,
    pub value: f64,
    pub unit: String,
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewActionEvent {
    pub greenhouse_id: i64,
    pub command: String,
    pub status: bool,
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub greenhouse_id: i64,
    pub content: String,
    pub timestamp: OffsetDateTime,
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

#[async_trait]
pub trait StoreGateway: Send + Sync {
    async fn find_greenhouse_by_address(&self, mac_address: &str) -> Result<Option<Greenhouse>>;

    async fn active_preset(&self, greenhouse_id: i64) -> Result<Option<Preset>>;

    async fn save_reading(&self, reading: &NewSensorReading) -> Result<i64>;

    async fn save_action(&self, event: &NewActionEvent) -> Result<i64>;

    async fn save_notification(&self, notification: &NewNotification) -> Result<i64>;

    async fn push_devices_for_user(&self, user_email: &str) -> Result<Vec<PushDevice>>;
}
