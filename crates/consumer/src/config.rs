//! TOML config loading, environment overrides, validation, and database
//! seeding for presets, greenhouses and push devices.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::broker::{BrokerSettings, ReconnectPolicy};
use crate::db::Db;
use crate::messages::Topics;
use crate::push::PushSettings;
use crate::store::{Greenhouse, Preset};

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mqtt: MqttSection,
    pub database: DatabaseSection,
    pub push: PushSection,
    pub web: WebSection,
    pub presets: Vec<PresetEntry>,
    pub greenhouses: Vec<GreenhouseEntry>,
    pub devices: Vec<DeviceEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttSection {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id_prefix: String,
    pub keep_alive_secs: u64,
    pub reconnect_delay_secs: u64,
    pub reconnect_max_attempts: Option<u32>,
    pub sensor_topic: String,
    pub action_topic: String,
    pub channel_capacity: usize,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 1883,
            username: None,
            password: None,
            client_id_prefix: "DataConsumer".into(),
            keep_alive_secs: 30,
            reconnect_delay_secs: 5,
            reconnect_max_attempts: None,
            sensor_topic: "greenhouse/sensor".into(),
            action_topic: "greenhouse/action".into(),
            channel_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: "sqlite:greenhouse.db?mode=rwc".into(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PushSection {
    pub subject: String,
    pub vapid_public_key: String,
    pub vapid_private_key: String,
    pub relay_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for PushSection {
    fn default() -> Self {
        Self {
            subject: "mailto:admin@localhost".into(),
            vapid_public_key: String::new(),
            vapid_private_key: String::new(),
            relay_url: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSection {
    pub enabled: bool,
    pub port: u16,
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PresetEntry {
    pub id: i64,
    pub name: String,
    pub min_temperature: f64,
    pub max_temperature: f64,
    pub min_air_humidity: f64,
    pub max_air_humidity: f64,
    pub min_soil_humidity: f64,
    pub max_soil_humidity: f64,
    #[serde(default)]
    pub hours_of_light: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GreenhouseEntry {
    pub id: i64,
    pub name: String,
    pub mac_address: String,
    pub user_email: String,
    pub active_preset: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceEntry {
    pub user_email: String,
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
}

// ---------------------------------------------------------------------------
// Environment overrides
// ---------------------------------------------------------------------------

impl Config {
    /// Apply overrides from `lookup` (normally `std::env::var`). Numeric
    /// values that fail to parse are errors, not silently ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MQTT_HOST") {
            self.mqtt.host = v;
        }
        if let Some(v) = lookup("MQTT_PORT") {
            self.mqtt.port = v
                .parse()
                .with_context(|| format!("MQTT_PORT is not a valid port: {v:?}"))?;
        }
        if let Some(v) = lookup("MQTT_USERNAME") {
            self.mqtt.username = Some(v);
        }
        if let Some(v) = lookup("MQTT_PASSWORD") {
            self.mqtt.password = Some(v);
        }
        if let Some(v) = lookup("DB_URL") {
            self.database.url = v;
        }
        if let Some(v) = lookup("VAPID_SUBJECT") {
            self.push.subject = v;
        }
        if let Some(v) = lookup("VAPID_PUBLIC_KEY") {
            self.push.vapid_public_key = v;
        }
        if let Some(v) = lookup("VAPID_PRIVATE_KEY") {
            self.push.vapid_private_key = v;
        }
        if let Some(v) = lookup("PUSH_RELAY_URL") {
            self.push.relay_url = Some(v);
        }
        if let Some(v) = lookup("WEB_PORT") {
            self.web.port = v
                .parse()
                .with_context(|| format!("WEB_PORT is not a valid port: {v:?}"))?;
        }
        Ok(())
    }

    pub fn topics(&self) -> Topics {
        Topics {
            sensor: self.mqtt.sensor_topic.clone(),
            action: self.mqtt.action_topic.clone(),
        }
    }

    pub fn broker_settings(&self) -> BrokerSettings {
        BrokerSettings {
            host: self.mqtt.host.clone(),
            port: self.mqtt.port,
            username: self.mqtt.username.clone(),
            password: self.mqtt.password.clone(),
            client_id_prefix: self.mqtt.client_id_prefix.clone(),
            keep_alive: Duration::from_secs(self.mqtt.keep_alive_secs),
            topics: self.topics(),
            reconnect: ReconnectPolicy {
                delay: Duration::from_secs(self.mqtt.reconnect_delay_secs),
                max_attempts: self.mqtt.reconnect_max_attempts,
            },
            channel_capacity: self.mqtt.channel_capacity,
        }
    }

    pub fn push_settings(&self) -> PushSettings {
        PushSettings {
            subject: self.push.subject.clone(),
            vapid_public_key: self.push.vapid_public_key.clone(),
            vapid_private_key: self.push.vapid_private_key.clone(),
            relay_url: self.push.relay_url.clone(),
            timeout: Duration::from_secs(self.push.timeout_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate everything. Returns `Ok(())` or an error describing every
    /// violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_mqtt(&mut errors);
        self.validate_services(&mut errors);
        self.validate_presets(&mut errors);
        self.validate_greenhouses(&mut errors);
        self.validate_devices(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_mqtt(&self, errors: &mut Vec<String>) {
        let m = &self.mqtt;

        if m.host.trim().is_empty() {
            errors.push("mqtt: host is empty".into());
        }
        if m.port == 0 {
            errors.push("mqtt: port must be non-zero".into());
        }
        if m.client_id_prefix.trim().is_empty() {
            errors.push("mqtt: client_id_prefix is empty".into());
        }
        if m.channel_capacity == 0 {
            errors.push("mqtt: channel_capacity must be positive".into());
        }
        if m.reconnect_max_attempts == Some(0) {
            errors.push("mqtt: reconnect_max_attempts must be at least 1 when set".into());
        }
        if m.username.is_some() != m.password.is_some() {
            errors.push("mqtt: username and password must be set together".into());
        }

        // ── Topics ──────────────────────────────────────────
        for (key, topic) in [("sensor_topic", &m.sensor_topic), ("action_topic", &m.action_topic)] {
            if topic.trim().is_empty() {
                errors.push(format!("mqtt: {key} is empty"));
            } else if topic.contains('+') || topic.contains('#') {
                errors.push(format!("mqtt: {key} '{topic}' must not contain wildcards"));
            }
        }
        if !m.sensor_topic.is_empty() && m.sensor_topic == m.action_topic {
            errors.push(format!(
                "mqtt: sensor_topic and action_topic are both '{}'",
                m.sensor_topic
            ));
        }
    }

    fn validate_services(&self, errors: &mut Vec<String>) {
        if self.database.url.trim().is_empty() {
            errors.push("database: url is empty".into());
        }
        if self.database.max_connections == 0 {
            errors.push("database: max_connections must be at least 1".into());
        }
        if self.push.timeout_secs == 0 {
            errors.push("push: timeout_secs must be positive".into());
        }
        if let Some(url) = &self.push.relay_url {
            if url.trim().is_empty() {
                errors.push("push: relay_url is empty".into());
            }
            if self.push.vapid_public_key.trim().is_empty()
                || self.push.vapid_private_key.trim().is_empty()
            {
                errors.push("push: relay_url requires vapid_public_key and vapid_private_key".into());
            }
        }
        if self.web.enabled && self.web.port == 0 {
            errors.push("web: port must be non-zero".into());
        }
    }

    fn validate_presets(&self, errors: &mut Vec<String>) {
        let mut seen_ids: HashSet<i64> = HashSet::new();

        for p in &self.presets {
            let ctx = format!("preset {}", p.id);

            if !seen_ids.insert(p.id) {
                errors.push(format!("{ctx}: duplicate id"));
            }
            if p.name.trim().is_empty() {
                errors.push(format!("{ctx}: name is empty"));
            }

            for (what, min, max) in [
                ("temperature", p.min_temperature, p.max_temperature),
                ("air_humidity", p.min_air_humidity, p.max_air_humidity),
                ("soil_humidity", p.min_soil_humidity, p.max_soil_humidity),
            ] {
                if min > max {
                    errors.push(format!("{ctx}: min_{what} ({min}) exceeds max_{what} ({max})"));
                }
            }

            if !(0..=24).contains(&p.hours_of_light) {
                errors.push(format!(
                    "{ctx}: hours_of_light {} out of range [0, 24]",
                    p.hours_of_light
                ));
            }
        }
    }

    fn validate_greenhouses(&self, errors: &mut Vec<String>) {
        let preset_ids: HashSet<i64> = self.presets.iter().map(|p| p.id).collect();
        let mut seen_ids: HashSet<i64> = HashSet::new();
        let mut seen_macs: HashSet<&str> = HashSet::new();

        for g in &self.greenhouses {
            let ctx = format!("greenhouse {}", g.id);

            if !seen_ids.insert(g.id) {
                errors.push(format!("{ctx}: duplicate id"));
            }
            if g.name.trim().is_empty() {
                errors.push(format!("{ctx}: name is empty"));
            }
            if g.user_email.trim().is_empty() {
                errors.push(format!("{ctx}: user_email is empty"));
            }
            if g.mac_address.trim().is_empty() {
                errors.push(format!("{ctx}: mac_address is empty"));
            } else if !seen_macs.insert(&g.mac_address) {
                errors.push(format!("{ctx}: mac_address '{}' already in use", g.mac_address));
            }
            if let Some(pid) = g.active_preset {
                if !preset_ids.contains(&pid) {
                    errors.push(format!(
                        "{ctx}: active_preset {pid} does not match any defined preset"
                    ));
                }
            }
        }
    }

    fn validate_devices(&self, errors: &mut Vec<String>) {
        let mut seen: HashSet<&str> = HashSet::new();

        for (i, d) in self.devices.iter().enumerate() {
            let ctx = format!("devices[{i}]");

            if d.user_email.trim().is_empty() {
                errors.push(format!("{ctx}: user_email is empty"));
            }
            if d.endpoint.trim().is_empty() {
                errors.push(format!("{ctx}: endpoint is empty"));
            } else if !seen.insert(&d.endpoint) {
                errors.push(format!("{ctx}: duplicate endpoint"));
            }
            if d.p256dh.trim().is_empty() || d.auth.trim().is_empty() {
                errors.push(format!("{ctx}: p256dh and auth keys are required"));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load + apply
// ---------------------------------------------------------------------------

/// Read and parse a TOML config file. A missing file yields the defaults.
/// Validation is left to the caller so env overrides can be applied first.
pub fn load(path: &str) -> Result<Config> {
    if !Path::new(path).exists() {
        warn!(%path, "config file not found, using defaults");
        return Ok(Config::default());
    }
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))
}

/// Upsert every seed preset, greenhouse and push device into the database.
pub async fn apply(config: &Config, db: &Db) -> Result<()> {
    for p in &config.presets {
        db.upsert_preset(&Preset {
            id: p.id,
            name: p.name.clone(),
            min_temperature: p.min_temperature,
            max_temperature: p.max_temperature,
            min_air_humidity: p.min_air_humidity,
            max_air_humidity: p.max_air_humidity,
            min_soil_humidity: p.min_soil_humidity,
            max_soil_humidity: p.max_soil_humidity,
            hours_of_light: p.hours_of_light,
        })
        .await
        .with_context(|| format!("failed to upsert preset {}", p.id))?;
    }

    for g in &config.greenhouses {
        db.upsert_greenhouse(&Greenhouse {
            id: g.id,
            name: g.name.clone(),
            mac_address: g.mac_address.clone(),
            user_email: g.user_email.clone(),
            active_preset_id: g.active_preset,
        })
        .await
        .with_context(|| format!("failed to upsert greenhouse {}", g.id))?;
    }

    for d in &config.devices {
        db.upsert_push_device(&d.user_email, &d.endpoint, &d.p256dh, &d.auth)
            .await
            .with_context(|| format!("failed to upsert push device {}", d.endpoint))?;
    }

    info!(
        presets = config.presets.len(),
        greenhouses = config.greenhouses.len(),
        devices = config.devices.len(),
        "seed data applied"
    );

    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
