mod sim;

use anyhow::Result;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use std::{env, time::Duration};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use sim::{Climate, ClimateSim, Scenario};

const SENSOR_TOPIC: &str = "greenhouse/sensor";
const ACTION_TOPIC: &str = "greenhouse/action";
const ACTIONS: [&str; 3] = ["Watering", "Fertilization", "Lighting"];

// ---------------------------------------------------------------------------
// Wire payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SensorMessage<'a> {
    mac_address: &'a str,
    sensor_data: Vec<SensorDatum>,
}

#[derive(Debug, Serialize)]
struct SensorDatum {
    #[serde(rename = "type")]
    reading_type: &'static str,
    value: f64,
    unit: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ActionMessage<'a> {
    mac_address: &'a str,
    command: &'a str,
    status: bool,
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
}

/// Body of `greenhouse/<mac>/Configuration`, published when a preset is
/// activated. Only the soil band drives the simulated irrigation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Configuration {
    min_soil_humidity: f64,
    max_soil_humidity: f64,
}

fn sensor_message(mac: &str, c: Climate) -> SensorMessage<'_> {
    SensorMessage {
        mac_address: mac,
        sensor_data: vec![
            SensorDatum {
                reading_type: "temperature",
                value: c.temperature,
                unit: "C",
            },
            SensorDatum {
                reading_type: "air humidity",
                value: c.air_humidity,
                unit: "%",
            },
            SensorDatum {
                reading_type: "soil humidity",
                value: c.soil_humidity,
                unit: "%",
            },
        ],
    }
}

fn action_message<'a>(mac: &'a str, command: &'a str, status: bool) -> ActionMessage<'a> {
    ActionMessage {
        mac_address: mac,
        command,
        status,
        timestamp: OffsetDateTime::now_utc(),
    }
}

// ---------------------------------------------------------------------------
// Inbound commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum Command {
    Water(bool),
    SoilBand { min: f64, max: f64 },
}

/// Parse a publish on `greenhouse/<mac>/<verb>`.
fn parse_command(verb: &str, payload: &[u8]) -> Option<Command> {
    match verb {
        "Watering" => {
            let s = std::str::from_utf8(payload).ok()?.trim();
            if s.eq_ignore_ascii_case("ON") {
                Some(Command::Water(true))
            } else if s.eq_ignore_ascii_case("OFF") {
                Some(Command::Water(false))
            } else {
                None
            }
        }
        "Configuration" => {
            let cfg: Configuration = serde_json::from_slice(payload).ok()?;
            (cfg.min_soil_humidity <= cfg.max_soil_humidity).then_some(Command::SoilBand {
                min: cfg.min_soil_humidity,
                max: cfg.max_soil_humidity,
            })
        }
        _ => None,
    }
}

/// Watering decision for the latest soil reading, if it should change.
fn irrigation_toggle(band: Option<(f64, f64)>, soil: f64, watering: bool) -> Option<bool> {
    let (min, max) = band?;
    if !watering && soil < min {
        Some(true)
    } else if watering && soil > max {
        Some(false)
    } else {
        None
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "localhost".to_string());
    let port: u16 = env_or("MQTT_PORT", 1883);
    let mac = env::var("MAC_ADDRESS").unwrap_or_else(|_| "FF:9A:4C:98:6E:17".to_string());
    let scenario = Scenario::from_str_lossy(&env::var("SIM_SCENARIO").unwrap_or_default());
    let sample_every_s: u64 = env_or("SAMPLE_EVERY_S", 60);
    let action_chance: f64 = env_or("ACTION_CHANCE", 0.3);

    let client_id = format!("greenhouse-simulator-{:08x}", fastrand::u32(..));
    let mut mqttoptions = MqttOptions::new(client_id, broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(16);

    let command_filter = format!("greenhouse/{mac}/+");
    let sub_client = client.clone();
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("simulator connected to broker");
                    if let Err(e) = sub_client.try_subscribe(&command_filter, QoS::AtLeastOnce) {
                        warn!("subscribe to {command_filter} failed: {e}");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(p))) => {
                    let verb = p.topic.rsplit('/').next().unwrap_or_default();
                    match parse_command(verb, &p.payload) {
                        Some(cmd) => {
                            if cmd_tx.send(cmd).await.is_err() {
                                break;
                            }
                        }
                        None => debug!(topic = %p.topic, "ignoring command"),
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

    // One simulated day every 24 samples keeps the cycle visible in dev.
    let mut sim = ClimateSim::new(scenario, 24);
    let mut soil_band: Option<(f64, f64)> = None;
    let mut ticker = interval(Duration::from_secs(sample_every_s.max(1)));
    info!(%mac, %scenario, sample_every_s, "publishing to {SENSOR_TOPIC} and {ACTION_TOPIC}");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let climate = sim.sample();
                publish(&client, SENSOR_TOPIC, &sensor_message(&mac, climate)).await;
                debug!(?climate, "published sensor batch");

                if let Some(on) = irrigation_toggle(soil_band, climate.soil_humidity, sim.is_watering()) {
                    sim.set_watering(on);
                    publish(&client, ACTION_TOPIC, &action_message(&mac, "Watering", on)).await;
                } else if fastrand::f64() < action_chance {
                    let command = ACTIONS[fastrand::usize(..ACTIONS.len())];
                    publish(&client, ACTION_TOPIC, &action_message(&mac, command, fastrand::bool())).await;
                }
            }
            Some(cmd) = cmd_rx.recv() => {
                info!(?cmd, "command received");
                match cmd {
                    Command::Water(on) => {
                        sim.set_watering(on);
                        publish(&client, ACTION_TOPIC, &action_message(&mac, "Watering", on)).await;
                    }
                    Command::SoilBand { min, max } => soil_band = Some((min, max)),
                }
            }
            _ = &mut shutdown => {
                info!("simulator stopping");
                break;
            }
        }
    }

    client.disconnect().await?;
    Ok(())
}

async fn publish<T: Serialize>(client: &AsyncClient, topic: &str, msg: &T) {
    let payload = match serde_json::to_vec(msg) {
        Ok(p) => p,
        Err(e) => {
            warn!("failed to encode payload for {topic}: {e}");
            return;
        }
    };
    if let Err(e) = client.publish(topic, QoS::AtLeastOnce, false, payload).await {
        warn!("publish to {topic} failed: {e}");
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn climate() -> Climate {
        Climate {
            temperature: 21.5,
            air_humidity: 55.0,
            soil_humidity: 42.3,
        }
    }

    #[test]
    fn sensor_message_uses_consumer_wire_format() {
        let json = serde_json::to_value(sensor_message("FF:9A:4C:98:6E:17", climate())).unwrap();

        assert_eq!(json["macAddress"], "FF:9A:4C:98:6E:17");
        let data = json["sensorData"].as_array().unwrap();
        assert_eq!(data.len(), 3);
        assert_eq!(data[0]["type"], "temperature");
        assert_eq!(data[0]["value"], 21.5);
        assert_eq!(data[0]["unit"], "C");
        assert_eq!(data[1]["type"], "air humidity");
        assert_eq!(data[2]["type"], "soil humidity");
        assert_eq!(data[2]["value"], 42.3);
        assert_eq!(json.as_object().unwrap().len(), 2);
    }

    #[test]
    fn action_message_uses_consumer_wire_format() {
        let json = serde_json::to_value(action_message("AA:BB", "Lighting", false)).unwrap();

        assert_eq!(json["macAddress"], "AA:BB");
        assert_eq!(json["command"], "Lighting");
        assert_eq!(json["status"], false);
        let ts = json["timestamp"].as_str().unwrap();
        assert!(
            OffsetDateTime::parse(ts, &time::format_description::well_known::Rfc3339).is_ok(),
            "not rfc3339: {ts}"
        );
    }

    #[test]
    fn watering_commands_parse() {
        assert_eq!(parse_command("Watering", b"ON"), Some(Command::Water(true)));
        assert_eq!(parse_command("Watering", b" off\n"), Some(Command::Water(false)));
        assert_eq!(parse_command("Watering", b"maybe"), None);
    }

    #[test]
    fn configuration_sets_soil_band() {
        let body = br#"{"WateringMethod":1,"HoursOfLight":12,"MinSoilHumidity":30.0,"MaxSoilHumidity":60.0,"Timestamp":"2025-05-01T12:00:00Z"}"#;
        assert_eq!(
            parse_command("Configuration", body),
            Some(Command::SoilBand {
                min: 30.0,
                max: 60.0
            })
        );
    }

    #[test]
    fn inverted_configuration_band_ignored() {
        let body = br#"{"MinSoilHumidity":70.0,"MaxSoilHumidity":60.0}"#;
        assert_eq!(parse_command("Configuration", body), None);
        assert_eq!(parse_command("Configuration", b"not json"), None);
    }

    #[test]
    fn unknown_verb_ignored() {
        assert_eq!(parse_command("Reboot", b"ON"), None);
    }

    #[test]
    fn irrigation_follows_soil_band() {
        let band = Some((30.0, 60.0));
        assert_eq!(irrigation_toggle(band, 25.0, false), Some(true));
        assert_eq!(irrigation_toggle(band, 45.0, true), None);
        assert_eq!(irrigation_toggle(band, 65.0, true), Some(false));
        assert_eq!(irrigation_toggle(band, 45.0, false), None);
        assert_eq!(irrigation_toggle(None, 5.0, false), None);
    }
}
