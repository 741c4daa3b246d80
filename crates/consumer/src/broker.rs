//! MQTT connection manager: owns the rumqttc event loop, (re)subscribes on
//! every CONNACK, hands each publish to the [`Pipeline`] on its own task, and
//! applies the reconnect policy after connection errors.

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, SubscribeReasonCode};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::handlers::Pipeline;
use crate::messages::Topics;
use crate::state::SharedState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        })
    }
}

/// Fixed-delay retry. `max_attempts: None` retries forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Whether another attempt is allowed after `failures` consecutive
    /// connection errors.
    pub fn allows(&self, failures: u32) -> bool {
        match self.max_attempts {
            Some(max) => failures <= max,
            None => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id_prefix: String,
    pub keep_alive: Duration,
    pub topics: Topics,
    pub reconnect: ReconnectPolicy,
    pub channel_capacity: usize,
}

/// How [`BrokerConnection::run`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The reconnect policy ran out of attempts.
    GaveUp { failures: u32 },
}

pub struct BrokerConnection {
    client: AsyncClient,
    eventloop: rumqttc::EventLoop,
    client_id: String,
    topics: Topics,
    reconnect: ReconnectPolicy,
    pipeline: Arc<Pipeline>,
    shared: SharedState,
}

fn new_client_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4())
}

impl BrokerConnection {
    pub fn new(settings: BrokerSettings, pipeline: Arc<Pipeline>, shared: SharedState) -> Self {
        let client_id = new_client_id(&settings.client_id_prefix);
        let mut options = MqttOptions::new(&client_id, &settings.host, settings.port);
        options.set_keep_alive(settings.keep_alive);
        options.set_clean_session(true);
        if let (Some(user), Some(pass)) = (&settings.username, &settings.password) {
            options.set_credentials(user, pass);
        }

        let (client, eventloop) = AsyncClient::new(options, settings.channel_capacity);

        Self {
            client,
            eventloop,
            client_id,
            topics: settings.topics,
            reconnect: settings.reconnect,
            pipeline,
            shared,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Drive the event loop until the reconnect policy gives up. Without a
    /// `max_attempts` this only returns when the future is dropped.
    pub async fn run(mut self) -> RunOutcome {
        let mut failures: u32 = 0;
        self.shared
            .write()
            .await
            .set_connection(ConnectionState::Connecting);
        info!(client_id = %self.client_id, "connecting to broker");

        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    failures = 0;
                    info!("broker connected");
                    self.shared
                        .write()
                        .await
                        .set_connection(ConnectionState::Connected);
                    self.subscribe_to_topics();
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    for code in &ack.return_codes {
                        if matches!(code, SubscribeReasonCode::Failure) {
                            error!(pkid = ack.pkid, "broker rejected subscription");
                            self.shared
                                .write()
                                .await
                                .record_system(format!("subscription {} rejected", ack.pkid));
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Publish(p))) => {
                    let pipeline = Arc::clone(&self.pipeline);
                    tokio::spawn(async move {
                        pipeline.handle(&p.topic, &p.payload).await;
                    });
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("broker sent disconnect");
                    self.shared
                        .write()
                        .await
                        .set_connection(ConnectionState::Disconnected);
                }
                Ok(_) => {}
                Err(e) => {
                    failures += 1;
                    warn!(failures, "broker connection error: {e}");
                    self.shared
                        .write()
                        .await
                        .set_connection(ConnectionState::Disconnected);

                    if !self.reconnect.allows(failures) {
                        error!(failures, "reconnection failed, giving up");
                        self.shared
                            .write()
                            .await
                            .record_system(format!("gave up after {failures} failed attempt(s)"));
                        return RunOutcome::GaveUp { failures };
                    }

                    sleep(self.reconnect.delay).await;
                    debug!(failures, "reconnecting");
                    self.shared
                        .write()
                        .await
                        .set_connection(ConnectionState::Connecting);
                }
            }
        }
    }

    /// One request per topic so a failure on one does not block the other.
    fn subscribe_to_topics(&self) {
        for topic in self.topics.all() {
            match self.client.try_subscribe(topic, QoS::AtLeastOnce) {
                Ok(()) => info!(%topic, "subscribed"),
                Err(e) => error!(%topic, "subscribe failed: {e}"),
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
