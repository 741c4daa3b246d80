//! Per-topic message handling: parse, resolve the greenhouse, persist, and for
//! sensor readings validate against the active preset and alert.
//!
//! [`Pipeline::handle`] is the boundary the broker loop calls. It never fails:
//! every error is logged, counted in [`SharedState`], and the message dropped.

use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use crate::alert::{AlertDispatcher, DispatchReport};
use crate::messages::{parse_action_message, parse_sensor_message, PayloadError, Route, Topics};
use crate::state::{DropReason, SharedState};
use crate::store::{Greenhouse, NewActionEvent, NewSensorReading, StoreGateway};
use crate::validator::is_out_of_range;

#[derive(Debug, thiserror::Error)]
pub(crate) enum HandleError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] PayloadError),
    #[error("no greenhouse registered for address {0}")]
    UnknownDevice(String),
    #[error("no handler for topic {0}")]
    UnknownTopic(String),
    #[error("store error: {0:#}")]
    Store(anyhow::Error),
}

/// Result of one sensor batch.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub persisted: usize,
    pub failed: usize,
    pub alerts: Vec<DispatchReport>,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Handled {
    Sensor { mac: String, outcome: BatchOutcome },
    Action { mac: String, command: String, status: bool },
    Ignored,
}

pub struct Pipeline {
    store: Arc<dyn StoreGateway>,
    dispatcher: AlertDispatcher,
    topics: Topics,
    shared: SharedState,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn StoreGateway>,
        dispatcher: AlertDispatcher,
        topics: Topics,
        shared: SharedState,
    ) -> Self {
        Self {
            store,
            dispatcher,
            topics,
            shared,
        }
    }

    /// Handle one inbound publish to completion. Infallible by contract.
    pub async fn handle(&self, topic: &str, payload: &[u8]) {
        let result = self.route(topic, payload).await;
        let mut st = self.shared.write().await;
        match result {
            Ok(Handled::Sensor { mac, outcome }) => {
                st.record_batch(&mac, outcome.persisted, outcome.failed, &outcome.alerts);
            }
            Ok(Handled::Action {
                mac,
                command,
                status,
            }) => {
                st.record_action(&mac, &command, status);
            }
            Ok(Handled::Ignored) => {}
            Err(HandleError::Malformed(e)) => {
                warn!(%topic, "discarding malformed message: {e}");
                st.record_drop(DropReason::Malformed, format!("malformed on {topic}: {e}"));
            }
            Err(HandleError::UnknownDevice(mac)) => {
                info!(%topic, %mac, "discarding message from unregistered device");
                st.record_drop(DropReason::UnknownDevice, format!("unknown device {mac}"));
            }
            Err(HandleError::UnknownTopic(t)) => {
                warn!(topic = %t, "discarding message on unhandled topic");
                st.record_drop(DropReason::UnknownTopic, format!("unhandled topic {t}"));
            }
            Err(e @ HandleError::Store(_)) => {
                error!(%topic, "message lost: {e}");
                st.record_store_error(format!("{topic}: {e}"));
            }
        }
    }

    pub(crate) async fn route(&self, topic: &str, payload: &[u8]) -> Result<Handled, HandleError> {
        match Route::classify(topic, &self.topics) {
            Route::Sensor => self.handle_sensor(payload).await,
            Route::Action => self.handle_action(payload).await,
            Route::DeviceCommand { mac, verb } => {
                debug!(%mac, %verb, "ignoring outbound device command");
                Ok(Handled::Ignored)
            }
            Route::Unknown => Err(HandleError::UnknownTopic(topic.to_string())),
        }
    }

    async fn resolve(&self, mac: &str) -> Result<Greenhouse, HandleError> {
        self.store
            .find_greenhouse_by_address(mac)
            .await
            .map_err(HandleError::Store)?
            .ok_or_else(|| HandleError::UnknownDevice(mac.to_string()))
    }

    /// Readings are persisted and validated one at a time, in batch order. A
    /// reading whose write fails is skipped; the rest of the batch continues.
    pub(crate) async fn handle_sensor(&self, payload: &[u8]) -> Result<Handled, HandleError> {
        let msg = parse_sensor_message(payload)?;
        let greenhouse = self.resolve(&msg.mac_address).await?;
        let mut outcome = BatchOutcome::default();

        for datum in msg.sensor_data {
            let reading = NewSensorReading {
                greenhouse_id: greenhouse.id,
                reading_type: datum.reading_type,
                value: datum.value,
                unit: datum.unit,
                timestamp: OffsetDateTime::now_utc(),
            };

            if let Err(e) = self.store.save_reading(&reading).await {
                error!(
                    greenhouse_id = greenhouse.id,
                    reading_type = %reading.reading_type,
                    "save_reading failed, skipping reading: {e:#}"
                );
                outcome.failed += 1;
                continue;
            }
            outcome.persisted += 1;

            if let Some(report) = self.validate(&greenhouse, &reading).await {
                outcome.alerts.push(report);
            }
        }

        debug!(
            mac = %msg.mac_address,
            persisted = outcome.persisted,
            failed = outcome.failed,
            alerts = outcome.alerts.len(),
            "sensor batch handled"
        );

        Ok(Handled::Sensor {
            mac: msg.mac_address,
            outcome,
        })
    }

    /// Check a stored reading against the greenhouse's current preset and
    /// dispatch an alert when it is out of range.
    async fn validate(
        &self,
        greenhouse: &Greenhouse,
        reading: &NewSensorReading,
    ) -> Option<DispatchReport> {
        let preset = match self.store.active_preset(greenhouse.id).await {
            Ok(Some(p)) => p,
            Ok(None) => {
                debug!(greenhouse_id = greenhouse.id, "no active preset, skipping validation");
                return None;
            }
            Err(e) => {
                error!(greenhouse_id = greenhouse.id, "active_preset failed: {e:#}");
                return None;
            }
        };

        if !is_out_of_range(&reading.reading_type, reading.value, &preset) {
            return None;
        }
        Some(self.dispatcher.dispatch(greenhouse, reading).await)
    }

    pub(crate) async fn handle_action(&self, payload: &[u8]) -> Result<Handled, HandleError> {
        let msg = parse_action_message(payload)?;
        let greenhouse = self.resolve(&msg.mac_address).await?;

        self.store
            .save_action(&NewActionEvent {
                greenhouse_id: greenhouse.id,
                command: msg.command.clone(),
                status: msg.status,
                timestamp: msg.timestamp,
            })
            .await
            .map_err(HandleError::Store)?;

        Ok(Handled::Action {
            mac: msg.mac_address,
            command: msg.command,
            status: msg.status,
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================
