//! Turns an out-of-range reading into a durable notification record plus a
//! push attempt to every device the greenhouse owner registered.

use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::push::{PushGateway, PushMessage, PushOutcome};
use crate::store::{Greenhouse, NewNotification, NewSensorReading, StoreGateway};

/// What happened while dispatching one alert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Row id of the notification record, `None` if the write failed.
    pub notification_id: Option<i64>,
    pub attempted: usize,
    pub delivered: usize,
    /// Sends that reported no transport, neither delivered nor failed.
    pub skipped: usize,
    pub failed: usize,
}

/// "<type> reading of <value> is out of range."
pub fn alert_text(reading_type: &str, value: f64) -> String {
    format!("{reading_type} reading of {value} is out of range.")
}

pub fn compose_alert(greenhouse: &Greenhouse, reading: &NewSensorReading) -> PushMessage {
    PushMessage {
        title: format!("{}: sensor alert", greenhouse.name),
        message: alert_text(&reading.reading_type, reading.value),
    }
}

#[derive(Clone)]
pub struct AlertDispatcher {
    store: Arc<dyn StoreGateway>,
    gateway: Arc<dyn PushGateway>,
}

impl AlertDispatcher {
    pub fn new(store: Arc<dyn StoreGateway>, gateway: Arc<dyn PushGateway>) -> Self {
        Self { store, gateway }
    }

    /// Record exactly one notification for `reading`, then try every push
    /// device of the owner. Failures are logged and counted, never returned.
    pub async fn dispatch(&self, greenhouse: &Greenhouse, reading: &NewSensorReading) -> DispatchReport {
        let alert = compose_alert(greenhouse, reading);
        let mut report = DispatchReport::default();

        info!(
            greenhouse_id = greenhouse.id,
            reading_type = %reading.reading_type,
            value = reading.value,
            "out-of-range reading detected"
        );

        match self
            .store
            .save_notification(&NewNotification {
                greenhouse_id: greenhouse.id,
                content: alert.message.clone(),
                timestamp: OffsetDateTime::now_utc(),
            })
            .await
        {
            Ok(id) => report.notification_id = Some(id),
            Err(e) => {
                error!(greenhouse_id = greenhouse.id, "alert: save_notification failed: {e:#}");
            }
        }

        let devices = match self.store.push_devices_for_user(&greenhouse.user_email).await {
            Ok(d) => d,
            Err(e) => {
                error!(user = %greenhouse.user_email, "alert: push device lookup failed: {e:#}");
                return report;
            }
        };

        if devices.is_empty() {
            info!(user = %greenhouse.user_email, "alert: no push devices registered");
        }

        for device in &devices {
            report.attempted += 1;
            match self.gateway.send(device, &alert).await {
                Ok(PushOutcome::Delivered) => report.delivered += 1,
                Ok(PushOutcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        device_id = device.id,
                        endpoint = %device.endpoint,
                        "alert: push delivery failed: {e}"
                    );
                }
            }
        }

        report
    }
}

// ===========================================================================
// Tests
// ===========================================================================
