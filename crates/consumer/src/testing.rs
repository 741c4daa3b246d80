//! Test doubles shared by the pipeline and dispatcher tests.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;

use crate::db::Db;
use crate::push::{PushError, PushGateway, PushMessage, PushOutcome};
use crate::store::{
    Greenhouse, NewActionEvent, NewNotification, NewSensorReading, Preset, PushDevice,
    StoreGateway,
};

/// Records every endpoint it was asked to deliver to; fails for a fixed set.
#[derive(Default)]
pub(crate) struct RecordingGateway {
    attempts: Mutex<Vec<String>>,
    failing: HashSet<String>,
}

impl RecordingGateway {
    pub(crate) fn failing_for(endpoints: &[&str]) -> Self {
        Self {
            attempts: Mutex::new(Vec::new()),
            failing: endpoints.iter().map(|e| e.to_string()).collect(),
        }
    }

    pub(crate) fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushGateway for RecordingGateway {
    async fn send(
        &self,
        device: &PushDevice,
        _message: &PushMessage,
    ) -> Result<PushOutcome, PushError> {
        self.attempts.lock().unwrap().push(device.endpoint.clone());
        if self.failing.contains(&device.endpoint) {
            Err(PushError::Rejected(410))
        } else {
            Ok(PushOutcome::Delivered)
        }
    }
}

/// Delegates to a real [`Db`] but can be told to fail specific operations.
pub(crate) struct FlakyStore {
    inner: Db,
    fail_lookup: bool,
    fail_reading_types: HashSet<String>,
    fail_notifications: bool,
    fail_device_lookup: bool,
}

impl FlakyStore {
    pub(crate) fn new(inner: Db) -> Self {
        Self {
            inner,
            fail_lookup: false,
            fail_reading_types: HashSet::new(),
            fail_notifications: false,
            fail_device_lookup: false,
        }
    }

    pub(crate) fn fail_lookup(mut self) -> Self {
        self.fail_lookup = true;
        self
    }

    pub(crate) fn fail_readings_of(mut self, reading_type: &str) -> Self {
        self.fail_reading_types.insert(reading_type.to_string());
        self
    }

    pub(crate) fn fail_notifications(mut self) -> Self {
        self.fail_notifications = true;
        self
    }

    pub(crate) fn fail_device_lookup(mut self) -> Self {
        self.fail_device_lookup = true;
        self
    }
}

#[async_trait]
impl StoreGateway for FlakyStore {
    async fn find_greenhouse_by_address(&self, mac_address: &str) -> Result<Option<Greenhouse>> {
        if self.fail_lookup {
            bail!("store unavailable");
        }
        self.inner.find_greenhouse_by_address(mac_address).await
    }

    async fn active_preset(&self, greenhouse_id: i64) -> Result<Option<Preset>> {
        self.inner.active_preset(greenhouse_id).await
    }

    async fn save_reading(&self, reading: &NewSensorReading) -> Result<i64> {
        if self.fail_reading_types.contains(&reading.reading_type) {
            bail!("disk full");
        }
        self.inner.save_reading(reading).await
    }

    async fn save_action(&self, event: &NewActionEvent) -> Result<i64> {
        self.inner.save_action(event).await
    }

    async fn save_notification(&self, notification: &NewNotification) -> Result<i64> {
        if self.fail_notifications {
            bail!("disk full");
        }
        self.inner.save_notification(notification).await
    }

    async fn push_devices_for_user(&self, user_email: &str) -> Result<Vec<PushDevice>> {
        if self.fail_device_lookup {
            bail!("store unavailable");
        }
        self.inner.push_devices_for_user(user_email).await
    }
}
