//! Push delivery to users' registered browser endpoints.
//!
//! Web Push payload encryption is delegated to a relay service; the consumer
//! only hands it the subscription, the VAPID identity and the message.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::store::PushDevice;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushMessage {
    pub title: String,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("push relay request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("push relay rejected delivery with status {0}")]
    Rejected(u16),
    #[error("device subscription is incomplete: {0}")]
    InvalidSubscription(&'static str),
}

/// Result of a send that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The push service accepted the message for the device.
    Delivered,
    /// No transport is configured; the device was never contacted.
    Skipped,
}

#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn send(&self, device: &PushDevice, message: &PushMessage)
        -> Result<PushOutcome, PushError>;
}

/// VAPID identity and relay location, read from process configuration.
#[derive(Debug, Clone, Default)]
pub struct PushSettings {
    pub subject: String,
    pub vapid_public_key: String,
    pub vapid_private_key: String,
    pub relay_url: Option<String>,
    pub timeout: Duration,
}

/// Build the gateway the settings ask for.
pub fn gateway_from_settings(settings: &PushSettings) -> Result<Arc<dyn PushGateway>, PushError> {
    match &settings.relay_url {
        Some(url) => Ok(Arc::new(RelayPushGateway::new(url.clone(), settings)?)),
        None => {
            info!("no push relay configured; alerts will only be logged and recorded");
            Ok(Arc::new(LogPushGateway))
        }
    }
}

// ---------------------------------------------------------------------------
// Relay gateway
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RelayRequest<'a> {
    subscription: Subscription<'a>,
    vapid: Vapid<'a>,
    payload: &'a PushMessage,
}

#[derive(Serialize)]
struct Subscription<'a> {
    endpoint: &'a str,
    keys: SubscriptionKeys<'a>,
}

#[derive(Serialize)]
struct SubscriptionKeys<'a> {
    p256dh: &'a str,
    auth: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Vapid<'a> {
    subject: &'a str,
    public_key: &'a str,
    private_key: &'a str,
}

pub struct RelayPushGateway {
    http: Client,
    url: String,
    subject: String,
    public_key: String,
    private_key: String,
}

impl RelayPushGateway {
    pub fn new(url: String, settings: &PushSettings) -> Result<Self, PushError> {
        let http = Client::builder().timeout(settings.timeout).build()?;
        Ok(Self {
            http,
            url,
            subject: settings.subject.clone(),
            public_key: settings.vapid_public_key.clone(),
            private_key: settings.vapid_private_key.clone(),
        })
    }

    fn request<'a>(&'a self, device: &'a PushDevice, message: &'a PushMessage) -> RelayRequest<'a> {
        RelayRequest {
            subscription: Subscription {
                endpoint: &device.endpoint,
                keys: SubscriptionKeys {
                    p256dh: &device.p256dh,
                    auth: &device.auth,
                },
            },
            vapid: Vapid {
                subject: &self.subject,
                public_key: &self.public_key,
                private_key: &self.private_key,
            },
            payload: message,
        }
    }
}

#[async_trait]
impl PushGateway for RelayPushGateway {
    async fn send(
        &self,
        device: &PushDevice,
        message: &PushMessage,
    ) -> Result<PushOutcome, PushError> {
        check_subscription(device)?;
        debug!(endpoint = %device.endpoint, "relaying push notification");

        let resp = self
            .http
            .post(&self.url)
            .json(&self.request(device, message))
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            Ok(PushOutcome::Delivered)
        } else {
            Err(PushError::Rejected(status.as_u16()))
        }
    }
}

// ---------------------------------------------------------------------------
// Log-only gateway
// ---------------------------------------------------------------------------

pub struct LogPushGateway;

#[async_trait]
impl PushGateway for LogPushGateway {
    async fn send(
        &self,
        device: &PushDevice,
        message: &PushMessage,
    ) -> Result<PushOutcome, PushError> {
        check_subscription(device)?;
        info!(
            endpoint = %device.endpoint,
            title = %message.title,
            "push (log only): {}",
            message.message
        );
        Ok(PushOutcome::Skipped)
    }
}

fn check_subscription(device: &PushDevice) -> Result<(), PushError> {
    if device.endpoint.trim().is_empty() {
        return Err(PushError::InvalidSubscription("endpoint"));
    }
    if device.p256dh.trim().is_empty() {
        return Err(PushError::InvalidSubscription("p256dh"));
    }
    if device.auth.trim().is_empty() {
        return Err(PushError::InvalidSubscription("auth"));
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> PushDevice {
        PushDevice {
            id: 1,
            user_email: "grower@example.com".into(),
            endpoint: "https://push.example/abc".into(),
            p256dh: "BPkey".into(),
            auth: "authsecret".into(),
        }
    }

    fn message() -> PushMessage {
        PushMessage {
            title: "Backyard: sensor alert".into(),
            message: "temperature reading of 30 is out of range.".into(),
        }
    }

    fn settings(relay_url: Option<&str>) -> PushSettings {
        PushSettings {
            subject: "mailto:ops@example.com".into(),
            vapid_public_key: "pub".into(),
            vapid_private_key: "priv".into(),
            relay_url: relay_url.map(str::to_string),
            timeout: Duration::from_secs(2),
        }
    }

    #[test]
    fn relay_request_shape() {
        let gw = RelayPushGateway::new("http://relay.invalid/send".into(), &settings(None)).unwrap();
        let d = device();
        let m = message();
        let json = serde_json::to_value(gw.request(&d, &m)).unwrap();

        assert_eq!(json["subscription"]["endpoint"], "https://push.example/abc");
        assert_eq!(json["subscription"]["keys"]["p256dh"], "BPkey");
        assert_eq!(json["subscription"]["keys"]["auth"], "authsecret");
        assert_eq!(json["vapid"]["subject"], "mailto:ops@example.com");
        assert_eq!(json["vapid"]["publicKey"], "pub");
        assert_eq!(json["vapid"]["privateKey"], "priv");
        assert_eq!(json["payload"]["title"], "Backyard: sensor alert");
        assert_eq!(
            json["payload"]["message"],
            "temperature reading of 30 is out of range."
        );
    }

    #[tokio::test]
    async fn log_gateway_skips_complete_subscription() {
        let outcome = LogPushGateway.send(&device(), &message()).await.unwrap();
        assert_eq!(outcome, PushOutcome::Skipped);
    }

    #[tokio::test]
    async fn incomplete_subscription_rejected_before_io() {
        let mut d = device();
        d.auth = "".into();
        let err = LogPushGateway.send(&d, &message()).await.unwrap_err();
        assert!(matches!(err, PushError::InvalidSubscription("auth")));
    }

    #[tokio::test]
    async fn unreachable_relay_is_a_transport_error() {
        // Port 1 on loopback refuses connections.
        let gw = RelayPushGateway::new("http://127.0.0.1:1/send".into(), &settings(None)).unwrap();
        let err = gw.send(&device(), &message()).await.unwrap_err();
        assert!(matches!(err, PushError::Transport(_)), "got {err:?}");
    }

    #[test]
    fn settings_without_relay_build_log_gateway() {
        assert!(gateway_from_settings(&settings(None)).is_ok());
        assert!(gateway_from_settings(&settings(Some("http://relay.invalid/send"))).is_ok());
    }
}
