use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::alert::DispatchReport;
use crate::broker::ConnectionState;

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

pub fn shared() -> SharedState {
    Arc::new(RwLock::new(SystemState::new()))
}

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct SystemState {
    pub started_at: Instant,
    pub connection: ConnectionState,
    pub counters: Counters,
    pub events: VecDeque<SystemEvent>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub readings_persisted: u64,
    pub readings_failed: u64,
    pub actions_persisted: u64,
    pub notifications_recorded: u64,
    pub push_delivered: u64,
    pub push_skipped: u64,
    pub push_failed: u64,
    pub dropped_malformed: u64,
    pub dropped_unknown_device: u64,
    pub dropped_unknown_topic: u64,
    pub store_errors: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Reading,
    Action,
    Alert,
    Dropped,
    Error,
    System,
}

/// Why an inbound message was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Malformed,
    UnknownDevice,
    UnknownTopic,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub broker: ConnectionState,
    pub counters: Counters,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl Default for SystemState {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemState {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            connection: ConnectionState::Disconnected,
            counters: Counters::default(),
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    /// Record a broker connection state change.
    pub fn set_connection(&mut self, state: ConnectionState) {
        if self.connection != state {
            self.connection = state;
            self.push_event(EventKind::System, format!("broker {state}"));
        }
    }

    /// Record the outcome of one sensor batch.
    pub fn record_batch(
        &mut self,
        mac: &str,
        persisted: usize,
        failed: usize,
        alerts: &[DispatchReport],
    ) {
        self.counters.readings_persisted += persisted as u64;
        self.counters.readings_failed += failed as u64;
        self.push_event(
            EventKind::Reading,
            format!("{mac}: {persisted} reading(s) stored, {failed} failed"),
        );

        for report in alerts {
            if report.notification_id.is_some() {
                self.counters.notifications_recorded += 1;
            }
            self.counters.push_delivered += report.delivered as u64;
            self.counters.push_skipped += report.skipped as u64;
            self.counters.push_failed += report.failed as u64;
            let detail = if report.skipped > 0 {
                format!(
                    "{mac}: alert pushed to {}/{} device(s), {} skipped (no relay)",
                    report.delivered, report.attempted, report.skipped
                )
            } else {
                format!(
                    "{mac}: alert pushed to {}/{} device(s)",
                    report.delivered, report.attempted
                )
            };
            self.push_event(EventKind::Alert, detail);
        }
    }

    /// Record a persisted action event.
    pub fn record_action(&mut self, mac: &str, command: &str, status: bool) {
        self.counters.actions_persisted += 1;
        self.push_event(EventKind::Action, format!("{mac}: {command} -> {status}"));
    }

    /// Record a discarded message.
    pub fn record_drop(&mut self, reason: DropReason, detail: String) {
        match reason {
            DropReason::Malformed => self.counters.dropped_malformed += 1,
            DropReason::UnknownDevice => self.counters.dropped_unknown_device += 1,
            DropReason::UnknownTopic => self.counters.dropped_unknown_topic += 1,
        }
        self.push_event(EventKind::Dropped, detail);
    }

    /// Record a store failure that lost a message.
    pub fn record_store_error(&mut self, detail: String) {
        self.counters.store_errors += 1;
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            broker: self.connection,
            counters: self.counters,
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================
