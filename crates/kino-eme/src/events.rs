//! Event and error bus
//!
//! Every observable transition of the key acquisition state machine is an
//! `EmeEvent` on a broadcast channel. Failures are routed through an
//! `ErrorReporter`; the default one logs them and republishes them on the bus.

use crate::error::{Error, ErrorMetadata, ErrorType};
use crate::types::{serialize_base64, KeyStatus, KeyStatusEntry, MessageType, SessionId};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, warn};

/// Default channel capacity
pub const DEFAULT_CAPACITY: usize = 256;

/// Observable key acquisition events
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EmeEvent {
    /// Provisioning created the key container
    KeySystemAccessComplete { key_system: String },

    /// A native session was created
    KeySessionCreated { session: SessionId, key_system: String },

    /// A license was applied to a session
    KeySessionUpdated { session: SessionId },

    /// A session was closed
    KeySessionClosed { session: SessionId },

    /// Every message raised by a session, whatever its type
    KeyMessage {
        session: SessionId,
        message_type: MessageType,
        #[serde(serialize_with = "serialize_base64")]
        message: Bytes,
    },

    /// Full key status map after a change
    KeyStatusesChange {
        session: SessionId,
        key_statuses: Vec<KeyStatusEntry>,
    },

    /// One entry of the status map
    KeyStatusChange {
        session: SessionId,
        #[serde(serialize_with = "serialize_base64")]
        key_id: Bytes,
        status: KeyStatus,
    },

    /// A license source answered, successfully or not
    LicenseRequestAttempted { key_system: String },

    /// A reported failure
    Error(ErrorRecord),
}

impl EmeEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            EmeEvent::KeySystemAccessComplete { .. } => "keysystemaccesscomplete",
            EmeEvent::KeySessionCreated { .. } => "keysessioncreated",
            EmeEvent::KeySessionUpdated { .. } => "keysessionupdated",
            EmeEvent::KeySessionClosed { .. } => "keysessionclosed",
            EmeEvent::KeyMessage { .. } => "keymessage",
            EmeEvent::KeyStatusesChange { .. } => "keystatuseschange",
            EmeEvent::KeyStatusChange { .. } => "keystatuschange",
            EmeEvent::LicenseRequestAttempted { .. } => "licenserequestattempted",
            EmeEvent::Error(_) => "error",
        }
    }
}

/// A reported failure as published on the bus
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    /// Stable EME code, e.g. `EMEFailedToCreateMediaKeys`
    pub code: &'static str,
    pub error_type: ErrorType,
    /// Code of the underlying error
    pub error_code: &'static str,
    pub key_system: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(error: &Error, metadata: &ErrorMetadata) -> Self {
        Self {
            code: metadata.error_type.as_str(),
            error_type: metadata.error_type,
            error_code: error.error_code(),
            key_system: metadata.key_system.clone(),
            message: error.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Broadcast bus for `EmeEvent`s.
///
/// `publish` never blocks and drops events when nobody is subscribed.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<EmeEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: EmeEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to all future events; slow subscribers see `Lagged`
    pub fn subscribe(&self) -> broadcast::Receiver<EmeEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Receives every failure together with the stage it happened at
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &Error, metadata: &ErrorMetadata);
}

/// Logs failures and publishes them as `EmeEvent::Error`
#[derive(Clone, Debug)]
pub struct BusErrorReporter {
    events: EventBus,
}

impl BusErrorReporter {
    pub fn new(events: EventBus) -> Self {
        Self { events }
    }
}

impl ErrorReporter for BusErrorReporter {
    fn report(&self, err: &Error, metadata: &ErrorMetadata) {
        let key_system = metadata.key_system.as_deref().unwrap_or("unknown");
        if metadata.error_type.is_partial() {
            warn!(error_type = %metadata.error_type, key_system, error = %err, "EME failure, continuing");
        } else {
            error!(error_type = %metadata.error_type, key_system, error = %err, "EME failure");
        }
        self.events.publish(EmeEvent::Error(ErrorRecord::new(err, metadata)));
    }
}
