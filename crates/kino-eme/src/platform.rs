//! Platform and host collaborator interfaces
//!
//! Everything the state machine needs from the CDM, the video element and the
//! player is expressed as a trait here. Native session events are delivered
//! through a channel handed out when the session is created, so the state
//! machine never depends on a particular event emitter.

use crate::negotiate::KeySystemConfiguration;
use crate::types::{KeyStatusEntry, MessageType};
use crate::PlatformError;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// Platform capability query
#[async_trait]
pub trait KeySystemPlatform: Send + Sync {
    /// Request access to `key_system` with the given capability query
    async fn request_access(
        &self,
        key_system: &str,
        configurations: &[KeySystemConfiguration],
    ) -> Result<Arc<dyn KeySystemAccess>, PlatformError>;
}

/// Access handle for a negotiated key system
#[async_trait]
pub trait KeySystemAccess: Send + Sync {
    fn key_system(&self) -> &str;

    /// Create the key container for this key system
    async fn create_media_keys(&self) -> Result<Arc<dyn MediaKeys>, PlatformError>;
}

/// Key container
#[async_trait]
pub trait MediaKeys: Send + Sync {
    async fn set_server_certificate(&self, certificate: Bytes) -> Result<(), PlatformError>;

    /// Create a native session; this is synchronous on every platform
    fn create_session(&self) -> Result<NativeSessionHandle, PlatformError>;
}

/// Events raised by a native session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Message {
        message_type: MessageType,
        message: Bytes,
    },
    /// Snapshot of every key status at the time of the change
    KeyStatusesChange { key_statuses: Vec<KeyStatusEntry> },
}

/// A freshly created native session plus its event stream
pub struct NativeSessionHandle {
    pub session: Arc<dyn NativeSession>,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl NativeSessionHandle {
    pub fn new(session: Arc<dyn NativeSession>, events: mpsc::UnboundedReceiver<SessionEvent>) -> Self {
        Self { session, events }
    }
}

/// Native decryption session
#[async_trait]
pub trait NativeSession: Send + Sync {
    async fn generate_request(&self, init_data_type: &str, init_data: Bytes) -> Result<(), PlatformError>;

    async fn update(&self, license: Bytes) -> Result<(), PlatformError>;

    async fn close(&self) -> Result<(), PlatformError>;
}

/// Video element the key container is attached to
#[async_trait]
pub trait VideoElement: Send + Sync {
    async fn set_media_keys(&self, media_keys: Arc<dyn MediaKeys>) -> Result<(), PlatformError>;
}

/// Player lifecycle signals relevant to key sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    Pause,
    Play,
    Dispose,
}

/// Playback state supplied by the host player
pub trait Player: Send + Sync {
    fn paused(&self) -> bool;

    fn ended(&self) -> bool;

    fn has_started(&self) -> bool;

    /// Identity of the current media source, used to detect source changes
    fn current_source(&self) -> Option<String>;

    /// Subscribe to pause/play/dispose signals
    fn lifecycle(&self) -> broadcast::Receiver<PlayerEvent>;
}
