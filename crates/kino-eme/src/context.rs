//! Per video element state
//!
//! A `VideoContext` is created by the host for every video element and passed
//! explicitly to the controller. It owns the provisioning state, the queue of
//! sessions waiting for a key container and the records of init data that
//! already have a session.

use crate::error::{Error, ErrorMetadata, ErrorType};
use crate::events::{BusErrorReporter, ErrorReporter, EventBus};
use crate::http::HttpTransport;
use crate::platform::{MediaKeys, Player, VideoElement};
use crate::session::SessionRequest;
use crate::types::SessionRecord;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Host collaborators shared by provisioning and every session
#[derive(Clone)]
pub struct Services {
    pub transport: Arc<dyn HttpTransport>,
    pub events: EventBus,
    pub reporter: Arc<dyn ErrorReporter>,
    pub player: Arc<dyn Player>,
}

impl Services {
    /// Services reporting failures on `events`
    pub fn new(transport: Arc<dyn HttpTransport>, player: Arc<dyn Player>, events: EventBus) -> Self {
        Self {
            transport,
            reporter: Arc::new(BusErrorReporter::new(events.clone())),
            events,
            player,
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub(crate) fn report(&self, err: &Error, error_type: ErrorType, key_system: Option<&str>) {
        self.reporter.report(err, &ErrorMetadata::new(error_type, key_system));
    }
}

/// Provisioning progress as seen from outside
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningState {
    Unprovisioned,
    InProgress,
    Ready,
    Failed,
}

enum MediaKeysState {
    Unprovisioned,
    InProgress,
    Ready(Arc<dyn MediaKeys>),
    Failed(String),
}

/// Outcome of offering a session request to the context
pub(crate) enum Admission {
    /// The key container is ready; start the session now
    Ready(Arc<dyn MediaKeys>, SessionRequest),
    /// Queued behind provisioning
    Queued,
    /// Queued, and the caller now owns the provisioning pipeline
    Provision,
    /// Provisioning failed earlier; nothing was queued
    Failed(String),
}

struct ContextState {
    key_system: Option<String>,
    media_keys: MediaKeysState,
    pending: VecDeque<SessionRequest>,
    records: Vec<SessionRecord>,
    source: Option<String>,
}

impl ContextState {
    fn reset(&mut self) {
        self.records.clear();
        if matches!(self.media_keys, MediaKeysState::Failed(_)) {
            self.media_keys = MediaKeysState::Unprovisioned;
            self.key_system = None;
        }
    }
}

/// State tracked for one video element
#[derive(Clone)]
pub struct VideoContext {
    video: Arc<dyn VideoElement>,
    state: Arc<Mutex<ContextState>>,
}

impl VideoContext {
    pub fn new(video: Arc<dyn VideoElement>) -> Self {
        Self {
            video,
            state: Arc::new(Mutex::new(ContextState {
                key_system: None,
                media_keys: MediaKeysState::Unprovisioned,
                pending: VecDeque::new(),
                records: Vec::new(),
                source: None,
            })),
        }
    }

    pub fn video(&self) -> &Arc<dyn VideoElement> {
        &self.video
    }

    /// Key system chosen by negotiation, once known
    pub async fn key_system(&self) -> Option<String> {
        self.state.lock().await.key_system.clone()
    }

    pub(crate) async fn set_key_system(&self, key_system: &str) {
        let mut state = self.state.lock().await;
        if state.key_system.is_none() {
            state.key_system = Some(key_system.to_string());
        }
    }

    pub async fn provisioning_state(&self) -> ProvisioningState {
        match self.state.lock().await.media_keys {
            MediaKeysState::Unprovisioned => ProvisioningState::Unprovisioned,
            MediaKeysState::InProgress => ProvisioningState::InProgress,
            MediaKeysState::Ready(_) => ProvisioningState::Ready,
            MediaKeysState::Failed(_) => ProvisioningState::Failed,
        }
    }

    /// Key container, once provisioning has produced one
    pub async fn media_keys(&self) -> Option<Arc<dyn MediaKeys>> {
        match &self.state.lock().await.media_keys {
            MediaKeysState::Ready(keys) => Some(keys.clone()),
            _ => None,
        }
    }

    /// Number of session requests waiting for the key container
    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn has_session(&self, init_data: &[u8]) -> bool {
        self.state
            .lock()
            .await
            .records
            .iter()
            .any(|record| record.matches(init_data))
    }

    /// Register init data; returns false when a record already exists
    pub async fn add_session(&self, init_data: Bytes) -> bool {
        let mut state = self.state.lock().await;
        if state.records.iter().any(|record| record.matches(&init_data)) {
            return false;
        }
        state.records.push(SessionRecord::new(init_data));
        true
    }

    /// Drop the record for init data; returns false when there was none
    pub async fn remove_session(&self, init_data: &[u8]) -> bool {
        let mut state = self.state.lock().await;
        let before = state.records.len();
        state.records.retain(|record| !record.matches(init_data));
        state.records.len() != before
    }

    pub async fn session_count(&self) -> usize {
        self.state.lock().await.records.len()
    }

    /// Track the current media source; a change resets the context.
    ///
    /// Returns true when a reset happened.
    pub async fn sync_source(&self, source: Option<&str>) -> bool {
        let mut state = self.state.lock().await;
        if state.source.as_deref() == source {
            return false;
        }
        debug!(from = ?state.source, to = ?source, "Media source changed, resetting session records");
        state.source = source.map(str::to_string);
        state.reset();
        true
    }

    /// Forget every session record and allow a failed provisioning to retry.
    ///
    /// A ready key container is kept since the element still has it attached.
    pub async fn reset(&self) {
        self.state.lock().await.reset();
    }

    pub(crate) async fn admit(&self, request: SessionRequest, claim: bool) -> Admission {
        let mut state = self.state.lock().await;
        match &state.media_keys {
            MediaKeysState::Ready(keys) => Admission::Ready(keys.clone(), request),
            MediaKeysState::Failed(message) => Admission::Failed(message.clone()),
            MediaKeysState::InProgress => {
                state.pending.push_back(request);
                Admission::Queued
            }
            MediaKeysState::Unprovisioned => {
                state.pending.push_back(request);
                if claim {
                    state.media_keys = MediaKeysState::InProgress;
                    Admission::Provision
                } else {
                    Admission::Queued
                }
            }
        }
    }

    /// Enter `InProgress`; false when provisioning already started
    pub(crate) async fn begin_provisioning(&self) -> bool {
        let mut state = self.state.lock().await;
        if matches!(state.media_keys, MediaKeysState::Unprovisioned) {
            state.media_keys = MediaKeysState::InProgress;
            true
        } else {
            false
        }
    }

    /// Mark provisioning failed and discard the queue; returns how many were dropped
    pub(crate) async fn fail_provisioning(&self, message: String) -> usize {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.media_keys = MediaKeysState::Failed(message);
        let dropped = state.pending.len();
        for request in state.pending.drain(..) {
            state.records.retain(|record| !record.matches(&request.init_data));
        }
        dropped
    }

    /// Store the key container and hand back the queue in arrival order
    pub(crate) async fn finish_provisioning(&self, keys: Arc<dyn MediaKeys>) -> Vec<SessionRequest> {
        let mut state = self.state.lock().await;
        state.media_keys = MediaKeysState::Ready(keys);
        let drained: Vec<_> = state.pending.drain(..).collect();
        info!(queued = drained.len(), "Key container ready");
        drained
    }
}

impl std::fmt::Debug for VideoContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoContext").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::NativeSessionHandle;
    use crate::PlatformError;
    use async_trait::async_trait;

    struct NullVideo;

    #[async_trait]
    impl VideoElement for NullVideo {
        async fn set_media_keys(&self, _media_keys: Arc<dyn MediaKeys>) -> std::result::Result<(), PlatformError> {
            Ok(())
        }
    }

    struct NullKeys;

    #[async_trait]
    impl MediaKeys for NullKeys {
        async fn set_server_certificate(&self, _certificate: Bytes) -> std::result::Result<(), PlatformError> {
            Ok(())
        }

        fn create_session(&self) -> std::result::Result<NativeSessionHandle, PlatformError> {
            Err(PlatformError::not_supported("no sessions"))
        }
    }

    fn context() -> VideoContext {
        VideoContext::new(Arc::new(NullVideo))
    }

    #[tokio::test]
    async fn test_records_dedupe_by_bytes() {
        let ctx = context();
        assert!(ctx.add_session(Bytes::from_static(&[1, 2, 3])).await);
        assert!(!ctx.add_session(Bytes::from(vec![1u8, 2, 3])).await);
        assert!(ctx.has_session(&[1, 2, 3]).await);
        assert_eq!(ctx.session_count().await, 1);

        assert!(ctx.remove_session(&[1, 2, 3]).await);
        assert!(!ctx.remove_session(&[1, 2, 3]).await);
        assert_eq!(ctx.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_source_change_resets_records() {
        let ctx = context();
        assert!(ctx.sync_source(Some("a.mpd")).await);
        ctx.add_session(Bytes::from_static(b"x")).await;

        assert!(!ctx.sync_source(Some("a.mpd")).await);
        assert_eq!(ctx.session_count().await, 1);

        assert!(ctx.sync_source(Some("b.mpd")).await);
        assert_eq!(ctx.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_provisioning_runs_once() {
        let ctx = context();
        assert!(ctx.begin_provisioning().await);
        assert!(!ctx.begin_provisioning().await);
        assert_eq!(ctx.provisioning_state().await, ProvisioningState::InProgress);

        let drained = ctx.finish_provisioning(Arc::new(NullKeys)).await;
        assert!(drained.is_empty());
        assert_eq!(ctx.provisioning_state().await, ProvisioningState::Ready);
        assert!(ctx.media_keys().await.is_some());
        assert!(!ctx.begin_provisioning().await);
    }

    #[tokio::test]
    async fn test_reset_after_failure_allows_retry() {
        let ctx = context();
        ctx.set_key_system("com.widevine.alpha").await;
        assert!(ctx.begin_provisioning().await);
        assert_eq!(ctx.fail_provisioning("boom".into()).await, 0);
        assert_eq!(ctx.provisioning_state().await, ProvisioningState::Failed);

        ctx.reset().await;
        assert_eq!(ctx.provisioning_state().await, ProvisioningState::Unprovisioned);
        assert!(ctx.key_system().await.is_none());
        assert!(ctx.begin_provisioning().await);
    }

    #[tokio::test]
    async fn test_reset_keeps_ready_container() {
        let ctx = context();
        ctx.set_key_system("com.widevine.alpha").await;
        ctx.begin_provisioning().await;
        ctx.finish_provisioning(Arc::new(NullKeys)).await;
        ctx.add_session(Bytes::from_static(b"x")).await;

        ctx.reset().await;
        assert_eq!(ctx.provisioning_state().await, ProvisioningState::Ready);
        assert_eq!(ctx.key_system().await.as_deref(), Some("com.widevine.alpha"));
        assert_eq!(ctx.session_count().await, 0);
    }
}
