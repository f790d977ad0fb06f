//! Mock platform for integration tests
//!
//! Every platform call is recorded so tests can assert on the exact sequence
//! of CDM interactions. Native session events and player lifecycle signals
//! are injected through the same channels the real platform would use.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use kino_eme::http::{HttpRequest, HttpResponse};
use kino_eme::negotiate::KeySystemConfiguration;
use kino_eme::platform::{
    KeySystemAccess, KeySystemPlatform, MediaKeys, NativeSession, NativeSessionHandle, Player,
    PlayerEvent, SessionEvent, VideoElement,
};
use kino_eme::{
    license_fn, EmeController, EmeEvent, EmeOptions, EventBus, HttpTransport, KeySystemConfig,
    LicenseSource, MessageType, PlatformError, Services, VideoContext,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};

pub const WIDEVINE: &str = "com.widevine.alpha";
pub const PLAYREADY: &str = "com.microsoft.playready";
pub const FAIRPLAY: &str = "com.apple.fps.1_0";

// =============================================================================
// Native session
// =============================================================================

pub struct MockSession {
    events: mpsc::UnboundedSender<SessionEvent>,
    auto_request: bool,
    fail_generate: bool,
    fail_update: bool,
    fail_close: AtomicBool,
    pub generated: Mutex<Vec<(String, Bytes)>>,
    pub updates: Mutex<Vec<Bytes>>,
    pub close_calls: AtomicUsize,
}

impl MockSession {
    /// Inject a native session event
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    pub fn emit_message(&self, message_type: MessageType, message: &'static [u8]) {
        self.emit(SessionEvent::Message {
            message_type,
            message: Bytes::from_static(message),
        });
    }

    pub fn set_fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    pub fn close_count(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn init_data(&self) -> Option<Bytes> {
        self.generated.lock().unwrap().first().map(|(_, data)| data.clone())
    }
}

#[async_trait]
impl NativeSession for MockSession {
    async fn generate_request(&self, init_data_type: &str, init_data: Bytes) -> Result<(), PlatformError> {
        self.generated
            .lock()
            .unwrap()
            .push((init_data_type.to_string(), init_data));
        if self.fail_generate {
            return Err(PlatformError::invalid_state("generateRequest rejected"));
        }
        if self.auto_request {
            self.emit_message(MessageType::LicenseRequest, b"challenge");
        }
        Ok(())
    }

    async fn update(&self, license: Bytes) -> Result<(), PlatformError> {
        self.updates.lock().unwrap().push(license);
        if self.fail_update {
            return Err(PlatformError::invalid_state("update rejected"));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), PlatformError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(PlatformError::invalid_state("close rejected"));
        }
        Ok(())
    }
}

// =============================================================================
// Key container
// =============================================================================

#[derive(Default)]
pub struct MockMediaKeys {
    pub fail_create_session: AtomicBool,
    pub fail_certificate: AtomicBool,
    pub fail_generate: AtomicBool,
    pub fail_update: AtomicBool,
    /// When set, sessions do not raise a license request on their own
    pub manual_requests: AtomicBool,
    pub certificates: Mutex<Vec<Bytes>>,
    pub sessions: Mutex<Vec<Arc<MockSession>>>,
}

impl MockMediaKeys {
    pub fn session(&self, index: usize) -> Arc<MockSession> {
        self.sessions.lock().unwrap()[index].clone()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Init data of every created session in creation order
    pub fn generated_init_data(&self) -> Vec<Bytes> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .filter_map(|session| session.init_data())
            .collect()
    }
}

#[async_trait]
impl MediaKeys for MockMediaKeys {
    async fn set_server_certificate(&self, certificate: Bytes) -> Result<(), PlatformError> {
        self.certificates.lock().unwrap().push(certificate);
        if self.fail_certificate.load(Ordering::SeqCst) {
            return Err(PlatformError::not_supported("certificate rejected"));
        }
        Ok(())
    }

    fn create_session(&self) -> Result<NativeSessionHandle, PlatformError> {
        if self.fail_create_session.load(Ordering::SeqCst) {
            return Err(PlatformError::invalid_state("createSession failed"));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(MockSession {
            events: tx,
            auto_request: !self.manual_requests.load(Ordering::SeqCst),
            fail_generate: self.fail_generate.load(Ordering::SeqCst),
            fail_update: self.fail_update.load(Ordering::SeqCst),
            fail_close: AtomicBool::new(false),
            generated: Mutex::new(Vec::new()),
            updates: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
        });
        self.sessions.lock().unwrap().push(session.clone());
        Ok(NativeSessionHandle::new(session, rx))
    }
}

// =============================================================================
// Platform
// =============================================================================

pub struct MockPlatform {
    pub accepted: Mutex<Vec<String>>,
    pub queries: Mutex<Vec<String>>,
    pub media_keys: Arc<MockMediaKeys>,
    /// Rejection returned by `create_media_keys`
    pub create_keys_error: Mutex<Option<PlatformError>>,
}

impl MockPlatform {
    pub fn new(accepted: &[&str]) -> Self {
        Self {
            accepted: Mutex::new(accepted.iter().map(|s| s.to_string()).collect()),
            queries: Mutex::new(Vec::new()),
            media_keys: Arc::new(MockMediaKeys::default()),
            create_keys_error: Mutex::new(None),
        }
    }
}

struct MockAccess {
    key_system: String,
    media_keys: Arc<MockMediaKeys>,
    error: Option<PlatformError>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl KeySystemAccess for MockAccess {
    fn key_system(&self) -> &str {
        &self.key_system
    }

    async fn create_media_keys(&self) -> Result<Arc<dyn MediaKeys>, PlatformError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.error {
            Some(error) => Err(error.clone()),
            None => Ok(self.media_keys.clone() as Arc<dyn MediaKeys>),
        }
    }
}

/// Platform handle that shares counters with the test
pub struct SharedPlatform {
    pub inner: Arc<MockPlatform>,
    create_calls: Arc<AtomicUsize>,
}

impl SharedPlatform {
    pub fn create_keys_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeySystemPlatform for SharedPlatform {
    async fn request_access(
        &self,
        key_system: &str,
        _configurations: &[KeySystemConfiguration],
    ) -> Result<Arc<dyn KeySystemAccess>, PlatformError> {
        self.inner.queries.lock().unwrap().push(key_system.to_string());
        let accepted = self.inner.accepted.lock().unwrap().iter().any(|k| k == key_system);
        if !accepted {
            return Err(PlatformError::not_supported(format!("{key_system} unavailable")));
        }
        Ok(Arc::new(MockAccess {
            key_system: key_system.to_string(),
            media_keys: self.inner.media_keys.clone(),
            error: self.inner.create_keys_error.lock().unwrap().clone(),
            calls: self.create_calls.clone(),
        }))
    }
}

// =============================================================================
// Video element and player
// =============================================================================

#[derive(Default)]
pub struct MockVideo {
    pub fail_attach: AtomicBool,
    pub attach_calls: AtomicUsize,
}

#[async_trait]
impl VideoElement for MockVideo {
    async fn set_media_keys(&self, _media_keys: Arc<dyn MediaKeys>) -> Result<(), PlatformError> {
        self.attach_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_attach.load(Ordering::SeqCst) {
            return Err(PlatformError::new("NotAllowedError", "setMediaKeys rejected"));
        }
        Ok(())
    }
}

pub struct MockPlayer {
    pub paused: AtomicBool,
    pub ended: AtomicBool,
    pub has_started: AtomicBool,
    pub source: Mutex<Option<String>>,
    lifecycle: broadcast::Sender<PlayerEvent>,
}

impl MockPlayer {
    pub fn new() -> Self {
        let (lifecycle, _) = broadcast::channel(16);
        Self {
            paused: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            has_started: AtomicBool::new(true),
            source: Mutex::new(Some("https://cdn.example/title-1.mpd".to_string())),
            lifecycle,
        }
    }

    pub fn emit(&self, event: PlayerEvent) {
        let _ = self.lifecycle.send(event);
    }

    pub fn set_source(&self, source: &str) {
        *self.source.lock().unwrap() = Some(source.to_string());
    }
}

impl Player for MockPlayer {
    fn paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    fn has_started(&self) -> bool {
        self.has_started.load(Ordering::SeqCst)
    }

    fn current_source(&self) -> Option<String> {
        self.source.lock().unwrap().clone()
    }

    fn lifecycle(&self) -> broadcast::Receiver<PlayerEvent> {
        self.lifecycle.subscribe()
    }
}

// =============================================================================
// HTTP
// =============================================================================

/// Records requests and answers each with the configured status and body
pub struct MockTransport {
    pub status: u16,
    pub body: Bytes,
    pub requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new(status: u16, body: &'static [u8]) -> Self {
        Self {
            status,
            body: Bytes::from_static(body),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> kino_eme::Result<HttpResponse> {
        self.requests.lock().unwrap().push(request);
        Ok(HttpResponse {
            status: self.status,
            body: self.body.clone(),
        })
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub platform: Arc<SharedPlatform>,
    pub keys: Arc<MockMediaKeys>,
    pub video: Arc<MockVideo>,
    pub player: Arc<MockPlayer>,
    pub transport: Arc<MockTransport>,
    pub events: EventBus,
    pub context: VideoContext,
    pub license_calls: Arc<AtomicUsize>,
}

impl Harness {
    pub fn new(accepted: &[&str]) -> Self {
        let inner = Arc::new(MockPlatform::new(accepted));
        let keys = inner.media_keys.clone();
        let video = Arc::new(MockVideo::default());
        Self {
            platform: Arc::new(SharedPlatform {
                inner,
                create_calls: Arc::new(AtomicUsize::new(0)),
            }),
            keys,
            context: VideoContext::new(video.clone()),
            video,
            player: Arc::new(MockPlayer::new()),
            transport: Arc::new(MockTransport::new(200, b"license")),
            events: EventBus::default(),
            license_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn services(&self) -> Services {
        Services::new(self.transport.clone(), self.player.clone(), self.events.clone())
    }

    pub fn controller(&self, options: EmeOptions) -> EmeController {
        EmeController::new(options, self.platform.clone(), self.services())
    }

    /// License source answering `license` and counting calls
    pub fn counting_license(&self) -> Arc<dyn LicenseSource> {
        let calls = self.license_calls.clone();
        license_fn(move |_, _, done| {
            calls.fetch_add(1, Ordering::SeqCst);
            done(Ok(Bytes::from_static(b"license")));
        })
    }

    /// Widevine options backed by `counting_license`
    pub fn widevine(&self) -> EmeOptions {
        EmeOptions::new().with_key_system(
            WIDEVINE,
            KeySystemConfig::new().with_license_source(self.counting_license()),
        )
    }

    pub fn license_count(&self) -> usize {
        self.license_calls.load(Ordering::SeqCst)
    }

    pub fn create_session_count(&self) -> usize {
        self.keys.session_count()
    }
}

/// Let spawned session drivers run until they block
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

/// Drain everything currently buffered on a subscription
pub fn drain(rx: &mut broadcast::Receiver<EmeEvent>) -> Vec<EmeEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn names(events: &[EmeEvent]) -> Vec<&'static str> {
    events.iter().map(EmeEvent::name).collect()
}

pub fn count(events: &[EmeEvent], name: &str) -> usize {
    events.iter().filter(|event| event.name() == name).count()
}

/// Error codes published on the bus, in order
pub fn error_codes(events: &[EmeEvent]) -> Vec<&'static str> {
    events
        .iter()
        .filter_map(|event| match event {
            EmeEvent::Error(record) => Some(record.code),
            _ => None,
        })
        .collect()
}
