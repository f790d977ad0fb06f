//! Key session manager
//!
//! Sessions are created as soon as a key container exists, otherwise queued on
//! the `VideoContext` until provisioning drains them. Each native session is
//! driven by its own task:
//!
//! ```text
//!   Created ──generate_request──▶ AwaitingLicense ──update──▶ Updated
//!      │                               │                        │
//!      └──────── expired key / renewal suppressed / dispose ────┴──▶ Closed
//! ```
//!
//! The caller that created the session waits on a one-shot initialization
//! outcome: the first successful update, the first fetch error, or a failed
//! `generate_request`.

use crate::config::{EmeOptions, RenewalPolicy};
use crate::context::{Admission, Services, VideoContext};
use crate::error::ErrorType;
use crate::events::EmeEvent;
use crate::license::LicenseExchange;
use crate::platform::{MediaKeys, NativeSession, Player, PlayerEvent, SessionEvent};
use crate::types::{KeyStatus, KeyStatusEntry, MessageType, SessionId};
use crate::{Error, Result};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

/// Everything needed to open one key session
#[derive(Clone)]
pub struct SessionRequest {
    pub init_data_type: String,
    pub init_data: Bytes,
    pub options: Arc<EmeOptions>,
    pub exchange: LicenseExchange,
    /// Content id handed to content-id aware license sources
    pub content_id: Option<String>,
    pub key_system: String,
    pub services: Services,
}

impl std::fmt::Debug for SessionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRequest")
            .field("init_data_type", &self.init_data_type)
            .field("init_data_len", &self.init_data.len())
            .field("content_id", &self.content_id)
            .field("key_system", &self.key_system)
            .finish_non_exhaustive()
    }
}

/// Receiver for a session's initialization outcome
pub type SessionOutcome = oneshot::Receiver<Result<()>>;

/// Start a session now if the key container is ready, otherwise queue it.
///
/// A queued request resolves immediately; provisioning replays the queue in
/// arrival order. After a failed provisioning nothing is queued and the
/// provisioning error is returned.
pub async fn create_or_queue_session(context: &VideoContext, request: SessionRequest) -> Result<()> {
    match context.admit(request, false).await {
        Admission::Ready(media_keys, request) => match start_session(context, &media_keys, request) {
            Some(outcome) => wait_outcome(outcome).await,
            None => Ok(()),
        },
        Admission::Queued | Admission::Provision => Ok(()),
        Admission::Failed(message) => Err(Error::Provisioning(message)),
    }
}

/// Resolve an outcome; a session that closed before resolving counts as done
pub async fn wait_outcome(outcome: SessionOutcome) -> Result<()> {
    outcome.await.unwrap_or(Ok(()))
}

/// Create a native session and spawn its driver.
///
/// Returns `None` when the platform refuses to create the session; that
/// failure is only visible on the error bus.
pub fn start_session(
    context: &VideoContext,
    media_keys: &Arc<dyn MediaKeys>,
    request: SessionRequest,
) -> Option<SessionOutcome> {
    let handle = match media_keys.create_session() {
        Ok(handle) => handle,
        Err(e) => {
            request
                .services
                .report(&e.into(), ErrorType::FailedToCreateSession, Some(&request.key_system));
            return None;
        }
    };

    let id = SessionId::new();
    let (tx, rx) = oneshot::channel();
    let lifecycle = request.services.player.lifecycle();

    request.services.events.publish(EmeEvent::KeySessionCreated {
        session: id,
        key_system: request.key_system.clone(),
    });

    let span = info_span!("key_session", session = %id, key_system = %request.key_system);
    let driver = SessionDriver {
        id,
        context: context.clone(),
        session: handle.session,
        request,
        outcome: Some(tx),
        closed: false,
        pause: PauseClock::default(),
    };
    tokio::spawn(driver.run(handle.events, lifecycle).instrument(span));

    Some(rx)
}

/// Time spent paused since the last pause signal
#[derive(Debug, Default)]
pub struct PauseClock {
    paused_at: Option<Instant>,
}

impl PauseClock {
    /// Start counting; a repeated pause keeps the original start
    pub fn pause(&mut self) {
        if self.paused_at.is_none() {
            self.paused_at = Some(Instant::now());
        }
    }

    /// Reset to zero
    pub fn play(&mut self) {
        self.paused_at = None;
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.paused_at.map(|at| at.elapsed().as_secs()).unwrap_or(0)
    }
}

/// Whether a renewal must close the session instead of fetching a license
pub fn renewal_suppressed(policy: &RenewalPolicy, player: &dyn Player, paused_secs: u64) -> bool {
    let before_play = policy.limit_before_play && !player.has_started();
    let paused_too_long = match policy.max_pause_secs {
        Some(max) => player.paused() && paused_secs >= max,
        None => false,
    };
    before_play || paused_too_long || player.ended()
}

struct SessionDriver {
    id: SessionId,
    context: VideoContext,
    session: Arc<dyn NativeSession>,
    request: SessionRequest,
    outcome: Option<oneshot::Sender<Result<()>>>,
    closed: bool,
    pause: PauseClock,
}

impl SessionDriver {
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
        mut lifecycle: broadcast::Receiver<PlayerEvent>,
    ) {
        debug!(init_data_type = %self.request.init_data_type, "Generating license request");

        if let Err(e) = self
            .session
            .generate_request(&self.request.init_data_type, self.request.init_data.clone())
            .await
        {
            self.report(&e.into(), ErrorType::FailedToGenerateLicenseRequest);
            self.resolve(Err(Error::SessionInitialization));
        }

        let mut lifecycle_open = true;
        while !self.closed {
            tokio::select! {
                event = events.recv() => match event {
                    Some(SessionEvent::Message { message_type, message }) => {
                        self.on_message(message_type, message).await;
                    }
                    Some(SessionEvent::KeyStatusesChange { key_statuses }) => {
                        self.on_key_statuses(key_statuses).await;
                    }
                    None => break,
                },
                signal = lifecycle.recv(), if lifecycle_open => match signal {
                    Ok(signal) => self.on_player(signal).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Missed player lifecycle signals");
                    }
                    Err(RecvError::Closed) => lifecycle_open = false,
                },
            }
        }

        self.resolve(Ok(()));
        debug!(closed = self.closed, "Session driver finished");
    }

    async fn on_message(&mut self, message_type: MessageType, message: Bytes) {
        let events = &self.request.services.events;
        events.publish(EmeEvent::KeyMessage {
            session: self.id,
            message_type: message_type.clone(),
            message: message.clone(),
        });

        if !message_type.requests_license() {
            return;
        }

        if message_type == MessageType::LicenseRenewal {
            let policy = self.request.options.renewal_policy();
            let player = self.request.services.player.as_ref();
            if renewal_suppressed(&policy, player, self.pause.elapsed_secs()) {
                info!(
                    has_started = player.has_started(),
                    paused = player.paused(),
                    ended = player.ended(),
                    "Renewal suppressed, closing session"
                );
                self.close().await;
                return;
            }
        }

        let license = self
            .request
            .exchange
            .fetch_license(&self.request.options, message, self.request.content_id.as_deref())
            .await;

        match license {
            Ok(license) => match self.session.update(license).await {
                Ok(()) => {
                    self.request
                        .services
                        .events
                        .publish(EmeEvent::KeySessionUpdated { session: self.id });
                    self.resolve(Ok(()));
                }
                Err(e) => {
                    self.report(&e.into(), ErrorType::FailedToUpdateSession);
                    self.resolve(Ok(()));
                }
            },
            Err(e) => {
                if self.outcome.is_some() {
                    self.resolve(Err(e));
                } else {
                    debug!(message_type = %message_type.as_str(), "License fetch failed after initialization");
                    self.report(&e, ErrorType::FailedToRequestLicense);
                }
            }
        }
    }

    async fn on_key_statuses(&mut self, key_statuses: Vec<KeyStatusEntry>) {
        let events = &self.request.services.events;
        events.publish(EmeEvent::KeyStatusesChange {
            session: self.id,
            key_statuses: key_statuses.clone(),
        });

        let mut expired = false;
        for entry in key_statuses {
            match entry.status {
                KeyStatus::Expired => expired = true,
                KeyStatus::InternalError => {
                    warn!(key_id = ?entry.key_id, "Key reported internal-error, keeping session open");
                }
                _ => {}
            }
            events.publish(EmeEvent::KeyStatusChange {
                session: self.id,
                key_id: entry.key_id,
                status: entry.status,
            });
        }

        if expired {
            info!("Key expired, closing session");
            self.close().await;
        }
    }

    async fn on_player(&mut self, signal: PlayerEvent) {
        match signal {
            PlayerEvent::Pause => {
                if self.request.options.renewal_policy().max_pause_secs.is_some() {
                    self.pause.pause();
                }
            }
            PlayerEvent::Play => self.pause.play(),
            PlayerEvent::Dispose => {
                debug!("Player disposed, closing session");
                self.close().await;
            }
        }
    }

    /// Close once; a failed close leaves the session open for a later retry
    async fn close(&mut self) {
        if self.closed {
            return;
        }
        match self.session.close().await {
            Ok(()) => {
                self.closed = true;
                self.context.remove_session(&self.request.init_data).await;
                self.request
                    .services
                    .events
                    .publish(EmeEvent::KeySessionClosed { session: self.id });
            }
            Err(e) => self.report(&e.into(), ErrorType::FailedToCloseSession),
        }
    }

    fn resolve(&mut self, result: Result<()>) {
        if let Some(tx) = self.outcome.take() {
            let _ = tx.send(result);
        }
    }

    fn report(&self, err: &Error, error_type: ErrorType) {
        self.request
            .services
            .report(err, error_type, Some(&self.request.key_system));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct StaticPlayer {
        paused: bool,
        ended: bool,
        has_started: bool,
    }

    impl Player for StaticPlayer {
        fn paused(&self) -> bool {
            self.paused
        }

        fn ended(&self) -> bool {
            self.ended
        }

        fn has_started(&self) -> bool {
            self.has_started
        }

        fn current_source(&self) -> Option<String> {
            None
        }

        fn lifecycle(&self) -> broadcast::Receiver<PlayerEvent> {
            broadcast::channel(1).1
        }
    }

    fn player(paused: bool, ended: bool, has_started: bool) -> StaticPlayer {
        StaticPlayer { paused, ended, has_started }
    }

    #[test]
    fn test_no_policy_allows_renewal() {
        let policy = RenewalPolicy::default();
        assert!(!renewal_suppressed(&policy, &player(true, false, false), 1_000));
    }

    #[test]
    fn test_ended_always_suppresses() {
        let policy = RenewalPolicy::default();
        assert!(renewal_suppressed(&policy, &player(false, true, true), 0));
    }

    #[test]
    fn test_before_play_limit() {
        let policy = RenewalPolicy { limit_before_play: true, max_pause_secs: None };
        assert!(renewal_suppressed(&policy, &player(false, false, false), 0));
        assert!(!renewal_suppressed(&policy, &player(false, false, true), 0));
    }

    #[test]
    fn test_max_pause_limit() {
        let policy = RenewalPolicy { limit_before_play: false, max_pause_secs: Some(30) };
        assert!(!renewal_suppressed(&policy, &player(true, false, true), 29));
        assert!(renewal_suppressed(&policy, &player(true, false, true), 30));
        // Only counts while actually paused
        assert!(!renewal_suppressed(&policy, &player(false, false, true), 60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_clock() {
        let mut clock = PauseClock::default();
        assert_eq!(clock.elapsed_secs(), 0);

        clock.pause();
        tokio::time::advance(Duration::from_secs(5)).await;
        clock.pause();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(clock.elapsed_secs(), 10);

        clock.play();
        assert_eq!(clock.elapsed_secs(), 0);
    }
}
