//! The session manager

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{BackendClient, OpenSessionRequest, ServerChunk, SessionStream};
use crate::bus::{EventBus, Payload, Subscription};
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::error::SessionError;
use crate::interrupt::WorkOwner;
use crate::mode::{Mode, TransitionRequest};

use super::session::{ChunkKind, Session, SessionState};

const SOURCE: &str = "session-manager";

/// Bookkeeping for the one session currently streaming.
struct ActiveSession {
    id: String,
    cancel: CancelToken,
    /// Latch for the Processing -> Idle request: stream end and playback
    /// completion race for it, first one wins, the other is ignored.
    settled: Arc<AtomicBool>,
}

/// Owns session lifecycles: opens the backend stream with retry, relays
/// chunks onto the bus, and derives mode-transition requests from stream
/// and playback lifecycle events.
pub struct SessionManager {
    bus: Arc<EventBus>,
    client: Arc<dyn BackendClient>,
    hardware_id: String,
    open_retry_limit: u32,
    backoff_base: Duration,
    weak: Weak<Self>,
    active: Mutex<Option<ActiveSession>>,
    sessions: std::sync::Mutex<HashMap<String, Session>>,
}

impl SessionManager {
    pub fn new(bus: Arc<EventBus>, client: Arc<dyn BackendClient>, config: &Config) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            bus,
            client,
            hardware_id: config.hardware_id.clone(),
            open_retry_limit: config.open_retry_limit,
            backoff_base: config.backoff_base,
            weak: weak.clone(),
            active: Mutex::new(None),
            sessions: std::sync::Mutex::new(HashMap::new()),
        })
    }

    /// Open a session for one utterance and start relaying its stream.
    ///
    /// On success requests Listening -> Processing and returns the
    /// session id. When every open attempt fails, publishes
    /// `SessionFailed` and requests Idle directly, bypassing Processing.
    pub async fn start_session(
        &self,
        prompt: impl Into<String>,
        image_png: Option<Vec<u8>>,
        session_id: Option<String>,
    ) -> Result<String, SessionError> {
        {
            let active = self.active.lock().await;
            if let Some(current) = active.as_ref() {
                return Err(SessionError::AlreadyActive {
                    id: current.id.clone(),
                });
            }
        }

        let id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let request = OpenSessionRequest {
            prompt: prompt.into(),
            image_png,
            hardware_id: self.hardware_id.clone(),
            session_id: id.clone(),
        };

        let stream = match self.open_with_retry(request).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(session = %id, %e, "session failed to open");
                self.bus.publish(Payload::SessionFailed {
                    session_id: id.clone(),
                    message: e.to_string(),
                });
                self.bus.publish(Payload::ModeRequest(
                    TransitionRequest::new(Mode::Idle, SOURCE).with_session(id.clone()),
                ));
                return Err(e);
            }
        };

        let cancel = CancelToken::new();
        let settled = Arc::new(AtomicBool::new(false));
        {
            let mut active = self.active.lock().await;
            if let Some(current) = active.as_ref() {
                // Lost a race with a concurrent start; the dropped
                // stream closes the backend connection.
                return Err(SessionError::AlreadyActive {
                    id: current.id.clone(),
                });
            }
            self.sessions
                .lock()
                .unwrap()
                .insert(id.clone(), Session::open(id.clone(), self.hardware_id.clone()));
            *active = Some(ActiveSession {
                id: id.clone(),
                cancel: cancel.clone(),
                settled: settled.clone(),
            });
        }

        info!(session = %id, "session started");
        self.bus.publish(Payload::ModeRequest(
            TransitionRequest::new(Mode::Processing, SOURCE).with_session(id.clone()),
        ));
        self.bus.publish(Payload::SessionStarted {
            session_id: id.clone(),
        });

        let weak = self.weak.clone();
        let relay_id = id.clone();
        tokio::spawn(async move {
            if let Some(manager) = weak.upgrade() {
                manager.relay(relay_id, stream, cancel, settled).await;
            }
        });

        Ok(id)
    }

    /// Open with exponential backoff, up to the configured limit.
    async fn open_with_retry(
        &self,
        request: OpenSessionRequest,
    ) -> Result<SessionStream, SessionError> {
        let mut delay = self.backoff_base;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.client.open_session(request.clone()).await {
                Ok(stream) => return Ok(stream),
                Err(e) if attempt >= self.open_retry_limit => {
                    return Err(SessionError::OpenExhausted {
                        attempts: attempt,
                        last: e,
                    });
                }
                Err(e) => {
                    warn!(
                        session = %request.session_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %e,
                        "session open failed, retrying"
                    );
                }
            }
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }

    /// Relay stream chunks onto the bus until a terminal frame,
    /// transport loss, or cancellation.
    async fn relay(
        &self,
        id: String,
        mut stream: SessionStream,
        cancel: CancelToken,
        settled: Arc<AtomicBool>,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // The canceller owns the bookkeeping and any mode
                    // request; just stop consuming.
                    debug!(session = %id, "relay stopped by cancellation");
                    return;
                }
                chunk = stream.next() => match chunk {
                    Some(ServerChunk::Text(text)) => {
                        self.bus.publish(Payload::SessionChunk {
                            session_id: id.clone(),
                            chunk: ChunkKind::Text(text),
                        });
                    }
                    Some(ServerChunk::Audio(data)) => {
                        self.bus.publish(Payload::SessionChunk {
                            session_id: id.clone(),
                            chunk: ChunkKind::Audio(data),
                        });
                    }
                    Some(ServerChunk::End) => {
                        self.finish(&id, &settled, SessionState::Closed, None).await;
                        return;
                    }
                    Some(ServerChunk::Error(message)) => {
                        self.finish(&id, &settled, SessionState::Cancelled, Some(message))
                            .await;
                        return;
                    }
                    None => {
                        self.finish(
                            &id,
                            &settled,
                            SessionState::Cancelled,
                            Some("stream closed unexpectedly".to_string()),
                        )
                        .await;
                        return;
                    }
                }
            }
        }
    }

    /// Terminal handling for a relay: record the outcome, publish the
    /// session event, and settle the Idle request if still unsettled.
    async fn finish(
        &self,
        id: &str,
        settled: &AtomicBool,
        state: SessionState,
        error: Option<String>,
    ) {
        {
            let mut active = self.active.lock().await;
            if active.as_ref().map(|a| a.id == id) == Some(true) {
                *active = None;
            }
        }

        if self.set_state(id, state) {
            match error {
                None => {
                    info!(session = %id, "session completed");
                    self.bus.publish(Payload::SessionCompleted {
                        session_id: id.to_string(),
                    });
                }
                Some(message) => {
                    warn!(session = %id, %message, "session failed");
                    self.bus.publish(Payload::SessionFailed {
                        session_id: id.to_string(),
                        message,
                    });
                }
            }
        }

        self.settle_once(settled, id);
    }

    /// Playback of all audio finished. If the stream has not already
    /// settled this session, close it and request Idle; otherwise a
    /// no-op.
    pub async fn notify_playback_complete(&self, session_id: &str) {
        let entry = {
            let mut active = self.active.lock().await;
            match active.as_ref() {
                Some(a) if a.id == session_id => active.take(),
                _ => None,
            }
        };

        let Some(active) = entry else {
            debug!(session = %session_id, "playback finished for inactive session");
            return;
        };

        if self.set_state(&active.id, SessionState::Closed) {
            info!(session = %active.id, "session completed by playback");
            self.bus.publish(Payload::SessionCompleted {
                session_id: active.id.clone(),
            });
        }
        // The remaining stream tail no longer matters.
        active.cancel.cancel();
        self.settle_once(&active.settled, &active.id);
    }

    /// Stop the active session, if any: cancel the relay, mark the
    /// session Cancelled, and tell the backend out-of-band.
    ///
    /// Idempotent and safe with no session active. Never publishes a
    /// mode request; that stays with the caller (interrupt coordinator
    /// or watchdog-driven mode change).
    pub async fn cancel_active(&self) -> anyhow::Result<()> {
        let entry = self.active.lock().await.take();
        let Some(active) = entry else {
            return Ok(());
        };

        active.cancel.cancel();
        if !self.set_state(&active.id, SessionState::Cancelled) {
            return Ok(());
        }
        info!(session = %active.id, "session cancelled");

        // Local teardown is already done; a failed backend cancel is the
        // caller's to log, never to block on.
        let ack = self.client.cancel_session(&self.hardware_id).await?;
        debug!(
            session = %active.id,
            accepted = ack.accepted,
            cancelled = ?ack.cancelled_session_ids,
            "backend acknowledged cancel"
        );
        Ok(())
    }

    /// The single Processing -> Idle request per session.
    fn settle_once(&self, settled: &AtomicBool, id: &str) {
        if settled.swap(true, Ordering::SeqCst) {
            debug!(session = %id, "already settled");
            return;
        }
        self.bus.publish(Payload::ModeRequest(
            TransitionRequest::new(Mode::Idle, SOURCE).with_session(id),
        ));
    }

    /// Move a session to a terminal state. Returns false when the
    /// session is unknown or already terminal; states never move
    /// backward.
    fn set_state(&self, id: &str, state: SessionState) -> bool {
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.get_mut(id) {
            Some(session) if session.state == SessionState::Open && state.is_terminal() => {
                session.state = state;
                true
            }
            Some(_) => false,
            None => {
                warn!(session = %id, "state change for unknown session");
                false
            }
        }
    }

    pub fn session_state(&self, id: &str) -> Option<SessionState> {
        self.sessions.lock().unwrap().get(id).map(|s| s.state)
    }

    pub async fn active_session_id(&self) -> Option<String> {
        self.active.lock().await.as_ref().map(|a| a.id.clone())
    }

    /// React to authoritative mode changes: returning to Idle with a
    /// session still open means the mode left Processing around us
    /// (watchdog timeout or interrupt), so cancel rather than leak it.
    pub async fn run(&self, mut mode_changes: Subscription) {
        info!("session manager started");

        while let Some(event) = mode_changes.recv().await {
            if let Payload::ModeChanged { mode: Mode::Idle } = event.payload {
                if let Err(e) = self.cancel_active().await {
                    warn!(%e, "backend cancel failed while returning to Idle");
                }
            }
        }

        info!("session manager stopped");
    }
}

/// Adapter registering the session manager as the Processing mode's
/// work owner with the interrupt coordinator.
pub struct SessionWorkOwner {
    manager: Arc<SessionManager>,
}

impl SessionWorkOwner {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl WorkOwner for SessionWorkOwner {
    fn name(&self) -> &str {
        SOURCE
    }

    async fn cancel(&self) -> anyhow::Result<()> {
        self.manager.cancel_active().await
    }
}
