//! The mode controller: transition table, serialization, and the
//! processing watchdog.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, Payload, Subscription};
use crate::error::ModeError;

use super::record::{Mode, TransitionKind, TransitionRecord, TransitionRequest};

/// State guarded by the controller's mutual-exclusion section.
struct Inner {
    mode: Mode,
    entered_at: Instant,
    /// Bumped on every transition; lets a stale watchdog recognize that
    /// the Processing entry it was armed for is already over.
    generation: u64,
    records: Vec<TransitionRecord>,
}

/// Owns the current mode. All transitions are serialized through one
/// async lock: a concurrent request observes either the pre- or
/// post-transition state, never anything in between, and the
/// `ModeChanged` event for transition N is enqueued to subscribers
/// before transition N+1 is evaluated.
pub struct ModeController {
    bus: Arc<EventBus>,
    processing_timeout: Duration,
    weak: Weak<Self>,
    inner: Mutex<Inner>,
}

impl ModeController {
    /// Create the controller, starting in Idle.
    pub fn new(bus: Arc<EventBus>, processing_timeout: Duration) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            bus,
            processing_timeout,
            weak: weak.clone(),
            inner: Mutex::new(Inner {
                mode: Mode::Idle,
                entered_at: Instant::now(),
                generation: 0,
                records: Vec::new(),
            }),
        })
    }

    /// The current mode. Prefer reacting to `ModeChanged` events; this
    /// accessor exists for arbitration and status queries.
    pub async fn current_mode(&self) -> Mode {
        self.inner.lock().await.mode
    }

    /// Snapshot of the transition history.
    pub async fn records(&self) -> Vec<TransitionRecord> {
        self.inner.lock().await.records.clone()
    }

    /// Validate and execute a transition.
    ///
    /// Rejected requests are discarded without side effects; accepted
    /// ones append a record and publish `ModeChanged` before the lock is
    /// released.
    pub async fn request_transition(
        &self,
        request: TransitionRequest,
    ) -> Result<TransitionRecord, ModeError> {
        let mut inner = self.inner.lock().await;
        let from = inner.mode;

        if !Self::allowed(from, request.target) {
            warn!(
                from = %from,
                to = %request.target,
                source = %request.source,
                "invalid transition rejected"
            );
            return Err(ModeError::InvalidTransition {
                from,
                to: request.target,
            });
        }

        let record = self.apply(&mut inner, request.target, request.kind, &request.source);
        Ok(record)
    }

    /// The allowed transition table.
    fn allowed(from: Mode, to: Mode) -> bool {
        matches!(
            (from, to),
            (Mode::Idle, Mode::Listening)
                | (Mode::Listening, Mode::Processing)
                | (Mode::Listening, Mode::Idle)
                | (Mode::Processing, Mode::Idle)
        )
    }

    /// Perform a validated transition while holding the lock.
    fn apply(
        &self,
        inner: &mut Inner,
        to: Mode,
        kind: TransitionKind,
        source: &str,
    ) -> TransitionRecord {
        let from = inner.mode;
        let dwell = inner.entered_at.elapsed();
        let record = TransitionRecord {
            from,
            to,
            kind,
            at: Instant::now(),
            dwell,
        };

        inner.mode = to;
        inner.entered_at = record.at;
        inner.generation += 1;
        inner.records.push(record.clone());

        info!(
            from = %from,
            to = %to,
            ?kind,
            dwell_ms = dwell.as_millis() as u64,
            source,
            "mode transition"
        );

        // Published under the lock: subscribers see change N enqueued
        // before request N+1 can be evaluated.
        self.bus.publish(Payload::ModeChanged { mode: to });

        if to == Mode::Processing {
            self.arm_watchdog(inner.generation);
        }

        record
    }

    /// Arm the Processing timeout for the given generation.
    fn arm_watchdog(&self, generation: u64) {
        let weak = self.weak.clone();
        let timeout = self.processing_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(controller) = weak.upgrade() {
                controller.force_timeout(generation).await;
            }
        });
    }

    /// Force Processing -> Idle if the watched Processing entry is still
    /// current. A no-op when the mode has already moved on.
    async fn force_timeout(&self, generation: u64) {
        let mut inner = self.inner.lock().await;
        if inner.mode != Mode::Processing || inner.generation != generation {
            debug!(generation, "watchdog expired for a finished entry");
            return;
        }

        warn!(
            timeout_secs = self.processing_timeout.as_secs(),
            "processing timed out, forcing Idle"
        );
        self.apply(&mut inner, Mode::Idle, TransitionKind::Timeout, "watchdog");
    }

    /// Consume `ModeRequest` events from the bus for the process
    /// lifetime.
    pub async fn run(&self, mut requests: Subscription) {
        info!("mode controller started in Idle");

        while let Some(event) = requests.recv().await {
            if let Payload::ModeRequest(request) = event.payload {
                if let Err(e) = self.request_transition(request).await {
                    debug!(%e, "transition request discarded");
                }
            }
        }

        info!("mode controller stopped");
    }
}
