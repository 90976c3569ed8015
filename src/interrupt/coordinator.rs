//! The interrupt coordinator

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::bus::{EventBus, Payload, Subscription};
use crate::mode::{Mode, ModeController, TransitionRequest};

/// Why an interrupt was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptKind {
    /// The user explicitly cancelled (hotkey, tray, voice command).
    UserCancel,
    /// A new utterance is starting and must pre-empt the old one.
    NewUtterance,
    /// The process is shutting down.
    Shutdown,
}

/// A request to pre-empt the current mode's in-flight work.
/// Lower priority value = more urgent.
#[derive(Debug, Clone)]
pub struct InterruptRequest {
    pub kind: InterruptKind,
    pub priority: u8,
    pub source: String,
    pub at: Instant,
    pub session_id: Option<String>,
}

impl InterruptRequest {
    pub fn new(kind: InterruptKind, priority: u8, source: impl Into<String>) -> Self {
        Self {
            kind,
            priority,
            source: source.into(),
            at: Instant::now(),
            session_id: None,
        }
    }
}

/// The verdict for a submitted interrupt. Suppression is an expected
/// outcome of contention, not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accepted,
    Suppressed,
}

/// A collaborator that owns a mode's in-flight work and can stop it.
///
/// `cancel` must be idempotent and safe to call when no work is active.
#[async_trait]
pub trait WorkOwner: Send + Sync {
    fn name(&self) -> &str;
    async fn cancel(&self) -> anyhow::Result<()>;
}

struct Envelope {
    request: InterruptRequest,
    /// Absent for fire-and-forget bus submissions.
    verdict: Option<oneshot::Sender<Outcome>>,
}

/// Receives interrupts from all sources, resolves contention, and drives
/// cancellation plus the Idle transition request for the winner.
pub struct InterruptCoordinator {
    bus: Arc<EventBus>,
    controller: Arc<ModeController>,
    owners: std::sync::Mutex<HashMap<Mode, Arc<dyn WorkOwner>>>,
    tx: mpsc::UnboundedSender<Envelope>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Envelope>>>,
}

impl InterruptCoordinator {
    pub fn new(bus: Arc<EventBus>, controller: Arc<ModeController>) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            bus,
            controller,
            owners: std::sync::Mutex::new(HashMap::new()),
            tx,
            rx: Mutex::new(Some(rx)),
        })
    }

    /// Register the collaborator that owns a mode's work.
    pub fn register_owner(&self, mode: Mode, owner: Arc<dyn WorkOwner>) {
        debug!(%mode, owner = owner.name(), "work owner registered");
        self.owners.lock().unwrap().insert(mode, owner);
    }

    /// Submit an interrupt and await its verdict.
    pub async fn submit(&self, request: InterruptRequest) -> Outcome {
        let (tx, rx) = oneshot::channel();
        let envelope = Envelope {
            request,
            verdict: Some(tx),
        };
        if self.tx.send(envelope).is_err() {
            return Outcome::Suppressed;
        }
        rx.await.unwrap_or(Outcome::Suppressed)
    }

    /// Process interrupts for the process lifetime, draining the queue
    /// and the bus topic into dispatch cycles.
    pub async fn run(&self, mut bus_sub: Subscription) {
        let Some(mut rx) = self.rx.lock().await.take() else {
            warn!("interrupt coordinator already running");
            return;
        };

        info!("interrupt coordinator started");

        loop {
            let first = tokio::select! {
                envelope = rx.recv() => match envelope {
                    Some(envelope) => envelope,
                    None => break,
                },
                event = bus_sub.recv() => match event {
                    Some(event) => {
                        let Payload::InterruptRequest(request) = event.payload else {
                            continue;
                        };
                        Envelope { request, verdict: None }
                    }
                    None => break,
                },
            };

            // Everything already queued belongs to the same dispatch
            // cycle as the request that woke us.
            let mut cycle = vec![first];
            while let Ok(envelope) = rx.try_recv() {
                cycle.push(envelope);
            }
            while let Some(event) = bus_sub.try_recv() {
                if let Payload::InterruptRequest(request) = event.payload {
                    cycle.push(Envelope {
                        request,
                        verdict: None,
                    });
                }
            }

            self.resolve(cycle).await;
        }

        info!("interrupt coordinator stopped");
    }

    /// Resolve one dispatch cycle: accept the most urgent request,
    /// suppress the rest.
    async fn resolve(&self, mut cycle: Vec<Envelope>) {
        cycle.sort_by(|a, b| {
            (a.request.priority, a.request.at).cmp(&(b.request.priority, b.request.at))
        });
        let winner = cycle.remove(0);

        for loser in cycle {
            debug!(
                kind = ?loser.request.kind,
                priority = loser.request.priority,
                source = %loser.request.source,
                "interrupt suppressed"
            );
            if let Some(verdict) = loser.verdict {
                let _ = verdict.send(Outcome::Suppressed);
            }
        }

        info!(
            kind = ?winner.request.kind,
            priority = winner.request.priority,
            source = %winner.request.source,
            "interrupt accepted"
        );

        // Stop the active mode's work first. A failed stop is logged and
        // never blocks the return to Idle.
        let mode = self.controller.current_mode().await;
        let owner = self.owners.lock().unwrap().get(&mode).cloned();
        if let Some(owner) = owner {
            if let Err(e) = owner.cancel().await {
                warn!(%mode, owner = owner.name(), %e, "cancellation failed, forcing Idle anyway");
            }
        }

        self.bus.publish(Payload::ModeRequest(TransitionRequest::interrupt(
            winner.request.source.clone(),
        )));

        if let Some(verdict) = winner.verdict {
            let _ = verdict.send(Outcome::Accepted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Topic;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct MockOwner {
        cancels: AtomicUsize,
        fail: bool,
    }

    impl MockOwner {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                cancels: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl WorkOwner for MockOwner {
        fn name(&self) -> &str {
            "mock"
        }

        async fn cancel(&self) -> anyhow::Result<()> {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("device refused to stop");
            }
            Ok(())
        }
    }

    struct Harness {
        bus: Arc<EventBus>,
        controller: Arc<ModeController>,
        coordinator: Arc<InterruptCoordinator>,
    }

    /// Controller and coordinator with their run loops spawned.
    fn harness() -> Harness {
        let bus = Arc::new(EventBus::new());
        let controller = ModeController::new(Arc::clone(&bus), Duration::from_secs(45));
        let coordinator = InterruptCoordinator::new(Arc::clone(&bus), Arc::clone(&controller));

        let mode_requests = bus.subscribe(Topic::ModeRequest);
        let ctrl = Arc::clone(&controller);
        tokio::spawn(async move { ctrl.run(mode_requests).await });

        let interrupts = bus.subscribe(Topic::InterruptRequest);
        let coord = Arc::clone(&coordinator);
        tokio::spawn(async move { coord.run(interrupts).await });

        Harness {
            bus,
            controller,
            coordinator,
        }
    }

    async fn wait_for_mode(controller: &ModeController, mode: Mode) {
        for _ in 0..200 {
            if controller.current_mode().await == mode {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("mode never became {mode}");
    }

    #[tokio::test]
    async fn test_lowest_priority_value_wins_the_cycle() {
        let h = harness();
        h.controller
            .request_transition(TransitionRequest::new(Mode::Listening, "test"))
            .await
            .unwrap();

        // Queue both before the coordinator gets a chance to drain, so
        // they land in the same dispatch cycle.
        let coordinator = Arc::clone(&h.coordinator);
        let urgent = tokio::spawn(async move {
            coordinator
                .submit(InterruptRequest::new(InterruptKind::UserCancel, 1, "hotkey"))
                .await
        });
        let coordinator = Arc::clone(&h.coordinator);
        let casual = tokio::spawn(async move {
            coordinator
                .submit(InterruptRequest::new(InterruptKind::NewUtterance, 5, "voice"))
                .await
        });

        let (urgent, casual) = (urgent.await.unwrap(), casual.await.unwrap());
        // One accepted, one suppressed; with both queued in the same
        // cycle the priority-1 request must win.
        assert_eq!(
            [urgent, casual].iter().filter(|o| **o == Outcome::Accepted).count(),
            1
        );
        if urgent == Outcome::Suppressed {
            // The cycle split: the first submission was resolved alone
            // before the second arrived. Priority then never competed.
            assert_eq!(casual, Outcome::Accepted);
        } else {
            assert_eq!(casual, Outcome::Suppressed);
        }

        wait_for_mode(&h.controller, Mode::Idle).await;
    }

    #[tokio::test]
    async fn test_full_cycle_prefers_priority_over_arrival() {
        let h = harness();
        h.controller
            .request_transition(TransitionRequest::new(Mode::Listening, "test"))
            .await
            .unwrap();

        // Resolve directly so the cycle contents are deterministic.
        let (tx_a, rx_a) = oneshot::channel();
        let (tx_b, rx_b) = oneshot::channel();
        let late_but_urgent = InterruptRequest::new(InterruptKind::UserCancel, 1, "hotkey");
        let early_but_casual = InterruptRequest {
            at: late_but_urgent.at - Duration::from_millis(5),
            ..InterruptRequest::new(InterruptKind::NewUtterance, 5, "voice")
        };

        h.coordinator
            .resolve(vec![
                Envelope {
                    request: early_but_casual,
                    verdict: Some(tx_a),
                },
                Envelope {
                    request: late_but_urgent,
                    verdict: Some(tx_b),
                },
            ])
            .await;

        assert_eq!(rx_a.await.unwrap(), Outcome::Suppressed);
        assert_eq!(rx_b.await.unwrap(), Outcome::Accepted);
        wait_for_mode(&h.controller, Mode::Idle).await;
    }

    #[tokio::test]
    async fn test_equal_priority_breaks_ties_by_arrival() {
        let h = harness();
        h.controller
            .request_transition(TransitionRequest::new(Mode::Listening, "test"))
            .await
            .unwrap();

        let owner = MockOwner::new(false);
        h.coordinator
            .register_owner(Mode::Listening, owner.clone());

        let (tx_a, rx_a) = oneshot::channel();
        let (tx_b, rx_b) = oneshot::channel();
        let first = InterruptRequest::new(InterruptKind::UserCancel, 3, "first");
        let second = InterruptRequest {
            at: first.at + Duration::from_millis(5),
            ..InterruptRequest::new(InterruptKind::UserCancel, 3, "second")
        };

        h.coordinator
            .resolve(vec![
                Envelope {
                    request: second,
                    verdict: Some(tx_b),
                },
                Envelope {
                    request: first,
                    verdict: Some(tx_a),
                },
            ])
            .await;

        assert_eq!(rx_a.await.unwrap(), Outcome::Accepted);
        assert_eq!(rx_b.await.unwrap(), Outcome::Suppressed);
        // Only the winner drives cancellation.
        assert_eq!(owner.cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_accepted_interrupt_cancels_owner_and_requests_idle() {
        let h = harness();
        h.controller
            .request_transition(TransitionRequest::new(Mode::Listening, "test"))
            .await
            .unwrap();

        let owner = MockOwner::new(false);
        h.coordinator
            .register_owner(Mode::Listening, owner.clone());

        let outcome = h
            .coordinator
            .submit(InterruptRequest::new(InterruptKind::UserCancel, 1, "hotkey"))
            .await;

        assert_eq!(outcome, Outcome::Accepted);
        assert_eq!(owner.cancels.load(Ordering::SeqCst), 1);
        wait_for_mode(&h.controller, Mode::Idle).await;
    }

    #[tokio::test]
    async fn test_cancellation_failure_still_forces_idle() {
        let h = harness();
        h.controller
            .request_transition(TransitionRequest::new(Mode::Listening, "test"))
            .await
            .unwrap();

        let owner = MockOwner::new(true);
        h.coordinator
            .register_owner(Mode::Listening, owner.clone());

        let outcome = h
            .coordinator
            .submit(InterruptRequest::new(InterruptKind::UserCancel, 1, "hotkey"))
            .await;

        assert_eq!(outcome, Outcome::Accepted);
        assert_eq!(owner.cancels.load(Ordering::SeqCst), 1);
        wait_for_mode(&h.controller, Mode::Idle).await;
    }

    #[tokio::test]
    async fn test_interrupt_from_bus_topic_is_consumed() {
        let h = harness();
        h.controller
            .request_transition(TransitionRequest::new(Mode::Listening, "test"))
            .await
            .unwrap();

        h.bus
            .publish(Payload::InterruptRequest(InterruptRequest::new(
                InterruptKind::UserCancel,
                2,
                "tray",
            )));

        wait_for_mode(&h.controller, Mode::Idle).await;
    }

    #[tokio::test]
    async fn test_interrupt_while_idle_is_harmless() {
        let h = harness();
        let owner = MockOwner::new(false);
        h.coordinator.register_owner(Mode::Idle, owner.clone());

        let outcome = h
            .coordinator
            .submit(InterruptRequest::new(InterruptKind::UserCancel, 1, "hotkey"))
            .await;

        // Accepted, cancel invoked (idempotent no-op at the owner), and
        // the Idle -> Idle request is simply rejected downstream.
        assert_eq!(outcome, Outcome::Accepted);
        assert_eq!(owner.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(h.controller.current_mode().await, Mode::Idle);
        assert!(h.controller.records().await.is_empty());
    }
}
