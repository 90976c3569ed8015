//! aria-daemon: mode orchestration daemon for the Aria voice assistant
//!
//! Runs the control plane the collaborators hang off of:
//! - Event bus as the sole inter-component communication path
//! - Mode controller owning the Idle/Listening/Processing state machine
//! - Interrupt coordinator arbitrating pre-emption by priority
//! - Session manager streaming utterances against the remote backend
//!
//! Input capture, speech recognition, screenshots, and audio playback
//! are external collaborators reached only through bus topics.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use aria_daemon::backend::TcpBackendClient;
use aria_daemon::bus::{EventBus, Topic};
use aria_daemon::config::Config;
use aria_daemon::interrupt::InterruptCoordinator;
use aria_daemon::lifecycle::ShutdownSignal;
use aria_daemon::mode::{Mode, ModeController};
use aria_daemon::session::{SessionManager, SessionWorkOwner};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "aria-daemon starting");

    // Load configuration
    let config = Config::load()?;
    info!(
        backend = %config.backend_addr,
        hardware_id = %config.hardware_id,
        timeout_secs = config.processing_timeout.as_secs(),
        "configuration loaded"
    );

    // Create shutdown signal handler
    let shutdown = ShutdownSignal::new();

    // Wire the core: bus first, everything else communicates through it
    let bus = Arc::new(EventBus::new());
    let controller = ModeController::new(Arc::clone(&bus), config.processing_timeout);
    let client = Arc::new(TcpBackendClient::new(config.backend_addr.clone()));
    let sessions = SessionManager::new(Arc::clone(&bus), client, &config);
    let coordinator = InterruptCoordinator::new(Arc::clone(&bus), Arc::clone(&controller));

    // The session manager owns Processing's in-flight work; interrupts
    // during Listening are stopped by the recognizer out of process.
    coordinator.register_owner(
        Mode::Processing,
        Arc::new(SessionWorkOwner::new(Arc::clone(&sessions))),
    );

    let mode_requests = bus.subscribe(Topic::ModeRequest);
    let interrupt_requests = bus.subscribe(Topic::InterruptRequest);
    let mode_changes = bus.subscribe(Topic::ModeChanged);

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        _ = controller.run(mode_requests) => {
            info!("mode controller exited");
        }

        _ = coordinator.run(interrupt_requests) => {
            info!("interrupt coordinator exited");
        }

        _ = sessions.run(mode_changes) => {
            info!("session manager exited");
        }

        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup: never leave a backend session open on the way out
    info!("shutting down...");
    if let Err(e) = sessions.cancel_active().await {
        warn!(%e, "failed to cancel session during shutdown");
    }

    info!("aria-daemon stopped");

    Ok(())
}
