//! OS signal handling.
//!
//! # Responsibilities
//! - Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM
//! - Trigger the shared shutdown signal
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - The listener also stops when shutdown is triggered elsewhere, so it
//!   never keeps the task group alive

use crate::lifecycle::shutdown::{Shutdown, ShutdownSignal};

/// Resolves on the first termination signal.
pub async fn terminate() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.map(|_| "SIGINT"),
            _ = term.recv() => Ok("SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map(|_| "SIGINT")
    }
}

/// Trigger `shutdown` on the first termination signal, or return as soon
/// as someone else triggers it.
pub async fn listen(shutdown: Shutdown, mut signal: ShutdownSignal) -> std::io::Result<()> {
    tokio::select! {
        received = terminate() => {
            let received = received?;
            tracing::info!(signal = received, "Shutdown signal received");
            shutdown.trigger();
        }
        _ = signal.cancelled() => {}
    }
    Ok(())
}
