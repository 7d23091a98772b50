use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::mpsc;

/// Counts stop requests from signals and the console.
#[derive(Debug, Default)]
pub struct ShutdownController {
    requests: AtomicU8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownEvent {
    /// Stop accepting work, let running jobs finish.
    Graceful,
    /// Exit without waiting.
    Immediate,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one more stop request; the first is graceful, any later one is not.
    pub fn request(&self) -> ShutdownEvent {
        match self.requests.fetch_add(1, Ordering::SeqCst).saturating_add(1) {
            1 => ShutdownEvent::Graceful,
            _ => ShutdownEvent::Immediate,
        }
    }
}

#[cfg(unix)]
async fn next_signal(term: &mut Option<tokio::signal::unix::Signal>) -> bool {
    match term {
        Some(term) => tokio::select! {
            res = tokio::signal::ctrl_c() => res.is_ok(),
            got = term.recv() => got.is_some(),
        },
        None => tokio::signal::ctrl_c().await.is_ok(),
    }
}

#[cfg(not(unix))]
async fn next_signal(_: &mut Option<()>) -> bool {
    tokio::signal::ctrl_c().await.is_ok()
}

/// Forward CTRL+C (and SIGTERM on unix) as shutdown events.
pub fn spawn_signal_handler(
    shutdown: Arc<ShutdownController>,
    shutdown_tx: mpsc::UnboundedSender<ShutdownEvent>,
) {
    tokio::spawn(async move {
        #[cfg(unix)]
        let mut term =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        #[cfg(not(unix))]
        let mut term: Option<()> = None;

        while next_signal(&mut term).await {
            let event = shutdown.request();
            if shutdown_tx.send(event).is_err() || event == ShutdownEvent::Immediate {
                return;
            }
        }
    });
}
