//! Process signal handling.

use std::fmt;

use tokio::sync::broadcast;
use tracing::{debug, info};

/// Lifecycle request delivered to the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeSignal {
    /// Graceful shutdown (SIGTERM, SIGINT).
    Shutdown,
    /// Reload configuration (SIGHUP).
    Reload,
}

impl fmt::Display for NodeSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeSignal::Shutdown => write!(f, "SHUTDOWN"),
            NodeSignal::Reload => write!(f, "RELOAD"),
        }
    }
}

/// Fans OS signals out to subscribers.
#[derive(Clone)]
pub(crate) struct SignalHandler {
    sender: broadcast::Sender<NodeSignal>,
}

impl SignalHandler {
    pub(crate) fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self { sender }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<NodeSignal> {
        self.sender.subscribe()
    }

    pub(crate) fn send(&self, signal: NodeSignal) {
        debug!("Sending signal: {}", signal);
        let _ = self.sender.send(signal);
    }

    pub(crate) fn request_shutdown(&self) {
        self.send(NodeSignal::Shutdown);
    }

    pub(crate) fn request_reload(&self) {
        self.send(NodeSignal::Reload);
    }

    /// Install SIGTERM, SIGINT and SIGHUP listeners.
    #[cfg(unix)]
    pub(crate) fn install(&self) -> std::io::Result<()> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        let handler = self.clone();
        tokio::spawn(async move {
            while sigterm.recv().await.is_some() {
                info!("Received SIGTERM");
                handler.request_shutdown();
            }
        });

        let mut sigint = signal(SignalKind::interrupt())?;
        let handler = self.clone();
        tokio::spawn(async move {
            while sigint.recv().await.is_some() {
                info!("Received SIGINT");
                handler.request_shutdown();
            }
        });

        let mut sighup = signal(SignalKind::hangup())?;
        let handler = self.clone();
        tokio::spawn(async move {
            while sighup.recv().await.is_some() {
                info!("Received SIGHUP, reloading configuration");
                handler.request_reload();
            }
        });

        info!("OS signal handlers installed (SIGTERM, SIGINT, SIGHUP)");
        Ok(())
    }

    /// Only Ctrl+C is available off unix; there is no reload signal.
    #[cfg(not(unix))]
    pub(crate) fn install(&self) -> std::io::Result<()> {
        let handler = self.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C");
                handler.request_shutdown();
            }
        });

        info!("OS signal handler installed (Ctrl+C)");
        Ok(())
    }
}
