//! SIGINT / SIGTERM handling.
//!
//! A signal cancels the run token. The orchestrators check it between steps,
//! and the write-suspension scope races its body against it so writes are
//! resumed before the process exits.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shutdown coordinator
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token handed to the run; cancelled when a signal arrives
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawn a task that waits for SIGINT or SIGTERM and cancels the token
    pub fn listen(&self) {
        let token = self.token.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            token.cancel();
        });
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), stopping after the current step...");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping after the current step...");
        }
    }
}
