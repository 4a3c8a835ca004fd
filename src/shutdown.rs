//! Graceful shutdown signal handling

use std::io;

use thiserror::Error;
use tokio::signal;
use tokio::sync::watch;

#[derive(Debug, Error)]
pub enum ShutdownSignalError {
    #[error("failed to install Ctrl+C handler: {0}")]
    CtrlC(#[source] io::Error),

    #[cfg(unix)]
    #[error("failed to install SIGTERM handler: {0}")]
    SigTerm(#[source] io::Error),
}

/// Resolves once Ctrl+C or SIGTERM arrives.
pub async fn wait_for_signal() -> Result<(), ShutdownSignalError> {
    let ctrl_c = async { signal::ctrl_c().await.map_err(ShutdownSignalError::CtrlC) };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .map_err(ShutdownSignalError::SigTerm)?
            .recv()
            .await;
        Ok::<(), ShutdownSignalError>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<(), ShutdownSignalError>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            tracing::info!("ctrl_c signal received");
        }
        result = terminate => {
            result?;
            tracing::info!("terminate signal received");
        }
    };
    Ok(())
}

/// Fans one shutdown signal out to every listener.
#[derive(Clone)]
pub struct Shutdown {
    receiver: watch::Receiver<bool>,
}

impl Shutdown {
    /// Installs the signal handlers on a background task.
    pub fn install() -> Self {
        let (sender, receiver) = watch::channel(false);
        tokio::spawn(async move {
            if let Err(err) = wait_for_signal().await {
                tracing::error!(error = %err, "signal handler failed; shutting down");
            }
            let _ = sender.send(true);
        });
        Self { receiver }
    }

    pub async fn wait(mut self) {
        while !*self.receiver.borrow_and_update() {
            if self.receiver.changed().await.is_err() {
                return;
            }
        }
    }
}
