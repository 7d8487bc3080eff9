use console::Term;
use tokio_util::sync::CancellationToken;

/// Wait for Ctrl+C, or SIGTERM on Unix.
async fn terminate_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = sigterm.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

/// Cancel `cancel` on the first shutdown signal. A second Ctrl+C exits
/// immediately with status 130.
pub(crate) fn install_shutdown_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if let Err(e) = terminate_signal().await {
            tracing::error!(error = %e, "Failed to install shutdown signal handler");
            return;
        }

        let is_tty = Term::stdout().is_term();
        if is_tty {
            eprintln!("\n\nShutdown requested, finishing running repositories...");
            eprintln!("Press Ctrl+C again to force quit.");
        } else {
            tracing::warn!("Shutdown requested, finishing running repositories");
        }

        cancel.cancel();

        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        if is_tty {
            eprintln!("Force quit!");
        }
        std::process::exit(130);
    });
}
