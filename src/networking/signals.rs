use tokio::signal;
use tracing::{error, info};

/// Resolves once the process is asked to stop.
#[cfg(unix)]
pub async fn signal_for_shutdown() {
    use signal::unix::{signal, SignalKind};

    let (mut terminate_signal, mut quit_signal) =
        match (signal(SignalKind::terminate()), signal(SignalKind::quit())) {
            (Ok(terminate), Ok(quit)) => (terminate, quit),
            (Err(err), _) | (_, Err(err)) => {
                error!("error setting up signal handlers, falling back to ctrl-c: {}", err);
                signal::ctrl_c().await.ok();
                return;
            }
        };

    tokio::select! {
        _ = signal::ctrl_c() => info!("received interrupt"),
        _ = terminate_signal.recv() => info!("received terminate"),
        _ = quit_signal.recv() => info!("received quit"),
    }
}

#[cfg(not(unix))]
pub async fn signal_for_shutdown() {
    signal::ctrl_c().await.ok();
    info!("received interrupt");
}
