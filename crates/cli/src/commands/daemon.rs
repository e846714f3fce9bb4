//! Daemon command: run every flow until told to stop.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use engine::{Dependencies, ObjectStore};
use nodes::{CredentialStore, EnvStore, KeyringStore};
use queue::FlowQueue;

use crate::config::Config;

pub async fn run(config: &Config, env_secrets: bool) -> Result<()> {
    let credentials: Arc<dyn CredentialStore> = if env_secrets {
        Arc::new(EnvStore)
    } else {
        Arc::new(KeyringStore)
    };
    let deps = Dependencies::new(credentials).with_secret_env(&config.secret_env);

    info!(dir = %config.dir.display(), "loading flows");
    let queue = FlowQueue::load(&config.dir, ObjectStore::with_default_kinds(), deps)
        .with_context(|| format!("cannot load flows from {}", config.dir.display()))?;
    let queue = Arc::new(queue);

    info!("starting all flows");
    queue.start_all().await;

    let shutdown = CancellationToken::new();
    let server = match &config.bind {
        Some(bind) => {
            let listener = TcpListener::bind(bind)
                .await
                .with_context(|| format!("cannot bind control surface to {bind}"))?;
            let token = shutdown.clone();
            Some(tokio::spawn(api::serve(listener, queue.clone(), async move {
                token.cancelled().await
            })))
        }
        None => None,
    };

    tokio::select! {
        signal = shutdown_signal() => {
            signal?;
            info!("os signal received, stopping all flows");
            queue.stop_all().await;
            info!("daemon exited after an os signal was received");
        }
        _ = queue.wait() => info!("daemon exited after all flow roots exited"),
    }

    shutdown.cancel();
    if let Some(server) = server {
        server.await.context("control surface task panicked")??;
    }
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = signal(SignalKind::terminate()).context("cannot listen for SIGTERM")?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r.context("cannot listen for SIGINT")?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("cannot listen for ctrl-c")?;
    Ok(())
}
