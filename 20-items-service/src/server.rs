//! Startup, serving and shutdown.
//!
//! The service moves through four phases:
//!
//! ```text
//! Connecting ──connected──▶ Listening ──signal──▶ ShuttingDown ──drained, store closed──▶ Stopped
//!      └──────────────────────signal──────────────────────────────────────────────────────▲
//! ```
//!
//! The listener is only bound after the store accepts a connection, and the
//! store is only closed after the listener has stopped and every in-flight
//! request has finished.

use std::{future::Future, net::SocketAddr, process::ExitCode, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{net::TcpListener, select, sync::watch};
use tracing::{error, info, warn};

use crate::{
    cli::ServeArgs,
    routes::{AppState, build_router},
    store::{ItemStore, StoreConnector, StoreError},
};

/// Termination request delivered to a running server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Connecting { attempt: u32 },
    Listening(SocketAddr),
    ShuttingDown(Signal),
    Stopped,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Drained and closed the store cleanly.
    Clean,
    /// Drained, but closing the store failed.
    StoreCloseFailed,
    /// Stopped before a store connection was ever made.
    Aborted,
}

impl Outcome {
    pub fn exit_code(self) -> ExitCode {
        match self {
            Outcome::Clean | Outcome::Aborted => ExitCode::SUCCESS,
            Outcome::StoreCloseFailed => ExitCode::FAILURE,
        }
    }
}

pub struct Server {
    settings: ServeArgs,
    connector: Arc<dyn StoreConnector>,
    phase: Arc<watch::Sender<Phase>>,
}

impl Server {
    pub fn new(settings: ServeArgs, connector: Arc<dyn StoreConnector>) -> Self {
        let (phase, _) = watch::channel(Phase::Connecting { attempt: 0 });
        Self {
            settings,
            connector,
            phase: Arc::new(phase),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<Outcome>
    where
        F: Future<Output = Signal> + Send + 'static,
    {
        let Server {
            settings,
            connector,
            phase,
        } = self;

        let (signal_tx, mut signals) = watch::channel(None);
        tokio::spawn(async move {
            let signal = shutdown.await;
            let _ = signal_tx.send(Some(signal));
        });

        let store = select! {
            store = connect_with_retry(
                connector.as_ref(),
                settings.connect_timeout(),
                settings.connect_retry_delay(),
                &phase,
            ) => store,
            signal = next_signal(&mut signals) => {
                info!(?signal, "signal received before the store connected; stopping");
                phase.send_replace(Phase::Stopped);
                return Ok(Outcome::Aborted);
            }
        };

        let listener = match TcpListener::bind(settings.listen_addr()).await {
            Ok(listener) => listener,
            Err(err) => {
                close_store(store.as_ref()).await;
                phase.send_replace(Phase::Stopped);
                return Err(err)
                    .with_context(|| format!("failed to bind {}", settings.listen_addr()));
            }
        };
        let addr = listener.local_addr()?;
        info!("items-service listening on {addr}");
        phase.send_replace(Phase::Listening(addr));

        let router = build_router(AppState::new(store.clone(), &settings));
        let draining = phase.clone();
        let served = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let signal = next_signal(&mut signals).await;
            info!(?signal, "shutting down; draining in-flight requests");
            draining.send_replace(Phase::ShuttingDown(signal));
        })
        .await;

        if let Err(err) = served {
            error!(error = %err, "http server stopped with error");
        } else {
            info!("http listener closed");
        }

        let outcome = close_store(store.as_ref()).await;
        phase.send_replace(Phase::Stopped);
        Ok(outcome)
    }

    pub async fn run_until_signal(self) -> Result<Outcome> {
        self.run_until(shutdown_signal()).await
    }
}

/// Connects, retrying forever with a fixed delay.
///
/// Each attempt is bounded by `timeout`. There is no backoff and no cap:
/// the service cannot do anything useful without its store.
pub async fn connect_with_retry(
    connector: &dyn StoreConnector,
    timeout: Duration,
    delay: Duration,
    phase: &watch::Sender<Phase>,
) -> Arc<dyn ItemStore> {
    let mut attempt = 1;
    loop {
        phase.send_replace(Phase::Connecting { attempt });
        let err = match tokio::time::timeout(timeout, connector.connect()).await {
            Ok(Ok(store)) => {
                info!(attempt, "connected to store");
                return store;
            }
            Ok(Err(err)) => err,
            Err(_) => StoreError::Timeout(timeout),
        };
        warn!(attempt, error = %err, "store connection failed; retrying in {delay:?}");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

async fn close_store(store: &dyn ItemStore) -> Outcome {
    match store.close().await {
        Ok(()) => {
            info!("store connection closed");
            Outcome::Clean
        }
        Err(err) => {
            error!(error = %err, "failed to close store connection");
            Outcome::StoreCloseFailed
        }
    }
}

async fn next_signal(signals: &mut watch::Receiver<Option<Signal>>) -> Signal {
    match signals.wait_for(Option::is_some).await {
        Ok(signal) => (*signal).unwrap_or(Signal::Terminate),
        // The forwarding task is gone without reporting; treat it as a stop request.
        Err(_) => Signal::Terminate,
    }
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
pub async fn shutdown_signal() -> Signal {
    let interrupt = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = ?err, "failed to install ctrl-c handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = ?err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    select! {
        _ = interrupt => Signal::Interrupt,
        _ = terminate => Signal::Terminate,
    }
}
